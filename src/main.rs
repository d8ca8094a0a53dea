use std::{path::PathBuf, process, time::Duration};

use clap::Parser;
use encephalon_rs::{
    Config, DicomFile, EncephalonClient, EncephalonError, LogLevel, NewStudy, PollOptions,
    Product, Report, ScanStatus, ScanTracker, Sex,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to DICOM file(s) or directories
    #[clap(required = true)]
    dicoms: Vec<PathBuf>,
    /// Descend into subdirectories
    #[clap(short, long)]
    recursive: bool,
    /// Age of the patient
    #[clap(long)]
    age: u32,
    /// Name of the patient
    #[clap(long)]
    name: Option<String>,
    /// Height of the patient in inches
    #[clap(long)]
    height: Option<f64>,
    /// Weight of the patient in pounds
    #[clap(long)]
    weight: Option<f64>,
    /// Sex of the patient
    #[arg(value_enum)]
    #[clap(long)]
    sex: Option<Sex>,
    /// Product to run, the remote default applies when omitted
    #[arg(value_enum)]
    #[clap(short, long)]
    product: Option<Product>,
    /// Seconds to wait for the analysis before giving up
    #[clap(short, long, default_value_t = 300)]
    timeout: u64,
    /// Seconds between two status checks
    #[clap(short = 'i', long, default_value_t = 5)]
    poll_interval: u64,
    /// Override the API token from the environment variable
    #[clap(short = 'k', long)]
    api_key: Option<String>,
    /// Override the API URL from the environment variable
    #[clap(short, long)]
    api_url: Option<String>,
    /// Set the log level
    #[arg(value_enum)]
    #[clap(short = 'L', long, default_value = "info")]
    log_level: LogLevel,
    /// Display timestamps with log messages
    #[clap(short = 'T', long)]
    timestamp: bool,
}

#[tokio::main]
pub async fn main() {
    let args = Args::parse();

    encephalon_rs::init_tracing(&[], args.log_level, args.timestamp);

    let config = match Config::from_env_with_overrides(args.api_url.clone(), args.api_key.clone()) {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {}", e);
            process::exit(1);
        }
    };

    let dicom_list = encephalon_rs::collect_dicom_files(&args.dicoms, args.recursive);
    if dicom_list.is_empty() {
        error!("No valid DICOM files found at the specified path(s), exiting.");
        process::exit(1);
    }
    match encephalon_rs::check_study_uids(&dicom_list) {
        Ok(study_uid) => info!("{} file(s) from study {}", dicom_list.len(), study_uid),
        Err(e) => {
            error!("Error: {}", e);
            process::exit(1);
        }
    }

    if let Err(e) = run(&args, config, &dicom_list).await {
        error!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: &Args, config: Config, dicom_list: &[DicomFile]) -> Result<(), EncephalonError> {
    let client = EncephalonClient::new(config)?;

    let study = client
        .create_study(&NewStudy {
            age: args.age,
            name: args.name.clone(),
            height: args.height,
            weight: args.weight,
            sex: args.sex,
        })
        .await?;
    info!("Study {} created", study.uuid);

    for dicom in dicom_list {
        let uploaded = client.upload_dicom(&study.uuid, &dicom.path).await?;
        info!("{} uploaded as {}", dicom.path.display(), uploaded.uuid);
    }

    let tracker = ScanTracker::new(client.clone());
    let scan = tracker.create_job(&study.uuid, args.product).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no longer waiting for the analysis");
            ctrl_c.cancel();
        }
    });

    let options = PollOptions::new(
        Duration::from_secs(args.timeout),
        Duration::from_secs(args.poll_interval),
    );
    let mut last_status = None;
    let scan = tracker
        .await_completion_with(&scan.uuid, options, &cancel, |scan| {
            if last_status != Some(scan.status) {
                info!(
                    "Scan {} is {} ({:.0}%)",
                    scan.uuid,
                    scan.status,
                    scan.progress_fraction() * 100.0
                );
                last_status = Some(scan.status);
            }
        })
        .await?;

    match scan.status {
        ScanStatus::Completed => match &scan.report {
            Some(report_uuid) => {
                let report = client.get_report(report_uuid).await?;
                print_report(&report);
            }
            None => warn!("Scan {} completed without a report", scan.uuid),
        },
        _ => {
            error!(
                "Analysis failed: {}",
                scan.state.as_deref().unwrap_or("no detail given")
            );
            process::exit(1);
        }
    }

    Ok(())
}

fn print_report(report: &Report) {
    match &report.version {
        Some(version) => println!("Report {} (version {})", report.uuid, version),
        None => println!("Report {}", report.uuid),
    }
    if let Some(name) = report.study_name() {
        println!("Study: {}", name);
    }
    if let Some(conclusions) = &report.conclusions {
        println!("Conclusions: {}", conclusions);
    }
    let mut enumerated = report.enumerated_conclusions.clone();
    enumerated.sort_by_key(|c| c.order);
    for conclusion in enumerated {
        println!("  {}. {}", conclusion.order, conclusion.text);
    }
    println!(
        "{} diameter and {} segmentation measurement(s), {} pathology finding(s)",
        report.diameter_measurements.len(),
        report.segmentation_measurements.len(),
        report.pathology_conclusions.len()
    );
    for measurement in report
        .diameter_measurements
        .iter()
        .chain(report.segmentation_measurements.iter())
        .filter(|m| m.flag == Some(true))
    {
        println!(
            "  Out of range: {} = {}",
            measurement
                .measurement
                .acronym
                .as_deref()
                .unwrap_or(&measurement.measurement.key),
            measurement
                .value
                .map(|v| v.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
    if let Some(warnings) = report.warnings.as_ref().filter(|w| !w.is_empty()) {
        for warning in warnings
            .low_quality
            .iter()
            .chain(warnings.viewport_not_found.iter())
            .chain(warnings.diameter_outside_range.iter())
            .chain(warnings.other.iter())
        {
            println!("Warning: {}", warning.message);
        }
    }
}
