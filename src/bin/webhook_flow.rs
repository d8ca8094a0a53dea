use std::{net::SocketAddr, path::PathBuf, process, sync::Arc};

use clap::Parser;
use encephalon_rs::{
    webhook, Config, DicomFile, EncephalonClient, EncephalonError, LogLevel, NewStudy, Product,
    ScanOutcome, SignaturePolicy, WebhookReceiver,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to DICOM file(s) or directories
    #[clap(required = true)]
    dicoms: Vec<PathBuf>,
    /// Public URL the remote will POST notifications to
    #[clap(short, long)]
    webhook_url: String,
    /// Local address the notification server listens on
    #[clap(short, long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
    /// Path of the notification route
    #[clap(long, default_value = "/webhook")]
    path: String,
    /// Header carrying an HMAC-SHA256 signature of the body, keyed by the endpoint token
    #[clap(long)]
    verify_signature: Option<String>,
    /// Descend into subdirectories
    #[clap(short, long)]
    recursive: bool,
    /// Age of the patient
    #[clap(long)]
    age: u32,
    /// Name of the patient
    #[clap(long)]
    name: Option<String>,
    /// Product to run, the remote default applies when omitted
    #[arg(value_enum)]
    #[clap(short, long)]
    product: Option<Product>,
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

    encephalon_rs::init_tracing(&["webhook_flow"], args.log_level, args.timestamp);

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

    match run(&args, config, &dicom_list).await {
        Ok(Some(ScanOutcome::Completed { scan_id, report })) => {
            info!("Scan {} completed", scan_id);
            match serde_json::to_string_pretty(&report) {
                Ok(report) => println!("{}", report),
                Err(e) => warn!("Report could not be printed: {}", e),
            }
        }
        Ok(Some(ScanOutcome::Failed { scan_id, detail })) => {
            error!(
                "Scan {} failed: {}",
                scan_id,
                detail.as_deref().unwrap_or("no detail given")
            );
            process::exit(1);
        }
        Ok(None) => {
            warn!("Stopped before the scan settled");
            process::exit(1);
        }
        Err(e) => {
            error!("Error: {}", e);
            process::exit(1);
        }
    }
}

async fn run(
    args: &Args,
    config: Config,
    dicom_list: &[DicomFile],
) -> Result<Option<ScanOutcome>, EncephalonError> {
    let client = EncephalonClient::new(config)?;

    let endpoint = webhook::register_endpoint(&client, &args.webhook_url).await?;

    let (receiver, mut outcomes) = WebhookReceiver::new(client.clone());
    let receiver = match &args.verify_signature {
        Some(header) => receiver.with_signature(SignaturePolicy::hmac_sha256(
            endpoint.token.clone(),
            header.clone(),
        )),
        None => receiver,
    };
    let receiver = Arc::new(receiver);

    let listener = TcpListener::bind(args.bind).await?;
    info!(
        "Listening for notifications on {}{}",
        listener.local_addr()?,
        args.path
    );
    let shutdown = CancellationToken::new();
    let server = {
        let app = webhook::router(Arc::clone(&receiver), &args.path);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        })
    };

    let study = client
        .create_study(&NewStudy {
            age: args.age,
            name: args.name.clone(),
            ..Default::default()
        })
        .await?;
    info!("Study {} created", study.uuid);

    for dicom in dicom_list {
        let uploaded = client.upload_dicom(&study.uuid, &dicom.path).await?;
        info!("{} uploaded as {}", dicom.path.display(), uploaded.uuid);
    }

    let scan = client.create_scan(&study.uuid, args.product).await?;
    receiver.track(&scan.uuid).await;
    // A notification sent before `track` was rejected with 404 for good.
    if receiver.reconcile(&scan.uuid).await?.is_none() {
        info!("Scan {} started, waiting for its notification", scan.uuid);
    }

    let outcome = tokio::select! {
        outcome = outcomes.recv() => outcome,
        _ = tokio::signal::ctrl_c() => None,
    };

    shutdown.cancel();
    match server.await {
        Ok(Err(e)) => warn!("Notification server stopped with an error: {}", e),
        Err(e) => warn!("Notification server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(outcome)
}
