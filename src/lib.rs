//! # encephalon_rs
//! ## Before you begin
//! This library is intended to be used with the Encephalon API, a cardiac imaging AI analysis
//! service. To use it you need an API token and the base URL of the Encephalon environment you
//! wish to use. The binaries read them from the `API` and `API_TOKEN` environment variables, the
//! library only ever takes them through a [Config].
//!
//! ## Description
//! **encephalon_rs** is a client library in Rust for the Encephalon API. It creates patient
//! studies, uploads echocardiography DICOM files, starts AI analyses (scans) and fetches the
//! resulting reports: measurements, pathology findings and conclusions.
//!
//! An analysis runs asynchronously on the remote. Its completion can be tracked in two ways:
//!
//! 1. Polling, with [ScanTracker::await_completion], for interactive applications.
//! 2. Webhooks, with [register_endpoint] and a [WebhookReceiver] served by [webhook::router], for
//!    server-to-server integrations.
//!
//! Every REST resource is reachable through [EncephalonClient], both through generic
//! `list`/`get`/`create`/`update`/`delete` methods taking a [Resource] and through typed wrappers.
//!
//! ## Example
//! ```rust no_run
//! use std::{path::Path, time::Duration};
//!
//! use encephalon_rs::{Config, EncephalonClient, NewStudy, PollOptions, ScanStatus, ScanTracker};
//!
//! #[tokio::main]
//! pub async fn main() -> encephalon_rs::Result<()> {
//!     let client = EncephalonClient::new(Config::from_env()?)?;
//!
//!     let study = client
//!         .create_study(&NewStudy {
//!             age: 45,
//!             name: Some("John Doe".to_string()),
//!             ..Default::default()
//!         })
//!         .await?;
//!     client.upload_dicom(&study.uuid, Path::new("plax_example.dcm")).await?;
//!
//!     let tracker = ScanTracker::new(client.clone());
//!     let scan = tracker.create_job(&study.uuid, None).await?;
//!     let options = PollOptions::new(Duration::from_secs(600), Duration::from_secs(10));
//!     let scan = tracker.await_completion(&scan.uuid, options).await?;
//!
//!     if scan.status == ScanStatus::Completed {
//!         if let Some(report_uuid) = scan.report {
//!             let report = client.get_report(&report_uuid).await?;
//!             println!("{:?}", report.conclusions);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod dicom;
mod error;
mod logging;
mod scan;
mod structs;
pub mod webhook;

pub use client::{AuthScheme, EncephalonClient, Resource};
pub use config::{Config, API_TOKEN_VAR, API_URL_VAR};
pub use dicom::{check_study_uids, collect_dicom_files, inspect_dicom, DicomFile};
pub use error::{EncephalonError, Result};
pub use logging::{env_filter, init_tracing, LogLevel};
pub use scan::{PollOptions, ScanApi, ScanTracker};
pub use structs::{
    ApiVersion, Dicom, EnumeratedConclusion, ListQuery, MeasurementDefinition, MeasurementResult,
    NewMeasurement, NewScan, NewStudy, Page, Product, Report, ReportWarnings, Scan, ScanStatus,
    Sex, Study, StudyUpdate, UserMeasurement, WarningMessage, WebhookEndpoint, WebhookUrl,
};
pub use webhook::{
    register_endpoint, Handled, ReportSummary, ScanOutcome, SignaturePolicy, WebhookNotification,
    WebhookReceiver,
};
