use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// AI analysis product run by a scan.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Product {
    #[default]
    Echomeasure,
    Cardiovision,
    Echogpt,
    Mitralvision,
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Product::Echomeasure => "ECHOMEASURE",
            Product::Cardiovision => "CARDIOVISION",
            Product::Echogpt => "ECHOGPT",
            Product::Mitralvision => "MITRALVISION",
        };
        f.write_str(s)
    }
}

/// Status of a scan as reported by the remote.
///
/// `PENDING -> STARTED -> COMPLETED | FAILED`. Transitions happen remotely
/// only; the last two states are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Pending,
    Started,
    Completed,
    Failed,
    /// A status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Maps a raw status string, unknown values land on [ScanStatus::Unknown].
    pub fn from_wire(status: &str) -> ScanStatus {
        match status {
            "PENDING" => ScanStatus::Pending,
            "STARTED" => ScanStatus::Started,
            "COMPLETED" => ScanStatus::Completed,
            "FAILED" => ScanStatus::Failed,
            _ => ScanStatus::Unknown,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::Pending => "PENDING",
            ScanStatus::Started => "STARTED",
            ScanStatus::Completed => "COMPLETED",
            ScanStatus::Failed => "FAILED",
            ScanStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One run of the AI pipeline against the DICOM files of a study.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Scan {
    pub uuid: String,
    pub study: String,
    #[serde(default)]
    pub product: Product,
    pub status: ScanStatus,
    /// Report uuid, only set once the scan is completed.
    pub report: Option<String>,
    #[serde(default)]
    pub number_of_available_dicoms: u64,
    #[serde(default)]
    pub number_of_dicoms_scanned: u64,
    pub total_inference_time: Option<Value>,
    /// Failure detail.
    pub state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Scan {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fraction of the available DICOM files already analyzed, in `[0, 1]`.
    ///
    /// A scan without any available DICOM reports `0.0`.
    pub fn progress_fraction(&self) -> f64 {
        if self.number_of_available_dicoms == 0 {
            return 0.0;
        }
        let fraction =
            self.number_of_dicoms_scanned as f64 / self.number_of_available_dicoms as f64;
        fraction.min(1.0)
    }
}

/// Body of `POST /api/v2/scans/`.
#[derive(Serialize, Debug, Clone)]
pub struct NewScan {
    pub study: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sex {
    Male,
    Female,
}

/// A patient study, the container of DICOM files, scans and reports.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Study {
    pub uuid: String,
    pub name: Option<String>,
    pub age: Option<u32>,
    /// Height in inches.
    pub height: Option<f64>,
    /// Weight in pounds.
    pub weight: Option<f64>,
    pub sex: Option<Sex>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `POST /api/v2/studies/`.
#[derive(Serialize, Debug, Clone, Default)]
pub struct NewStudy {
    pub age: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
}

/// Partial update of a study, only the fields that are set are sent.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct StudyUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
}

/// An uploaded DICOM file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dicom {
    pub uuid: String,
    pub name: Option<String>,
    pub study: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Structured output of a completed scan.
///
/// Only the fields the flows look at are typed, everything else the remote
/// sends is kept in `extra`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Report {
    pub uuid: String,
    pub version: Option<String>,
    pub study: Option<Value>,
    pub conclusions: Option<String>,
    #[serde(default)]
    pub enumerated_conclusions: Vec<EnumeratedConclusion>,
    #[serde(default)]
    pub diameter_measurements: Vec<MeasurementResult>,
    #[serde(default)]
    pub segmentation_measurements: Vec<MeasurementResult>,
    #[serde(default)]
    pub pathology_conclusions: Vec<Value>,
    pub warnings: Option<ReportWarnings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Report {
    pub fn study_name(&self) -> Option<&str> {
        self.study.as_ref()?.get("name")?.as_str()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnumeratedConclusion {
    pub order: i64,
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    pub measurement: MeasurementDefinition,
    pub value: Option<f64>,
    pub flag: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MeasurementDefinition {
    pub key: String,
    pub acronym: Option<String>,
    pub units: Option<String>,
    pub low_range: Option<f64>,
    pub high_range: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ReportWarnings {
    #[serde(default)]
    pub low_quality: Vec<WarningMessage>,
    #[serde(default)]
    pub viewport_not_found: Vec<WarningMessage>,
    #[serde(default)]
    pub diameter_outside_range: Vec<WarningMessage>,
    #[serde(default)]
    pub other: Vec<WarningMessage>,
}

impl ReportWarnings {
    pub fn is_empty(&self) -> bool {
        self.low_quality.is_empty()
            && self.viewport_not_found.is_empty()
            && self.diameter_outside_range.is_empty()
            && self.other.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WarningMessage {
    pub message: String,
}

/// A registered webhook delivery target.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct WebhookEndpoint {
    pub uuid: String,
    pub url: String,
    /// Secret generated by the remote, unchanged when the url is updated.
    pub token: String,
    pub created_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

impl fmt::Debug for WebhookEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookEndpoint")
            .field("uuid", &self.uuid)
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Body of webhook creation and update requests.
#[derive(Serialize, Debug, Clone)]
pub struct WebhookUrl {
    pub url: String,
}

/// Body of `POST /api/v2/measurements/`, a measurement made by a clinician.
#[derive(Serialize, Debug, Clone)]
pub struct NewMeasurement {
    pub dicom_uuid: String,
    pub measurement_key: String,
    pub measurement_type: String,
    pub keyframe_type: String,
    pub measurement_metadata: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_metadata: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserMeasurement {
    pub uuid: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiVersion {
    pub version: String,
}

/// One page of a collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// Pagination and filters of a list request.
///
/// Filters are forwarded untouched, their semantics belong to the remote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub filters: Vec<(String, String)>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// Query string pairs, filters first then pagination.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = self.filters.clone();
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            pairs.push(("page_size".to_string(), page_size.to_string()));
        }
        pairs
    }
}
