//! Receiving scan notifications pushed by the remote.
//!
//! Instead of polling, an application can register an endpoint with
//! [register_endpoint] and let the remote POST a [WebhookNotification] to it
//! when a scan settles. [WebhookReceiver] implements what such an endpoint
//! has to do and [router] exposes it over HTTP with axum.
//!
//! Delivery is at-least-once. The receiver settles every scan it tracks at
//! most once: redeliveries refresh the stored outcome but are never published
//! again.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use crate::{
    client::EncephalonClient,
    error::{EncephalonError, Result},
    scan::ScanApi,
    structs::{ListQuery, Report, ScanStatus, WebhookEndpoint},
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_REPORT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Registers `url` as a webhook unless an endpoint with the same url already
/// exists, in which case that one is returned.
///
/// The remote does not de-duplicate registrations itself.
pub async fn register_endpoint(client: &EncephalonClient, url: &str) -> Result<WebhookEndpoint> {
    let mut page = 1;
    loop {
        let listing = client.list_webhooks(&ListQuery::new().page(page)).await?;
        if let Some(existing) = listing.results.into_iter().find(|w| w.url == url) {
            info!("Webhook already registered for {}: {}", url, existing.uuid);
            return Ok(existing);
        }
        if listing.next.is_none() {
            break;
        }
        page += 1;
    }

    let created = client.create_webhook(url).await?;
    info!("Webhook registered for {}: {}", url, created.uuid);
    Ok(created)
}

/// Abbreviated report carried by a COMPLETED notification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ReportSummary {
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub measurements: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pathologies: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conclusions: Vec<Value>,
    pub quality_scores: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub best_dicoms: Vec<Value>,
}

/// Reads an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body POSTed by the remote to a registered webhook.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WebhookNotification {
    pub scan_id: String,
    /// Kept raw so unexpected values can be reported as they were received.
    pub status: String,
    pub report: Option<ReportSummary>,
}

impl WebhookNotification {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let notification: WebhookNotification = serde_json::from_slice(body)
            .map_err(|e| EncephalonError::MalformedWebhookPayload(e.to_string()))?;

        if notification.scan_id.is_empty() {
            return Err(EncephalonError::MalformedWebhookPayload(
                "empty `scan_id`".to_string(),
            ));
        }
        if notification.status.is_empty() {
            return Err(EncephalonError::MalformedWebhookPayload(
                "empty `status`".to_string(),
            ));
        }
        Ok(notification)
    }

    pub fn status(&self) -> ScanStatus {
        ScanStatus::from_wire(&self.status)
    }

    pub fn report_uuid(&self) -> Option<&str> {
        self.report.as_ref()?.uuid.as_deref()
    }
}

/// Computes the hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign_hmac_sha256(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EncephalonError::InvalidConfig(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex HMAC-SHA256 signature, with or without a `sha256=` prefix.
pub fn verify_hmac_sha256(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// How inbound notifications are authenticated.
#[derive(Clone, Default)]
pub enum SignaturePolicy {
    /// Accept unsigned notifications. Only scans the receiver tracks are
    /// acted upon.
    #[default]
    Disabled,
    /// Require an HMAC-SHA256 of the raw body, keyed with the webhook token,
    /// hex encoded in `header`.
    HmacSha256 { secret: String, header: String },
}

impl SignaturePolicy {
    pub fn hmac_sha256(secret: impl Into<String>, header: impl Into<String>) -> Self {
        SignaturePolicy::HmacSha256 {
            secret: secret.into(),
            header: header.into(),
        }
    }

    /// Header the signature is read from, if any.
    pub fn header(&self) -> Option<&str> {
        match self {
            SignaturePolicy::Disabled => None,
            SignaturePolicy::HmacSha256 { header, .. } => Some(header),
        }
    }

    fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<()> {
        match self {
            SignaturePolicy::Disabled => Ok(()),
            SignaturePolicy::HmacSha256 { secret, .. } => match signature {
                Some(signature) if verify_hmac_sha256(secret, body, signature) => Ok(()),
                _ => Err(EncephalonError::InvalidSignature),
            },
        }
    }
}

impl std::fmt::Debug for SignaturePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignaturePolicy::Disabled => f.write_str("Disabled"),
            SignaturePolicy::HmacSha256 { header, .. } => f
                .debug_struct("HmacSha256")
                .field("header", header)
                .finish_non_exhaustive(),
        }
    }
}

/// Final state of a scan as learnt from a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Completed { scan_id: String, report: Report },
    Failed { scan_id: String, detail: Option<String> },
}

impl ScanOutcome {
    pub fn scan_id(&self) -> &str {
        match self {
            ScanOutcome::Completed { scan_id, .. } | ScanOutcome::Failed { scan_id, .. } => scan_id,
        }
    }
}

/// What [WebhookReceiver::handle] did with a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// First terminal notification for the scan, the outcome was published.
    Settled(ScanOutcome),
    /// The scan was already settled, the outcome was refreshed only.
    Redelivered(ScanOutcome),
    /// The status is not terminal or not known.
    Unexpected { scan_id: String, status: String },
}

/// Acts on inbound notifications for the scans it tracks.
///
/// For a COMPLETED scan the full report is re-fetched since the payload only
/// carries a summary; the fetch is retried a few times and then surfaced as
/// an error so the caller can answer with a server error and get the
/// notification delivered again. For a FAILED scan the failure detail is
/// read from the scan, best effort.
pub struct WebhookReceiver<A> {
    api: A,
    signature: SignaturePolicy,
    tracked: RwLock<HashMap<String, Option<ScanOutcome>>>,
    outcomes: mpsc::UnboundedSender<ScanOutcome>,
    report_attempts: u32,
    retry_delay: Duration,
}

impl<A: ScanApi> WebhookReceiver<A> {
    /// Returns the receiver and the channel its outcomes are published on.
    pub fn new(api: A) -> (Self, mpsc::UnboundedReceiver<ScanOutcome>) {
        let (outcomes, outcomes_rx) = mpsc::unbounded_channel();
        let receiver = WebhookReceiver {
            api,
            signature: SignaturePolicy::default(),
            tracked: RwLock::new(HashMap::new()),
            outcomes,
            report_attempts: DEFAULT_REPORT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        };
        (receiver, outcomes_rx)
    }

    pub fn with_signature(mut self, signature: SignaturePolicy) -> Self {
        self.signature = signature;
        self
    }

    /// Number of report fetches and the pause between them.
    pub fn with_report_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.report_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn signature(&self) -> &SignaturePolicy {
        &self.signature
    }

    /// Starts accepting notifications for `scan_id`.
    pub async fn track(&self, scan_id: &str) {
        self.tracked
            .write()
            .await
            .entry(scan_id.to_string())
            .or_insert(None);
    }

    pub async fn untrack(&self, scan_id: &str) {
        self.tracked.write().await.remove(scan_id);
    }

    pub async fn is_tracked(&self, scan_id: &str) -> bool {
        self.tracked.read().await.contains_key(scan_id)
    }

    /// Last outcome stored for a scan.
    pub async fn outcome(&self, scan_id: &str) -> Option<ScanOutcome> {
        self.tracked.read().await.get(scan_id).cloned().flatten()
    }

    /// Processes one raw notification body.
    ///
    /// Nothing is done before the signature, the payload and the scan id are
    /// all validated.
    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> Result<Handled> {
        self.signature.verify(body, signature)?;
        let notification = WebhookNotification::from_slice(body)?;
        let scan_id = notification.scan_id.as_str();

        if !self.is_tracked(scan_id).await {
            return Err(EncephalonError::UntrackedScan(scan_id.to_string()));
        }
        info!("Notification for scan {}: {}", scan_id, notification.status);

        let outcome = match notification.status() {
            ScanStatus::Completed => {
                let report_uuid = match notification.report_uuid() {
                    Some(uuid) => uuid.to_string(),
                    None => self.report_uuid_from_scan(scan_id).await?,
                };
                let report = self.fetch_report(&report_uuid).await?;
                ScanOutcome::Completed {
                    scan_id: scan_id.to_string(),
                    report,
                }
            }
            ScanStatus::Failed => {
                let detail = match self.api.get_scan(scan_id).await {
                    Ok(scan) => scan.state,
                    Err(e) => {
                        warn!("Could not read failure detail of scan {}: {}", scan_id, e);
                        None
                    }
                };
                ScanOutcome::Failed {
                    scan_id: scan_id.to_string(),
                    detail,
                }
            }
            _ => {
                warn!(
                    "Unexpected status {} in notification for scan {}",
                    notification.status, scan_id
                );
                return Ok(Handled::Unexpected {
                    scan_id: scan_id.to_string(),
                    status: notification.status.clone(),
                });
            }
        };

        self.settle(outcome).await
    }

    /// Settles a tracked scan from its current state on the remote.
    ///
    /// A notification arriving before [WebhookReceiver::track] is rejected
    /// and not delivered again, so callers reconcile once right after
    /// tracking. Returns `None` while the scan is still running.
    pub async fn reconcile(&self, scan_id: &str) -> Result<Option<Handled>> {
        if !self.is_tracked(scan_id).await {
            return Err(EncephalonError::UntrackedScan(scan_id.to_string()));
        }

        let scan = self.api.get_scan(scan_id).await?;
        let outcome = match (scan.status, scan.report) {
            (ScanStatus::Completed, Some(report_uuid)) => ScanOutcome::Completed {
                scan_id: scan_id.to_string(),
                report: self.fetch_report(&report_uuid).await?,
            },
            (ScanStatus::Completed, None) => {
                warn!("Scan {} is COMPLETED but has no report yet", scan_id);
                return Ok(None);
            }
            (ScanStatus::Failed, _) => ScanOutcome::Failed {
                scan_id: scan_id.to_string(),
                detail: scan.state,
            },
            _ => return Ok(None),
        };

        info!("Scan {} was already {} when reconciled", scan_id, scan.status);
        self.settle(outcome).await.map(Some)
    }

    async fn report_uuid_from_scan(&self, scan_id: &str) -> Result<String> {
        let scan = self.api.get_scan(scan_id).await?;
        scan.report.ok_or_else(|| {
            EncephalonError::MalformedWebhookPayload(format!(
                "COMPLETED notification for scan {} without report",
                scan_id
            ))
        })
    }

    async fn fetch_report(&self, report_uuid: &str) -> Result<Report> {
        let mut attempt = 1;
        loop {
            match self.api.get_report(report_uuid).await {
                Ok(report) => return Ok(report),
                Err(e) if attempt < self.report_attempts => {
                    warn!(
                        "Fetching report {} failed (attempt {}/{}): {}",
                        report_uuid, attempt, self.report_attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        "Fetching report {} failed after {} attempt(s): {}",
                        report_uuid, attempt, e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn settle(&self, outcome: ScanOutcome) -> Result<Handled> {
        let mut tracked = self.tracked.write().await;
        let slot = tracked
            .get_mut(outcome.scan_id())
            .ok_or_else(|| EncephalonError::UntrackedScan(outcome.scan_id().to_string()))?;
        let first = slot.is_none();
        *slot = Some(outcome.clone());
        drop(tracked);

        if !first {
            info!("Scan {} was already settled", outcome.scan_id());
            return Ok(Handled::Redelivered(outcome));
        }
        if self.outcomes.send(outcome.clone()).is_err() {
            warn!("Nobody listens for outcomes, scan {}", outcome.scan_id());
        }
        Ok(Handled::Settled(outcome))
    }
}

/// HTTP status answered for a failed notification.
///
/// Client errors tell the remote not to bother redelivering, server errors
/// ask for a redelivery.
pub fn status_for(error: &EncephalonError) -> StatusCode {
    match error {
        EncephalonError::MalformedWebhookPayload(_) => StatusCode::BAD_REQUEST,
        EncephalonError::InvalidSignature => StatusCode::UNAUTHORIZED,
        EncephalonError::UntrackedScan(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Router answering notifications POSTed to `path`.
pub fn router<A>(receiver: Arc<WebhookReceiver<A>>, path: &str) -> Router
where
    A: ScanApi + 'static,
{
    Router::new()
        .route(path, post(handle_delivery::<A>))
        .with_state(receiver)
}

async fn handle_delivery<A>(
    State(receiver): State<Arc<WebhookReceiver<A>>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode
where
    A: ScanApi + 'static,
{
    let signature = receiver
        .signature()
        .header()
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok());

    match receiver.handle(&body, signature).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                error!("Notification could not be processed: {}", e);
            } else {
                warn!("Notification rejected: {}", e);
            }
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{Product, Scan};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeApi {
        report_failures: AtomicUsize,
        report_fetches: AtomicUsize,
    }

    impl FakeApi {
        fn new(report_failures: usize) -> Self {
            FakeApi {
                report_failures: AtomicUsize::new(report_failures),
                report_fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ScanApi for FakeApi {
        async fn create_scan(&self, _study: &str, _product: Option<Product>) -> Result<Scan> {
            unreachable!("the receiver never creates scans")
        }

        async fn get_scan(&self, uuid: &str) -> Result<Scan> {
            Ok(Scan {
                uuid: uuid.to_string(),
                study: "study-1".to_string(),
                product: Product::Echomeasure,
                status: ScanStatus::Failed,
                report: None,
                number_of_available_dicoms: 1,
                number_of_dicoms_scanned: 0,
                total_inference_time: None,
                state: Some("no usable view found".to_string()),
                created_at: None,
            })
        }

        async fn get_report(&self, uuid: &str) -> Result<Report> {
            self.report_fetches.fetch_add(1, Ordering::SeqCst);
            let failures = self.report_failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.report_failures.store(failures - 1, Ordering::SeqCst);
                return Err(EncephalonError::RemoteRequest {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            Ok(serde_json::from_value(json!({
                "uuid": uuid,
                "version": "2.1",
                "conclusions": "Normal left ventricular function"
            }))
            .unwrap())
        }
    }

    fn completed_body(scan_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "scan_id": scan_id,
            "status": "COMPLETED",
            "report": {
                "uuid": "report-9",
                "measurements": [{"name": "LVEF", "value": 55, "units": "%"}],
                "pathologies": [],
                "conclusions": ["Normal left ventricular function"],
                "quality_scores": {"overall": 0.92},
                "best_dicoms": ["dicom-uuid-1"]
            }
        }))
        .unwrap()
    }

    async fn receiver(
        api: FakeApi,
    ) -> (WebhookReceiver<FakeApi>, mpsc::UnboundedReceiver<ScanOutcome>) {
        let (receiver, rx) = WebhookReceiver::new(api);
        let receiver = receiver.with_report_retry(3, Duration::from_millis(1));
        receiver.track("scan-1").await;
        (receiver, rx)
    }

    #[test]
    fn test_notification_requires_scan_id_and_status() {
        assert!(WebhookNotification::from_slice(br#"{"status": "COMPLETED"}"#).is_err());
        assert!(WebhookNotification::from_slice(br#"{"scan_id": "scan-1"}"#).is_err());
        assert!(WebhookNotification::from_slice(b"not json").is_err());
        assert!(WebhookNotification::from_slice(br#"{"scan_id": "", "status": "FAILED"}"#).is_err());

        let notification =
            WebhookNotification::from_slice(br#"{"scan_id": "scan-1", "status": "FAILED"}"#)
                .unwrap();
        assert_eq!(notification.status(), ScanStatus::Failed);
        assert!(notification.report_uuid().is_none());
    }

    #[test]
    fn test_hmac_signature() {
        let signature = sign_hmac_sha256("token", b"payload").unwrap();
        assert!(verify_hmac_sha256("token", b"payload", &signature));
        assert!(verify_hmac_sha256(
            "token",
            b"payload",
            &format!("sha256={}", signature)
        ));
        assert!(!verify_hmac_sha256("other", b"payload", &signature));
        assert!(!verify_hmac_sha256("token", b"tampered", &signature));
        assert!(!verify_hmac_sha256("token", b"payload", "not hex"));
    }

    #[tokio::test]
    async fn test_completed_fetches_full_report() {
        let (receiver, mut rx) = receiver(FakeApi::new(0)).await;

        let handled = receiver.handle(&completed_body("scan-1"), None).await.unwrap();

        match handled {
            Handled::Settled(ScanOutcome::Completed { scan_id, report }) => {
                assert_eq!(scan_id, "scan-1");
                assert_eq!(report.uuid, "report-9");
                assert_eq!(report.version.as_deref(), Some("2.1"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap().scan_id(), "scan-1");
    }

    #[tokio::test]
    async fn test_redelivery_has_no_duplicate_effect() {
        let (receiver, mut rx) = receiver(FakeApi::new(0)).await;
        let body = completed_body("scan-1");

        let first = receiver.handle(&body, None).await.unwrap();
        let stored = receiver.outcome("scan-1").await;
        let second = receiver.handle(&body, None).await.unwrap();

        assert!(matches!(first, Handled::Settled(_)));
        assert!(matches!(second, Handled::Redelivered(_)));
        assert_eq!(receiver.outcome("scan-1").await, stored);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_report_fetch_is_retried() {
        let (receiver, _rx) = receiver(FakeApi::new(2)).await;

        let handled = receiver.handle(&completed_body("scan-1"), None).await.unwrap();

        assert!(matches!(handled, Handled::Settled(_)));
        assert_eq!(receiver.api.report_fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_report_fetch_failure_is_surfaced() {
        let (receiver, mut rx) = receiver(FakeApi::new(10)).await;

        let err = receiver
            .handle(&completed_body("scan-1"), None)
            .await
            .unwrap_err();

        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(receiver.outcome("scan-1").await.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_reads_detail() {
        let (receiver, _rx) = receiver(FakeApi::new(0)).await;

        let handled = receiver
            .handle(br#"{"scan_id": "scan-1", "status": "FAILED"}"#, None)
            .await
            .unwrap();

        assert_eq!(
            handled,
            Handled::Settled(ScanOutcome::Failed {
                scan_id: "scan-1".to_string(),
                detail: Some("no usable view found".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn test_unexpected_status_is_not_an_error() {
        let (receiver, mut rx) = receiver(FakeApi::new(0)).await;

        let handled = receiver
            .handle(br#"{"scan_id": "scan-1", "status": "STARTED"}"#, None)
            .await
            .unwrap();

        assert!(matches!(handled, Handled::Unexpected { ref status, .. } if status == "STARTED"));
        assert!(receiver.outcome("scan-1").await.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_untracked_scan_is_rejected() {
        let (receiver, _rx) = receiver(FakeApi::new(0)).await;

        let err = receiver
            .handle(&completed_body("stray-scan"), None)
            .await
            .unwrap_err();

        assert_eq!(status_for(&err), StatusCode::NOT_FOUND);
        assert_eq!(receiver.api.report_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_signature_is_enforced() {
        let (receiver, _rx) = receiver(FakeApi::new(0)).await;
        let receiver =
            receiver.with_signature(SignaturePolicy::hmac_sha256("token", "X-Signature"));
        let body = completed_body("scan-1");

        let err = receiver.handle(&body, None).await.unwrap_err();
        assert_eq!(status_for(&err), StatusCode::UNAUTHORIZED);
        let err = receiver.handle(&body, Some("deadbeef")).await.unwrap_err();
        assert_eq!(status_for(&err), StatusCode::UNAUTHORIZED);

        let signature = sign_hmac_sha256("token", &body).unwrap();
        assert!(receiver.handle(&body, Some(&signature)).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_client_error() {
        let (receiver, _rx) = receiver(FakeApi::new(0)).await;

        let err = receiver.handle(b"{", None).await.unwrap_err();

        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_null_summary_fields_are_empty() {
        let notification = WebhookNotification::from_slice(
            br#"{"scan_id": "scan-1", "status": "COMPLETED",
                 "report": {"uuid": "report-9", "measurements": null, "pathologies": null,
                            "conclusions": null, "quality_scores": null, "best_dicoms": null}}"#,
        )
        .unwrap();

        assert_eq!(notification.report_uuid(), Some("report-9"));
        let summary = notification.report.unwrap();
        assert!(summary.pathologies.is_empty());
        assert!(summary.best_dicoms.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_settles_a_scan_that_already_failed() {
        let (receiver, mut rx) = receiver(FakeApi::new(0)).await;

        let handled = receiver.reconcile("scan-1").await.unwrap();

        let expected = ScanOutcome::Failed {
            scan_id: "scan-1".to_string(),
            detail: Some("no usable view found".to_string()),
        };
        assert_eq!(handled, Some(Handled::Settled(expected.clone())));
        assert_eq!(rx.try_recv().unwrap(), expected);

        let handled = receiver.reconcile("scan-1").await.unwrap();
        assert!(matches!(handled, Some(Handled::Redelivered(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconcile_requires_tracking() {
        let (receiver, _rx) = receiver(FakeApi::new(0)).await;

        let err = receiver.reconcile("scan-2").await.unwrap_err();

        assert!(matches!(err, EncephalonError::UntrackedScan(ref id) if id == "scan-2"));
    }
}
