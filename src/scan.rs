use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::EncephalonClient,
    error::{EncephalonError, Result},
    structs::{Product, Report, Scan, ScanStatus},
};

/// The part of the API the scan tracker and the webhook receiver talk to.
///
/// [EncephalonClient] is the production implementation, tests plug in
/// scripted fakes.
#[async_trait]
pub trait ScanApi: Send + Sync {
    async fn create_scan(&self, study_uuid: &str, product: Option<Product>) -> Result<Scan>;

    async fn get_scan(&self, uuid: &str) -> Result<Scan>;

    async fn get_report(&self, uuid: &str) -> Result<Report>;
}

#[async_trait]
impl ScanApi for EncephalonClient {
    async fn create_scan(&self, study_uuid: &str, product: Option<Product>) -> Result<Scan> {
        EncephalonClient::create_scan(self, study_uuid, product).await
    }

    async fn get_scan(&self, uuid: &str) -> Result<Scan> {
        EncephalonClient::get_scan(self, uuid).await
    }

    async fn get_report(&self, uuid: &str) -> Result<Report> {
        EncephalonClient::get_report(self, uuid).await
    }
}

#[async_trait]
impl<T: ScanApi + ?Sized> ScanApi for Arc<T> {
    async fn create_scan(&self, study_uuid: &str, product: Option<Product>) -> Result<Scan> {
        (**self).create_scan(study_uuid, product).await
    }

    async fn get_scan(&self, uuid: &str) -> Result<Scan> {
        (**self).get_scan(uuid).await
    }

    async fn get_report(&self, uuid: &str) -> Result<Report> {
        (**self).get_report(uuid).await
    }
}

/// Timing of [ScanTracker::await_completion].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Wall-clock budget, measured from the first fetch.
    pub timeout: Duration,
    /// Fixed pause between two fetches.
    pub interval: Duration,
    /// Keep polling when a fetch fails below HTTP (connection refused,
    /// reset, timed out). Error statuses always abort the wait.
    pub retry_transient: bool,
}

impl PollOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        PollOptions {
            timeout,
            interval,
            retry_transient: true,
        }
    }

    pub fn with_retry_transient(mut self, retry_transient: bool) -> Self {
        self.retry_transient = retry_transient;
        self
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        PollOptions::new(Duration::from_secs(300), Duration::from_secs(5))
    }
}

/// Creates scans and follows them until the remote settles them.
///
/// The tracker never changes the state of a scan, it only observes it. It
/// keeps no state between calls, so any number of scans can be followed
/// concurrently from independent tasks sharing one tracker.
#[derive(Debug, Clone)]
pub struct ScanTracker<A> {
    api: A,
}

impl<A: ScanApi> ScanTracker<A> {
    pub fn new(api: A) -> Self {
        ScanTracker { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Starts the analysis of a study. `None` lets the remote pick its
    /// default product.
    pub async fn create_job(&self, study_uuid: &str, product: Option<Product>) -> Result<Scan> {
        let scan = self.api.create_scan(study_uuid, product).await?;
        info!(
            "Scan {} created for study {} ({}, {})",
            scan.uuid, scan.study, scan.product, scan.status
        );
        Ok(scan)
    }

    /// Current state of a scan, see [Scan::progress_fraction].
    pub async fn get_progress(&self, scan_uuid: &str) -> Result<Scan> {
        self.api.get_scan(scan_uuid).await
    }

    /// Polls a scan until it is COMPLETED or FAILED.
    ///
    /// Both terminal states are returned as `Ok`, the caller looks at the
    /// status. The budget is checked after every fetch, so at least one
    /// fetch always happens and a scan observed terminal on the last fetch
    /// is still returned. The call fails with [EncephalonError::PollTimeout]
    /// once the budget is spent or the next fetch, due every `interval` from
    /// the start, would fall past it. That is `floor(timeout / interval) + 1`
    /// fetches however long each fetch takes.
    pub async fn await_completion(&self, scan_uuid: &str, options: PollOptions) -> Result<Scan> {
        self.await_completion_with(scan_uuid, options, &CancellationToken::new(), |_| {})
            .await
    }

    /// [ScanTracker::await_completion] that gives up with
    /// [EncephalonError::Cancelled] as soon as `cancel` fires, including in
    /// the middle of a pause or a fetch.
    pub async fn await_completion_cancellable(
        &self,
        scan_uuid: &str,
        options: PollOptions,
        cancel: &CancellationToken,
    ) -> Result<Scan> {
        self.await_completion_with(scan_uuid, options, cancel, |_| {})
            .await
    }

    /// The polling loop. `on_poll` sees every scan fetched, terminal or not.
    pub async fn await_completion_with<F>(
        &self,
        scan_uuid: &str,
        options: PollOptions,
        cancel: &CancellationToken,
        mut on_poll: F,
    ) -> Result<Scan>
    where
        F: FnMut(&Scan) + Send,
    {
        let cancelled = || EncephalonError::Cancelled {
            scan_id: scan_uuid.to_string(),
        };

        let start = Instant::now();
        let mut polls: u32 = 0;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                fetched = self.api.get_scan(scan_uuid) => fetched,
            };
            polls += 1;

            match fetched {
                Ok(scan) => {
                    debug!(
                        "Scan {} is {} ({}/{} DICOM analyzed)",
                        scan_uuid,
                        scan.status,
                        scan.number_of_dicoms_scanned,
                        scan.number_of_available_dicoms
                    );
                    on_poll(&scan);

                    if scan.is_terminal() {
                        if scan.status == ScanStatus::Completed && scan.report.is_none() {
                            warn!("Scan {} is COMPLETED but has no report", scan_uuid);
                        }
                        info!(
                            "Scan {} is {} after {} poll(s) in {:?}",
                            scan_uuid,
                            scan.status,
                            polls,
                            start.elapsed()
                        );
                        return Ok(scan);
                    }
                }
                Err(e) if options.retry_transient && e.is_transient() => {
                    warn!("Polling scan {} failed, will retry: {}", scan_uuid, e);
                }
                Err(e) => return Err(e),
            }

            // The next fetch is due at `polls * interval` on the nominal
            // schedule, fetch latency does not shift it.
            let next_fetch = options.interval.saturating_mul(polls);
            if start.elapsed() >= options.timeout || next_fetch > options.timeout {
                warn!(
                    "Giving up on scan {} after {} poll(s) in {:?}",
                    scan_uuid,
                    polls,
                    start.elapsed()
                );
                return Err(EncephalonError::PollTimeout {
                    scan_id: scan_uuid.to_string(),
                    timeout: options.timeout,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(options.interval) => {}
            }
        }
    }

    /// Blocking flavor of [ScanTracker::await_completion] for code that does
    /// not run an async runtime. It drives the wait on a private
    /// single-threaded runtime and refuses to run from within a runtime.
    pub fn await_completion_blocking(&self, scan_uuid: &str, options: PollOptions) -> Result<Scan> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(EncephalonError::InvalidConfig(
                "blocking wait called from within an async runtime".to_string(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.await_completion(scan_uuid, options))
    }
}
