//! Reachability checks for the local and cloud execution environments.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Why a reachability check failed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request to '{url}' failed: {message}")]
    Request { url: String, message: String },

    #[error("'{url}' answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("{0}")]
    Down(String),
}

/// A single environment reachability test.
///
/// Implementations must be cheap and side-effect free apart from what the
/// check itself needs (a scratch file, one HTTP request).
#[async_trait]
pub trait ReachabilityCheck: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Returns `Ok(())` if the environment is usable right now.
    async fn check(&self) -> Result<(), ProbeError>;
}

/// Local environment check: write a scratch file into a directory and remove it.
#[derive(Debug, Clone)]
pub struct WritableDirCheck {
    dir: PathBuf,
}

impl WritableDirCheck {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ReachabilityCheck for WritableDirCheck {
    fn name(&self) -> &str {
        "local-dir"
    }

    async fn check(&self) -> Result<(), ProbeError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let probe_file = self
            .dir
            .join(format!(".lead-sniper-probe-{}", Uuid::new_v4()));
        tokio::fs::write(&probe_file, b"probe").await?;
        tokio::fs::remove_file(&probe_file).await?;
        Ok(())
    }
}

/// Connectivity check against an HTTP endpoint; any 2xx answer counts as up.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_client(name, url, reqwest::Client::new())
    }

    pub fn with_client(
        name: impl Into<String>,
        url: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl ReachabilityCheck for HttpCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let response =
            self.client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| ProbeError::Request {
                    url: self.url.clone(),
                    message: e.to_string(),
                })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            })
        }
    }
}

/// A check whose answer is set by hand. Used when an environment has no
/// endpoint to probe, and in tests.
#[derive(Debug)]
pub struct ManualCheck {
    name: String,
    up: AtomicBool,
}

impl ManualCheck {
    pub fn new(name: impl Into<String>, up: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            up: AtomicBool::new(up),
        })
    }

    pub fn set(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityCheck for ManualCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), ProbeError> {
        if self.is_up() {
            Ok(())
        } else {
            Err(ProbeError::Down(format!("{} marked down", self.name)))
        }
    }
}

/// The two health signals from one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSignals {
    pub local_up: bool,
    pub cloud_up: bool,
}

/// Probes both environments concurrently.
///
/// A check that errors or does not answer within the timeout counts as
/// unreachable; probing itself never fails.
#[derive(Clone)]
pub struct HealthProbe {
    local: Arc<dyn ReachabilityCheck>,
    cloud: Arc<dyn ReachabilityCheck>,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(
        local: Arc<dyn ReachabilityCheck>,
        cloud: Arc<dyn ReachabilityCheck>,
        timeout: Duration,
    ) -> Self {
        Self {
            local,
            cloud,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs both checks and returns their signals.
    pub async fn probe(&self) -> HealthSignals {
        let (local_up, cloud_up) = tokio::join!(
            run_check(self.local.as_ref(), self.timeout),
            run_check(self.cloud.as_ref(), self.timeout),
        );
        HealthSignals { local_up, cloud_up }
    }
}

async fn run_check(check: &dyn ReachabilityCheck, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, check.check()).await {
        Ok(Ok(())) => {
            debug!(check = check.name(), "Environment reachable");
            true
        }
        Ok(Err(e)) => {
            warn!(check = check.name(), error = %e, "Environment unreachable");
            false
        }
        Err(_) => {
            warn!(
                check = check.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Reachability check timed out"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hangs;

    #[async_trait]
    impl ReachabilityCheck for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        async fn check(&self) -> Result<(), ProbeError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writable_dir_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let check = WritableDirCheck::new(dir.path().join("nested"));
        assert!(check.check().await.is_ok());

        // The scratch file is removed again.
        let leftovers = std::fs::read_dir(dir.path().join("nested"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_manual_check_toggles() {
        let check = ManualCheck::new("cloud", false);
        assert!(check.check().await.is_err());
        check.set(true);
        assert!(check.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_signals() {
        let local = ManualCheck::new("local", true);
        let cloud = ManualCheck::new("cloud", false);
        let probe = HealthProbe::new(local, cloud.clone(), Duration::from_millis(200));

        assert_eq!(
            probe.probe().await,
            HealthSignals {
                local_up: true,
                cloud_up: false
            }
        );

        cloud.set(true);
        assert!(probe.probe().await.cloud_up);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_down() {
        let probe = HealthProbe::new(
            Arc::new(Hangs),
            ManualCheck::new("cloud", true),
            Duration::from_millis(30),
        );
        let signals = probe.probe().await;
        assert!(!signals.local_up);
        assert!(signals.cloud_up);
    }

    #[tokio::test]
    async fn test_http_check_unreachable() {
        // Port 9 on localhost is not expected to serve HTTP.
        let check = HttpCheck::new("cloud", "http://127.0.0.1:9/health");
        assert!(check.check().await.is_err());
    }
}
