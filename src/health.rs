//! HTTP readiness probing for the supervised service.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// Timeout applied to a single probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
// Bounded wait for the monitoring worker when it is told to stop.
const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback invoked with the result of each periodic probe.
pub type HealthCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Probes the service endpoint for readiness.
///
/// A probe is a plain GET against `http://host:port/`; any 2xx answer means
/// healthy, and every network failure means "not ready yet", never an error.
/// Besides one-shot probes, the monitor can run a periodic background check
/// that reports each result to a callback.
pub struct HealthMonitor {
    url: String,
    interval: Duration,
    client: Client,
    monitoring: Arc<AtomicBool>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(host: &str, port: u16, interval: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(PROBE_TIMEOUT)
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            url: format!("http://{host}:{port}/"),
            interval,
            client,
            monitoring: Arc::new(AtomicBool::new(false)),
            monitor_task: Mutex::new(None),
        }
    }

    /// Perform a single readiness check.
    pub async fn probe(&self) -> bool {
        Self::probe_url(&self.client, &self.url).await
    }

    /// Begin periodic checks in a background task, reporting each result to
    /// `callback`. A second call while monitoring is already running is
    /// ignored.
    pub fn start_monitoring(&self, callback: HealthCallback) {
        if self.monitoring.swap(true, Ordering::AcqRel) {
            warn!("health monitoring already started");
            return;
        }

        let monitoring = self.monitoring.clone();
        let client = self.client.clone();
        let url = self.url.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            debug!("health monitoring loop started");
            while monitoring.load(Ordering::Acquire) {
                let available = Self::probe_url(&client, &url).await;
                let call = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    callback(available);
                }));
                if call.is_err() {
                    warn!("error in health check callback");
                }
                tokio::time::sleep(interval).await;
            }
            debug!("health monitoring loop ended");
        });
        *self.monitor_task.lock().expect("monitor task lock poisoned") = Some(handle);
        info!("started health monitoring of {}", self.url);
    }

    /// Stop periodic checks and wait briefly for the worker to finish.
    pub async fn stop_monitoring(&self) {
        if !self.monitoring.swap(false, Ordering::AcqRel) {
            return;
        }
        let handle = self.monitor_task.lock().expect("monitor task lock poisoned").take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(MONITOR_JOIN_TIMEOUT, handle).await;
            info!("stopped health monitoring");
        }
    }

    /// Delay between periodic probes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The probed endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn probe_url(client: &Client, url: &str) -> bool {
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("health check successful: {url}");
                true
            }
            Ok(response) => {
                debug!("health check returned status {}", response.status());
                false
            }
            Err(e) => {
                debug!("health check failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monitor_for(server: &MockServer, interval_ms: u64) -> HealthMonitor {
        let address = server.address();
        HealthMonitor::new(
            &address.ip().to_string(),
            address.port(),
            Duration::from_millis(interval_ms),
        )
    }

    #[tokio::test]
    async fn probe_succeeds_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let monitor = monitor_for(&server, 100);
        assert!(monitor.probe().await);
    }

    #[tokio::test]
    async fn probe_fails_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let monitor = monitor_for(&server, 100);
        assert!(!monitor.probe().await);
    }

    #[tokio::test]
    async fn probe_fails_on_connection_refused() {
        // Bind and drop a listener so the port is free but nothing answers.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let monitor = HealthMonitor::new("127.0.0.1", port, Duration::from_millis(100));
        assert!(!monitor.probe().await);
    }

    #[tokio::test]
    async fn monitoring_reports_results_periodically() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let monitor = monitor_for(&server, 20);
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        monitor.start_monitoring(Box::new(move |available| {
            assert!(available);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        monitor.stop_monitoring().await;

        assert!(checks.load(Ordering::SeqCst) >= 2);
        let after = checks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(checks.load(Ordering::SeqCst), after);
    }

    #[tokio::test]
    async fn double_start_monitoring_is_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let monitor = monitor_for(&server, 20);
        monitor.start_monitoring(Box::new(|_| {}));
        monitor.start_monitoring(Box::new(|_| panic!("second monitor must not run")));
        tokio::time::sleep(Duration::from_millis(60)).await;
        monitor.stop_monitoring().await;
    }
}
