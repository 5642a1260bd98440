//! The watchdog loop
//!
//! Each iteration logs in on a fresh session, polls the router, forces a
//! reconnect when the link is down and publishes whatever it last saw.
//! Iterations run one at a time. A failed iteration is abandoned and retried
//! after a short delay; only a rejected credential, or a router that is
//! unreachable at startup, stops the loop.

use crate::config::{PollingConfig, ReconnectConfig};
use crate::device::auth::{self, AuthenticatedSession, Credential};
use crate::device::reconnect;
use crate::device::status::{self, Connectivity, ConnectivitySnapshot};
use crate::device::{DeviceEndpoint, DeviceSession, Timeouts};
use crate::error::{Result, RouterError};
use crate::telemetry::TelemetryPublisher;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What one completed iteration saw and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    /// Connectivity of the snapshot that was published
    pub connectivity: Connectivity,
    pub reconnect_attempts: u32,
    pub published: bool,
}

pub struct Supervisor {
    endpoint: DeviceEndpoint,
    credential: Credential,
    polling: PollingConfig,
    reconnect: ReconnectConfig,
    publisher: TelemetryPublisher,
}

impl Supervisor {
    pub fn new(
        endpoint: DeviceEndpoint,
        credential: Credential,
        polling: PollingConfig,
        reconnect: ReconnectConfig,
        publisher: TelemetryPublisher,
    ) -> Self {
        Self {
            endpoint,
            credential,
            polling,
            reconnect,
            publisher,
        }
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts {
            control: self.polling.control_timeout(),
            status: self.polling.status_timeout(),
        }
    }

    fn new_session(&self) -> Result<DeviceSession> {
        DeviceSession::new(self.endpoint.clone(), self.timeouts())
    }

    /// Make sure there is a router at the configured address at all
    pub async fn check_reachable(&self) -> anyhow::Result<()> {
        info!("Reaching out to router at {}", self.endpoint.base());
        self.new_session()?.probe().await.map_err(|e| {
            error!("Router unreachable at {}: {}", self.endpoint.base(), e);
            anyhow::anyhow!("router unreachable at {}, wrong address? ({})", self.endpoint.base(), e)
        })?;
        info!("Connect OK");
        Ok(())
    }

    /// Run until a fatal error. Never returns `Ok`.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.check_reachable().await?;

        loop {
            info!("Iterating");
            let this = Arc::clone(&self);
            // Own task so a panic only costs this iteration
            let outcome = tokio::spawn(async move { this.run_iteration().await }).await;

            let delay = match outcome {
                Ok(Ok(report)) => {
                    info!(
                        "Iteration done: {} (reconnect attempts: {}, published: {})",
                        report.connectivity, report.reconnect_attempts, report.published
                    );
                    self.polling.interval()
                }
                Ok(Err(e)) if e.is_fatal() => {
                    error!("Fatal: {}", e);
                    return Err(anyhow::Error::new(e).context("giving up"));
                }
                Ok(Err(e)) => {
                    warn!("Iteration abandoned: {}", e);
                    self.polling.retry_delay()
                }
                Err(e) => {
                    error!("Iteration crashed: {}", e);
                    self.polling.retry_delay()
                }
            };

            tokio::time::sleep(delay).await;
        }
    }

    /// Authenticate, poll, recover if needed, publish
    pub async fn run_iteration(&self) -> Result<IterationReport> {
        info!("Logging user in");
        let session = auth::login(self.new_session()?, &self.credential).await?;

        info!("Verifying status");
        let mut snapshot = status::poll(&session).await?;
        let mut reconnect_attempts = 0;

        if snapshot.is_connected() {
            info!("System is connected");
        } else {
            warn!(
                "System is not connected (wwan.connection = {:?})",
                snapshot.connection()
            );
            if self.reconnect.enabled {
                (snapshot, reconnect_attempts) = self.recover(&session, snapshot).await;
            }
        }

        info!("Publishing status");
        let published = match self.publisher.publish(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        };

        Ok(IterationReport {
            connectivity: snapshot.connectivity(),
            reconnect_attempts,
            published,
        })
    }

    /// Bounded reconnect loop. Returns the last snapshot seen and the number
    /// of attempts made.
    async fn recover(
        &self,
        session: &AuthenticatedSession,
        mut snapshot: ConnectivitySnapshot,
    ) -> (ConnectivitySnapshot, u32) {
        let max = self.reconnect.max_attempts;

        for attempt in 1..=max {
            info!("Reconnect attempt {}/{}", attempt, max);
            match self.reconnect_once(session).await {
                Ok(fresh) if fresh.is_connected() => {
                    info!("Reconnect successful at {}", fresh.polled_at());
                    return (fresh, attempt);
                }
                Ok(fresh) => {
                    warn!("Reconnect failed, router is {}", fresh.connectivity());
                    snapshot = fresh;
                }
                Err(e @ RouterError::DisconnectFailed { .. })
                | Err(e @ RouterError::ReconnectFailed { .. }) => {
                    warn!("Reconnect attempt {} rejected: {}", attempt, e);
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                }
            }

            if attempt < max {
                let backoff = self.reconnect.backoff(attempt);
                info!("Retrying reconnect in {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }

        if max > 0 {
            warn!("Giving up on reconnect after {} attempts", max);
        }
        (snapshot, max)
    }

    async fn reconnect_once(&self, session: &AuthenticatedSession) -> Result<ConnectivitySnapshot> {
        reconnect::reconnect(session).await?;
        tokio::time::sleep(self.reconnect.settle()).await;
        status::poll(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_util::*;
    use crate::telemetry::test_util::RecordingSink;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn polling() -> PollingConfig {
        PollingConfig {
            interval_secs: 0,
            retry_delay_secs: 0,
            control_timeout_secs: 1,
            status_timeout_secs: 1,
        }
    }

    fn reconnect_config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            enabled: true,
            max_attempts,
            settle_secs: 0,
            backoff_secs: 0,
        }
    }

    fn supervisor(server: &MockServer, sink: Arc<RecordingSink>, reconnect: ReconnectConfig) -> Supervisor {
        Supervisor::new(
            DeviceEndpoint::parse(&server.uri()).unwrap(),
            Credential::new("hunter2"),
            polling(),
            reconnect,
            TelemetryPublisher::new(sink, "pitu/router/telemetry"),
        )
    }

    /// Serve `first` for the first `n` model fetches, `then` afterwards
    async fn mount_model_sequence(
        server: &MockServer,
        first: serde_json::Value,
        n: u64,
        then: serde_json::Value,
    ) {
        Mock::given(method("GET"))
            .and(path("/api/model.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .up_to_n_times(n)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/model.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(then))
            .mount(server)
            .await;
    }

    async fn mount_toggle(server: &MockServer, mode: &str, target: &str, expect: u64) {
        Mock::given(method("POST"))
            .and(path("/Forms/config"))
            .and(body_string_contains(format!("wwan.autoconnect={}", mode)))
            .respond_with(redirect_to(target))
            .expect(expect)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_connected_publishes_without_reconnect() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_model_sequence(
            &server,
            model_doc("T1", "Connected"),
            u64::MAX,
            model_doc("T1", "Connected"),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/Forms/config"))
            .and(body_string_contains("wwan.autoconnect"))
            .respond_with(redirect_to("/success.json"))
            .expect(0)
            .mount(&server)
            .await;

        let sink = Arc::new(RecordingSink::default());
        let report = supervisor(&server, sink.clone(), reconnect_config(3))
            .run_iteration()
            .await
            .unwrap();

        assert_eq!(
            report,
            IterationReport {
                connectivity: Connectivity::Connected,
                reconnect_attempts: 0,
                published: true,
            }
        );
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.last_json(), model_doc("T1", "Connected"));
    }

    #[tokio::test]
    async fn test_disconnected_reconnects_then_publishes() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        // Token fetch and first poll see the link down, the re-poll sees it up
        mount_model_sequence(
            &server,
            model_doc("T1", "Disconnected"),
            2,
            model_doc("T1", "Connected"),
        )
        .await;
        mount_toggle(&server, "Never", "/success.json", 1).await;
        mount_toggle(&server, "HomeNetwork", "/success.json", 1).await;

        let sink = Arc::new(RecordingSink::default());
        let report = supervisor(&server, sink.clone(), reconnect_config(3))
            .run_iteration()
            .await
            .unwrap();

        assert_eq!(report.connectivity, Connectivity::Connected);
        assert_eq!(report.reconnect_attempts, 1);
        assert!(report.published);
        assert_eq!(sink.count(), 1);
        assert_eq!(sink.last_json()["wwan"]["connection"], "Connected");
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_and_publishes_disconnected() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_model_sequence(
            &server,
            model_doc("T1", "Disconnected"),
            u64::MAX,
            model_doc("T1", "Disconnected"),
        )
        .await;
        mount_toggle(&server, "Never", "/error.json", 2).await;
        mount_toggle(&server, "HomeNetwork", "/success.json", 0).await;

        let sink = Arc::new(RecordingSink::default());
        let report = supervisor(&server, sink.clone(), reconnect_config(2))
            .run_iteration()
            .await
            .unwrap();

        assert_eq!(report.connectivity, Connectivity::Disconnected);
        assert_eq!(report.reconnect_attempts, 2);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_disabled_only_publishes() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_model_sequence(
            &server,
            model_doc("T1", "Disconnected"),
            u64::MAX,
            model_doc("T1", "Disconnected"),
        )
        .await;
        mount_toggle(&server, "Never", "/success.json", 0).await;

        let sink = Arc::new(RecordingSink::default());
        let mut reconnect = reconnect_config(3);
        reconnect.enabled = false;
        let report = supervisor(&server, sink.clone(), reconnect)
            .run_iteration()
            .await
            .unwrap();

        assert_eq!(report.connectivity, Connectivity::Disconnected);
        assert_eq!(report.reconnect_attempts, 0);
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_change_recovery() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_model_sequence(
            &server,
            model_doc("T1", "Disconnected"),
            2,
            model_doc("T1", "Connected"),
        )
        .await;
        mount_toggle(&server, "Never", "/success.json", 1).await;
        mount_toggle(&server, "HomeNetwork", "/success.json", 1).await;

        let report = supervisor(&server, Arc::new(RecordingSink::failing()), reconnect_config(3))
            .run_iteration()
            .await
            .unwrap();

        assert_eq!(report.connectivity, Connectivity::Connected);
        assert_eq!(report.reconnect_attempts, 1);
        assert!(!report.published);
    }

    #[tokio::test]
    async fn test_malformed_status_abandons_iteration() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        mount_model_sequence(
            &server,
            json!({"session": {"secToken": "T1"}}),
            u64::MAX,
            json!({}),
        )
        .await;

        let sink = Arc::new(RecordingSink::default());
        let result = supervisor(&server, sink.clone(), reconnect_config(3))
            .run_iteration()
            .await;

        assert!(matches!(result, Err(RouterError::MalformedResponse(_))));
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_rejected_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sess_cd_tmp"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        mount_model_sequence(
            &server,
            model_doc("T1", "Connected"),
            u64::MAX,
            model_doc("T1", "Connected"),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/Forms/config"))
            .respond_with(redirect_to("/index.html?loginfailed"))
            .mount(&server)
            .await;
        mount_landing_pages(&server).await;

        let sink = Arc::new(RecordingSink::default());
        let supervisor = Arc::new(supervisor(&server, sink.clone(), reconnect_config(3)));
        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
            .await
            .expect("run should stop on its own");

        assert!(result.is_err());
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_when_unreachable_at_startup() {
        let sink = Arc::new(RecordingSink::default());
        let supervisor = Arc::new(Supervisor::new(
            DeviceEndpoint::parse("http://127.0.0.1:1").unwrap(),
            Credential::new("hunter2"),
            polling(),
            reconnect_config(3),
            TelemetryPublisher::new(sink, "t"),
        ));

        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
            .await
            .expect("run should stop on its own");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sess_cd_tmp"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        // No token on the first two fetches, then a normal document
        mount_model_sequence(
            &server,
            json!({"wwan": {"connection": "Connected"}}),
            2,
            model_doc("T1", "Connected"),
        )
        .await;
        // Accept the first login, reject the next so the loop ends
        Mock::given(method("POST"))
            .and(path("/Forms/config"))
            .respond_with(redirect_to("/index.html"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Forms/config"))
            .respond_with(redirect_to("/index.html?loginfailed"))
            .mount(&server)
            .await;
        mount_landing_pages(&server).await;

        let sink = Arc::new(RecordingSink::default());
        let supervisor = Arc::new(supervisor(&server, sink.clone(), reconnect_config(3)));
        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
            .await
            .expect("run should stop on its own");

        assert!(result.is_err());
        // Two abandoned iterations, one that published, then the rejection
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_run_survives_crashed_iteration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sess_cd_tmp"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        mount_model_sequence(
            &server,
            model_doc("T1", "Connected"),
            u64::MAX,
            model_doc("T1", "Connected"),
        )
        .await;
        // Two good logins (crash, then publish), then a rejection ends the loop
        Mock::given(method("POST"))
            .and(path("/Forms/config"))
            .respond_with(redirect_to("/index.html"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Forms/config"))
            .respond_with(redirect_to("/index.html?loginfailed"))
            .mount(&server)
            .await;
        mount_landing_pages(&server).await;

        let sink = Arc::new(RecordingSink::panicking_once());
        let supervisor = Arc::new(Supervisor::new(
            DeviceEndpoint::parse(&server.uri()).unwrap(),
            Credential::new("hunter2"),
            polling(),
            reconnect_config(3),
            TelemetryPublisher::new(sink.clone(), "pitu/router/telemetry"),
        ));
        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
            .await
            .expect("run should stop on its own");

        let err = result.unwrap_err();
        assert!(
            err.chain().any(|cause| cause.to_string().contains("giving up")),
            "expected the rejection to end the loop, got: {err:#}"
        );
        assert_eq!(sink.count(), 1);
    }
}
