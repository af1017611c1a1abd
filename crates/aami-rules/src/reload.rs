//! Backend reload coordination.
//!
//! After rule files change the backend is asked to re-read them with
//! `POST <base>/-/reload`. A failed reload never undoes a write: the files
//! stay on disk and the coordinator remembers that a reload is pending.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ReloadConfig;
use crate::error::{Result, RuleError};

const RELOAD_PATH: &str = "-/reload";
const READY_PATH: &str = "-/ready";

/// Result of a reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// The backend acknowledged the reload.
    Reloaded,
    /// Reloading is disabled.
    Skipped,
}

/// Snapshot of the coordinator's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadState {
    /// When the backend last acknowledged a reload.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Reason for the most recent failure, cleared on success.
    pub last_failure: Option<String>,
    /// True when rule files changed since the last successful reload.
    pub pending: bool,
}

/// Signals the backend to re-read its rule files.
pub struct ReloadCoordinator {
    client: reqwest::Client,
    base_url: Url,
    enabled: bool,
    timeout: Duration,
    state: RwLock<ReloadState>,
    // Bumped by every mark_pending, always under the state write lock.
    marks: AtomicU64,
}

impl ReloadCoordinator {
    /// Creates a coordinator from configuration.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Config` if the base URL does not parse.
    pub fn from_config(config: &ReloadConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            RuleError::config(format!("invalid reload.base_url '{}': {e}", config.base_url))
        })?;
        Ok(Self::with_options(
            base_url,
            config.enabled,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    /// Creates a coordinator with explicit settings.
    #[must_use]
    pub fn with_options(mut base_url: Url, enabled: bool, timeout: Duration) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
            enabled,
            timeout,
            state: RwLock::new(ReloadState::default()),
            marks: AtomicU64::new(0),
        }
    }

    /// Returns true if reload requests are sent.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the backend base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns a copy of the current bookkeeping.
    #[must_use]
    pub fn state(&self) -> ReloadState {
        self.state.read().clone()
    }

    /// Records that rule files changed and the backend has not seen them.
    pub fn mark_pending(&self) {
        let mut state = self.state.write();
        self.marks.fetch_add(1, Ordering::Relaxed);
        state.pending = true;
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| RuleError::Reload {
            url: self.base_url.to_string(),
            reason: format!("invalid endpoint: {e}"),
        })
    }

    /// Asks the backend to reload its rule files.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Reload` on transport failure, timeout or a
    /// non-success status. The pending flag stays set.
    ///
    /// A success only clears the pending flag if no change was marked while
    /// the request was in flight.
    pub async fn reload(&self) -> Result<ReloadOutcome> {
        if !self.enabled {
            debug!("backend reload disabled, skipping");
            return Ok(ReloadOutcome::Skipped);
        }

        let started = self.marks.load(Ordering::Relaxed);

        let url = self.endpoint(RELOAD_PATH)?;
        let response = self
            .client
            .post(url.clone())
            .timeout(self.timeout)
            .send()
            .await;

        let failure = match response {
            Ok(resp) if resp.status().is_success() => None,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                Some(format!("backend returned {status}: {}", body.trim()))
            }
            Err(e) if e.is_timeout() => Some(format!(
                "request timed out after {}ms",
                self.timeout.as_millis()
            )),
            Err(e) => Some(format!("request failed: {e}")),
        };

        let mut state = self.state.write();
        match failure {
            None => {
                state.last_success_at = Some(Utc::now());
                state.last_failure = None;
                if self.marks.load(Ordering::Relaxed) == started {
                    state.pending = false;
                }
                info!(url = %url, pending = state.pending, "backend reloaded rules");
                Ok(ReloadOutcome::Reloaded)
            }
            Some(reason) => {
                state.last_failure = Some(reason.clone());
                state.pending = true;
                warn!(url = %url, reason = %reason, "backend reload failed");
                Err(RuleError::Reload {
                    url: url.to_string(),
                    reason,
                })
            }
        }
    }

    /// Returns true if the backend reports ready.
    pub async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint(READY_PATH) else {
            return false;
        };
        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "backend health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aami_core::ErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serves one canned HTTP response per connection and returns the
    /// request lines it saw.
    async fn responder(status: &'static str, connections: usize) -> (Url, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..connections {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let request = String::from_utf8_lossy(&buf);
                seen.push(request.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok"
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });
        (Url::parse(&format!("http://{addr}")).unwrap(), handle)
    }

    fn coordinator(url: Url) -> ReloadCoordinator {
        ReloadCoordinator::with_options(url, true, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn successful_reload_clears_pending() {
        let (url, server) = responder("200 OK", 1).await;
        let reloader = coordinator(url);
        reloader.mark_pending();

        assert_eq!(reloader.reload().await.unwrap(), ReloadOutcome::Reloaded);
        let state = reloader.state();
        assert!(!state.pending);
        assert!(state.last_success_at.is_some());
        assert_eq!(state.last_failure, None);

        let seen = server.await.unwrap();
        assert_eq!(seen, vec!["POST /-/reload HTTP/1.1".to_string()]);
    }

    #[tokio::test]
    async fn change_during_reload_stays_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let (received_tx, received_rx) = oneshot::channel();
        let (respond_tx, respond_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut chunk = [0u8; 1024];
            let _ = socket.read(&mut chunk).await.unwrap();
            received_tx.send(()).unwrap();
            respond_rx.await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let reloader = Arc::new(coordinator(url));
        reloader.mark_pending();
        let in_flight = {
            let reloader = Arc::clone(&reloader);
            tokio::spawn(async move { reloader.reload().await })
        };

        received_rx.await.unwrap();
        reloader.mark_pending();
        respond_tx.send(()).unwrap();

        assert_eq!(in_flight.await.unwrap().unwrap(), ReloadOutcome::Reloaded);
        let state = reloader.state();
        assert!(state.pending);
        assert!(state.last_success_at.is_some());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn error_status_is_reload_failure() {
        let (url, _server) = responder("500 Internal Server Error", 1).await;
        let reloader = coordinator(url);

        let err = reloader.reload().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuleGenerationFailed);
        assert!(err.is_persisted());
        let state = reloader.state();
        assert!(state.pending);
        assert!(state.last_failure.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn unreachable_backend_is_reload_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reloader = coordinator(Url::parse(&format!("http://{addr}")).unwrap());
        assert!(matches!(
            reloader.reload().await,
            Err(RuleError::Reload { .. })
        ));
        assert!(!reloader.health_check().await);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        // Accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let reloader = ReloadCoordinator::with_options(
            Url::parse(&format!("http://{addr}")).unwrap(),
            true,
            Duration::from_millis(200),
        );
        let err = reloader.reload().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn disabled_reload_is_skipped() {
        let reloader = ReloadCoordinator::with_options(
            Url::parse("http://127.0.0.1:1").unwrap(),
            false,
            Duration::from_secs(1),
        );
        assert_eq!(reloader.reload().await.unwrap(), ReloadOutcome::Skipped);
    }

    #[tokio::test]
    async fn health_check_hits_ready_endpoint() {
        let (url, server) = responder("200 OK", 1).await;
        assert!(coordinator(url).health_check().await);
        assert_eq!(server.await.unwrap(), vec!["GET /-/ready HTTP/1.1".to_string()]);
    }

    #[test]
    fn base_path_is_preserved() {
        let reloader = coordinator(Url::parse("http://prom:9090/prometheus").unwrap());
        assert_eq!(
            reloader.endpoint(RELOAD_PATH).unwrap().as_str(),
            "http://prom:9090/prometheus/-/reload"
        );
    }

    #[test]
    fn from_config_rejects_bad_url() {
        let config = ReloadConfig {
            base_url: "not a url".to_string(),
            ..ReloadConfig::default()
        };
        assert!(ReloadCoordinator::from_config(&config).is_err());
    }
}
