//! Admin surface: the management operations a control UI or CLI drives.
//!
//! No RPC transport ships here — this is the method surface an embedder
//! wires to whatever transport it has (IPC, a loopback HTTP API, a CLI
//! subcommand table), mirroring the teacher's own admin layer being a
//! plain async API behind its Tauri command macros rather than the
//! transport itself.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::channels::ChannelKind;
use crate::config::Channel;
use crate::history::RequestRecord;
use crate::metrics::ChannelMetricsSnapshot;
use crate::providers::primary_base_url;
use crate::ProxyCore;

pub struct AdminApi {
    core: Arc<ProxyCore>,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub running: bool,
    pub port: u16,
    pub channel_count: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct GlobalStats {
    pub total_requests: u64,
    pub total_success: u64,
    pub total_failure: u64,
}

#[derive(Debug, Serialize)]
pub struct PingResult {
    pub reachable: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl AdminApi {
    pub fn new(core: Arc<ProxyCore>) -> Self {
        Self { core }
    }

    /// Re-reads the on-disk config, replacing the live channel catalog.
    /// There is no separate listener lifecycle here — the binary owns
    /// `axum::serve`'s own start/stop; this only reloads state.
    pub fn start(&self) -> Result<(), String> {
        self.core.reload_from_disk()
    }

    pub fn stop(&self) {
        self.core.stop();
    }

    pub fn status(&self) -> Status {
        Status {
            running: true,
            port: self.core.port(),
            channel_count: self.core.channel_count(),
            uptime_secs: self.core.uptime_secs(),
        }
    }

    /// Proves the new port is bindable before touching anything: the
    /// probe listener is dropped immediately, then the HTTP loop is
    /// signalled to rebind on it. If the bind fails, the running
    /// listener is untouched and the config is not persisted.
    pub async fn set_port(&self, port: u16) -> Result<(), String> {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| format!("port {port} is not bindable: {e}"))?;

        {
            let mut settings = self.core.settings.write().unwrap();
            settings.port = port;
        }
        self.core.persist()?;
        self.core.signal_restart();
        Ok(())
    }

    pub fn get_channel_list(&self, kind: ChannelKind) -> Vec<Channel> {
        self.core.channels.get_channels(kind)
    }

    pub fn create_channel(&self, kind: ChannelKind, channel: Channel) -> Result<(), String> {
        self.core.channels.add(kind, channel);
        self.core.persist()
    }

    pub fn update_channel(&self, kind: ChannelKind, index: usize, channel: Channel) -> Result<(), String> {
        self.core.channels.update(kind, index, channel)?;
        self.core.persist()
    }

    pub fn delete_channel(&self, kind: ChannelKind, index: usize) -> Result<(), String> {
        self.core.channels.delete(kind, index)?;
        self.core.persist()
    }

    /// Sends a `HEAD` request to the channel's primary base URL and
    /// measures latency, the same probe the teacher's own `measure_all`
    /// uses. Falls back to a raw TCP connect only if the HTTP client
    /// itself can't be built — a host that accepts TCP but 404s/times out
    /// at the application layer must still come back `reachable: false`.
    pub async fn ping_channel(&self, kind: ChannelKind, index: usize) -> Result<PingResult, String> {
        let channel = self
            .core
            .channels
            .get_channel(kind, index)
            .ok_or_else(|| format!("no channel at index {index}"))?;

        let base_url = primary_base_url(&channel).map_err(|e| e.to_string())?;

        match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .danger_accept_invalid_certs(channel.insecure_skip_verify)
            .build()
        {
            Ok(client) => {
                let start = Instant::now();
                return Ok(match client.head(base_url).send().await {
                    Ok(resp) => PingResult {
                        reachable: resp.status().is_success(),
                        latency_ms: start.elapsed().as_millis() as u64,
                        error: if resp.status().is_success() {
                            None
                        } else {
                            Some(format!("HEAD returned {}", resp.status()))
                        },
                    },
                    Err(e) => PingResult { reachable: false, latency_ms: 0, error: Some(e.to_string()) },
                });
            }
            Err(e) => {
                crate::logging::warn("admin", &format!("falling back to TCP probe for {base_url}: {e}"));
            }
        }

        self.tcp_probe(base_url).await
    }

    /// Last-resort reachability probe used only when an HTTP client can't
    /// be constructed for the channel's base URL.
    async fn tcp_probe(&self, base_url: &str) -> Result<PingResult, String> {
        let parsed = url::Url::parse(base_url).map_err(|e| format!("invalid base url: {e}"))?;
        let host = parsed.host_str().ok_or("base url has no host")?.to_string();
        let port = parsed.port_or_known_default().unwrap_or(443);

        let start = Instant::now();
        let addr = tokio::task::spawn_blocking(move || (host.as_str(), port).to_socket_addrs())
            .await
            .map_err(|e| e.to_string())?;

        match addr {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => match tokio::net::TcpStream::connect(addr).await {
                    Ok(_) => Ok(PingResult {
                        reachable: true,
                        latency_ms: start.elapsed().as_millis() as u64,
                        error: None,
                    }),
                    Err(e) => Ok(PingResult { reachable: false, latency_ms: 0, error: Some(e.to_string()) }),
                },
                None => Ok(PingResult { reachable: false, latency_ms: 0, error: Some("no addresses resolved".to_string()) }),
            },
            Err(e) => Ok(PingResult { reachable: false, latency_ms: 0, error: Some(e.to_string()) }),
        }
    }

    pub fn get_metrics(&self, channel_id: Option<&str>) -> Vec<(String, ChannelMetricsSnapshot)> {
        let ids: Vec<String> = match channel_id {
            Some(id) => vec![id.to_string()],
            None => [ChannelKind::Messages, ChannelKind::Responses, ChannelKind::Gemini]
                .into_iter()
                .flat_map(|kind| self.core.channels.get_channels(kind))
                .map(|c| c.id)
                .collect(),
        };
        ids.into_iter().map(|id| {
            let snap = self.core.metrics.snapshot(&id);
            (id, snap)
        }).collect()
    }

    pub fn get_global_stats(&self) -> GlobalStats {
        let stats = self.core.history.get_stats();
        GlobalStats {
            total_requests: stats.total as u64,
            total_success: stats.success as u64,
            total_failure: stats.failure as u64,
        }
    }

    pub fn reset_scheduler(&self, channel_id: &str) {
        self.core.scheduler.reset_circuit(channel_id);
    }

    pub fn get_request_history(
        &self,
        channel_id: &str,
        limit: usize,
        offset: usize,
        status_filter: &str,
    ) -> (Vec<RequestRecord>, usize) {
        self.core.history.get_history(channel_id, limit, offset, status_filter)
    }

    pub fn clear_request_history(&self) {
        self.core.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use std::path::PathBuf;

    fn test_admin() -> AdminApi {
        let mut settings = Settings::default();
        settings.port = 0;
        let core = ProxyCore::new(settings, PathBuf::from("/tmp/proxycore-admin-test.toml"));
        AdminApi::new(core)
    }

    #[tokio::test]
    async fn set_port_rejects_unbindable_port_without_mutating_settings() {
        let admin = test_admin();
        let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_port = blocker.local_addr().unwrap().port();

        let before = admin.core.port();
        let result = admin.set_port(taken_port).await;

        assert!(result.is_err());
        assert_eq!(admin.core.port(), before, "port must be unchanged on a failed bind");
    }

    #[tokio::test]
    async fn set_port_accepts_bindable_port_and_persists() {
        let admin = test_admin();
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let free_port = probe.local_addr().unwrap().port();
        drop(probe);

        admin.set_port(free_port).await.unwrap();
        assert_eq!(admin.core.port(), free_port);

        let _ = std::fs::remove_file("/tmp/proxycore-admin-test.toml");
    }
}
