//! Scheduler: composes the channel manager and metrics manager to choose
//! the next viable channel and to record outcomes back into both.

use std::collections::HashSet;
use std::sync::Arc;

use crate::channels::{ChannelInfo, ChannelKind, ChannelManager};
use crate::config::Channel;
use crate::error::{ProxyError, ProxyResult};
use crate::metrics::MetricsManager;

pub struct Scheduler {
    channels: Arc<ChannelManager>,
    metrics: Arc<MetricsManager>,
}

pub struct Pick {
    pub channel: Channel,
    pub api_key: String,
}

impl Scheduler {
    pub fn new(channels: Arc<ChannelManager>, metrics: Arc<MetricsManager>) -> Self {
        Self { channels, metrics }
    }

    /// 1. read active channels for `kind`; empty → `NoUpstream`.
    /// 2. iterate in priority order, skipping any with a tripped breaker.
    /// 3. obtain a key for each candidate; skip on error.
    /// 4. all exhausted → `AllBroken`.
    pub fn pick(&self, kind: ChannelKind) -> ProxyResult<Pick> {
        self.pick_preferring(kind, None, &HashSet::new())
    }

    /// Same selection as `pick`, but a session's sticky `preferred` channel
    /// (when still viable) is tried ahead of priority order, and any
    /// channel id in `excluded` (already attempted this request) is
    /// skipped outright.
    pub fn pick_preferring(
        &self,
        kind: ChannelKind,
        preferred: Option<&str>,
        excluded: &HashSet<String>,
    ) -> ProxyResult<Pick> {
        let mut candidates: Vec<ChannelInfo> = self.channels.get_active_channels(kind);
        if candidates.is_empty() {
            return Err(ProxyError::NoUpstream);
        }

        if let Some(preferred) = preferred {
            if let Some(pos) = candidates.iter().position(|c| c.channel.id == preferred) {
                let info = candidates.remove(pos);
                candidates.insert(0, info);
            }
        }

        for info in &candidates {
            if excluded.contains(&info.channel.id) {
                continue;
            }
            if self.metrics.is_circuit_broken(&info.channel.id) {
                continue;
            }
            if let Ok(api_key) = self.channels.get_next_api_key(&info.channel, &[]) {
                return Ok(Pick {
                    channel: info.channel.clone(),
                    api_key,
                });
            }
        }

        Err(ProxyError::AllBroken)
    }

    pub fn reset_circuit(&self, channel_id: &str) {
        self.metrics.reset_circuit(channel_id);
    }

    /// Updates the window and counters; trips the breaker when the window
    /// failure rate crosses threshold (at least 3 samples).
    pub fn record_result(
        &self,
        channel_id: &str,
        success: bool,
        latency_ms: u64,
        input_tokens: i64,
        output_tokens: i64,
        cache_tokens: i64,
    ) {
        self.metrics.record_result(
            channel_id,
            success,
            latency_ms,
            input_tokens,
            output_tokens,
            cache_tokens,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, AuthType, ChannelCatalog, ChannelStatus, ServiceType};

    fn channel(id: &str) -> Channel {
        Channel {
            id: id.to_string(),
            name: id.to_string(),
            service_type: Some(ServiceType::Claude),
            base_urls: vec!["https://example.com".to_string()],
            api_keys: vec![ApiKey { key: "k".to_string(), enabled: true }],
            auth_type: Some(AuthType::XApiKey),
            priority: 0,
            status: ChannelStatus::Active,
            promotion_until: None,
            model_mapping: Default::default(),
            low_quality: false,
            insecure_skip_verify: false,
        }
    }

    #[test]
    fn skips_broken_channel_and_falls_through_to_next_priority() {
        let mut first = channel("c1");
        first.priority = 0;
        let mut second = channel("c2");
        second.priority = 1;

        let catalog = ChannelCatalog {
            messages: vec![first, second],
            responses: vec![],
            gemini: vec![],
        };
        let channels = ChannelManager::new(catalog);
        let metrics = MetricsManager::new(10, 0.5);
        let scheduler = Scheduler::new(channels.clone(), metrics.clone());

        for i in 0..9 {
            metrics.record_result("c1", i < 4, 10, 1, 1, 0);
        }
        assert!(metrics.is_circuit_broken("c1"));

        let pick = scheduler.pick(ChannelKind::Messages).unwrap();
        assert_eq!(pick.channel.id, "c2");
    }

    #[test]
    fn no_upstream_when_partition_empty() {
        let channels = ChannelManager::new(ChannelCatalog::default());
        let metrics = MetricsManager::new(10, 0.5);
        let scheduler = Scheduler::new(channels, metrics);
        assert!(matches!(
            scheduler.pick(ChannelKind::Gemini),
            Err(ProxyError::NoUpstream)
        ));
    }
}
