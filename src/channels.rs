//! Channel manager: the mutable catalog of upstream endpoints plus the
//! global failed-key cooldown table.
//!
//! Grounded on the teacher's global-state idiom (a `once_cell`-backed
//! `Arc<Mutex<..>>`, swept by a background task) generalized from a single
//! rate-limit counter to a per-key failure table, and on its
//! `Vec<Upstream>`/`Vec<ModelCfg>` catalog shape generalized to three
//! partitioned channel lists.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{Channel, ChannelCatalog, ServiceType};

const FAILED_KEY_BASE_WINDOW: Duration = Duration::from_secs(5 * 60);
const FAILED_KEY_MAX_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Messages,
    Responses,
    Gemini,
}

/// Lightweight view of a channel returned by the public getters — callers
/// never receive a reference into internal state.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub index: usize,
    pub channel: Channel,
    pub effective_priority: i64,
}

#[derive(Debug, Clone)]
struct FailedKey {
    timestamp: SystemTime,
    failure_count: u32,
}

impl FailedKey {
    fn recovery_window(&self) -> Duration {
        if self.failure_count <= FAILED_KEY_MAX_COUNT {
            FAILED_KEY_BASE_WINDOW
        } else {
            FAILED_KEY_BASE_WINDOW * 2
        }
    }

    fn is_active(&self, now: SystemTime) -> bool {
        now.duration_since(self.timestamp)
            .map(|elapsed| elapsed < self.recovery_window())
            .unwrap_or(true)
    }
}

pub struct ChannelManager {
    catalog: RwLock<ChannelCatalog>,
    failed_keys: RwLock<HashMap<String, FailedKey>>,
}

impl ChannelManager {
    pub fn new(catalog: ChannelCatalog) -> Arc<Self> {
        Arc::new(Self {
            catalog: RwLock::new(catalog),
            failed_keys: RwLock::new(HashMap::new()),
        })
    }

    pub fn load_channels(&self, catalog: ChannelCatalog) {
        *self.catalog.write().unwrap() = catalog;
    }

    pub fn count(&self) -> usize {
        let catalog = self.catalog.read().unwrap();
        catalog.messages.len() + catalog.responses.len() + catalog.gemini.len()
    }

    fn list_for<'a>(catalog: &'a ChannelCatalog, kind: ChannelKind) -> &'a Vec<Channel> {
        match kind {
            ChannelKind::Messages => &catalog.messages,
            ChannelKind::Responses => &catalog.responses,
            ChannelKind::Gemini => &catalog.gemini,
        }
    }

    fn default_service_type(kind: ChannelKind) -> ServiceType {
        default_service_type_for_kind(kind)
    }

    /// Defensive copy of one partition's raw list, in on-disk order.
    pub fn get_channels(&self, kind: ChannelKind) -> Vec<Channel> {
        let catalog = self.catalog.read().unwrap();
        Self::list_for(&catalog, kind).clone()
    }

    pub fn get_channel(&self, kind: ChannelKind, index: usize) -> Option<Channel> {
        let catalog = self.catalog.read().unwrap();
        Self::list_for(&catalog, kind).get(index).cloned()
    }

    /// Channels eligible to serve a request of the given kind, per the
    /// service-type resolution and fallback rules: `messages` prefers
    /// native Claude channels, falling back to Claude-typed entries
    /// parked in the `responses` list; `responses` prefers OpenAI
    /// channels (responses list, then messages list) and only falls back
    /// to Claude channels — which then need protocol conversion — when no
    /// OpenAI channel exists anywhere; `gemini` only ever draws from the
    /// gemini list.
    pub fn get_active_channels(&self, kind: ChannelKind) -> Vec<ChannelInfo> {
        let catalog = self.catalog.read().unwrap();
        let now_ms = now_millis();

        let candidates: Vec<(usize, &Channel, ChannelKind)> = match kind {
            ChannelKind::Messages => {
                let primary = active_with_type(
                    &catalog.messages,
                    ServiceType::Claude,
                    Self::default_service_type(ChannelKind::Messages),
                    ChannelKind::Messages,
                );
                if !primary.is_empty() {
                    primary
                } else {
                    active_with_type(
                        &catalog.responses,
                        ServiceType::Claude,
                        Self::default_service_type(ChannelKind::Responses),
                        ChannelKind::Responses,
                    )
                }
            }
            ChannelKind::Responses => {
                let mut openai = active_with_type(
                    &catalog.responses,
                    ServiceType::OpenAI,
                    Self::default_service_type(ChannelKind::Responses),
                    ChannelKind::Responses,
                );
                openai.extend(active_with_type(
                    &catalog.messages,
                    ServiceType::OpenAI,
                    Self::default_service_type(ChannelKind::Messages),
                    ChannelKind::Messages,
                ));
                if !openai.is_empty() {
                    openai
                } else {
                    let mut claude = active_with_type(
                        &catalog.responses,
                        ServiceType::Claude,
                        Self::default_service_type(ChannelKind::Responses),
                        ChannelKind::Responses,
                    );
                    claude.extend(active_with_type(
                        &catalog.messages,
                        ServiceType::Claude,
                        Self::default_service_type(ChannelKind::Messages),
                        ChannelKind::Messages,
                    ));
                    claude
                }
            }
            ChannelKind::Gemini => active_with_type(
                &catalog.gemini,
                ServiceType::Gemini,
                Self::default_service_type(ChannelKind::Gemini),
                ChannelKind::Gemini,
            ),
        };

        let mut infos: Vec<ChannelInfo> = candidates
            .into_iter()
            .map(|(index, channel, _source_kind)| {
                let (tier, priority) = channel.effective_priority(now_ms, index);
                ChannelInfo {
                    index,
                    channel: channel.clone(),
                    effective_priority: tier * 1_000_000 + priority,
                }
            })
            .collect();
        infos.sort_by_key(|info| info.effective_priority);
        infos
    }

    pub fn add(&self, kind: ChannelKind, mut channel: Channel) -> usize {
        if channel.id.trim().is_empty() {
            channel.id = uuid::Uuid::new_v4().to_string();
        }
        let mut catalog = self.catalog.write().unwrap();
        let list = match kind {
            ChannelKind::Messages => &mut catalog.messages,
            ChannelKind::Responses => &mut catalog.responses,
            ChannelKind::Gemini => &mut catalog.gemini,
        };
        list.push(channel);
        list.len() - 1
    }

    pub fn update(&self, kind: ChannelKind, index: usize, channel: Channel) -> Result<(), String> {
        let mut catalog = self.catalog.write().unwrap();
        let list = match kind {
            ChannelKind::Messages => &mut catalog.messages,
            ChannelKind::Responses => &mut catalog.responses,
            ChannelKind::Gemini => &mut catalog.gemini,
        };
        let slot = list
            .get_mut(index)
            .ok_or_else(|| format!("no channel at index {index}"))?;
        *slot = channel;
        Ok(())
    }

    pub fn delete(&self, kind: ChannelKind, index: usize) -> Result<Channel, String> {
        let mut catalog = self.catalog.write().unwrap();
        let list = match kind {
            ChannelKind::Messages => &mut catalog.messages,
            ChannelKind::Responses => &mut catalog.responses,
            ChannelKind::Gemini => &mut catalog.gemini,
        };
        if index >= list.len() {
            return Err(format!("no channel at index {index}"));
        }
        Ok(list.remove(index))
    }

    /// First enabled, non-blank key on `channel` that is neither in the
    /// caller's locally-failed set nor the global cooldown table. When
    /// every key is failed, returns the oldest failure as a last-chance
    /// retry rather than giving up outright.
    pub fn get_next_api_key(
        &self,
        channel: &Channel,
        locally_failed: &[String],
    ) -> Result<String, String> {
        let usable: Vec<&str> = channel
            .api_keys
            .iter()
            .filter(|k| k.enabled && !k.key.is_empty())
            .map(|k| k.key.as_str())
            .collect();
        if usable.is_empty() {
            return Err("channel has no usable keys".to_string());
        }

        let failed = self.failed_keys.read().unwrap();
        let now = SystemTime::now();

        for key in &usable {
            let locally_bad = locally_failed.iter().any(|k| k == key);
            let globally_bad = failed
                .get(*key)
                .map(|f| f.is_active(now))
                .unwrap_or(false);
            if !locally_bad && !globally_bad {
                return Ok(key.to_string());
            }
        }

        usable
            .iter()
            .min_by_key(|key| {
                failed
                    .get(**key)
                    .map(|f| f.timestamp)
                    .unwrap_or(UNIX_EPOCH)
            })
            .map(|key| key.to_string())
            .ok_or_else(|| "channel has no usable keys".to_string())
    }

    pub fn mark_key_failed(&self, key: &str) {
        let mut failed = self.failed_keys.write().unwrap();
        let entry = failed.entry(key.to_string()).or_insert(FailedKey {
            timestamp: SystemTime::now(),
            failure_count: 0,
        });
        entry.failure_count += 1;
        entry.timestamp = SystemTime::now();
    }

    /// Drop cooldown entries that are no longer active. Intended to be
    /// driven by a periodic sweeper (default interval 1 minute).
    pub fn sweep_failed_keys(&self) {
        let now = SystemTime::now();
        let mut failed = self.failed_keys.write().unwrap();
        failed.retain(|_, f| f.is_active(now));
    }

    #[cfg(test)]
    pub fn failed_key_count(&self) -> usize {
        self.failed_keys.read().unwrap().len()
    }
}

fn active_with_type<'a>(
    list: &'a [Channel],
    want: ServiceType,
    default_for_list: ServiceType,
    _kind: ChannelKind,
) -> Vec<(usize, &'a Channel, ChannelKind)> {
    list.iter()
        .enumerate()
        .filter(|(_, ch)| {
            ch.status != crate::config::ChannelStatus::Disabled
                && ch.resolved_service_type(default_for_list) == want
        })
        .map(|(i, ch)| (i, ch, _kind))
        .collect()
}

/// Per-list default when an entry's `serviceType` is empty.
pub fn default_service_type_for_kind(kind: ChannelKind) -> ServiceType {
    match kind {
        ChannelKind::Messages => ServiceType::Claude,
        ChannelKind::Responses => ServiceType::OpenAI,
        ChannelKind::Gemini => ServiceType::Gemini,
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, AuthType, ChannelStatus};

    fn channel(id: &str, service_type: Option<ServiceType>) -> Channel {
        Channel {
            id: id.to_string(),
            name: id.to_string(),
            service_type,
            base_urls: vec!["https://example.com".to_string()],
            api_keys: vec![ApiKey {
                key: format!("{id}-key"),
                enabled: true,
            }],
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
    fn service_type_preference_messages_and_responses() {
        let catalog = ChannelCatalog {
            messages: vec![channel("claude-1", Some(ServiceType::Claude))],
            responses: vec![channel("openai-1", Some(ServiceType::OpenAI))],
            gemini: vec![],
        };
        let mgr = ChannelManager::new(catalog);

        let responses = mgr.get_active_channels(ChannelKind::Responses);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].channel.id, "openai-1");

        let messages = mgr.get_active_channels(ChannelKind::Messages);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel.id, "claude-1");
    }

    #[test]
    fn default_service_type_for_empty_field() {
        let catalog = ChannelCatalog {
            messages: vec![],
            responses: vec![channel("implicit-openai", None)],
            gemini: vec![],
        };
        let mgr = ChannelManager::new(catalog);
        let responses = mgr.get_active_channels(ChannelKind::Responses);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].channel.id, "implicit-openai");
    }

    #[test]
    fn responses_falls_back_to_claude_when_no_openai_exists() {
        let catalog = ChannelCatalog {
            messages: vec![channel("claude-only", Some(ServiceType::Claude))],
            responses: vec![],
            gemini: vec![],
        };
        let mgr = ChannelManager::new(catalog);
        let responses = mgr.get_active_channels(ChannelKind::Responses);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].channel.id, "claude-only");
    }

    #[test]
    fn key_rotation_avoids_failed_key_until_window_lapses() {
        let ch = channel("c1", Some(ServiceType::Claude));
        let catalog = ChannelCatalog {
            messages: vec![ch.clone()],
            responses: vec![],
            gemini: vec![],
        };
        let mgr = ChannelManager::new(catalog);
        let key = ch.api_keys[0].key.clone();

        mgr.mark_key_failed(&key);
        // Only key on the channel is now failed: fallback to last-chance retry.
        let got = mgr.get_next_api_key(&ch, &[]).unwrap();
        assert_eq!(got, key);
        assert_eq!(mgr.failed_key_count(), 1);
    }

    #[test]
    fn default_priority_channels_sort_by_list_position() {
        let catalog = ChannelCatalog {
            messages: vec![
                channel("first", Some(ServiceType::Claude)),
                channel("second", Some(ServiceType::Claude)),
                channel("third", Some(ServiceType::Claude)),
            ],
            responses: vec![],
            gemini: vec![],
        };
        let mgr = ChannelManager::new(catalog);
        let ordered = mgr.get_active_channels(ChannelKind::Messages);
        let ids: Vec<&str> = ordered.iter().map(|info| info.channel.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }
}
