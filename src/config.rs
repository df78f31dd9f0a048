//! Configuration port.
//!
//! A thin `Load`/`Save`/`Validate` surface over a TOML file on disk. The
//! surrounding application owns the actual file location and the RPC layer
//! used to edit channels; this module only defines the typed shape and the
//! load/save/validate mechanics.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Claude,
    OpenAI,
    Gemini,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Claude => "claude",
            ServiceType::OpenAI => "openai",
            ServiceType::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    XApiKey,
    Bearer,
    Both,
    XGoogApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Active,
    Suspended,
    Disabled,
}

/// A single API key entry. Accepts either a bare TOML string (legacy shape)
/// or a `{key, enabled}` table on the way in; always serialized back out as
/// a table.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub key: String,
    pub enabled: bool,
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Legacy(String),
            Full {
                key: String,
                #[serde(default)]
                enabled: Option<bool>,
            },
        }

        Ok(match Shape::deserialize(deserializer)? {
            Shape::Legacy(key) => {
                let enabled = !key.is_empty();
                ApiKey { key, enabled }
            }
            Shape::Full { key, enabled } => {
                let enabled = enabled.unwrap_or(!key.is_empty());
                ApiKey { key, enabled }
            }
        })
    }
}

/// One configured upstream endpoint with one or more API keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub service_type: Option<ServiceType>,
    pub base_urls: Vec<String>,
    pub api_keys: Vec<ApiKey>,
    pub auth_type: Option<AuthType>,
    pub priority: i64,
    pub status: ChannelStatus,
    /// Unix millis; while in the future, this channel's effective priority
    /// is shifted ahead of non-promoted peers.
    pub promotion_until: Option<i64>,
    pub model_mapping: std::collections::HashMap<String, String>,
    pub low_quality: bool,
    pub insecure_skip_verify: bool,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            service_type: None,
            base_urls: Vec::new(),
            api_keys: Vec::new(),
            auth_type: None,
            priority: 0,
            status: ChannelStatus::default(),
            promotion_until: None,
            model_mapping: Default::default(),
            low_quality: false,
            insecure_skip_verify: false,
        }
    }
}

impl Channel {
    /// Effective priority used for sort order: promoted channels (future
    /// `promotion_until`) sort ahead of everyone else; ties are broken by
    /// the configured priority, falling back to the channel's position in
    /// its partition when `priority` is left at its default of `0`.
    pub fn effective_priority(&self, now_ms: i64, index: usize) -> (i64, i64) {
        let promoted = self.promotion_until.map(|t| t > now_ms).unwrap_or(false);
        let priority = if self.priority != 0 { self.priority } else { index as i64 };
        (if promoted { 0 } else { 1 }, priority)
    }

    pub fn resolved_service_type(&self, default_for_list: ServiceType) -> ServiceType {
        self.service_type.unwrap_or(default_for_list)
    }

    /// `auth_type` defaults per vendor when left unset in config: Claude
    /// wants `x-api-key`, OpenAI wants bearer, Gemini wants `x-goog-api-key`.
    /// `vendor` is the service type the channel is actually being driven
    /// as (the calling adapter's own vendor), not necessarily
    /// `self.service_type`.
    pub fn resolved_auth_type(&self, vendor: ServiceType) -> AuthType {
        self.auth_type.unwrap_or(match vendor {
            ServiceType::Claude => AuthType::XApiKey,
            ServiceType::OpenAI => AuthType::Bearer,
            ServiceType::Gemini => AuthType::XGoogApiKey,
        })
    }

    pub fn has_usable_key(&self) -> bool {
        self.api_keys.iter().any(|k| k.enabled && !k.key.is_empty())
    }
}

/// The three disjoint channel partitions, keyed by request kind.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ChannelCatalog {
    pub messages: Vec<Channel>,
    pub responses: Vec<Channel>,
    pub gemini: Vec<Channel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub access_key: Option<String>,
    pub channels: ChannelCatalog,
    pub metrics_window_size: usize,
    pub failure_threshold: f64,
    pub history_capacity: usize,
    pub history_retention_hours: i64,
    pub session_max_messages: usize,
    pub session_max_age_hours: i64,
    pub retry_max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8787,
            access_key: None,
            channels: ChannelCatalog::default(),
            metrics_window_size: 10,
            failure_threshold: 0.5,
            history_capacity: 1000,
            history_retention_hours: 48,
            session_max_messages: 200,
            session_max_age_hours: 24,
            retry_max_attempts: 4,
            retry_initial_ms: 300,
            retry_max_ms: 3000,
        }
    }
}

/// Clamp a loaded/edited settings value into the invariants the rest of the
/// crate assumes. Out-of-range values are corrected rather than rejected,
/// matching the port's `Validate` contract.
pub fn validate(settings: &mut Settings) {
    if settings.port == 0 {
        settings.port = Settings::default().port;
    }
    if settings.metrics_window_size < 3 {
        settings.metrics_window_size = 3;
    }
    if !(settings.failure_threshold > 0.0 && settings.failure_threshold <= 1.0) {
        settings.failure_threshold = 0.5;
    }
    if settings.history_capacity == 0 {
        settings.history_capacity = 1000;
    }
    for ch in [
        &mut settings.channels.messages,
        &mut settings.channels.responses,
        &mut settings.channels.gemini,
    ]
    .into_iter()
    .flatten()
    {
        if ch.id.trim().is_empty() {
            ch.id = uuid::Uuid::new_v4().to_string();
        }
    }
}

pub fn load(path: &Path) -> Result<Settings, String> {
    if !path.exists() {
        let mut defaults = Settings::default();
        validate(&mut defaults);
        return Ok(defaults);
    }
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {path:?}: {e}"))?;
    let mut settings: Settings =
        toml::from_str(&raw).map_err(|e| format!("failed to parse {path:?}: {e}"))?;
    validate(&mut settings);
    Ok(settings)
}

/// Atomically persist `settings` to `path`: serialize, write to a sibling
/// temp file, then rename over the target so readers never observe a
/// partially written file. On unix the file is restricted to `0600` since
/// channel API keys are secrets.
pub fn save(path: &Path, settings: &Settings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create {parent:?}: {e}"))?;
    }

    let serialized =
        toml::to_string_pretty(settings).map_err(|e| format!("failed to serialize settings: {e}"))?;

    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, serialized.as_bytes())
        .map_err(|e| format!("failed to write {tmp_path:?}: {e}"))?;

    restrict_permissions(&tmp_path)?;

    fs::rename(&tmp_path, path).map_err(|e| format!("failed to rename into {path:?}: {e}"))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms).map_err(|e| format!("failed to chmod {path:?}: {e}"))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), String> {
    Ok(())
}

/// Default config file location, following the same "app data dir" layout
/// the desktop shell's own settings file used.
pub fn default_path() -> PathBuf {
    let mut p = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push("proxycore");
    p.push("settings.toml");
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_key_string_decodes_enabled() {
        let toml_src = r#"
            [[channels.messages]]
            id = "a"
            name = "a"
            base_urls = ["https://example.com"]
            api_keys = ["sk-live"]
        "#;
        let settings: Settings = toml::from_str(toml_src).unwrap();
        let ch = &settings.channels.messages[0];
        assert_eq!(ch.api_keys.len(), 1);
        assert!(ch.api_keys[0].enabled);
        assert_eq!(ch.api_keys[0].key, "sk-live");
    }

    #[test]
    fn validate_clamps_out_of_range_values() {
        let mut settings = Settings {
            port: 0,
            metrics_window_size: 1,
            failure_threshold: 2.0,
            history_capacity: 0,
            ..Settings::default()
        };
        validate(&mut settings);
        assert_eq!(settings.port, Settings::default().port);
        assert_eq!(settings.metrics_window_size, 3);
        assert_eq!(settings.failure_threshold, 0.5);
        assert_eq!(settings.history_capacity, 1000);
    }

    #[test]
    fn auth_type_defaults_follow_vendor_when_unset() {
        let ch = Channel::default();
        assert_eq!(ch.resolved_auth_type(ServiceType::Claude), AuthType::XApiKey);
        assert_eq!(ch.resolved_auth_type(ServiceType::OpenAI), AuthType::Bearer);
        assert_eq!(ch.resolved_auth_type(ServiceType::Gemini), AuthType::XGoogApiKey);
    }

    #[test]
    fn explicit_auth_type_overrides_vendor_default() {
        let ch = Channel { auth_type: Some(AuthType::Both), ..Channel::default() };
        assert_eq!(ch.resolved_auth_type(ServiceType::OpenAI), AuthType::Both);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("proxycore-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("settings.toml");
        let mut settings = Settings::default();
        settings.port = 9999;
        save(&path, &settings).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.port, 9999);
        let _ = fs::remove_dir_all(dir);
    }
}
