//! Configuration management for distri-server.
//!
//! Options are a single JSON object whose keys mirror the option names
//! applications already use (`security.verificationStrength`,
//! `mode.typing`, ...). Every field has a default, so `{}` is a valid
//! configuration. Loading always validates; an invalid configuration is a
//! fatal [`Error::Config`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::RecordLayout;
use crate::types::PrimitiveType;

/// Main configuration structure for the server.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Listener options
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Verification, proof-of-work and admission settings
    #[serde(default)]
    pub security: SecurityConfig,

    /// Typing mode of work and solutions
    #[serde(default)]
    pub mode: ModeConfig,

    /// Initial work list
    #[serde(default)]
    pub work: Vec<Value>,

    /// Client payloads by execution environment
    #[serde(default)]
    pub files: BTreeMap<String, DeliveryFile>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// WebSocket endpoint path
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_path() -> String {
    "/".to_string()
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Independent solutions required per work item
    #[serde(default = "default_verification_strength")]
    pub verification_strength: usize,

    /// Leading zero hex digits required of a hashcash proof
    #[serde(default = "default_hash_strength")]
    pub hash_strength: u32,

    /// Share of agreeing solutions required to accept a split vote
    #[serde(default = "default_equality_percentage")]
    pub equality_percentage: u32,

    /// Connections required before anyone may request work
    #[serde(default = "default_min_users")]
    pub min_users: usize,

    /// Close connections on any protocol violation
    #[serde(default)]
    pub strict: bool,

    /// Reclaim work held longer than this
    #[serde(default)]
    pub timeout: Option<TimeoutSetting>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            verification_strength: default_verification_strength(),
            hash_strength: default_hash_strength(),
            equality_percentage: default_equality_percentage(),
            min_users: default_min_users(),
            strict: false,
            timeout: None,
        }
    }
}

fn default_verification_strength() -> usize {
    1
}

fn default_hash_strength() -> u32 {
    3
}

fn default_equality_percentage() -> u32 {
    100
}

fn default_min_users() -> usize {
    1
}

/// `security.timeout` as written: seconds, or `"adaptive"`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TimeoutSetting {
    Seconds(u64),
    Mode(TimeoutMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutMode {
    Adaptive,
}

/// Resolved per-assignment timeout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentTimeout {
    /// Reclaim after a fixed duration
    Fixed(Duration),
    /// Reclaim after a multiple of the longest observed round trip
    Adaptive,
}

/// Work typing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeConfig {
    #[serde(default)]
    pub typing: Typing,

    /// Work payload type, static mode only
    #[serde(default)]
    pub input: Option<PrimitiveType>,

    /// Solution type, static mode only
    #[serde(default)]
    pub output: Option<PrimitiveType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Typing {
    #[default]
    Dynamic,
    Static,
}

/// Where clients of one environment fetch their worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DeliveryFile {
    Url(String),
    Detailed {
        url: String,
        /// Lower is preferred
        #[serde(default)]
        priority: u32,
    },
}

impl DeliveryFile {
    pub fn url(&self) -> &str {
        match self {
            DeliveryFile::Url(url) => url,
            DeliveryFile::Detailed { url, .. } => url,
        }
    }

    pub fn priority(&self) -> u32 {
        match self {
            DeliveryFile::Url(_) => 0,
            DeliveryFile::Detailed { priority, .. } => *priority,
        }
    }
}

impl Config {
    /// Load and validate configuration from a JSON file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;
        Self::from_value(value)
    }

    /// Build and validate configuration from an options object.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Config(
                "options must be given as an object".to_string(),
            ));
        }
        let config: Config =
            serde_json::from_value(value).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject option combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let security = &self.security;
        if security.verification_strength == 0 {
            return Err(Error::Config(
                "security.verificationStrength must be at least 1".to_string(),
            ));
        }
        if security.equality_percentage > 100 {
            return Err(Error::Config(format!(
                "security.equalityPercentage must be at most 100, got {}",
                security.equality_percentage
            )));
        }
        // A SHA-256 digest has 64 hex digits.
        if security.hash_strength > 64 {
            return Err(Error::Config(format!(
                "security.hashStrength must be at most 64, got {}",
                security.hash_strength
            )));
        }
        if security.timeout == Some(TimeoutSetting::Seconds(0)) {
            return Err(Error::Config(
                "security.timeout must be positive".to_string(),
            ));
        }
        if !self.connection.path.starts_with('/') {
            return Err(Error::Config(format!(
                "connection.path must start with '/', got {:?}",
                self.connection.path
            )));
        }

        if self.mode.typing == Typing::Static {
            let input = self.mode.input.ok_or_else(|| {
                Error::Config("static typing requires mode.input".to_string())
            })?;
            let output = self.mode.output.ok_or_else(|| {
                Error::Config("static typing requires mode.output".to_string())
            })?;
            RecordLayout::new(input, output, security.verification_strength)?;
        }

        Ok(())
    }

    pub fn assignment_timeout(&self) -> Option<AssignmentTimeout> {
        self.security.timeout.map(|setting| match setting {
            TimeoutSetting::Seconds(secs) => AssignmentTimeout::Fixed(Duration::from_secs(secs)),
            TimeoutSetting::Mode(TimeoutMode::Adaptive) => AssignmentTimeout::Adaptive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveKind;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = Config::from_value(json!({})).unwrap();
        assert_eq!(config.security.verification_strength, 1);
        assert_eq!(config.security.hash_strength, 3);
        assert_eq!(config.security.equality_percentage, 100);
        assert_eq!(config.security.min_users, 1);
        assert!(!config.security.strict);
        assert_eq!(config.assignment_timeout(), None);
        assert_eq!(config.mode.typing, Typing::Dynamic);
        assert_eq!(config.connection.listen.port(), 8080);
        assert!(config.work.is_empty());
    }

    #[test]
    fn test_full_options() {
        let config = Config::from_value(json!({
            "connection": { "listen": "127.0.0.1:9000", "path": "/distri" },
            "security": {
                "verificationStrength": 3,
                "hashStrength": 2,
                "equalityPercentage": 60,
                "minUsers": 4,
                "strict": true,
                "timeout": 30
            },
            "mode": {
                "typing": "static",
                "input": { "type": "uint", "width": 4 },
                "output": { "type": "float", "width": 8 }
            },
            "work": [1, 2, 3],
            "files": {
                "node": "https://example.com/worker.js",
                "python": { "url": "https://example.com/worker.py", "priority": 2 }
            }
        }))
        .unwrap();

        assert_eq!(config.security.verification_strength, 3);
        assert_eq!(config.security.min_users, 4);
        assert_eq!(
            config.assignment_timeout(),
            Some(AssignmentTimeout::Fixed(Duration::from_secs(30)))
        );
        assert_eq!(config.mode.typing, Typing::Static);
        assert_eq!(
            config.mode.input,
            Some(PrimitiveType::new(PrimitiveKind::Uint, 4))
        );
        assert_eq!(config.files["node"].url(), "https://example.com/worker.js");
        assert_eq!(config.files["node"].priority(), 0);
        assert_eq!(config.files["python"].priority(), 2);
        assert_eq!(config.connection.path, "/distri");
    }

    #[test]
    fn test_adaptive_timeout() {
        let config = Config::from_value(json!({"security": {"timeout": "adaptive"}})).unwrap();
        assert_eq!(config.assignment_timeout(), Some(AssignmentTimeout::Adaptive));
    }

    #[test]
    fn test_rejects_non_object_options() {
        assert!(matches!(
            Config::from_value(json!([1, 2])),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_value(json!("port 8080")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("distri-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.json");
        std::fs::write(&good, r#"{"security": {"minUsers": 4}}"#).unwrap();
        assert_eq!(Config::load_from(&good).unwrap().security.min_users, 4);

        let bad = dir.join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(Config::load_from(&bad), Err(Error::Json(_))));

        assert!(matches!(
            Config::load_from(&dir.join("missing.json")),
            Err(Error::Io(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rejects_unknown_typing() {
        let err = Config::from_value(json!({"mode": {"typing": "duck"}})).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_invalid_values() {
        for options in [
            json!({"security": {"verificationStrength": 0}}),
            json!({"security": {"equalityPercentage": 101}}),
            json!({"security": {"hashStrength": 65}}),
            json!({"security": {"timeout": 0}}),
            json!({"connection": {"path": "ws"}}),
            json!({"mode": {"typing": "static"}}),
            json!({"mode": {
                "typing": "static",
                "input": {"type": "int", "width": 3},
                "output": {"type": "int", "width": 4}
            }}),
            json!({
                "security": {"verificationStrength": 300},
                "mode": {
                    "typing": "static",
                    "input": {"type": "int", "width": 4},
                    "output": {"type": "int", "width": 4}
                }
            }),
        ] {
            assert!(
                matches!(Config::from_value(options.clone()), Err(Error::Config(_))),
                "accepted {}",
                options
            );
        }
    }
}
