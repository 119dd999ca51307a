// Server configuration.
//
// `ServerConfig` holds every tunable of the control server. It has sensible
// defaults, can be loaded from a JSON file (missing fields fall back to the
// defaults), and is further overridden by CLI flags in `main.rs`.
//
// Feature toggles live in `Features` and are passed explicitly to the code
// that needs them (currently only registry construction in `demo.rs`). There
// is no ambient or per-thread override: a feature is on or off for the whole
// process.

use std::path::Path;
use std::time::Duration;

use juicy_pie_protocol::MAX_LINE_BYTES;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::session::{MAX_COMMANDS_PER_TICK, SessionOptions};

/// Optional features that are disabled unless configured.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    /// Register `script.eval`, which evaluates client-supplied scripts in a
    /// per-session interpreter.
    pub script_eval: bool,
}

/// Configuration for the control server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Per-session cap on commands dispatched in a single tick.
    pub max_commands_per_tick: usize,
    /// Connections beyond this many live sessions are turned away.
    pub max_sessions: usize,
    /// Longest accepted command line in bytes.
    pub max_line_bytes: usize,
    /// How long `close()` waits for each I/O thread to stop.
    pub join_timeout_ms: u64,
    /// Writer thread sleep between flush cycles.
    pub writer_idle_ms: u64,
    /// Simulation rate of the demo loop in `main.rs`.
    pub tick_rate_hz: u32,
    pub features: Features,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 4711,
            max_commands_per_tick: MAX_COMMANDS_PER_TICK,
            max_sessions: 16,
            max_line_bytes: MAX_LINE_BYTES,
            join_timeout_ms: 2000,
            writer_idle_ms: 1,
            tick_rate_hz: 20,
            features: Features::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self, ServerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_commands_per_tick: self.max_commands_per_tick.max(1),
            max_line_bytes: self.max_line_bytes.max(1),
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            writer_idle: Duration::from_millis(self.writer_idle_ms),
        }
    }

    /// Wall-clock duration of one simulation tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_limits() {
        let config = ServerConfig::default();
        assert_eq!(config.max_commands_per_tick, 9000);
        assert_eq!(config.max_line_bytes, MAX_LINE_BYTES);
        assert_eq!(config.listen_addr(), "127.0.0.1:4711");
        assert!(!config.features.script_eval);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            ServerConfig::from_json(r#"{"port": 9000, "features": {"script_eval": true}}"#)
                .unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.features.script_eval);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.join_timeout_ms, 2000);
    }

    #[test]
    fn invalid_json_is_config_error() {
        let err = ServerConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn session_options_clamp_zero_limits() {
        let config = ServerConfig {
            max_commands_per_tick: 0,
            max_line_bytes: 0,
            ..ServerConfig::default()
        };
        let options = config.session_options();
        assert_eq!(options.max_commands_per_tick, 1);
        assert_eq!(options.max_line_bytes, 1);
    }

    #[test]
    fn tick_interval_from_rate() {
        let config = ServerConfig {
            tick_rate_hz: 20,
            ..ServerConfig::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
    }
}
