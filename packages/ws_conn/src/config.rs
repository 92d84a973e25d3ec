use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

// =============================================================================
// File config (figment-deserialized from defaults / wsconn.toml / env vars)
// =============================================================================
//
//   wsconn.toml:     [connection]
//                    ping_period_secs = 15
//
//   env var:         WSCONN_CONNECTION__PING_PERIOD_SECS=15   (double underscore = nesting)

pub const DEFAULT_CONFIG_FILE: &str = "wsconn.toml";

/// Upper bound for the ping and liveness periods (one week).
pub const MAX_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
}

/// Listener settings (lives under `[server]` in wsconn.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

/// Per-connection knobs (lives under `[connection]` in wsconn.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_ping_period_secs")]
    pub ping_period_secs: u64,
    #[serde(default = "default_pong_period_secs")]
    pub pong_period_secs: u64,
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            ping_period_secs: default_ping_period_secs(),
            pong_period_secs: default_pong_period_secs(),
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_path() -> String {
    "/ws".to_string()
}
fn default_ping_period_secs() -> u64 {
    30
}
fn default_pong_period_secs() -> u64 {
    300
}
fn default_buffer_size() -> usize {
    1024
}

/// Build a figment that layers: defaults → wsconn.toml → WSCONN_* env vars.
///
/// `path` replaces the default `wsconn.toml` in the working directory. A
/// missing file contributes nothing.
///
/// Env vars use double-underscore for nesting into sections:
///   `WSCONN_SERVER__PORT=9000`  →  `server.port = 9000`
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("WSCONN_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, used by the session loop)
// =============================================================================

/// Timing and buffer settings for supervised connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsConnConfig {
    /// How often the collaborator is asked to emit a probe.
    pub ping_period: Duration,
    /// Longest tolerated silence, and the read deadline after each frame.
    pub pong_period: Duration,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
}

impl Default for WsConnConfig {
    fn default() -> Self {
        Self::from_file(&ConnectionFileConfig::default())
    }
}

impl WsConnConfig {
    /// Zero periods fall back to their defaults; periods above [`MAX_PERIOD`]
    /// are capped.
    pub fn from_file(fc: &ConnectionFileConfig) -> Self {
        let period = |name: &str, secs: u64, default: u64| {
            let period = Duration::from_secs(if secs == 0 { default } else { secs });
            if period > MAX_PERIOD {
                warn!(
                    setting = name,
                    secs,
                    max_secs = MAX_PERIOD.as_secs(),
                    "period too large, capping"
                );
                MAX_PERIOD
            } else {
                period
            }
        };
        Self {
            ping_period: period(
                "ping_period_secs",
                fc.ping_period_secs,
                default_ping_period_secs(),
            ),
            pong_period: period(
                "pong_period_secs",
                fc.pong_period_secs,
                default_pong_period_secs(),
            ),
            read_buffer_size: fc.read_buffer_size,
            write_buffer_size: fc.write_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_connection_defaults() {
        let config = WsConnConfig::default();
        assert_eq!(config.ping_period, Duration::from_secs(30));
        assert_eq!(config.pong_period, Duration::from_secs(300));
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.write_buffer_size, 1024);
    }

    #[test]
    fn test_server_defaults() {
        let d = ServerFileConfig::default();
        assert_eq!(d.host, "127.0.0.1");
        assert_eq!(d.port, 8080);
        assert_eq!(d.path, "/ws");
    }

    #[test]
    fn test_zero_periods_fall_back() {
        let fc = ConnectionFileConfig {
            ping_period_secs: 0,
            pong_period_secs: 0,
            ..Default::default()
        };
        let config = WsConnConfig::from_file(&fc);
        assert_eq!(config.ping_period, Duration::from_secs(30));
        assert_eq!(config.pong_period, Duration::from_secs(300));
    }

    #[test]
    fn test_huge_periods_are_capped() {
        let fc = ConnectionFileConfig {
            ping_period_secs: u64::MAX,
            pong_period_secs: u64::MAX,
            ..Default::default()
        };
        let config = WsConnConfig::from_file(&fc);
        assert_eq!(config.ping_period, MAX_PERIOD);
        assert_eq!(config.pong_period, MAX_PERIOD);

        let fc = ConnectionFileConfig {
            pong_period_secs: MAX_PERIOD.as_secs(),
            ..Default::default()
        };
        assert_eq!(WsConnConfig::from_file(&fc).pong_period, MAX_PERIOD);
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(Some(&tmp.path().join("absent.toml")))
            .extract()
            .unwrap();
        assert_eq!(fc.server.port, 8080);
        assert_eq!(fc.connection.pong_period_secs, 300);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wsconn.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9001\n\n[connection]\nping_period_secs = 5\nread_buffer_size = 4096\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(Some(&path)).extract().unwrap();
        assert_eq!(fc.server.port, 9001);
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.connection.ping_period_secs, 5);
        assert_eq!(fc.connection.pong_period_secs, 300);

        let config = WsConnConfig::from_file(&fc.connection);
        assert_eq!(config.ping_period, Duration::from_secs(5));
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn test_load_config_env_overrides_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, "[connection]\npong_period_secs = 60\n")?;
            jail.set_env("WSCONN_CONNECTION__PONG_PERIOD_SECS", "90");
            jail.set_env("WSCONN_SERVER__HOST", "0.0.0.0");

            let fc: FileConfig = load_config(None).extract()?;
            assert_eq!(fc.connection.pong_period_secs, 90);
            assert_eq!(fc.server.host, "0.0.0.0");
            Ok(())
        });
    }
}
