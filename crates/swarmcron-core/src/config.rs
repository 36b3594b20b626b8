use std::time::Duration;

use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{CoreError, Result};

pub const DEFAULT_EVENT_PORT: u16 = 8080;
pub const DEFAULT_EVENT_BIND: &str = "0.0.0.0";
/// Upper bound on any triggered wait, and the default when a job has none.
pub const DEFAULT_EVENT_TIMEOUT: &str = "1h";
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";
pub const DEFAULT_POLL_INTERVAL: &str = "500ms";
pub const DEFAULT_CONFIG_FILE: &str = "swarmcron.toml";

/// Top-level config (swarmcron.toml + SWARMCRON_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmcronConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub event: EventConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit one JSON object per log line instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Inbound trigger endpoint (`GET /event/{service}/{key}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Duration string, e.g. "1h" or "15m".
    #[serde(default = "default_event_timeout")]
    pub timeout: String,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            timeout: default_event_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker Engine API endpoint (`unix://`, `tcp://` or `http://`).
    #[serde(default = "default_docker_host")]
    pub host: String,
    /// Base64 `X-Registry-Auth` value sent for jobs labelled `registry-auth=true`.
    #[serde(default)]
    pub registry_auth: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: default_docker_host(),
            registry_auth: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How often a waited run polls the task list.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// IANA zone schedules are evaluated in. Falls back to `TZ`, then UTC.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            timezone: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind() -> String {
    DEFAULT_EVENT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_EVENT_PORT
}
fn default_event_timeout() -> String {
    DEFAULT_EVENT_TIMEOUT.to_string()
}
fn default_docker_host() -> String {
    DEFAULT_DOCKER_HOST.to_string()
}
fn default_poll_interval() -> String {
    DEFAULT_POLL_INTERVAL.to_string()
}

impl SwarmcronConfig {
    /// Load config from a TOML file with SWARMCRON_* env var overrides.
    ///
    /// The file is optional; a missing file leaves the built-in defaults in
    /// place. Nested keys use a double underscore in the environment, e.g.
    /// `SWARMCRON_EVENT__PORT=9000`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);
        Self::from_figment(
            Figment::from(Serialized::defaults(SwarmcronConfig::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed("SWARMCRON_").split("__")),
        )
    }

    /// Extract without validating: command-line flags may still replace
    /// any value, so call [`validate`](Self::validate) once they are applied.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Reject values that would only fail later, deep inside a running job.
    pub fn validate(&self) -> Result<()> {
        let timeout = self.event_timeout()?;
        if timeout.is_zero() {
            return Err(CoreError::Config("event.timeout must be positive".into()));
        }
        if self.poll_interval()?.is_zero() {
            return Err(CoreError::Config("jobs.poll_interval must be positive".into()));
        }
        if self.docker.host.trim().is_empty() {
            return Err(CoreError::Config("docker.host must not be empty".into()));
        }
        self.timezone()?;
        Ok(())
    }

    /// Zone for schedule evaluation: `jobs.timezone`, else `TZ`, else UTC.
    pub fn timezone(&self) -> Result<Tz> {
        match &self.jobs.timezone {
            Some(name) => parse_timezone(name),
            None => parse_timezone(&std::env::var("TZ").unwrap_or_default()),
        }
    }

    pub fn event_timeout(&self) -> Result<Duration> {
        parse_duration(&self.event.timeout)
            .map_err(|e| CoreError::Config(format!("event.timeout: {e}")))
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration(&self.jobs.poll_interval)
            .map_err(|e| CoreError::Config(format!("jobs.poll_interval: {e}")))
    }
}

/// Parse an IANA zone name as found in `TZ`.
///
/// Accepts the `:Europe/Paris` form and paths into a zoneinfo tree. An empty
/// name means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    let name = name.trim().trim_start_matches(':');
    let name = name.rsplit_once("zoneinfo/").map_or(name, |(_, zone)| zone);
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| CoreError::Config(format!("unknown time zone {name:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = SwarmcronConfig::load(Some("missing.toml")).unwrap();
            assert_eq!(config.event.port, DEFAULT_EVENT_PORT);
            assert_eq!(config.event_timeout().unwrap(), Duration::from_secs(3_600));
            assert_eq!(config.poll_interval().unwrap(), Duration::from_millis(500));
            assert_eq!(config.log.level, "info");
            assert!(config.docker.registry_auth.is_none());
            Ok(())
        });
    }

    #[test]
    fn file_then_env_precedence() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "swarmcron.toml",
                r#"
                [event]
                port = 9000
                timeout = "15m"

                [log]
                json = true
                "#,
            )?;
            jail.set_env("SWARMCRON_EVENT__PORT", "9100");
            jail.set_env("SWARMCRON_DOCKER__HOST", "tcp://manager:2375");

            let config = SwarmcronConfig::load(None).unwrap();
            assert_eq!(config.event.port, 9100);
            assert_eq!(config.event_timeout().unwrap(), Duration::from_secs(900));
            assert!(config.log.json);
            assert_eq!(config.docker.host, "tcp://manager:2375");
            Ok(())
        });
    }

    #[test]
    fn invalid_timeout_is_a_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file("swarmcron.toml", "[event]\ntimeout = \"forever\"\n")?;
            let config = SwarmcronConfig::load(None).unwrap();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, CoreError::Config(_)));
            assert!(err.to_string().contains("event.timeout"));
            Ok(())
        });
    }

    #[test]
    fn bad_file_value_can_be_replaced_before_validation() {
        Jail::expect_with(|jail| {
            jail.create_file("swarmcron.toml", "[event]\ntimeout = \"forever\"\n")?;
            let mut config = SwarmcronConfig::load(None).unwrap();
            config.event.timeout = "15m".to_string();
            config.validate().unwrap();
            assert_eq!(config.event_timeout().unwrap(), Duration::from_secs(900));
            Ok(())
        });
    }

    #[test]
    fn timezone_from_config_or_tz() {
        Jail::expect_with(|jail| {
            jail.set_env("TZ", ":Europe/Paris");
            let mut config = SwarmcronConfig::load(None).unwrap();
            assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Paris);

            config.jobs.timezone = Some("America/New_York".to_string());
            assert_eq!(config.timezone().unwrap(), chrono_tz::America::New_York);

            config.jobs.timezone = Some("Mars/Olympus".to_string());
            assert!(config.validate().is_err());
            Ok(())
        });
    }

    #[test]
    fn timezone_spellings() {
        assert_eq!(parse_timezone("").unwrap(), Tz::UTC);
        assert_eq!(parse_timezone("UTC").unwrap(), Tz::UTC);
        assert_eq!(
            parse_timezone("/usr/share/zoneinfo/Asia/Tokyo").unwrap(),
            chrono_tz::Asia::Tokyo
        );
        assert!(parse_timezone("Nowhere").is_err());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let mut config = SwarmcronConfig::default();
        config.jobs.poll_interval = "0s".to_string();
        assert!(config.validate().is_err());
    }
}
