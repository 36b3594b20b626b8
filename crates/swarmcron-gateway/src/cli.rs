use clap::Parser;
use swarmcron_core::config::SwarmcronConfig;

/// Run swarm services on a schedule or on demand.
///
/// Flags override the config file and `SWARMCRON_*` variables.
#[derive(Debug, Parser)]
#[command(name = "swarmcron", version)]
pub struct Cli {
    /// Configuration file (defaults to ./swarmcron.toml)
    #[arg(long, env = "SWARMCRON_CONFIG")]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Port of the event trigger endpoint
    #[arg(long, env = "EVENT_PORT")]
    pub event_port: Option<u16>,

    /// Longest wait of a triggered run, e.g. "15m"
    #[arg(long, env = "EVENT_TIMEOUT")]
    pub event_timeout: Option<String>,

    /// Docker Engine API endpoint, e.g. unix:///var/run/docker.sock or tcp://manager:2375
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,
}

impl Cli {
    /// Apply every flag that was given on top of `config`.
    pub fn apply(&self, config: &mut SwarmcronConfig) {
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if self.log_json {
            config.log.json = true;
        }
        if let Some(port) = self.event_port {
            config.event.port = port;
        }
        if let Some(timeout) = &self.event_timeout {
            config.event.timeout = timeout.clone();
        }
        if let Some(host) = &self.docker_host {
            config.docker.host = host.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "swarmcron",
            "--log-level",
            "debug",
            "--log-json",
            "--event-port",
            "9090",
            "--event-timeout",
            "15m",
            "--docker-host",
            "tcp://manager:2375",
        ])
        .unwrap();

        let mut config = SwarmcronConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json);
        assert_eq!(config.event.port, 9090);
        assert_eq!(config.event.timeout, "15m");
        assert_eq!(config.docker.host, "tcp://manager:2375");
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["swarmcron", "--event-port", "8181"]).unwrap();
        let mut config = SwarmcronConfig::default();
        config.log.json = true;
        config.event.timeout = "30m".to_string();
        cli.apply(&mut config);

        assert!(config.log.json);
        assert_eq!(config.event.timeout, "30m");
        assert_eq!(config.event.port, 8181);
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Cli::try_parse_from(["swarmcron", "--event-port", "http"]).is_err());
    }

    #[test]
    fn flag_replaces_bad_file_value_before_validation() {
        Jail::expect_with(|jail| {
            jail.create_file("swarmcron.toml", "[event]\ntimeout = \"forever\"\n")?;
            let mut config = SwarmcronConfig::load(None).unwrap();
            assert!(config.validate().is_err());

            let cli = Cli::try_parse_from(["swarmcron", "--event-timeout", "15m"]).unwrap();
            cli.apply(&mut config);
            config.validate().unwrap();
            assert_eq!(config.event.timeout, "15m");
            Ok(())
        });
    }
}
