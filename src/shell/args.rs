use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;

use crate::config::types::Config;

#[derive(Parser, Debug)]
#[command(name = "feeder-control", version, about = "Control a Bluetooth pet feeder")]
pub struct Args {
    /// Config file to use instead of feeder-control.json next to the executable or in the user config directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// How long to wait for the feeder to accept a connection, e.g. "10s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub connect_timeout: Option<Duration>,

    /// How long a command may take to reach the feeder, e.g. "2s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub write_deadline: Option<Duration>,

    /// How long a scan for feeders lasts, e.g. "4s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub scan_duration: Option<Duration>,

    /// Also accept peers whose advertised name contains this text
    #[arg(long)]
    pub name_filter: Option<String>,

    #[arg(long, default_value = "warn")]
    pub log_level: log::LevelFilter,
}

impl Args {
    /// Command line flags win over the config file, but are not saved to it.
    pub fn apply(&self, config: &mut Config) {
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(deadline) = self.write_deadline {
            config.write_deadline_ms = deadline.as_millis() as u64;
        }
        if let Some(duration) = self.scan_duration {
            config.scan_duration_ms = duration.as_millis() as u64;
        }
        if let Some(filter) = &self.name_filter {
            config.name_filter = Some(filter.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::parse_from(["feeder-control", "--connect-timeout", "1m 30s", "--name-filter", "HMSoft"]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.connect_timeout_ms, 90_000);
        assert_eq!(config.name_filter.as_deref(), Some("HMSoft"));
        assert_eq!(config.scan_duration_ms, Config::default().scan_duration_ms);
        assert_eq!(args.log_level, log::LevelFilter::Warn);
    }

    #[test]
    fn write_deadline_flag_reaches_the_session() {
        let args = Args::parse_from(["feeder-control", "--write-deadline", "500ms"]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.write_deadline_ms, 500);
        assert_eq!(config.session().write_deadline, Duration::from_millis(500));
    }
}
