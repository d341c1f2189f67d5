use std::sync::{Arc, LazyLock};
use std::time::Duration;

use clap::Parser;

use crate::{Error, Log};

static CONFIG: LazyLock<Config> = LazyLock::new(|| {
	Config::from_env().unwrap_or_else(|err| {
		// Logging may not be up yet, so this also goes to stderr.
		eprintln!("moq-ffi: ignoring invalid environment: {err}");
		tracing::warn!(%err, "ignoring invalid environment");
		Config::default()
	})
});

/// Library configuration, read once from the environment.
#[derive(Parser, Clone, Debug)]
pub struct Config {
	#[command(flatten)]
	pub log: Log,

	/// How long the transport engine gets to establish a connection.
	#[arg(
		long = "connect-timeout",
		env = "MOQ_CONNECT_TIMEOUT",
		default_value = "10s",
		value_parser = humantime::parse_duration
	)]
	pub connect_timeout: Duration,

	/// Worker threads for the background runtime.
	#[arg(long = "worker-threads", env = "MOQ_WORKER_THREADS", default_value_t = 2)]
	pub worker_threads: usize,

	/// Lossy units queued per subscriber before new ones are dropped.
	#[arg(long = "datagram-backlog", env = "MOQ_DATAGRAM_BACKLOG", default_value_t = 64)]
	pub datagram_backlog: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			log: Log::default(),
			connect_timeout: Duration::from_secs(10),
			worker_threads: 2,
			datagram_backlog: 64,
		}
	}
}

impl Config {
	/// Parse from `MOQ_*` environment variables only; there is no command line.
	pub fn from_env() -> Result<Self, Error> {
		Self::try_parse_from(["moq-ffi"]).map_err(|err| Error::Config(Arc::new(err)))
	}

	pub fn global() -> &'static Config {
		&CONFIG
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = Config::default();
		assert_eq!(config.connect_timeout, Duration::from_secs(10));
		assert_eq!(config.log.level, tracing::Level::INFO);
	}

	#[test]
	fn arguments() {
		let config = Config::try_parse_from([
			"moq-ffi",
			"--connect-timeout",
			"250ms",
			"--log-level",
			"debug",
			"--datagram-backlog",
			"8",
		])
		.unwrap();

		assert_eq!(config.connect_timeout, Duration::from_millis(250));
		assert_eq!(config.log.level, tracing::Level::DEBUG);
		assert_eq!(config.datagram_backlog, 8);
	}

	#[test]
	fn invalid() {
		assert!(Config::try_parse_from(["moq-ffi", "--connect-timeout", "soon"]).is_err());
		assert!(Config::try_parse_from(["moq-ffi", "--log-level", "loud"]).is_err());
		assert!(Config::try_parse_from(["moq-ffi", "--bogus"]).is_err());
	}
}
