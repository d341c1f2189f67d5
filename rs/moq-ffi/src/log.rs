use std::sync::OnceLock;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

use crate::Error;

// Set once we own the global subscriber.
static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

#[derive(clap::Args, Clone, Debug)]
pub struct Log {
	/// Default verbosity; `RUST_LOG` directives take precedence.
	#[arg(long = "log-level", env = "MOQ_LOG_LEVEL", default_value = "info")]
	pub level: Level,
}

impl Default for Log {
	fn default() -> Self {
		Self { level: Level::INFO }
	}
}

impl Log {
	pub fn level(&self) -> Level {
		self.level
	}

	/// Install the global subscriber, unless something else already did.
	pub fn init(&self) {
		let (filter, handle) = reload::Layer::new(self.filter());
		let res = tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
			.try_init();

		match res {
			Ok(()) => {
				let _ = FILTER.set(handle);
			}
			Err(err) => tracing::debug!(%err, "subscriber already installed"),
		}
	}

	/// Change the level of the subscriber installed by [Log::init], installing it if needed.
	pub fn apply(&self) -> Result<(), Error> {
		match FILTER.get() {
			Some(handle) => handle.reload(self.filter())?,
			None => self.init(),
		}

		Ok(())
	}

	fn filter(&self) -> EnvFilter {
		EnvFilter::builder()
			.with_default_directive(LevelFilter::from_level(self.level()).into())
			.from_env_lossy()
			.add_directive("quinn=info".parse().unwrap())
			.add_directive("h2=warn".parse().unwrap())
	}
}
