//! A session and handle layer over Media over QUIC, for native callers.
//!
//! ## Concepts
//!
//! - **Session**: A logical connection to a relay, with a state machine
//!   (Disconnected, Connecting, Connected, Failed) reported through a callback.
//! - **Namespace**: A publisher's scope, announced before any track is published in it.
//! - **Publisher**: A write endpoint for one (namespace, track) pair.
//! - **Subscriber**: A read endpoint for one (namespace, track) pair, delivering payloads
//!   through a callback until unsubscribed.
//! - **Catalog**: A JSON track list published on a well-known track, decoded for the caller.
//!
//! ## Error Handling
//!
//! C entry points return a `moq_result` (code plus owned message), a bool, or a handle where 0
//! means failure. The message of the most recent failure on the calling thread is available
//! from `moq_last_error`. Handles are opaque integers that must be explicitly destroyed.
//!
//! ## Transports
//!
//! `memory://<name>` connects to an in-process relay started with [engine::memory::listen].
//! `https://` uses moq-lite over QUIC when built with the `moq` feature.

mod api;
mod callback;
mod config;
mod discovery;
pub mod engine;
mod error;
mod ffi;
mod id;
mod last_error;
mod log;
mod publish;
mod session;
mod state;
mod subscribe;

pub use api::*;
pub use callback::{AnnounceSink, CatalogSink, DataSink, StateSink};
pub use config::*;
pub use discovery::*;
pub use error::*;
pub use ffi::{moq_result, moq_track_info};
pub use id::*;
pub use log::*;
pub use publish::*;
pub use session::*;
pub use subscribe::*;

pub(crate) use state::*;

/// Load the configuration, install logging, and start the runtime.
///
/// Idempotent; every entry point works without it, just without logs.
pub fn init() -> Result<(), Error> {
	Config::global().log.init();
	std::sync::LazyLock::force(&RUNTIME);
	Ok(())
}
