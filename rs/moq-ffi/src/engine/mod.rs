//! The transport engine seam.
//!
//! Sessions, publishers and subscribers only talk to these traits. An engine is picked
//! from the URL scheme when connecting.

pub mod catalog;
pub mod memory;

#[cfg(feature = "moq")]
mod moq;

use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use url::Url;

use crate::{DeliveryMode, Error, TrackInfo};

/// A namespace announcement seen on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announced {
	pub namespace: String,
	pub active: bool,
}

/// An established connection to a relay.
pub trait Connection: Send + Sync {
	/// Make a namespace available to remote subscribers.
	fn announce(&self, namespace: &str) -> Result<(), Error>;

	/// Open a track for writing under an announced namespace.
	fn publish(&self, namespace: &str, track: &str) -> Result<Box<dyn TrackWriter>, Error>;

	fn subscribe(&self, namespace: &str, track: &str) -> Result<Box<dyn TrackReader>, Error>;

	fn subscribe_catalog(&self, namespace: &str, track: &str) -> Result<Box<dyn CatalogReader>, Error>;

	/// Announcements made by remote peers.
	fn announced(&self) -> Result<Box<dyn AnnounceReader>, Error>;

	/// Resolves with the reason once the connection is lost.
	fn closed(&self) -> BoxFuture<'_, Error>;

	/// Close locally; readers end and writers fail afterwards.
	fn close(&self);
}

pub trait TrackWriter: Send {
	/// Queue a payload without blocking.
	fn write(&mut self, payload: Bytes, mode: DeliveryMode) -> Result<(), Error>;
}

pub trait TrackReader: Send {
	/// The next payload, or `None` once the track ends.
	fn read(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, Error>>;
}

pub trait CatalogReader: Send {
	/// The next complete track list, or `None` once the catalog track ends.
	fn next(&mut self) -> BoxFuture<'_, Result<Option<Vec<TrackInfo>>, Error>>;
}

pub trait AnnounceReader: Send {
	fn next(&mut self) -> BoxFuture<'_, Option<Announced>>;
}

pub type Connecting = BoxFuture<'static, Result<Arc<dyn Connection>, Error>>;

/// Pick an engine for the URL scheme.
///
/// Unsupported schemes fail here, before any state changes.
pub fn connect(url: Url) -> Result<Connecting, Error> {
	match url.scheme() {
		memory::SCHEME => Ok(memory::connect(url).boxed()),
		#[cfg(feature = "moq")]
		"https" | "http" => Ok(moq::connect(url).boxed()),
		scheme => Err(Error::Unsupported(format!("no transport for {scheme}:// urls"))),
	}
}
