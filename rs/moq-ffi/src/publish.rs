use std::sync::{Arc, Weak};

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::Mutex;

use crate::engine::TrackWriter;
use crate::{Error, Session};

/// How a payload is carried to subscribers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum DeliveryMode {
	/// Low latency; may be dropped or reordered.
	LossyDatagram = 0,
	/// Ordered and retransmitted.
	#[default]
	ReliableStream = 1,
}

/// A write endpoint for one (namespace, track) pair.
pub struct Publisher {
	session: Weak<Session>,
	namespace: String,
	track: String,
	mode: DeliveryMode,

	// The connection attempt the writer belongs to.
	attempt: u64,

	writer: Mutex<Option<Box<dyn TrackWriter>>>,
}

impl Publisher {
	pub(crate) fn create(
		session: &Arc<Session>,
		namespace: &str,
		track: &str,
		mode: DeliveryMode,
	) -> Result<Arc<Self>, Error> {
		if namespace.is_empty() {
			return Err(Error::Empty("namespace"));
		}
		if track.is_empty() {
			return Err(Error::Empty("track"));
		}

		let (connection, attempt) = session.current()?;
		if !session.state.lock().namespaces.contains(namespace) {
			return Err(Error::NotAnnounced(namespace.to_string()));
		}

		let writer = connection.publish(namespace, track)?;
		tracing::info!(%namespace, %track, ?mode, "publishing");

		Ok(Arc::new(Self {
			session: Arc::downgrade(session),
			namespace: namespace.to_string(),
			track: track.to_string(),
			mode,
			attempt,
			writer: Mutex::new(Some(writer)),
		}))
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	pub fn track(&self) -> &str {
		&self.track
	}

	/// The mode chosen at creation.
	pub fn mode(&self) -> DeliveryMode {
		self.mode
	}

	/// Send one payload; the bytes are copied before this returns.
	pub fn publish(&self, payload: &[u8], mode: DeliveryMode) -> Result<(), Error> {
		let session = self.session.upgrade().ok_or(Error::NotConnected)?;
		if !session.is_current(self.attempt) {
			return Err(Error::NotConnected);
		}

		let mut writer = self.writer.lock();
		let writer = writer.as_mut().ok_or(Error::Closed)?;
		writer.write(Bytes::copy_from_slice(payload), mode)
	}

	/// Stop publishing; later calls fail.
	pub fn close(&self) {
		if self.writer.lock().take().is_some() {
			tracing::debug!(namespace = %self.namespace, track = %self.track, "publisher closed");
		}
	}
}
