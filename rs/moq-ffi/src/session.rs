use std::collections::HashSet;
use std::sync::{Arc, Weak};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::callback::{AnnounceSink, DataSink, Dispatch, StateSink};
use crate::engine::{self, Connection};
use crate::{Config, DeliveryMode, Error, Publisher, Subscriber, spawn};

/// Where a session is in its connection lifecycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ConnectionState {
	#[default]
	Disconnected = 0,
	Connecting = 1,
	Connected = 2,
	Failed = 3,
}

impl ConnectionState {
	/// The transitions a session may report.
	pub fn can_transition(self, next: ConnectionState) -> bool {
		use ConnectionState::*;

		matches!(
			(self, next),
			(Disconnected | Failed, Connecting)
				| (Connecting, Connected | Failed | Disconnected)
				| (Connected, Disconnected | Failed)
		)
	}
}

/// A logical client connection to a relay.
///
/// Owns the engine connection, the background driver, and the optional announcement
/// subscription. Publishers and subscribers keep a weak reference back.
///
/// State changes are applied under the state lock and reported from a per-session task, in
/// order, so no caller ever runs the state callback while holding session internals.
pub struct Session {
	pub(crate) state: Mutex<SessionState>,

	// Gates the state callback; only destroy cancels it.
	notify: Arc<Dispatch>,

	// Announcement registrations; gates the announce callback.
	pub(crate) announce: Arc<Dispatch>,

	notices: mpsc::UnboundedSender<Notice>,
}

// One state change, queued for the notifier task.
struct Notice {
	epoch: u64,
	sink: Arc<dyn StateSink>,
	state: ConnectionState,
}

#[derive(Default)]
pub(crate) struct SessionState {
	pub status: ConnectionState,

	// Bumped by every connect, disconnect, and destroy.
	pub attempt: u64,

	// The reason the last attempt failed.
	pub error: Option<Error>,

	pub connection: Option<Arc<dyn Connection>>,

	// Dropped to cancel the connection driver.
	pub driver: Option<oneshot::Sender<()>>,

	pub on_state: Option<Arc<dyn StateSink>>,

	pub on_announce: Option<Arc<dyn AnnounceSink>>,

	// Dropped to cancel the announcement loop.
	pub announcing: Option<oneshot::Sender<()>>,

	// Namespaces announced on the current connection.
	pub namespaces: HashSet<String>,

	pub subscribers: Vec<Weak<Subscriber>>,

	// Set once the handle is destroyed.
	pub closed: bool,
}

impl Session {
	pub fn new() -> Arc<Self> {
		let notify = Arc::new(Dispatch::new());
		let (tx, mut rx) = mpsc::unbounded_channel::<Notice>();

		let gate = notify.clone();
		spawn(async move {
			while let Some(notice) = rx.recv().await {
				gate.run(notice.epoch, || notice.sink.on_state(notice.state));
			}
		});

		Arc::new(Self {
			state: Default::default(),
			notify,
			announce: Arc::new(Dispatch::new()),
			notices: tx,
		})
	}

	pub fn status(&self) -> ConnectionState {
		self.state.lock().status
	}

	pub fn is_connected(&self) -> bool {
		self.status() == ConnectionState::Connected
	}

	/// Why the most recent connection attempt failed, if it did.
	pub fn error(&self) -> Option<Error> {
		self.state.lock().error.clone()
	}

	/// Start connecting in the background.
	///
	/// `Connecting` is applied before this returns and reported right after; `Connected` or
	/// `Failed` follow from the runtime. A session that is already connecting or connected
	/// is left alone.
	pub fn connect(self: &Arc<Self>, url: Url, on_state: Option<Arc<dyn StateSink>>) -> Result<(), Error> {
		let connecting = engine::connect(url.clone())?;
		let (tx, rx) = oneshot::channel();

		let attempt = {
			let mut state = self.state.lock();
			if state.closed {
				return Err(Error::Closed);
			}

			if matches!(state.status, ConnectionState::Connecting | ConnectionState::Connected) {
				return Err(Error::AlreadyConnected);
			}

			state.attempt += 1;
			state.driver = Some(tx);
			state.on_state = on_state;
			state.error = None;
			self.transition(&mut state, ConnectionState::Connecting);

			state.attempt
		};

		tracing::info!(%url, "connecting");

		let session = self.clone();
		spawn(async move {
			let err = tokio::select! {
				// The sender was dropped by disconnect, destroy, or a failure.
				_ = rx => return,
				err = session.run(attempt, connecting) => err,
			};

			session.failed(attempt, err);
		});

		Ok(())
	}

	async fn run(&self, attempt: u64, connecting: engine::Connecting) -> Error {
		let timeout = Config::global().connect_timeout;
		let connection = match tokio::time::timeout(timeout, connecting).await {
			Ok(Ok(connection)) => connection,
			Ok(Err(err)) => return err,
			Err(_) => return Error::Timeout,
		};

		if !self.established(attempt, connection.clone()) {
			connection.close();
			return Error::Closed;
		}

		connection.closed().await
	}

	fn established(&self, attempt: u64, connection: Arc<dyn Connection>) -> bool {
		{
			let mut state = self.state.lock();
			if state.attempt != attempt || state.status != ConnectionState::Connecting {
				return false;
			}

			state.connection = Some(connection.clone());
			self.transition(&mut state, ConnectionState::Connected);
		}

		tracing::info!("connected");

		if let Err(err) = self.start_announces(&connection) {
			tracing::warn!(%err, "announcements unavailable");
		}

		true
	}

	fn failed(&self, attempt: u64, err: Error) {
		let connection = {
			let mut state = self.state.lock();
			if state.attempt != attempt || !state.status.can_transition(ConnectionState::Failed) {
				return;
			}

			tracing::warn!(%err, "connection failed");

			state.error = Some(err);
			state.driver = None;
			state.announcing = None;
			state.namespaces.clear();
			self.transition(&mut state, ConnectionState::Failed);

			state.connection.take()
		};

		// On the driver task; never wait here.
		self.announce.cancel();
		if let Some(connection) = connection {
			connection.close();
		}
	}

	// Apply a state change and queue its report, unless the edge is not allowed.
	fn transition(&self, state: &mut SessionState, next: ConnectionState) -> bool {
		if !state.status.can_transition(next) {
			return false;
		}

		state.status = next;
		tracing::debug!(state = ?next, "connection state");

		if let Some(sink) = &state.on_state {
			let notice = Notice {
				epoch: self.notify.epoch(),
				sink: sink.clone(),
				state: next,
			};

			if self.notices.send(notice).is_err() {
				tracing::warn!(state = ?next, "state notifier gone");
			}
		}

		true
	}

	/// Close the connection, reporting `Disconnected`.
	///
	/// A no-op when there is nothing to disconnect.
	pub fn disconnect(&self) -> Result<(), Error> {
		let connection = {
			let mut state = self.state.lock();
			if matches!(state.status, ConnectionState::Disconnected | ConnectionState::Failed) {
				return Ok(());
			}

			state.attempt += 1;
			state.driver = None;
			state.announcing = None;
			state.namespaces.clear();
			self.transition(&mut state, ConnectionState::Disconnected);

			state.connection.take()
		};

		self.announce.stop();
		if let Some(connection) = connection {
			connection.close();
		}

		tracing::info!("disconnected");

		Ok(())
	}

	/// Tear everything down without reporting anything.
	///
	/// Background work is cancelled before the engine connection is released.
	pub fn close(&self) {
		let (subscribers, connection) = {
			let mut state = self.state.lock();
			state.closed = true;
			state.attempt += 1;
			state.status = ConnectionState::Disconnected;
			state.on_state = None;
			state.on_announce = None;
			state.driver = None;
			state.announcing = None;
			state.namespaces.clear();

			(std::mem::take(&mut state.subscribers), state.connection.take())
		};

		self.notify.stop();
		self.announce.stop();
		for subscriber in subscribers.iter().filter_map(Weak::upgrade) {
			subscriber.unsubscribe();
		}

		if let Some(connection) = connection {
			connection.close();
		}

		tracing::debug!("session closed");
	}

	/// The live engine connection, with the attempt it belongs to.
	pub(crate) fn current(&self) -> Result<(Arc<dyn Connection>, u64), Error> {
		let state = self.state.lock();
		match (&state.connection, state.status) {
			(Some(connection), ConnectionState::Connected) => Ok((connection.clone(), state.attempt)),
			_ => Err(Error::NotConnected),
		}
	}

	pub(crate) fn connection(&self) -> Result<Arc<dyn Connection>, Error> {
		Ok(self.current()?.0)
	}

	/// Whether `attempt` is still the current, connected one.
	pub(crate) fn is_current(&self, attempt: u64) -> bool {
		let state = self.state.lock();
		state.attempt == attempt && state.status == ConnectionState::Connected
	}

	pub fn announce_namespace(&self, namespace: &str) -> Result<(), Error> {
		if namespace.is_empty() {
			return Err(Error::Empty("namespace"));
		}

		let connection = self.connection()?;
		if self.state.lock().namespaces.contains(namespace) {
			return Ok(());
		}

		connection.announce(namespace)?;
		self.state.lock().namespaces.insert(namespace.to_string());
		tracing::info!(%namespace, "announced");

		Ok(())
	}

	pub fn create_publisher(
		self: &Arc<Self>,
		namespace: &str,
		track: &str,
		mode: DeliveryMode,
	) -> Result<Arc<Publisher>, Error> {
		Publisher::create(self, namespace, track, mode)
	}

	pub fn subscribe(
		self: &Arc<Self>,
		namespace: &str,
		track: &str,
		sink: Box<dyn DataSink>,
	) -> Result<Arc<Subscriber>, Error> {
		let subscriber = Subscriber::track(self, namespace, track, sink)?;
		self.track_subscriber(&subscriber);
		Ok(subscriber)
	}

	pub(crate) fn track_subscriber(&self, subscriber: &Arc<Subscriber>) {
		let mut state = self.state.lock();
		state.subscribers.retain(|weak| weak.strong_count() > 0);
		state.subscribers.push(Arc::downgrade(subscriber));
	}
}
