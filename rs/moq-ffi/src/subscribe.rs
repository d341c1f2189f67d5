use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::callback::{DataSink, Dispatch};
use crate::engine::TrackReader;
use crate::{Error, Session, spawn};

/// A read endpoint for one (namespace, track) pair.
///
/// Payloads are delivered from a background task until [Subscriber::unsubscribe], the end of
/// the track, or an engine error. After any of those no further callbacks are made.
pub struct Subscriber {
	session: Weak<Session>,
	namespace: String,
	track: String,
	state: Mutex<SubscriberState>,
	dispatch: Dispatch,
}

#[derive(Default)]
struct SubscriberState {
	subscribed: bool,

	// Dropped to cancel the delivery task.
	task: Option<oneshot::Sender<()>>,
}

impl Subscriber {
	pub(crate) fn new(session: &Arc<Session>, namespace: &str, track: &str) -> Result<Self, Error> {
		if namespace.is_empty() {
			return Err(Error::Empty("namespace"));
		}
		if track.is_empty() {
			return Err(Error::Empty("track"));
		}

		Ok(Self {
			session: Arc::downgrade(session),
			namespace: namespace.to_string(),
			track: track.to_string(),
			state: Default::default(),
			dispatch: Dispatch::new(),
		})
	}

	pub(crate) fn track(
		session: &Arc<Session>,
		namespace: &str,
		track: &str,
		sink: Box<dyn DataSink>,
	) -> Result<Arc<Self>, Error> {
		let subscriber = Arc::new(Self::new(session, namespace, track)?);
		let reader = session.connection()?.subscribe(namespace, track)?;

		subscriber.start(|subscriber, epoch| subscriber.run_track(epoch, reader, sink));
		tracing::info!(%namespace, %track, "subscribed");

		Ok(subscriber)
	}

	/// Spawn the delivery task produced by `run`.
	pub(crate) fn start<F, Fut>(self: &Arc<Self>, run: F)
	where
		F: FnOnce(Arc<Self>, u64) -> Fut,
		Fut: Future<Output = Result<(), Error>> + Send + 'static,
	{
		let epoch = self.dispatch.epoch();
		let (tx, rx) = oneshot::channel();

		{
			let mut state = self.state.lock();
			state.subscribed = true;
			state.task = Some(tx);
		}

		let this = self.clone();
		let run = run(self.clone(), epoch);

		spawn(async move {
			let res = tokio::select! {
				// Unsubscribed.
				_ = rx => return,
				res = run => res,
			};

			match res {
				Ok(()) => tracing::debug!(namespace = %this.namespace, track = %this.track, "subscription ended"),
				Err(err) => tracing::warn!(namespace = %this.namespace, track = %this.track, %err, "subscription failed"),
			}

			this.finished(epoch);
		});
	}

	async fn run_track(
		self: Arc<Self>,
		epoch: u64,
		mut reader: Box<dyn TrackReader>,
		mut sink: Box<dyn DataSink>,
	) -> Result<(), Error> {
		while let Some(payload) = reader.read().await? {
			if !self.deliver(epoch, || sink.on_data(&payload)) {
				break;
			}
		}

		Ok(())
	}

	/// Invoke a callback unless the subscription was cancelled.
	pub(crate) fn deliver(&self, epoch: u64, f: impl FnOnce()) -> bool {
		self.dispatch.run(epoch, f).is_some()
	}

	// The task ended on its own; go quiet without notifying anyone.
	fn finished(&self, epoch: u64) {
		self.dispatch.run(epoch, || {
			let mut state = self.state.lock();
			state.subscribed = false;
			state.task = None;
		});
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	pub fn track_name(&self) -> &str {
		&self.track
	}

	pub fn is_subscribed(&self) -> bool {
		self.state.lock().subscribed
	}

	/// Stop delivery; no callback starts after this returns.
	///
	/// Waits for a callback already running on another thread to finish, unless called from
	/// inside a callback. Safe to call more than once.
	pub fn unsubscribe(&self) {
		self.dispatch.stop();

		let task = {
			let mut state = self.state.lock();
			state.subscribed = false;
			state.task.take()
		};

		if task.is_some() {
			tracing::info!(namespace = %self.namespace, track = %self.track, "unsubscribed");
		}
	}

	/// Unsubscribe and detach from the session.
	pub fn close(self: &Arc<Self>) {
		self.unsubscribe();

		if let Some(session) = self.session.upgrade() {
			session
				.state
				.lock()
				.subscribers
				.retain(|weak| !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(self)));
		}
	}
}
