use std::future::Future;
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, MutexGuard};

use crate::{Config, Error, Id, NonZeroSlab, Publisher, Session, Subscriber};

/// Every live handle, by id.
///
/// Lookups clone the entry out so the registry lock is never held while a handle does work.
#[derive(Default)]
pub(crate) struct State {
	pub session: NonZeroSlab<Arc<Session>>,
	pub publisher: NonZeroSlab<Arc<Publisher>>,
	pub subscriber: NonZeroSlab<Arc<Subscriber>>,
}

static STATE: LazyLock<Mutex<State>> = LazyLock::new(Default::default);

pub(crate) static RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
	tokio::runtime::Builder::new_multi_thread()
		.worker_threads(Config::global().worker_threads.max(1))
		.thread_name("moq-ffi")
		.enable_all()
		.build()
		.expect("failed to build runtime")
});

/// Run a task on the library's runtime, from any thread.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	RUNTIME.spawn(future)
}

impl State {
	pub fn lock() -> MutexGuard<'static, State> {
		STATE.lock()
	}

	pub fn session(id: Id) -> Result<Arc<Session>, Error> {
		Self::lock().session.get(id).cloned().ok_or(Error::NotFound)
	}

	pub fn publisher(id: Id) -> Result<Arc<Publisher>, Error> {
		Self::lock().publisher.get(id).cloned().ok_or(Error::NotFound)
	}

	pub fn subscriber(id: Id) -> Result<Arc<Subscriber>, Error> {
		Self::lock().subscriber.get(id).cloned().ok_or(Error::NotFound)
	}
}
