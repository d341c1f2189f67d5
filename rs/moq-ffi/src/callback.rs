use std::cell::Cell;

use parking_lot::{Condvar, Mutex};

use crate::{ConnectionState, TrackInfo};

/// Receives connection state transitions, in order.
pub trait StateSink: Send + Sync {
	fn on_state(&self, state: ConnectionState);
}

/// Receives every payload of a track subscription.
///
/// The slice is only valid for the duration of the call.
pub trait DataSink: Send {
	fn on_data(&mut self, payload: &[u8]);
}

/// Receives the full track list each time a catalog is published.
pub trait CatalogSink: Send {
	fn on_catalog(&mut self, tracks: &[TrackInfo]);
}

/// Receives namespace announcements made by remote peers.
pub trait AnnounceSink: Send + Sync {
	fn on_announce(&self, namespace: &str, active: bool);
}

impl<F: Fn(ConnectionState) + Send + Sync> StateSink for F {
	fn on_state(&self, state: ConnectionState) {
		self(state)
	}
}

impl<F: FnMut(&[u8]) + Send> DataSink for F {
	fn on_data(&mut self, payload: &[u8]) {
		self(payload)
	}
}

impl<F: FnMut(&[TrackInfo]) + Send> CatalogSink for F {
	fn on_catalog(&mut self, tracks: &[TrackInfo]) {
		self(tracks)
	}
}

impl<F: Fn(&str, bool) + Send + Sync> AnnounceSink for F {
	fn on_announce(&self, namespace: &str, active: bool) {
		self(namespace, active)
	}
}

thread_local! {
	// Deliveries in progress on this thread, across every handle.
	static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Gates callback invocation on a generation counter.
///
/// A delivery is admitted only if the generation it was started under is still current,
/// and no lock is held while it runs. [Dispatch::stop] bumps the generation and then
/// waits out deliveries admitted earlier, unless the caller is itself inside a delivery.
/// A thread that waits is never running a callback, so callbacks that cancel each
/// other's handles cannot deadlock.
pub(crate) struct Dispatch {
	state: Mutex<DispatchState>,
	idle: Condvar,
}

#[derive(Default)]
struct DispatchState {
	epoch: u64,

	// Admitted deliveries that have not returned yet.
	running: usize,
}

impl Dispatch {
	pub fn new() -> Self {
		Self {
			state: Default::default(),
			idle: Condvar::new(),
		}
	}

	pub fn epoch(&self) -> u64 {
		self.state.lock().epoch
	}

	/// Run `f` if `epoch` is still current.
	pub fn run<R>(&self, epoch: u64, f: impl FnOnce() -> R) -> Option<R> {
		{
			let mut state = self.state.lock();
			if state.epoch != epoch {
				return None;
			}
			state.running += 1;
		}

		let _delivery = Delivery::new(self);
		Some(f())
	}

	/// Invalidate every earlier generation without waiting, returning the new one.
	pub fn cancel(&self) -> u64 {
		let mut state = self.state.lock();
		state.epoch += 1;
		state.epoch
	}

	/// Invalidate every earlier generation; once this returns no earlier delivery will start.
	///
	/// Also waits for deliveries already running on other threads, except when called from
	/// inside a callback.
	pub fn stop(&self) -> u64 {
		let mut state = self.state.lock();
		state.epoch += 1;
		let epoch = state.epoch;

		if DELIVERING.get() == 0 {
			while state.running > 0 {
				self.idle.wait(&mut state);
			}
		}

		epoch
	}
}

// Marks one admitted delivery, released even if the callback unwinds.
struct Delivery<'a>(&'a Dispatch);

impl<'a> Delivery<'a> {
	fn new(dispatch: &'a Dispatch) -> Self {
		DELIVERING.set(DELIVERING.get() + 1);
		Self(dispatch)
	}
}

impl Drop for Delivery<'_> {
	fn drop(&mut self) {
		DELIVERING.set(DELIVERING.get() - 1);

		let mut state = self.0.state.lock();
		state.running -= 1;
		if state.running == 0 {
			self.0.idle.notify_all();
		}
	}
}
