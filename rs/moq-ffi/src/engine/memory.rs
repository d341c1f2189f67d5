//! An in-process relay, addressed as `memory://<name>`.
//!
//! A relay exists while its [Listener] is alive. Every connection to it shares the same
//! tracks: payloads written to a (namespace, track) pair fan out to all subscribers of that
//! pair, and new subscribers start from the most recent payload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use url::Url;

use super::{AnnounceReader, Announced, CatalogReader, Connection, TrackReader, TrackWriter, catalog};
use crate::{Config, DeliveryMode, Error, TrackInfo};

pub const SCHEME: &str = "memory";

static RELAYS: LazyLock<Mutex<HashMap<String, Arc<Relay>>>> = LazyLock::new(Default::default);

/// Keeps a relay reachable; dropping it shuts the relay down.
pub struct Listener {
	relay: Arc<Relay>,
}

/// Start a relay reachable at `memory://<name>`, replacing any previous one.
pub fn listen(name: &str) -> Listener {
	let relay = Arc::new(Relay::new(name));
	let previous = RELAYS.lock().insert(name.to_string(), relay.clone());
	if let Some(previous) = previous {
		previous.shutdown();
	}

	tracing::debug!(%name, "relay listening");
	Listener { relay }
}

impl Listener {
	pub fn url(&self) -> Result<Url, Error> {
		Ok(Url::parse(&format!("{SCHEME}://{}", self.relay.name))?)
	}
}

impl Drop for Listener {
	fn drop(&mut self) {
		let mut relays = RELAYS.lock();
		if relays.get(&self.relay.name).is_some_and(|relay| Arc::ptr_eq(relay, &self.relay)) {
			relays.remove(&self.relay.name);
		}
		drop(relays);

		self.relay.shutdown();
		tracing::debug!(name = %self.relay.name, "relay shut down");
	}
}

pub async fn connect(url: Url) -> Result<Arc<dyn Connection>, Error> {
	let name = url.host_str().unwrap_or_default();
	let relay = RELAYS
		.lock()
		.get(name)
		.cloned()
		.ok_or_else(|| Error::Refused(url.to_string()))?;

	let id = relay.next_id.fetch_add(1, Ordering::Relaxed);
	tracing::debug!(%url, id, "relay connection");

	Ok(Arc::new(MemoryConnection {
		id,
		relay,
		closed: watch::Sender::new(false),
	}))
}

struct Relay {
	name: String,
	next_id: AtomicU64,
	state: Mutex<RelayState>,
	shutdown: watch::Sender<bool>,
}

#[derive(Default)]
struct RelayState {
	tracks: HashMap<(String, String), Track>,

	// Announced namespaces and the connection that owns each.
	namespaces: HashMap<String, u64>,

	// Announcement listeners by connection.
	listeners: Vec<(u64, mpsc::UnboundedSender<Announced>)>,
}

// Forgotten, cached payload included, once it has no writers and no readers.
#[derive(Default)]
struct Track {
	latest: Option<Bytes>,
	outlets: Vec<Outlet>,
	writers: usize,
}

struct Outlet {
	tx: mpsc::UnboundedSender<Bytes>,
	backlog: Arc<AtomicUsize>,
}

impl Outlet {
	fn send(&self, payload: Bytes) -> bool {
		self.backlog.fetch_add(1, Ordering::Relaxed);
		self.tx.send(payload).is_ok()
	}
}

impl Relay {
	fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			next_id: AtomicU64::new(1),
			state: Default::default(),
			shutdown: watch::Sender::new(false),
		}
	}

	fn shutdown(&self) {
		self.shutdown.send_replace(true);

		let mut state = self.state.lock();
		state.tracks.clear();
		state.listeners.clear();
	}

	fn is_shutdown(&self) -> bool {
		*self.shutdown.borrow()
	}

	fn write(&self, key: &(String, String), payload: Bytes, mode: DeliveryMode) {
		let limit = Config::global().datagram_backlog;

		let mut state = self.state.lock();
		let track = state.tracks.entry(key.clone()).or_default();
		track.latest = Some(payload.clone());

		track.outlets.retain(|outlet| {
			if mode == DeliveryMode::LossyDatagram && outlet.backlog.load(Ordering::Relaxed) >= limit {
				// Dropped for this subscriber only.
				return !outlet.tx.is_closed();
			}
			outlet.send(payload.clone())
		});
	}

	fn open(&self, key: &(String, String)) {
		self.state.lock().tracks.entry(key.clone()).or_default().writers += 1;
	}

	fn close(&self, key: &(String, String)) {
		if let Some(track) = self.state.lock().tracks.get_mut(key) {
			track.writers = track.writers.saturating_sub(1);
		}
		self.release(key);
	}

	// Drop the track once nobody writes or reads it.
	fn release(&self, key: &(String, String)) {
		let mut state = self.state.lock();
		let Some(track) = state.tracks.get_mut(key) else {
			return;
		};

		track.outlets.retain(|outlet| !outlet.tx.is_closed());
		if track.writers == 0 && track.outlets.is_empty() {
			state.tracks.remove(key);
		}
	}

	fn subscribe(&self, key: &(String, String)) -> (mpsc::UnboundedReceiver<Bytes>, Arc<AtomicUsize>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let outlet = Outlet {
			tx,
			backlog: Default::default(),
		};
		let backlog = outlet.backlog.clone();

		let mut state = self.state.lock();
		let track = state.tracks.entry(key.clone()).or_default();
		if let Some(latest) = &track.latest {
			outlet.send(latest.clone());
		}
		track.outlets.push(outlet);

		(rx, backlog)
	}

	fn announce(&self, conn: u64, namespace: &str) {
		let mut state = self.state.lock();
		state.namespaces.insert(namespace.to_string(), conn);
		state.forward(
			conn,
			Announced {
				namespace: namespace.to_string(),
				active: true,
			},
		);
	}

	fn announced(&self, conn: u64) -> mpsc::UnboundedReceiver<Announced> {
		let (tx, rx) = mpsc::unbounded_channel();

		let mut state = self.state.lock();
		for (namespace, owner) in &state.namespaces {
			if *owner != conn {
				let _ = tx.send(Announced {
					namespace: namespace.clone(),
					active: true,
				});
			}
		}
		state.listeners.push((conn, tx));

		rx
	}

	fn disconnect(&self, conn: u64) {
		let mut state = self.state.lock();
		state.listeners.retain(|(owner, _)| *owner != conn);

		let gone: Vec<String> = state
			.namespaces
			.iter()
			.filter(|(_, owner)| **owner == conn)
			.map(|(namespace, _)| namespace.clone())
			.collect();

		for namespace in gone {
			state.namespaces.remove(&namespace);
			state.forward(conn, Announced { namespace, active: false });
		}
	}
}

impl RelayState {
	// Tell every other connection; prune listeners that went away.
	fn forward(&mut self, origin: u64, announced: Announced) {
		self.listeners
			.retain(|(conn, tx)| *conn == origin || tx.send(announced.clone()).is_ok());
	}
}

// Resolve once the flag is set or its sender is gone.
async fn wait(rx: &mut watch::Receiver<bool>) {
	while !*rx.borrow_and_update() {
		if rx.changed().await.is_err() {
			return;
		}
	}
}

struct MemoryConnection {
	id: u64,
	relay: Arc<Relay>,
	closed: watch::Sender<bool>,
}

impl MemoryConnection {
	fn check(&self) -> Result<(), Error> {
		if *self.closed.borrow() || self.relay.is_shutdown() {
			return Err(Error::Closed);
		}
		Ok(())
	}

	fn reader(&self, namespace: &str, track: &str) -> MemoryReader {
		let key = (namespace.to_string(), track.to_string());
		let (rx, backlog) = self.relay.subscribe(&key);
		MemoryReader {
			relay: self.relay.clone(),
			key,
			rx,
			backlog,
			closed: self.closed.subscribe(),
			shutdown: self.relay.shutdown.subscribe(),
		}
	}
}

impl Connection for MemoryConnection {
	fn announce(&self, namespace: &str) -> Result<(), Error> {
		self.check()?;
		self.relay.announce(self.id, namespace);
		Ok(())
	}

	fn publish(&self, namespace: &str, track: &str) -> Result<Box<dyn TrackWriter>, Error> {
		self.check()?;

		let key = (namespace.to_string(), track.to_string());
		self.relay.open(&key);

		Ok(Box::new(MemoryWriter {
			relay: self.relay.clone(),
			key,
			closed: self.closed.subscribe(),
		}))
	}

	fn subscribe(&self, namespace: &str, track: &str) -> Result<Box<dyn TrackReader>, Error> {
		self.check()?;
		Ok(Box::new(self.reader(namespace, track)))
	}

	fn subscribe_catalog(&self, namespace: &str, track: &str) -> Result<Box<dyn CatalogReader>, Error> {
		self.check()?;
		Ok(Box::new(MemoryCatalog {
			reader: self.reader(namespace, track),
		}))
	}

	fn announced(&self) -> Result<Box<dyn AnnounceReader>, Error> {
		self.check()?;
		Ok(Box::new(MemoryAnnounced {
			rx: self.relay.announced(self.id),
			closed: self.closed.subscribe(),
		}))
	}

	fn closed(&self) -> BoxFuture<'_, Error> {
		let mut shutdown = self.relay.shutdown.subscribe();
		async move {
			wait(&mut shutdown).await;
			Error::Closed
		}
		.boxed()
	}

	fn close(&self) {
		if !self.closed.send_replace(true) {
			self.relay.disconnect(self.id);
		}
	}
}

impl Drop for MemoryConnection {
	fn drop(&mut self) {
		self.close();
	}
}

struct MemoryWriter {
	relay: Arc<Relay>,
	key: (String, String),
	closed: watch::Receiver<bool>,
}

impl TrackWriter for MemoryWriter {
	fn write(&mut self, payload: Bytes, mode: DeliveryMode) -> Result<(), Error> {
		if *self.closed.borrow() || self.relay.is_shutdown() {
			return Err(Error::Closed);
		}

		self.relay.write(&self.key, payload, mode);
		Ok(())
	}
}

impl Drop for MemoryWriter {
	fn drop(&mut self) {
		self.relay.close(&self.key);
	}
}

struct MemoryReader {
	relay: Arc<Relay>,
	key: (String, String),
	rx: mpsc::UnboundedReceiver<Bytes>,
	backlog: Arc<AtomicUsize>,
	closed: watch::Receiver<bool>,
	shutdown: watch::Receiver<bool>,
}

impl TrackReader for MemoryReader {
	fn read(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, Error>> {
		async move {
			tokio::select! {
				biased;
				_ = wait(&mut self.shutdown) => Err(Error::Closed),
				_ = wait(&mut self.closed) => Ok(None),
				payload = self.rx.recv() => {
					if payload.is_some() {
						self.backlog.fetch_sub(1, Ordering::Relaxed);
					}
					Ok(payload)
				}
			}
		}
		.boxed()
	}
}

impl Drop for MemoryReader {
	fn drop(&mut self) {
		self.rx.close();
		self.relay.release(&self.key);
	}
}

struct MemoryCatalog {
	reader: MemoryReader,
}

impl CatalogReader for MemoryCatalog {
	fn next(&mut self) -> BoxFuture<'_, Result<Option<Vec<TrackInfo>>, Error>> {
		async move {
			while let Some(payload) = self.reader.read().await? {
				match catalog::decode(&payload) {
					Ok(tracks) => return Ok(Some(tracks)),
					Err(err) => tracing::warn!(%err, "skipping malformed catalog"),
				}
			}
			Ok(None)
		}
		.boxed()
	}
}

struct MemoryAnnounced {
	rx: mpsc::UnboundedReceiver<Announced>,
	closed: watch::Receiver<bool>,
}

impl AnnounceReader for MemoryAnnounced {
	fn next(&mut self) -> BoxFuture<'_, Option<Announced>> {
		async move {
			tokio::select! {
				biased;
				_ = wait(&mut self.closed) => None,
				announced = self.rx.recv() => announced,
			}
		}
		.boxed()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	async fn connection(listener: &Listener) -> Arc<dyn Connection> {
		connect(listener.url().unwrap()).await.unwrap()
	}

	#[tokio::test]
	async fn refused() {
		let err = connect(Url::parse("memory://nobody-listens").unwrap()).await.err().unwrap();
		assert!(matches!(err, Error::Refused(_)));
	}

	#[tokio::test]
	async fn fanout() {
		let listener = listen("memory-fanout");
		let publisher = connection(&listener).await;
		let subscriber = connection(&listener).await;

		let mut a = subscriber.subscribe("room", "chat").unwrap();
		let mut b = publisher.subscribe("room", "chat").unwrap();

		let mut writer = publisher.publish("room", "chat").unwrap();
		writer.write(Bytes::from_static(b"one"), DeliveryMode::ReliableStream).unwrap();
		writer.write(Bytes::from_static(b"two"), DeliveryMode::ReliableStream).unwrap();

		for reader in [&mut a, &mut b] {
			assert_eq!(reader.read().await.unwrap().unwrap(), "one");
			assert_eq!(reader.read().await.unwrap().unwrap(), "two");
		}
	}

	#[tokio::test]
	async fn join_at_latest() {
		let listener = listen("memory-latest");
		let conn = connection(&listener).await;

		let mut writer = conn.publish("room", "catalog").unwrap();
		writer.write(Bytes::from_static(b"old"), DeliveryMode::ReliableStream).unwrap();
		writer.write(Bytes::from_static(b"new"), DeliveryMode::ReliableStream).unwrap();

		let mut reader = conn.subscribe("room", "catalog").unwrap();
		assert_eq!(reader.read().await.unwrap().unwrap(), "new");
	}

	#[tokio::test]
	async fn released_tracks() {
		let listener = listen("memory-release");
		let conn = connection(&listener).await;

		let mut writer = conn.publish("room", "chat").unwrap();
		writer.write(Bytes::from_static(b"cached"), DeliveryMode::ReliableStream).unwrap();

		let reader = conn.subscribe("room", "chat").unwrap();
		drop(writer);
		assert_eq!(listener.relay.state.lock().tracks.len(), 1);

		// Nobody writes or reads the track anymore.
		drop(reader);
		assert!(listener.relay.state.lock().tracks.is_empty());

		let mut reader = conn.subscribe("room", "chat").unwrap();
		let read = tokio::time::timeout(Duration::from_millis(20), reader.read()).await;
		assert!(read.is_err(), "stale payload replayed");
	}

	#[tokio::test]
	async fn lossy_backlog() {
		let listener = listen("memory-lossy");
		let conn = connection(&listener).await;

		let mut reader = conn.subscribe("room", "video").unwrap();
		let mut writer = conn.publish("room", "video").unwrap();

		let limit = Config::global().datagram_backlog;
		for i in 0..limit + 10 {
			writer.write(Bytes::from(i.to_string()), DeliveryMode::LossyDatagram).unwrap();
		}
		// Reliable payloads are never dropped.
		writer.write(Bytes::from_static(b"last"), DeliveryMode::ReliableStream).unwrap();

		let mut received = Vec::new();
		while let Ok(Ok(Some(payload))) = tokio::time::timeout(Duration::from_millis(50), reader.read()).await {
			received.push(payload);
		}

		assert_eq!(received.len(), limit + 1);
		assert_eq!(received.last().unwrap(), "last");
	}

	#[tokio::test]
	async fn shutdown() {
		let listener = listen("memory-shutdown");
		let conn = connection(&listener).await;
		let mut reader = conn.subscribe("room", "chat").unwrap();
		let mut writer = conn.publish("room", "chat").unwrap();

		drop(listener);

		assert!(matches!(conn.closed().await, Error::Closed));
		assert!(matches!(reader.read().await, Err(Error::Closed)));
		assert!(matches!(
			writer.write(Bytes::new(), DeliveryMode::ReliableStream),
			Err(Error::Closed)
		));
	}

	#[tokio::test]
	async fn local_close() {
		let listener = listen("memory-close");
		let conn = connection(&listener).await;
		let mut reader = conn.subscribe("room", "chat").unwrap();

		conn.close();

		assert!(reader.read().await.unwrap().is_none());
		assert!(conn.publish("room", "chat").is_err());
	}

	#[tokio::test]
	async fn announcements() {
		let listener = listen("memory-announce");
		let a = connection(&listener).await;
		let b = connection(&listener).await;

		a.announce("early").unwrap();

		let mut announced = b.announced().unwrap();
		let mut own = a.announced().unwrap();

		a.announce("late").unwrap();
		b.announce("mine").unwrap();

		let expect = |namespace: &str, active| Announced {
			namespace: namespace.to_string(),
			active,
		};

		assert_eq!(announced.next().await, Some(expect("early", true)));
		assert_eq!(announced.next().await, Some(expect("late", true)));

		// A connection does not see its own announcements.
		assert_eq!(own.next().await, Some(expect("mine", true)));

		a.close();
		let mut ended = vec![announced.next().await.unwrap(), announced.next().await.unwrap()];
		ended.sort_by(|x, y| x.namespace.cmp(&y.namespace));
		assert_eq!(ended, vec![expect("early", false), expect("late", false)]);
	}
}
