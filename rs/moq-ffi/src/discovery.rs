use std::sync::Arc;

use tokio::sync::oneshot;

use crate::callback::{AnnounceSink, CatalogSink};
use crate::engine::{CatalogReader, Connection};
use crate::{Error, Session, Subscriber, spawn};

/// One track advertised by a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
	pub name: String,
	pub codec: Option<String>,
	pub mime_type: Option<String>,
	pub width: Option<u32>,
	pub height: Option<u32>,
	pub bitrate: Option<u64>,
	pub sample_rate: Option<u32>,
	pub language: Option<String>,
}

impl Session {
	/// Register, replace, or with `None` remove the announcement callback.
	///
	/// A registration made while disconnected starts delivering once connected.
	pub fn subscribe_announces(&self, sink: Option<Arc<dyn AnnounceSink>>) -> Result<(), Error> {
		let connection = {
			let mut state = self.state.lock();
			if state.closed {
				return Err(Error::Closed);
			}
			state.on_announce = sink;
			state.announcing = None;
			state.connection.clone()
		};

		self.announce.stop();

		if let Some(connection) = connection {
			self.start_announces(&connection)?;
		}

		Ok(())
	}

	/// Start the announcement loop for `connection`, if it is still the live one.
	pub(crate) fn start_announces(&self, connection: &Arc<dyn Connection>) -> Result<(), Error> {
		let (tx, rx) = oneshot::channel();

		let (sink, mut reader, epoch) = {
			let mut state = self.state.lock();
			let Some(sink) = state.on_announce.clone() else {
				return Ok(());
			};

			let live = state.connection.as_ref().is_some_and(|live| Arc::ptr_eq(live, connection));
			if !live {
				return Ok(());
			}

			let reader = connection.announced()?;
			state.announcing = Some(tx);
			(sink, reader, self.announce.epoch())
		};

		let dispatch = self.announce.clone();
		spawn(async move {
			let run = async {
				while let Some(announced) = reader.next().await {
					tracing::debug!(namespace = %announced.namespace, active = announced.active, "announced");

					let delivered = dispatch.run(epoch, || sink.on_announce(&announced.namespace, announced.active));
					if delivered.is_none() {
						break;
					}
				}
			};

			tokio::select! {
				_ = rx => {},
				_ = run => {},
			}
		});

		Ok(())
	}

	/// Follow a catalog track, reporting the full track list on every update.
	///
	/// `None` consumes the catalog without reporting it.
	pub fn subscribe_catalog(
		self: &Arc<Self>,
		namespace: &str,
		track: &str,
		sink: Option<Box<dyn CatalogSink>>,
	) -> Result<Arc<Subscriber>, Error> {
		let subscriber = Subscriber::catalog(self, namespace, track, sink)?;
		self.track_subscriber(&subscriber);
		Ok(subscriber)
	}
}

impl Subscriber {
	pub(crate) fn catalog(
		session: &Arc<Session>,
		namespace: &str,
		track: &str,
		sink: Option<Box<dyn CatalogSink>>,
	) -> Result<Arc<Self>, Error> {
		let subscriber = Arc::new(Self::new(session, namespace, track)?);
		let reader = session.connection()?.subscribe_catalog(namespace, track)?;

		subscriber.start(|subscriber, epoch| subscriber.run_catalog(epoch, reader, sink));
		tracing::info!(%namespace, %track, "catalog subscribed");

		Ok(subscriber)
	}

	async fn run_catalog(
		self: Arc<Self>,
		epoch: u64,
		mut reader: Box<dyn CatalogReader>,
		mut sink: Option<Box<dyn CatalogSink>>,
	) -> Result<(), Error> {
		while let Some(tracks) = reader.next().await? {
			tracing::debug!(count = tracks.len(), "catalog update");

			let delivered = self.deliver(epoch, || {
				if let Some(sink) = sink.as_mut() {
					sink.on_catalog(&tracks);
				}
			});

			if !delivered {
				break;
			}
		}

		Ok(())
	}
}
