//! moq-lite over QUIC/WebTransport, via moq-native.
//!
//! A namespace maps to a broadcast path and a track to a track within it. Reliable payloads
//! share one long-lived group so they arrive in order; each lossy payload gets its own group.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use url::Url;

use super::{AnnounceReader, Announced, CatalogReader, Connection, TrackReader, TrackWriter};
use crate::{DeliveryMode, Error, TrackInfo};

pub async fn connect(url: Url) -> Result<Arc<dyn Connection>, Error> {
	let client = moq_native::ClientConfig::default()
		.init()
		.map_err(|err| Error::Connect(Arc::new(err)))?;

	let publish = moq_lite::OriginProducer::default();
	let consume = moq_lite::OriginProducer::default();

	let session = client
		.connect(url, Some(publish.consume()), Some(consume.clone()))
		.await
		.map_err(|err| Error::Connect(Arc::new(err)))?;

	Ok(Arc::new(MoqConnection {
		_client: client,
		session,
		publish,
		consume,
		broadcasts: Default::default(),
	}))
}

struct MoqConnection {
	_client: moq_native::Client,
	session: moq_lite::Session,

	// Our broadcasts, and the remote ones.
	publish: moq_lite::OriginProducer,
	consume: moq_lite::OriginProducer,

	broadcasts: Mutex<HashMap<String, moq_lite::BroadcastProducer>>,
}

impl Connection for MoqConnection {
	fn announce(&self, namespace: &str) -> Result<(), Error> {
		let mut broadcasts = self.broadcasts.lock();
		if broadcasts.contains_key(namespace) {
			return Ok(());
		}

		let broadcast = moq_lite::BroadcastProducer::default();
		self.publish.publish_broadcast(namespace, broadcast.consume());
		broadcasts.insert(namespace.to_string(), broadcast);

		Ok(())
	}

	fn publish(&self, namespace: &str, track: &str) -> Result<Box<dyn TrackWriter>, Error> {
		let mut broadcasts = self.broadcasts.lock();
		let broadcast = broadcasts
			.get_mut(namespace)
			.ok_or_else(|| Error::NotAnnounced(namespace.to_string()))?;

		let track = moq_lite::Track {
			name: track.to_string(),
			priority: 0,
		}
		.produce();
		broadcast.insert_track(track.consumer);

		Ok(Box::new(MoqWriter {
			track: track.producer,
			group: None,
		}))
	}

	fn subscribe(&self, namespace: &str, track: &str) -> Result<Box<dyn TrackReader>, Error> {
		Ok(Box::new(MoqReader {
			origin: self.consume.consume(),
			namespace: namespace.to_string(),
			name: track.to_string(),
			track: None,
			group: None,
		}))
	}

	fn subscribe_catalog(&self, namespace: &str, track: &str) -> Result<Box<dyn CatalogReader>, Error> {
		Ok(Box::new(MoqCatalog {
			origin: self.consume.consume(),
			namespace: namespace.to_string(),
			name: track.to_string(),
			catalog: None,
		}))
	}

	fn announced(&self) -> Result<Box<dyn AnnounceReader>, Error> {
		Ok(Box::new(MoqAnnounced {
			origin: self.consume.consume(),
		}))
	}

	fn closed(&self) -> BoxFuture<'_, Error> {
		async move {
			match self.session.closed().await {
				Ok(()) => Error::Closed,
				Err(err) => Error::Moq(err),
			}
		}
		.boxed()
	}

	fn close(&self) {
		// Ending our broadcasts; the session goes with the last reference.
		self.broadcasts.lock().clear();
	}
}

// Wait until the namespace is available from the relay.
async fn broadcast(origin: &mut moq_lite::OriginConsumer, namespace: &str) -> Result<moq_lite::BroadcastConsumer, Error> {
	if let Some(broadcast) = origin.consume_broadcast(namespace) {
		return Ok(broadcast);
	}

	while let Some((path, broadcast)) = origin.announced().await {
		if path.to_string() == namespace {
			if let Some(broadcast) = broadcast {
				return Ok(broadcast);
			}
		}
	}

	Err(Error::Closed)
}

struct MoqWriter {
	track: moq_lite::TrackProducer,

	// The open group for reliable payloads.
	group: Option<moq_lite::GroupProducer>,
}

impl TrackWriter for MoqWriter {
	fn write(&mut self, payload: Bytes, mode: DeliveryMode) -> Result<(), Error> {
		match mode {
			DeliveryMode::ReliableStream => {
				let group = self.group.get_or_insert_with(|| self.track.append_group());
				group.write_frame(payload);
			}
			DeliveryMode::LossyDatagram => {
				let mut group = self.track.append_group();
				group.write_frame(payload);
				group.close();
			}
		}

		Ok(())
	}
}

impl Drop for MoqWriter {
	fn drop(&mut self) {
		if let Some(group) = self.group.take() {
			group.close();
		}
	}
}

struct MoqReader {
	origin: moq_lite::OriginConsumer,
	namespace: String,
	name: String,
	track: Option<moq_lite::TrackConsumer>,
	group: Option<moq_lite::GroupConsumer>,
}

impl TrackReader for MoqReader {
	fn read(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, Error>> {
		async move {
			loop {
				if let Some(group) = self.group.as_mut() {
					if let Some(frame) = group.read_frame().await? {
						return Ok(Some(frame));
					}
					self.group = None;
				}

				let track = match self.track.take() {
					Some(track) => track,
					None => {
						let broadcast = broadcast(&mut self.origin, &self.namespace).await?;
						let track = moq_lite::Track {
							name: self.name.clone(),
							priority: 0,
						};
						broadcast.subscribe_track(&track)
					}
				};
				let track = self.track.insert(track);

				match track.next_group().await? {
					Some(group) => self.group = Some(group),
					None => return Ok(None),
				}
			}
		}
		.boxed()
	}
}

struct MoqCatalog {
	origin: moq_lite::OriginConsumer,
	namespace: String,
	name: String,
	catalog: Option<hang::catalog::CatalogConsumer>,
}

impl CatalogReader for MoqCatalog {
	fn next(&mut self) -> BoxFuture<'_, Result<Option<Vec<TrackInfo>>, Error>> {
		async move {
			let catalog = match self.catalog.take() {
				Some(catalog) => catalog,
				None => {
					let broadcast = broadcast(&mut self.origin, &self.namespace).await?;
					let track = moq_lite::Track {
						name: self.name.clone(),
						priority: 100,
					};
					hang::catalog::CatalogConsumer::new(broadcast.subscribe_track(&track))
				}
			};
			let catalog = self.catalog.insert(catalog);

			let catalog = catalog
				.next()
				.await
				.map_err(|err| Error::DecodeFailed(Arc::new(err.into())))?;

			Ok(catalog.map(|catalog| tracks(&catalog)))
		}
		.boxed()
	}
}

fn tracks(catalog: &hang::catalog::Catalog) -> Vec<TrackInfo> {
	let mut tracks = Vec::new();

	if let Some(video) = &catalog.video {
		for (name, config) in &video.renditions {
			tracks.push(TrackInfo {
				name: name.clone(),
				codec: Some(config.codec.to_string()),
				width: config.coded_width,
				height: config.coded_height,
				bitrate: config.bitrate,
				..Default::default()
			});
		}
	}

	if let Some(audio) = &catalog.audio {
		for (name, config) in &audio.renditions {
			tracks.push(TrackInfo {
				name: name.clone(),
				codec: Some(config.codec.to_string()),
				bitrate: config.bitrate,
				sample_rate: Some(config.sample_rate),
				..Default::default()
			});
		}
	}

	tracks
}

struct MoqAnnounced {
	origin: moq_lite::OriginConsumer,
}

impl AnnounceReader for MoqAnnounced {
	fn next(&mut self) -> BoxFuture<'_, Option<Announced>> {
		async move {
			let (path, broadcast) = self.origin.announced().await?;
			Some(Announced {
				namespace: path.to_string(),
				active: broadcast.is_some(),
			})
		}
		.boxed()
	}
}
