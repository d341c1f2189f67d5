//! JSON catalog decoding.
//!
//! Two layouts are understood: the hang catalog (`video`/`audio` rendition maps) and the
//! WARP style `tracks` array with `selectionParams`.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{Error, TrackInfo};

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Catalog {
	tracks: Vec<Track>,
	video: Option<Renditions<Video>>,
	audio: Option<Renditions<Audio>>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Track {
	name: String,
	#[serde(flatten)]
	params: Params,
	selection_params: Option<Params>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Params {
	codec: Option<String>,
	mime_type: Option<String>,
	width: Option<u32>,
	height: Option<u32>,
	bitrate: Option<u64>,
	#[serde(alias = "sampleRate")]
	samplerate: Option<u32>,
	#[serde(alias = "language")]
	lang: Option<String>,
}

#[derive(Deserialize)]
struct Renditions<T> {
	renditions: BTreeMap<String, T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
	codec: String,
	coded_width: Option<u32>,
	coded_height: Option<u32>,
	bitrate: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Audio {
	codec: String,
	sample_rate: Option<u32>,
	bitrate: Option<u64>,
}

/// Decode one catalog payload into its track list.
pub fn decode(payload: &[u8]) -> Result<Vec<TrackInfo>, Error> {
	let catalog: Catalog = serde_json::from_slice(payload)?;
	let mut tracks = Vec::new();

	for track in catalog.tracks {
		if track.name.is_empty() {
			tracing::warn!("skipping catalog track without a name");
			continue;
		}

		let params = track.selection_params.unwrap_or(track.params);
		tracks.push(TrackInfo {
			name: track.name,
			codec: params.codec,
			mime_type: params.mime_type,
			width: params.width,
			height: params.height,
			bitrate: params.bitrate,
			sample_rate: params.samplerate,
			language: params.lang,
		});
	}

	if let Some(video) = catalog.video {
		for (name, config) in video.renditions {
			if name.is_empty() {
				continue;
			}

			tracks.push(TrackInfo {
				name,
				codec: Some(config.codec),
				width: config.coded_width,
				height: config.coded_height,
				bitrate: config.bitrate,
				..Default::default()
			});
		}
	}

	if let Some(audio) = catalog.audio {
		for (name, config) in audio.renditions {
			if name.is_empty() {
				continue;
			}

			tracks.push(TrackInfo {
				name,
				codec: Some(config.codec),
				bitrate: config.bitrate,
				sample_rate: config.sample_rate,
				..Default::default()
			});
		}
	}

	Ok(tracks)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hang_layout() {
		let json = r#"{
			"video": {
				"renditions": {
					"video1": { "codec": "avc1.64001f", "codedWidth": 1280, "codedHeight": 720, "bitrate": 6000000 },
					"video0": { "codec": "avc1.64001f", "codedWidth": 640, "codedHeight": 360 }
				},
				"priority": 1
			},
			"audio": {
				"renditions": {
					"audio": { "codec": "opus", "sampleRate": 48000, "numberOfChannels": 2, "bitrate": 128000 }
				},
				"priority": 2
			}
		}"#;

		let tracks = decode(json.as_bytes()).unwrap();
		let names: Vec<&str> = tracks.iter().map(|track| track.name.as_str()).collect();
		assert_eq!(names, ["video0", "video1", "audio"]);

		assert_eq!(tracks[1].width, Some(1280));
		assert_eq!(tracks[1].height, Some(720));
		assert_eq!(tracks[1].bitrate, Some(6_000_000));
		assert_eq!(tracks[0].bitrate, None);
		assert_eq!(tracks[2].codec.as_deref(), Some("opus"));
		assert_eq!(tracks[2].sample_rate, Some(48000));
		assert_eq!(tracks[2].width, None);
	}

	#[test]
	fn warp_layout() {
		let json = r#"{
			"version": 1,
			"streamingFormat": 1,
			"tracks": [
				{
					"name": "hd",
					"selectionParams": { "codec": "avc1.640028", "mimeType": "video/mp4", "width": 1920, "height": 1080, "bitrate": 5000000 }
				},
				{
					"name": "audio",
					"selectionParams": { "codec": "mp4a.40.2", "mimeType": "audio/mp4", "samplerate": 44100, "lang": "en" }
				}
			]
		}"#;

		let tracks = decode(json.as_bytes()).unwrap();
		assert_eq!(tracks.len(), 2);
		assert_eq!(tracks[0].mime_type.as_deref(), Some("video/mp4"));
		assert_eq!(tracks[0].width, Some(1920));
		assert_eq!(tracks[1].sample_rate, Some(44100));
		assert_eq!(tracks[1].language.as_deref(), Some("en"));
	}

	#[test]
	fn flat_tracks() {
		let json = r#"{ "tracks": [ { "name": "chat", "mimeType": "text/plain", "language": "fr" } ] }"#;

		let tracks = decode(json.as_bytes()).unwrap();
		assert_eq!(tracks[0].name, "chat");
		assert_eq!(tracks[0].mime_type.as_deref(), Some("text/plain"));
		assert_eq!(tracks[0].language.as_deref(), Some("fr"));
		assert_eq!(tracks[0].codec, None);
	}

	#[test]
	fn unnamed_tracks() {
		let json = r#"{
			"tracks": [ { "codec": "opus" }, { "name": "", "codec": "vp8" }, { "name": "chat" } ],
			"audio": { "renditions": { "": { "codec": "opus" } } }
		}"#;

		let tracks = decode(json.as_bytes()).unwrap();
		assert_eq!(tracks.len(), 1);
		assert_eq!(tracks[0].name, "chat");
	}

	#[test]
	fn empty() {
		assert!(decode(b"{}").unwrap().is_empty());
		assert!(decode(b"not json").is_err());
	}
}
