use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Result codes reported across the C boundary.
///
/// The values are stable; callers compare against them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Code {
	Ok = 0,
	InvalidArgument = 1,
	ConnectionFailed = 2,
	NotConnected = 3,
	Timeout = 4,
	Internal = 5,
	Unsupported = 6,
	BufferTooSmall = 7,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
	#[error("closed")]
	Closed,

	#[cfg(feature = "moq")]
	#[error("moq error: {0}")]
	Moq(#[from] moq_lite::Error),

	#[error("url error: {0}")]
	Url(#[from] url::ParseError),

	#[error("utf8 error: {0}")]
	Utf8(#[from] std::str::Utf8Error),

	#[error("connect error: {0}")]
	Connect(Arc<anyhow::Error>),

	#[error("connection refused: {0}")]
	Refused(String),

	#[error("connect timed out")]
	Timeout,

	#[error("not connected")]
	NotConnected,

	#[error("already connected")]
	AlreadyConnected,

	#[error("namespace not announced: {0}")]
	NotAnnounced(String),

	#[error("invalid pointer")]
	InvalidPointer,

	#[error("invalid id")]
	InvalidId,

	#[error("not found")]
	NotFound,

	#[error("empty {0}")]
	Empty(&'static str),

	#[error("missing callback")]
	MissingCallback,

	#[error("invalid delivery mode: {0}")]
	InvalidMode(u32),

	#[error("unsupported: {0}")]
	Unsupported(String),

	#[error("decode failed: {0}")]
	DecodeFailed(Arc<anyhow::Error>),

	#[error("level error: {0}")]
	Level(Arc<tracing::metadata::ParseLevelError>),

	#[error("logging error: {0}")]
	Logging(Arc<tracing_subscriber::reload::Error>),

	#[error("config error: {0}")]
	Config(Arc<clap::Error>),

	#[error("buffer too small: need {0} bytes")]
	BufferTooSmall(usize),

	#[error("panic")]
	Panic,
}

impl Error {
	pub fn code(&self) -> Code {
		match self {
			Error::Url(_)
			| Error::Utf8(_)
			| Error::AlreadyConnected
			| Error::NotAnnounced(_)
			| Error::InvalidPointer
			| Error::InvalidId
			| Error::NotFound
			| Error::Empty(_)
			| Error::MissingCallback
			| Error::InvalidMode(_)
			| Error::Level(_)
			| Error::Config(_) => Code::InvalidArgument,
			Error::Closed | Error::Connect(_) | Error::Refused(_) => Code::ConnectionFailed,
			#[cfg(feature = "moq")]
			Error::Moq(_) => Code::ConnectionFailed,
			Error::NotConnected => Code::NotConnected,
			Error::Timeout => Code::Timeout,
			Error::Unsupported(_) => Code::Unsupported,
			Error::BufferTooSmall(_) => Code::BufferTooSmall,
			Error::DecodeFailed(_) | Error::Logging(_) | Error::Panic => Code::Internal,
		}
	}
}

impl From<tracing::metadata::ParseLevelError> for Error {
	fn from(err: tracing::metadata::ParseLevelError) -> Self {
		Error::Level(Arc::new(err))
	}
}

impl From<tracing_subscriber::reload::Error> for Error {
	fn from(err: tracing_subscriber::reload::Error) -> Self {
		Error::Logging(Arc::new(err))
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::DecodeFailed(Arc::new(err.into()))
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;

	#[test]
	fn codes_are_distinct() {
		let codes = [
			Code::Ok,
			Code::InvalidArgument,
			Code::ConnectionFailed,
			Code::NotConnected,
			Code::Timeout,
			Code::Internal,
			Code::Unsupported,
			Code::BufferTooSmall,
		];
		let values: HashSet<u32> = codes.iter().map(|code| u32::from(*code)).collect();
		assert_eq!(values.len(), codes.len());
		assert_eq!(u32::from(Code::Ok), 0);
	}

	#[test]
	fn code_round_trip() {
		assert_eq!(Code::try_from(3).unwrap(), Code::NotConnected);
		assert!(Code::try_from(8).is_err());
	}

	#[test]
	fn errors_map_to_codes() {
		assert_eq!(Error::InvalidPointer.code(), Code::InvalidArgument);
		assert_eq!(Error::AlreadyConnected.code(), Code::InvalidArgument);
		assert_eq!(Error::Refused("memory://nobody".into()).code(), Code::ConnectionFailed);
		assert_eq!(Error::NotConnected.code(), Code::NotConnected);
		assert_eq!(Error::Timeout.code(), Code::Timeout);
		assert_eq!(Error::Unsupported("quic".into()).code(), Code::Unsupported);
		assert_eq!(Error::BufferTooSmall(12).code(), Code::BufferTooSmall);
		assert_eq!(Error::Panic.code(), Code::Internal);
	}
}
