use std::ffi::{CString, c_char, c_void};
use std::ptr;
use std::str::FromStr;
use std::sync::Arc;

use crate::callback::{AnnounceSink, CatalogSink, StateSink};
use crate::ffi::{self, moq_result, moq_track_info};
use crate::{Code, ConnectionState, DeliveryMode, Error, Log, Session, State, last_error};

#[cfg(feature = "moq")]
const VERSION: &str = concat!("moq-ffi ", env!("CARGO_PKG_VERSION"), " (moq)\0");
#[cfg(not(feature = "moq"))]
const VERSION: &str = concat!("moq-ffi ", env!("CARGO_PKG_VERSION"), "\0");

/// Initialize logging and the background runtime.
///
/// Optional, and safe to call more than once. Returns false if initialization failed.
#[unsafe(no_mangle)]
pub extern "C" fn moq_init() -> bool {
	ffi::enter(crate::init).is_ok()
}

/// Change the log level: one of "trace", "debug", "info", "warn", "error".
///
/// # Safety
/// - The caller must ensure that level is a valid null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_log_level(level: *const c_char) -> moq_result {
	ffi::enter(|| {
		let level = unsafe { ffi::parse_str(level)? };
		let level = tracing::Level::from_str(level)?;
		Log { level }.apply()
	})
	.into()
}

/// A static, NUL-terminated version string. Do not free it.
#[unsafe(no_mangle)]
pub extern "C" fn moq_version() -> *const c_char {
	VERSION.as_ptr().cast()
}

/// The message of the most recent failure on this thread, or null if there was none.
///
/// The string is owned by the caller and must be released with [moq_free_str].
#[unsafe(no_mangle)]
pub extern "C" fn moq_last_error() -> *mut c_char {
	match last_error::get() {
		Some(err) => ffi::owned_str(&err.to_string()),
		None => ptr::null_mut(),
	}
}

/// Copy the most recent failure on this thread into a caller buffer, NUL-terminated.
///
/// An empty string is written when there was no failure. This call never changes the
/// last error itself.
///
/// # Safety
/// - The caller must ensure that buffer is valid for writes of capacity bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_last_error_copy(buffer: *mut c_char, capacity: usize) -> moq_result {
	if buffer.is_null() {
		return moq_result::err(&Error::InvalidPointer);
	}

	let message = last_error::get().map(|err| err.to_string()).unwrap_or_default();
	let needed = message.len() + 1;
	if needed > capacity {
		return moq_result::err(&Error::BufferTooSmall(needed));
	}

	unsafe {
		ptr::copy_nonoverlapping(message.as_ptr(), buffer.cast::<u8>(), message.len());
		*buffer.add(message.len()) = 0;
	}

	moq_result::ok()
}

/// Release a string returned by this library. Null is ignored.
///
/// # Safety
/// - The caller must ensure str was returned by this library and not already freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_free_str(str: *mut c_char) {
	if !str.is_null() {
		drop(unsafe { CString::from_raw(str) });
	}
}

/// Create a disconnected session. Returns 0 on failure.
#[unsafe(no_mangle)]
pub extern "C" fn moq_session_create() -> u32 {
	ffi::handle(ffi::enter(|| {
		let id = State::lock().session.insert(Session::new());
		tracing::debug!(%id, "session created");
		Ok(id)
	}))
}

/// Destroy a session, cancelling its background work. No callback fires.
///
/// Null is ignored. Publishers and subscribers created from it stay valid handles but stop
/// working, and must still be destroyed.
#[unsafe(no_mangle)]
pub extern "C" fn moq_session_destroy(session: u32) {
	let _ = ffi::enter(|| {
		let Some(id) = ffi::parse_id_optional(session)? else {
			return Ok(());
		};

		let session = State::lock().session.remove(id).ok_or(Error::NotFound)?;
		session.close();

		Ok(())
	});
}

/// Start connecting to a relay URL.
///
/// `on_state` (optional) reports every state change, starting with Connecting before this
/// returns. Unsupported schemes fail synchronously; unreachable relays report Failed.
///
/// # Safety
/// - The caller must ensure that url is a valid null-terminated C string.
/// - The caller must ensure that user_data stays valid until the session is destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_connect(
	session: u32,
	url: *const c_char,
	on_state: Option<extern "C" fn(user_data: *mut c_void, state: ConnectionState)>,
	user_data: *mut c_void,
) -> moq_result {
	ffi::enter(|| {
		let session = State::session(ffi::parse_id(session)?)?;
		let url = unsafe { ffi::parse_url(url)? };
		let on_state = on_state.map(|on_state| {
			let sink = unsafe { ffi::OnState::new(user_data, on_state) };
			Arc::new(sink) as Arc<dyn StateSink>
		});

		session.connect(url, on_state)
	})
	.into()
}

/// Close the connection and report Disconnected. A no-op when not connected, or for null.
#[unsafe(no_mangle)]
pub extern "C" fn moq_disconnect(session: u32) -> moq_result {
	ffi::enter(|| {
		let Some(id) = ffi::parse_id_optional(session)? else {
			return Ok(());
		};

		State::session(id)?.disconnect()
	})
	.into()
}

#[unsafe(no_mangle)]
pub extern "C" fn moq_is_connected(session: u32) -> bool {
	ffi::query(|| Ok(State::session(ffi::parse_id(session)?)?.is_connected()))
}

/// The current connection state; Disconnected for an invalid handle.
///
/// Like the other queries, this never changes the last error.
#[unsafe(no_mangle)]
pub extern "C" fn moq_connection_state(session: u32) -> ConnectionState {
	ffi::query(|| Ok(State::session(ffi::parse_id(session)?)?.status()))
}

/// Why the last connection attempt failed, or null.
///
/// The string is owned by the caller and must be released with [moq_free_str].
#[unsafe(no_mangle)]
pub extern "C" fn moq_connection_error(session: u32) -> *mut c_char {
	ffi::query(|| Ok(State::session(ffi::parse_id(session)?)?.error()))
		.map_or(ptr::null_mut(), |err| ffi::owned_str(&err.to_string()))
}

/// Announce a namespace so a publisher can be created under it.
///
/// # Safety
/// - The caller must ensure that namespace is a valid null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_announce_namespace(session: u32, namespace: *const c_char) -> moq_result {
	ffi::enter(|| {
		let session = State::session(ffi::parse_id(session)?)?;
		let namespace = unsafe { ffi::parse_str(namespace)? };
		session.announce_namespace(namespace)
	})
	.into()
}

/// Create a reliable-stream publisher. Returns 0 on failure; see [moq_last_error].
///
/// # Safety
/// - The caller must ensure that namespace and track are valid null-terminated C strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_create_publisher(session: u32, namespace: *const c_char, track: *const c_char) -> u32 {
	unsafe { moq_create_publisher_ex(session, namespace, track, DeliveryMode::ReliableStream.into()) }
}

/// Create a publisher with a default delivery mode. Returns 0 on failure.
///
/// # Safety
/// - The caller must ensure that namespace and track are valid null-terminated C strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_create_publisher_ex(
	session: u32,
	namespace: *const c_char,
	track: *const c_char,
	mode: u32,
) -> u32 {
	ffi::handle(ffi::enter(|| {
		let session = State::session(ffi::parse_id(session)?)?;
		let namespace = unsafe { ffi::parse_str(namespace)? };
		let track = unsafe { ffi::parse_str(track)? };
		let mode = ffi::parse_mode(mode)?;

		let publisher = session.create_publisher(namespace, track, mode)?;
		Ok(State::lock().publisher.insert(publisher))
	}))
}

/// Send one payload. The bytes are copied before this returns.
///
/// # Safety
/// - The caller must ensure that data is valid for data_len bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_publish_data(publisher: u32, data: *const u8, data_len: usize, mode: u32) -> moq_result {
	ffi::enter(|| {
		let publisher = State::publisher(ffi::parse_id(publisher)?)?;
		let payload = unsafe { ffi::parse_slice(data, data_len)? };
		let mode = ffi::parse_mode(mode)?;
		publisher.publish(payload, mode)
	})
	.into()
}

/// Destroy a publisher. Null is ignored.
#[unsafe(no_mangle)]
pub extern "C" fn moq_publisher_destroy(publisher: u32) {
	let _ = ffi::enter(|| {
		let Some(id) = ffi::parse_id_optional(publisher)? else {
			return Ok(());
		};

		let publisher = State::lock().publisher.remove(id).ok_or(Error::NotFound)?;
		publisher.close();

		Ok(())
	});
}

/// Subscribe to a track. Returns 0 on failure; see [moq_last_error].
///
/// `on_data` is required and runs on a library thread, once per payload, in order.
///
/// # Safety
/// - The caller must ensure that namespace and track are valid null-terminated C strings.
/// - The caller must ensure that user_data stays valid until unsubscribed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_subscribe(
	session: u32,
	namespace: *const c_char,
	track: *const c_char,
	on_data: Option<extern "C" fn(user_data: *mut c_void, data: *const u8, data_len: usize)>,
	user_data: *mut c_void,
) -> u32 {
	ffi::handle(ffi::enter(|| {
		let session = State::session(ffi::parse_id(session)?)?;
		let namespace = unsafe { ffi::parse_str(namespace)? };
		let track = unsafe { ffi::parse_str(track)? };
		let on_data = on_data.ok_or(Error::MissingCallback)?;
		let sink = unsafe { ffi::OnData::new(user_data, on_data) };

		let subscriber = session.subscribe(namespace, track, Box::new(sink))?;
		Ok(State::lock().subscriber.insert(subscriber))
	}))
}

/// Stop delivery. Once this returns no callback is running or will run for the handle.
#[unsafe(no_mangle)]
pub extern "C" fn moq_unsubscribe(subscriber: u32) -> moq_result {
	ffi::enter(|| {
		State::subscriber(ffi::parse_id(subscriber)?)?.unsubscribe();
		Ok(())
	})
	.into()
}

#[unsafe(no_mangle)]
pub extern "C" fn moq_is_subscribed(subscriber: u32) -> bool {
	ffi::query(|| Ok(State::subscriber(ffi::parse_id(subscriber)?)?.is_subscribed()))
}

/// Unsubscribe and destroy a subscriber. Null is ignored.
#[unsafe(no_mangle)]
pub extern "C" fn moq_subscriber_destroy(subscriber: u32) {
	let _ = ffi::enter(|| {
		let Some(id) = ffi::parse_id_optional(subscriber)? else {
			return Ok(());
		};

		// Important: Don't hold the registry lock while waiting out a callback.
		let subscriber = State::lock().subscriber.remove(id).ok_or(Error::NotFound)?;
		subscriber.close();

		Ok(())
	});
}

/// Register for namespace announcements from remote peers, replacing any earlier callback.
///
/// A null callback unregisters and always succeeds. Registering while disconnected is
/// allowed; delivery starts once connected.
///
/// # Safety
/// - The caller must ensure that user_data stays valid until the callback is replaced.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_subscribe_announces(
	session: u32,
	on_announce: Option<extern "C" fn(user_data: *mut c_void, namespace: *const c_char, active: bool)>,
	user_data: *mut c_void,
) -> moq_result {
	ffi::enter(|| {
		let session = State::session(ffi::parse_id(session)?)?;
		let sink = on_announce.map(|on_announce| {
			let sink = unsafe { ffi::OnAnnounce::new(user_data, on_announce) };
			Arc::new(sink) as Arc<dyn AnnounceSink>
		});

		session.subscribe_announces(sink)
	})
	.into()
}

/// Subscribe to a catalog track. Returns 0 on failure.
///
/// `on_catalog` receives the full track list on every update; it may be null.
///
/// # Safety
/// - The caller must ensure that namespace and track are valid null-terminated C strings.
/// - The caller must ensure that user_data stays valid until unsubscribed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn moq_subscribe_catalog(
	session: u32,
	namespace: *const c_char,
	track: *const c_char,
	on_catalog: Option<extern "C" fn(user_data: *mut c_void, tracks: *const moq_track_info, track_count: usize)>,
	user_data: *mut c_void,
) -> u32 {
	ffi::handle(ffi::enter(|| {
		let session = State::session(ffi::parse_id(session)?)?;
		let namespace = unsafe { ffi::parse_str(namespace)? };
		let track = unsafe { ffi::parse_str(track)? };
		let sink = on_catalog.map(|on_catalog| {
			let sink = unsafe { ffi::OnCatalog::new(user_data, on_catalog) };
			Box::new(sink) as Box<dyn CatalogSink>
		});

		let subscriber = session.subscribe_catalog(namespace, track, sink)?;
		Ok(State::lock().subscriber.insert(subscriber))
	}))
}

/// A static description of a result code. Do not free it.
#[unsafe(no_mangle)]
pub extern "C" fn moq_code_name(code: u32) -> *const c_char {
	let name: &'static str = match Code::try_from(code) {
		Ok(Code::Ok) => "ok\0",
		Ok(Code::InvalidArgument) => "invalid argument\0",
		Ok(Code::ConnectionFailed) => "connection failed\0",
		Ok(Code::NotConnected) => "not connected\0",
		Ok(Code::Timeout) => "timeout\0",
		Ok(Code::Internal) => "internal\0",
		Ok(Code::Unsupported) => "unsupported\0",
		Ok(Code::BufferTooSmall) => "buffer too small\0",
		Err(_) => "unknown\0",
	};
	name.as_ptr().cast()
}
