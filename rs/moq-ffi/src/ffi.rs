use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;

use url::Url;

use crate::callback::{AnnounceSink, CatalogSink, DataSink, StateSink};
use crate::state::RUNTIME;
use crate::{Code, ConnectionState, DeliveryMode, Error, Id, TrackInfo, last_error};

/// The outcome of a call: a code, plus an owned message on failure.
///
/// A non-null `message` must be released with `moq_free_str`.
#[repr(C)]
#[allow(non_camel_case_types)]
pub struct moq_result {
	pub code: Code,
	pub message: *mut c_char,
}

/// One catalog entry. Absent numbers are 0 and absent strings are null.
///
/// The strings are only valid during the callback that received them.
#[repr(C)]
#[allow(non_camel_case_types)]
pub struct moq_track_info {
	pub name: *const c_char,
	pub codec: *const c_char,
	pub mime_type: *const c_char,
	pub width: u32,
	pub height: u32,
	pub bitrate: u64,
	pub sample_rate: u32,
	pub language: *const c_char,
}

/// Runs the provided function in the runtime context.
///
/// Panics become [Error::Panic], and any failure is stored as the calling thread's last error.
pub fn enter<T, F: FnOnce() -> Result<T, Error>>(f: F) -> Result<T, Error> {
	let _guard = RUNTIME.enter();

	let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).unwrap_or(Err(Error::Panic));
	if let Err(err) = &res {
		tracing::warn!(%err, code = ?err.code(), "call failed");
		last_error::set(err);
	}

	res
}

/// Runs a read-only query in the runtime context.
///
/// Failures and panics yield the default answer and leave the last error alone.
pub fn query<T: Default, F: FnOnce() -> Result<T, Error>>(f: F) -> T {
	let _guard = RUNTIME.enter();

	std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
		.ok()
		.and_then(Result::ok)
		.unwrap_or_default()
}

impl moq_result {
	pub fn ok() -> Self {
		Self {
			code: Code::Ok,
			message: ptr::null_mut(),
		}
	}

	pub fn err(err: &Error) -> Self {
		Self {
			code: err.code(),
			message: owned_str(&err.to_string()),
		}
	}
}

impl From<Result<(), Error>> for moq_result {
	fn from(res: Result<(), Error>) -> Self {
		match res {
			Ok(()) => Self::ok(),
			Err(err) => Self::err(&err),
		}
	}
}

/// Collapse a handle result to its token, 0 on failure.
pub fn handle(res: Result<Id, Error>) -> u32 {
	res.map(u32::from).unwrap_or(0)
}

/// Copy a string into a NUL-terminated allocation owned by the caller.
pub fn owned_str(s: &str) -> *mut c_char {
	cstring(s).into_raw()
}

// Interior NULs can't cross; such strings become empty.
fn cstring(s: &str) -> CString {
	CString::new(s).unwrap_or_default()
}

fn opt_ptr(s: &Option<CString>) -> *const c_char {
	s.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

/// Parse a u32 handle into an Id.
pub fn parse_id(id: u32) -> Result<Id, Error> {
	Id::try_from(id)
}

/// Parse a handle where 0 means "none".
pub fn parse_id_optional(id: u32) -> Result<Option<Id>, Error> {
	match id {
		0 => Ok(None),
		id => Ok(Some(parse_id(id)?)),
	}
}

/// Parse a NUL-terminated C string pointer into a Url.
///
/// # Safety
/// The caller must ensure that url is null or a valid C string.
pub unsafe fn parse_url(url: *const c_char) -> Result<Url, Error> {
	let url = unsafe { parse_str(url)? };
	Ok(Url::parse(url)?)
}

/// Parse a NUL-terminated C string pointer into a &str.
///
/// # Safety
/// The caller must ensure that cstr is null or valid for 'a.
pub unsafe fn parse_str<'a>(cstr: *const c_char) -> Result<&'a str, Error> {
	if cstr.is_null() {
		return Err(Error::InvalidPointer);
	}

	let cstr = unsafe { CStr::from_ptr(cstr) };
	Ok(cstr.to_str()?)
}

/// Parse a raw pointer and size into a byte slice.
///
/// A null pointer is rejected even when the size is zero.
///
/// # Safety
/// The caller must ensure that data is null or valid for `size` bytes during 'a.
pub unsafe fn parse_slice<'a>(data: *const u8, size: usize) -> Result<&'a [u8], Error> {
	if data.is_null() {
		return Err(Error::InvalidPointer);
	}

	let data = unsafe { std::slice::from_raw_parts(data, size) };
	Ok(data)
}

pub fn parse_mode(mode: u32) -> Result<DeliveryMode, Error> {
	DeliveryMode::try_from(mode).map_err(|_| Error::InvalidMode(mode))
}

/// A C state callback with its user data.
pub struct OnState {
	user_data: *mut c_void,
	on_state: extern "C" fn(user_data: *mut c_void, state: ConnectionState),
}

impl OnState {
	/// # Safety
	/// The caller must ensure user_data remains valid for the callback's lifetime.
	pub unsafe fn new(user_data: *mut c_void, on_state: extern "C" fn(*mut c_void, ConnectionState)) -> Self {
		Self { user_data, on_state }
	}
}

impl StateSink for OnState {
	fn on_state(&self, state: ConnectionState) {
		(self.on_state)(self.user_data, state);
	}
}

unsafe impl Send for OnState {}
unsafe impl Sync for OnState {}

/// A C data callback with its user data.
pub struct OnData {
	user_data: *mut c_void,
	on_data: extern "C" fn(user_data: *mut c_void, data: *const u8, data_len: usize),
}

impl OnData {
	/// # Safety
	/// The caller must ensure user_data remains valid until the subscription ends.
	pub unsafe fn new(user_data: *mut c_void, on_data: extern "C" fn(*mut c_void, *const u8, usize)) -> Self {
		Self { user_data, on_data }
	}
}

impl DataSink for OnData {
	fn on_data(&mut self, payload: &[u8]) {
		(self.on_data)(self.user_data, payload.as_ptr(), payload.len());
	}
}

unsafe impl Send for OnData {}

/// A C catalog callback with its user data.
pub struct OnCatalog {
	user_data: *mut c_void,
	on_catalog: extern "C" fn(user_data: *mut c_void, tracks: *const moq_track_info, track_count: usize),
}

impl OnCatalog {
	/// # Safety
	/// The caller must ensure user_data remains valid until the subscription ends.
	pub unsafe fn new(
		user_data: *mut c_void,
		on_catalog: extern "C" fn(*mut c_void, *const moq_track_info, usize),
	) -> Self {
		Self { user_data, on_catalog }
	}
}

// Backing storage for the strings of one moq_track_info.
struct TrackStrings {
	name: CString,
	codec: Option<CString>,
	mime_type: Option<CString>,
	language: Option<CString>,
}

impl TrackStrings {
	fn new(track: &TrackInfo) -> Self {
		Self {
			name: cstring(&track.name),
			codec: track.codec.as_deref().map(cstring),
			mime_type: track.mime_type.as_deref().map(cstring),
			language: track.language.as_deref().map(cstring),
		}
	}
}

impl CatalogSink for OnCatalog {
	fn on_catalog(&mut self, tracks: &[TrackInfo]) {
		let strings: Vec<TrackStrings> = tracks.iter().map(TrackStrings::new).collect();
		let infos: Vec<moq_track_info> = tracks
			.iter()
			.zip(&strings)
			.map(|(track, strings)| moq_track_info {
				name: strings.name.as_ptr(),
				codec: opt_ptr(&strings.codec),
				mime_type: opt_ptr(&strings.mime_type),
				width: track.width.unwrap_or(0),
				height: track.height.unwrap_or(0),
				bitrate: track.bitrate.unwrap_or(0),
				sample_rate: track.sample_rate.unwrap_or(0),
				language: opt_ptr(&strings.language),
			})
			.collect();

		(self.on_catalog)(self.user_data, infos.as_ptr(), infos.len());
	}
}

unsafe impl Send for OnCatalog {}

/// A C announcement callback with its user data.
pub struct OnAnnounce {
	user_data: *mut c_void,
	on_announce: extern "C" fn(user_data: *mut c_void, namespace: *const c_char, active: bool),
}

impl OnAnnounce {
	/// # Safety
	/// The caller must ensure user_data remains valid until the callback is replaced or removed.
	pub unsafe fn new(user_data: *mut c_void, on_announce: extern "C" fn(*mut c_void, *const c_char, bool)) -> Self {
		Self { user_data, on_announce }
	}
}

impl AnnounceSink for OnAnnounce {
	fn on_announce(&self, namespace: &str, active: bool) {
		let namespace = cstring(namespace);
		(self.on_announce)(self.user_data, namespace.as_ptr(), active);
	}
}

unsafe impl Send for OnAnnounce {}
unsafe impl Sync for OnAnnounce {}
