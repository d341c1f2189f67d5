#![allow(dead_code)]

use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use moq_ffi::engine::memory;
use moq_ffi::*;
use parking_lot::Mutex;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll until `f` holds or the timeout expires.
pub fn wait_until(f: impl Fn() -> bool) -> bool {
	let deadline = Instant::now() + TIMEOUT;
	while Instant::now() < deadline {
		if f() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(5));
	}
	f()
}

/// A relay with a name no other test uses.
pub fn relay(name: &str) -> (memory::Listener, CString) {
	static NEXT: AtomicUsize = AtomicUsize::new(0);

	let listener = memory::listen(&format!("{name}-{}", NEXT.fetch_add(1, Ordering::Relaxed)));
	let url = CString::new(listener.url().unwrap().to_string()).unwrap();
	(listener, url)
}

pub fn user_data<T>(value: &T) -> *mut c_void {
	value as *const T as *mut c_void
}

/// The code of a result, releasing its message.
pub fn code(res: moq_result) -> Code {
	unsafe { moq_free_str(res.message) };
	res.code
}

pub fn last_error() -> String {
	let message = moq_last_error();
	assert!(!message.is_null(), "no last error");

	let text = unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned();
	unsafe { moq_free_str(message) };
	text
}

pub fn cstr(ptr: *const c_char) -> Option<String> {
	if ptr.is_null() {
		return None;
	}
	Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[derive(Default)]
pub struct States(pub Mutex<Vec<ConnectionState>>);

impl States {
	pub fn get(&self) -> Vec<ConnectionState> {
		self.0.lock().clone()
	}

	pub fn last(&self) -> Option<ConnectionState> {
		self.0.lock().last().copied()
	}
}

pub extern "C" fn on_state(user_data: *mut c_void, state: ConnectionState) {
	let states = unsafe { &*(user_data as *const States) };
	states.0.lock().push(state);
}

#[derive(Default)]
pub struct Payloads(pub Mutex<Vec<Vec<u8>>>);

impl Payloads {
	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	pub fn get(&self) -> Vec<Vec<u8>> {
		self.0.lock().clone()
	}
}

pub extern "C" fn on_data(user_data: *mut c_void, data: *const u8, data_len: usize) {
	let payloads = unsafe { &*(user_data as *const Payloads) };
	let data = match data_len {
		0 => &[][..],
		len => unsafe { std::slice::from_raw_parts(data, len) },
	};
	payloads.0.lock().push(data.to_vec());
}

/// A session connected to a relay, destroyed on drop.
pub struct Client {
	pub id: u32,
	pub states: Box<States>,
}

impl Client {
	pub fn new() -> Self {
		let id = moq_session_create();
		assert_ne!(id, 0);

		Self {
			id,
			states: Box::default(),
		}
	}

	pub fn connect(&self, url: &CStr) -> Code {
		code(unsafe { moq_connect(self.id, url.as_ptr(), Some(on_state), user_data(&*self.states)) })
	}

	pub fn connected(url: &CStr) -> Self {
		let client = Self::new();
		assert_eq!(client.connect(url), Code::Ok);
		assert!(wait_until(|| moq_is_connected(client.id)), "never connected");
		client
	}

	pub fn announce(&self, namespace: &CStr) {
		assert_eq!(code(unsafe { moq_announce_namespace(self.id, namespace.as_ptr()) }), Code::Ok);
	}

	pub fn publisher(&self, namespace: &CStr, track: &CStr) -> u32 {
		let publisher = unsafe { moq_create_publisher(self.id, namespace.as_ptr(), track.as_ptr()) };
		assert_ne!(publisher, 0, "{}", last_error());
		publisher
	}

	pub fn subscribe(&self, namespace: &CStr, track: &CStr, payloads: &Payloads) -> u32 {
		let subscriber =
			unsafe { moq_subscribe(self.id, namespace.as_ptr(), track.as_ptr(), Some(on_data), user_data(payloads)) };
		assert_ne!(subscriber, 0, "{}", last_error());
		subscriber
	}
}

impl Client {
	/// Destroy the session now, keeping its recorded states.
	pub fn destroy(self) -> Box<States> {
		let client = std::mem::ManuallyDrop::new(self);
		moq_session_destroy(client.id);
		unsafe { std::ptr::read(&client.states) }
	}
}

impl Drop for Client {
	fn drop(&mut self) {
		moq_session_destroy(self.id);
	}
}

pub fn publish(publisher: u32, payload: &[u8], mode: DeliveryMode) -> Code {
	code(unsafe { moq_publish_data(publisher, payload.as_ptr(), payload.len(), mode.into()) })
}
