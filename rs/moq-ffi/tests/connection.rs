mod common;

use std::ffi::c_void;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use common::*;
use moq_ffi::ConnectionState::*;
use moq_ffi::*;

#[test]
fn connect_and_disconnect() {
	let (_relay, url) = relay("connect");
	let client = Client::new();

	assert_eq!(client.connect(&url), Code::Ok);

	// Reported from the background, in order.
	assert!(wait_until(|| client.states.get() == [Connecting, Connected]));
	assert!(moq_is_connected(client.id));
	assert_eq!(moq_connection_state(client.id), Connected);

	assert_eq!(code(moq_disconnect(client.id)), Code::Ok);
	assert!(!moq_is_connected(client.id));
	assert!(wait_until(|| client.states.get() == [Connecting, Connected, Disconnected]));

	// Nothing left to disconnect.
	assert_eq!(code(moq_disconnect(client.id)), Code::Ok);
	std::thread::sleep(Duration::from_millis(50));
	assert_eq!(client.states.get().len(), 3);
}

#[test]
fn second_connect_is_rejected() {
	let (_relay, url) = relay("twice");
	let client = Client::connected(&url);

	assert_eq!(client.connect(&url), Code::InvalidArgument);
	assert!(last_error().contains("already connected"));

	assert!(moq_is_connected(client.id));
	std::thread::sleep(Duration::from_millis(50));
	assert_eq!(client.states.get(), [Connecting, Connected]);
}

#[test]
fn unreachable_relay() {
	let client = Client::new();

	assert_eq!(client.connect(c"memory://nobody-is-listening"), Code::Ok);
	assert!(wait_until(|| client.states.last() == Some(Failed)));
	assert_eq!(client.states.get(), [Connecting, Failed]);
	assert!(!moq_is_connected(client.id));

	let err = moq_connection_error(client.id);
	let message = cstr(err).unwrap();
	unsafe { moq_free_str(err) };
	assert!(message.contains("refused"), "{message}");
}

#[test]
fn relay_shutdown() {
	let (relay, url) = relay("shutdown");
	let client = Client::connected(&url);

	drop(relay);

	assert!(wait_until(|| client.states.last() == Some(Failed)));
	assert_eq!(client.states.get(), [Connecting, Connected, Failed]);
	assert_eq!(moq_connection_state(client.id), Failed);

	// Disconnecting a failed session changes nothing.
	assert_eq!(code(moq_disconnect(client.id)), Code::Ok);
	std::thread::sleep(Duration::from_millis(50));
	assert_eq!(client.states.get().len(), 3);
}

#[test]
fn reconnect_after_failure() {
	let client = Client::new();

	assert_eq!(client.connect(c"memory://reconnect-later"), Code::Ok);
	assert!(wait_until(|| client.states.last() == Some(Failed)));

	let _relay = engine::memory::listen("reconnect-later");
	assert_eq!(client.connect(c"memory://reconnect-later"), Code::Ok);

	assert!(wait_until(|| client.states.last() == Some(Connected)));
	assert_eq!(client.states.get(), [Connecting, Failed, Connecting, Connected]);
	assert!(moq_connection_error(client.id).is_null());
}

#[test]
fn unsupported_scheme() {
	let client = Client::new();

	assert_eq!(client.connect(c"quic://relay.example.com"), Code::Unsupported);
	assert_eq!(client.connect(c"not a url"), Code::InvalidArgument);

	assert!(client.states.get().is_empty());
	assert_eq!(moq_connection_state(client.id), Disconnected);
}

#[test]
fn destroy_is_silent() {
	let (_relay, url) = relay("destroy");
	let client = Client::connected(&url);
	assert!(wait_until(|| client.states.get() == [Connecting, Connected]));

	let states = client.destroy();
	std::thread::sleep(Duration::from_millis(50));

	assert_eq!(states.get(), [Connecting, Connected]);
}

#[test]
fn state_callback_is_optional() {
	let (_relay, url) = relay("quiet");
	let session = moq_session_create();

	let res = unsafe { moq_connect(session, url.as_ptr(), None, std::ptr::null_mut()) };
	assert_eq!(code(res), Code::Ok);
	assert!(wait_until(|| moq_is_connected(session)));

	assert_eq!(code(moq_disconnect(session)), Code::Ok);
	moq_session_destroy(session);
}

#[test]
fn queued_notices_dropped_on_destroy() {
	let (_relay, url) = relay("queued");
	let client = Client::new();

	assert_eq!(client.connect(&url), Code::Ok);
	let states = client.destroy();
	let seen = states.get().len();

	std::thread::sleep(Duration::from_millis(50));
	assert_eq!(states.get().len(), seen);
}

// Each callback reaches into a different handle.
struct Crossed {
	session: AtomicU32,
	subscriber: AtomicU32,
	states: States,
}

extern "C" fn on_state_then_unsubscribe(user_data: *mut c_void, state: ConnectionState) {
	let ctx = unsafe { &*(user_data as *const Crossed) };
	on_state(common::user_data(&ctx.states), state);

	if state == Disconnected {
		let res = moq_unsubscribe(ctx.subscriber.load(Ordering::SeqCst));
		unsafe { moq_free_str(res.message) };
	}
}

extern "C" fn on_data_then_disconnect(user_data: *mut c_void, _data: *const u8, _data_len: usize) {
	let ctx = unsafe { &*(user_data as *const Crossed) };
	let res = moq_disconnect(ctx.session.load(Ordering::SeqCst));
	unsafe { moq_free_str(res.message) };
}

#[test]
fn crossed_callbacks() {
	let (_relay, url) = relay("crossed");
	let ctx = Crossed {
		session: AtomicU32::new(0),
		subscriber: AtomicU32::new(0),
		states: States::default(),
	};

	let session = moq_session_create();
	ctx.session.store(session, Ordering::SeqCst);

	let res = unsafe { moq_connect(session, url.as_ptr(), Some(on_state_then_unsubscribe), user_data(&ctx)) };
	assert_eq!(code(res), Code::Ok);
	assert!(wait_until(|| moq_is_connected(session)));

	let sub = unsafe {
		moq_subscribe(
			session,
			c"ns".as_ptr(),
			c"track".as_ptr(),
			Some(on_data_then_disconnect),
			user_data(&ctx),
		)
	};
	assert_ne!(sub, 0, "{}", last_error());
	ctx.subscriber.store(sub, Ordering::SeqCst);

	let publisher = Client::connected(&url);
	publisher.announce(c"ns");
	let publ = publisher.publisher(c"ns", c"track");

	// The data callback and another thread disconnect the same session at once, while the
	// state callback unsubscribes the subscriber whose callback is running.
	assert_eq!(publish(publ, b"go", DeliveryMode::ReliableStream), Code::Ok);

	let (tx, rx) = mpsc::channel();
	let racer = std::thread::spawn(move || {
		let res = moq_disconnect(session);
		unsafe { moq_free_str(res.message) };
		tx.send(()).ok();
	});

	assert!(rx.recv_timeout(TIMEOUT).is_ok(), "disconnect never returned");
	racer.join().unwrap();

	assert!(wait_until(|| !moq_is_subscribed(sub)));
	assert!(wait_until(|| ctx.states.get() == [Connecting, Connected, Disconnected]));

	moq_publisher_destroy(publ);
	moq_subscriber_destroy(sub);
	moq_session_destroy(session);
}
