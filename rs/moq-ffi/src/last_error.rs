//! The most recent failure on the calling thread.
//!
//! Set by every failing C entry point and left in place until the next failure
//! on the same thread overwrites it.

use std::cell::RefCell;

use crate::Error;

thread_local! {
	static LAST_ERROR: RefCell<Option<Error>> = const { RefCell::new(None) };
}

pub fn set(err: &Error) {
	LAST_ERROR.with(|last| *last.borrow_mut() = Some(err.clone()));
}

pub fn get() -> Option<Error> {
	LAST_ERROR.with(|last| last.borrow().clone())
}
