use std::num::NonZero;

use crate::Error;

/// An opaque handle token; zero is reserved for "no handle".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(NonZero<u32>);

impl std::fmt::Display for Id {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0.get())
	}
}

// Slab keys are offset by one so no live entry is ever 0.
pub(crate) struct NonZeroSlab<T>(slab::Slab<T>);

impl<T> NonZeroSlab<T> {
	pub fn insert(&mut self, value: T) -> Id {
		let id = self.0.insert(value) + 1;
		let id = u32::try_from(id).expect("u32 overflow");
		Id(unsafe { NonZero::new_unchecked(id) })
	}

	pub fn get(&self, id: Id) -> Option<&T> {
		self.0.get(Self::key(id))
	}

	pub fn remove(&mut self, id: Id) -> Option<T> {
		self.0.try_remove(Self::key(id))
	}

	fn key(id: Id) -> usize {
		(id.0.get() - 1) as usize
	}
}

impl TryFrom<u32> for Id {
	type Error = Error;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		NonZero::try_from(value).map(Id).map_err(|_| Error::InvalidId)
	}
}

impl From<Id> for u32 {
	fn from(value: Id) -> Self {
		value.0.get()
	}
}

impl<T> Default for NonZeroSlab<T> {
	fn default() -> Self {
		Self(slab::Slab::new())
	}
}
