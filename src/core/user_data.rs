//! Per-connection application state.
//!
//! The slot owns whatever the application stores in it. The server clears
//! it when a connection record is created and drops it together with the
//! record once the disconnection callback has returned, so nothing has to
//! be freed by hand.

use std::any::Any;
use std::fmt;

/// An owned, type-erased value attached to one connection.
#[derive(Default)]
pub struct UserData(Option<Box<dyn Any + Send>>);

impl UserData {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Store `value`, dropping whatever was there before.
    pub fn set<T: Any + Send>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }

    /// Borrow the value if one is stored and it is a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref()?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.as_mut()?.downcast_mut::<T>()
    }

    /// Move the value out if it is a `T`; a value of another type stays put.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        match self.0.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.0 = Some(other);
                None
            }
        }
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

impl fmt::Debug for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("UserData(empty)")
        } else {
            f.write_str("UserData(..)")
        }
    }
}
