//! # Core Connection Components
//!
//! The per-connection values handed to application callbacks.
//!
//! ## Components
//! - **Handle**: `SocketRef`, the two raw identities of a connection passed by value
//! - **User Data**: the owned, type-erased slot an application attaches to a connection
//! - **Socket**: the transient view a callback receives
//!
//! ## Lifetimes
//! A `Socket` borrows the server's connection record, so it cannot escape
//! the callback that produced it. Code that needs to refer to a connection
//! later keeps its `SocketRef` and goes back through the `Server`.

pub(crate) mod connection;
pub mod handle;
pub mod socket;
pub mod user_data;

pub use handle::{ConnectionId, ExtensionId, SocketRef};
pub use socket::Socket;
pub use user_data::UserData;
