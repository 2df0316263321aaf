//! Connection identities and the wrap/unwrap pair used at the embedding boundary.
//!
//! A connection is identified by its transport id. Some engines layer an
//! extension context on top of a connection; its id travels alongside but
//! does not take part in identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;

/// Identity of the underlying transport connection.
///
/// Engines hand these out from a monotonic counter and never reuse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(NonZeroU64);

impl ConnectionId {
    /// Returns `None` for zero, which is reserved for "no connection".
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Identity of an optional protocol-extension context layered on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionId(NonZeroU64);

impl ExtensionId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// The boundary-visible form of a socket: both raw identities, by value.
///
/// Wrapping and unwrapping are pure; no ownership moves and nothing is
/// checked. Whether the connection is still alive is decided by the
/// `Server` operation the ref is passed to.
#[derive(Debug, Clone, Copy, Eq)]
pub struct SocketRef {
    transport: ConnectionId,
    extension: Option<ExtensionId>,
}

impl SocketRef {
    pub fn new(transport: ConnectionId, extension: Option<ExtensionId>) -> Self {
        Self {
            transport,
            extension,
        }
    }

    pub fn transport(&self) -> ConnectionId {
        self.transport
    }

    pub fn extension(&self) -> Option<ExtensionId> {
        self.extension
    }

    /// Flatten into two words; an absent extension is encoded as `0`.
    #[inline]
    pub fn into_raw(self) -> (u64, u64) {
        (
            self.transport.get(),
            self.extension.map_or(0, ExtensionId::get),
        )
    }

    /// Rebuild from two words produced by [`SocketRef::into_raw`].
    ///
    /// Returns `None` only when the transport word is zero.
    #[inline]
    pub fn from_raw(transport: u64, extension: u64) -> Option<Self> {
        Some(Self {
            transport: ConnectionId::new(transport)?,
            extension: ExtensionId::new(extension),
        })
    }
}

// Identity is the transport handle alone.
impl PartialEq for SocketRef {
    fn eq(&self, other: &Self) -> bool {
        self.transport == other.transport
    }
}

impl Hash for SocketRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.transport.hash(state);
    }
}

impl fmt::Display for SocketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extension {
            Some(ext) => write!(f, "{}+ext#{}", self.transport, ext.get()),
            None => write!(f, "{}", self.transport),
        }
    }
}
