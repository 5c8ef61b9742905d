//! Capabilities the trigger needs from the platform

use std::sync::Arc;

use dexopt_error::DexOptResult;

use crate::parcel::Parcel;

/// A remote service object
pub trait ServiceHandle: Send + Sync {
    /// Whether the remote side is still reachable
    fn is_alive(&self) -> bool;

    /// Synchronous call; `reply` is filled by the remote side
    fn transact(&self, code: u32, data: &Parcel, reply: &mut Parcel, flags: u32)
    -> DexOptResult<()>;
}

/// Looks up system services by name
pub trait ServiceLocator: Send + Sync {
    fn get_service(&self, name: &str) -> DexOptResult<Arc<dyn ServiceHandle>>;
}

/// Caller identity attached to outgoing transactions
pub trait CallingIdentity: Send + Sync {
    /// Reset to the process identity; returns a token for [`restore`](Self::restore)
    fn clear(&self) -> i64;

    fn restore(&self, token: i64);
}

/// Clears the calling identity for its lifetime
pub struct IdentityGuard<'a> {
    identity: &'a dyn CallingIdentity,
    token: i64,
}

impl<'a> IdentityGuard<'a> {
    pub fn new(identity: &'a dyn CallingIdentity) -> Self {
        let token = identity.clear();
        Self { identity, token }
    }
}

impl Drop for IdentityGuard<'_> {
    fn drop(&mut self) {
        self.identity.restore(self.token);
    }
}

/// Identity of a plain native process: nothing to clear
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessIdentity;

impl CallingIdentity for ProcessIdentity {
    fn clear(&self) -> i64 {
        0
    }

    fn restore(&self, _token: i64) {}
}
