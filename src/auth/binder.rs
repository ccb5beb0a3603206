// Request Channel Binder
// Re-points the outbound request channel at the active identity

use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

use super::error::AuthError;
use crate::identity::Identity;

/// Outbound channel whose requests are signed with a replaceable identity
pub trait RequestChannel: Send + Sync {
    fn replace_identity(&self, identity: Arc<Identity>);
}

type ChannelSlot = Arc<RwLock<Option<Arc<dyn RequestChannel>>>>;

/// Holds the request channel handle on behalf of the session manager
///
/// Clones share one slot, so a channel attached or detached through any
/// clone is seen by the manager's binder.
#[derive(Clone)]
pub struct ChannelBinder {
    slot: ChannelSlot,
}

impl ChannelBinder {
    pub fn new(channel: Arc<dyn RequestChannel>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Some(channel))),
        }
    }

    /// Binder without a channel; every bind fails until one is attached
    pub fn detached() -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
        }
    }

    /// Attach the channel, replacing any previous one
    pub fn attach(&self, channel: Arc<dyn RequestChannel>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(channel);
    }

    /// Take the channel out; binds fail from now on
    pub fn detach(&self) -> Option<Arc<dyn RequestChannel>> {
        let channel = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if channel.is_some() {
            warn!("Request channel detached");
        }
        channel
    }

    pub fn is_attached(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn bind(&self, identity: Arc<Identity>) -> Result<(), AuthError> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        let Some(channel) = slot.as_ref() else {
            error!("No request channel attached, refusing to bind identity");
            return Err(AuthError::ChannelBinding(
                "no request channel attached".to_string(),
            ));
        };

        debug!("Binding request channel to principal {}", identity.principal());
        channel.replace_identity(identity);
        Ok(())
    }
}
