use super::{Channel, ChannelHandler};
use crate::base::neterror::NetError;
use std::fmt;

/// A position in a channel's pipeline.
///
/// Created detached by [`Channel::slot_new`] (except the very first slot,
/// which becomes the head of the pipeline immediately), then attached with
/// [`Channel::slot_insert_end`] or [`ChannelSlot::insert_right`].
#[derive(Clone)]
pub struct ChannelSlot {
    channel: Channel,
    id: u64,
}

impl ChannelSlot {
    pub(super) fn new(channel: Channel, id: u64) -> Self {
        Self { channel, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn is_attached(&self) -> bool {
        self.channel.slot_attached(self.id)
    }

    /// Attaches `right` directly after this slot.
    pub fn insert_right(&self, right: &ChannelSlot) -> Result<(), NetError> {
        if !self.channel.ptr_eq(&right.channel) {
            return Err(NetError::InvalidChannelSlot);
        }
        self.channel.insert_right_of(self.id, right.id)
    }

    /// Hands `handler` to this slot. The slot must be attached.
    pub fn set_handler(&self, handler: Box<dyn ChannelHandler>) -> Result<(), NetError> {
        self.channel.set_slot_handler(self.id, handler)
    }
}

impl fmt::Debug for ChannelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("channel", &self.channel.id())
            .field("id", &self.id)
            .finish()
    }
}
