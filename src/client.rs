use crate::error::DecodeError;
use crate::item::{ItemHandle, ItemSlot, ItemType};
use crate::segment::Segment;

/// Supplies segment memory to an item buffer and encodes the items that
/// cannot be stored inline.
pub trait ItemBufferWritingClient: Send + Sync {
    /// Returns a segment of at least `minimum_bytes`, or `None` if no memory
    /// is available. The buffer treats `None` as fatal.
    fn create_segment(&self, minimum_bytes: usize) -> Option<Segment>;

    /// Encodes the item behind `handle` into an opaque blob. `None` drops
    /// the item.
    fn encode_item(&self, handle: ItemHandle<'_>) -> Option<Vec<u8>>;
}

/// Turns blobs produced by a writing client back into items.
pub trait ItemBufferReadingClient: Send + Sync {
    /// Decodes `data`, which was recorded with tag `item_type`, and emplaces
    /// the resulting item into `slot`.
    fn decode_item(
        &self,
        data: &[u8],
        item_type: ItemType,
        slot: &mut ItemSlot,
    ) -> Result<(), DecodeError>;
}

/// The encoding half of a writing client, for clients that only manage
/// memory themselves.
pub trait ItemEncoder: Send + Sync {
    fn encode(&self, handle: ItemHandle<'_>) -> Option<Vec<u8>>;
}
