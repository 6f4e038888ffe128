pub mod constants;
mod client;
mod error;
mod item;
mod item_buffer;
mod item_reader;
mod mem_fd;
mod registry;
mod segment;
mod shared_memory;
mod utils;
mod wire_message;

#[cfg(test)]
mod test_items;

pub use crate::client::{ItemBufferReadingClient, ItemBufferWritingClient, ItemEncoder};
pub use crate::error::{DecodeError, Error, ErrorKind};
pub use crate::item::{ApplyItem, Item, ItemHandle, ItemSlot, ItemType};
pub use crate::item_buffer::{ItemBuffer, SegmentView};
pub use crate::mem_fd::MemFd;
pub use crate::registry::ItemRegistry;
pub use crate::segment::{ItemLocation, Segment, SegmentId, SegmentOrigin, SegmentStorage};
pub use crate::shared_memory::{from_wire, to_wire, SharedMemoryClient};
pub use crate::utils::{align_up, encoded_record_size, padded_size_of};
pub use crate::wire_message::WireMessage;
