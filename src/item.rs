/*
 * Items are the commands stored in an item buffer. Every record is a one
 * byte type tag in an 8 byte header followed by the item itself, so a
 * consumer can walk a segment by reading the tag and skipping the padded
 * size registered for it.
 */
use crate::constants::{ITEM_ALIGNMENT, ITEM_HEADER_SIZE};
use crate::segment::{ItemLocation, SegmentId};
use crate::utils::padded_size_of;
use std::fmt;

pub type ItemType = u8;

pub(crate) type DestroyFn = unsafe fn(*mut u8);

/// A command that can be recorded into an item buffer.
///
/// Inline items are constructed directly inside a segment. Items with
/// `IS_INLINE = false` are handed to the writing client to be encoded into an
/// opaque blob, and a reading client turns the blob back into an item.
///
/// # Safety
///
/// `ITEM_TYPE` must be unique among the item types recorded into and read
/// from the same buffers, records are reinterpreted as the type owning the
/// tag. Inline items whose bytes are read by another process must not hold
/// pointers.
///
/// Inline items must not have interior mutability in their own bytes (no
/// atomics, `Cell` or `Mutex` fields): playback only ever sees them through
/// shared segment memory, which may be mapped read only. Put such state
/// behind an indirection like `Arc` instead.
pub unsafe trait Item: Send + Sync + Sized + 'static {
    const ITEM_TYPE: ItemType;
    const IS_INLINE: bool = true;
}

/// The effect an item has when replayed against a context of type `C`.
pub trait ApplyItem<C: ?Sized>: Item {
    fn apply(&self, context: &mut C);
}

pub(crate) fn check_layout<T: Item>() {
    assert!(
        std::mem::align_of::<T>() <= ITEM_ALIGNMENT,
        "{} needs {} byte alignment, records are only {} byte aligned",
        std::any::type_name::<T>(),
        std::mem::align_of::<T>(),
        ITEM_ALIGNMENT
    );
}

pub(crate) unsafe fn destroy_item<T>(payload: *mut u8) {
    std::ptr::drop_in_place(payload as *mut T);
}

/// Writes the header and moves `item` in behind it.
///
/// # Safety
///
/// `record` must start on an 8 byte boundary and hold at least
/// `padded_size_of::<T>()` bytes that do not contain a live item.
pub(crate) unsafe fn write_record<T: Item>(record: &mut [u8], item: T) {
    let padded = padded_size_of::<T>();
    assert!(record.len() >= padded);
    debug_assert!(record.as_ptr() as usize % ITEM_ALIGNMENT == 0);

    record[..padded].fill(0);
    record[0] = T::ITEM_TYPE;
    std::ptr::write(record.as_mut_ptr().add(ITEM_HEADER_SIZE) as *mut T, item);
}

/// View of one record. Never owns the item it points at.
#[derive(Clone, Copy)]
pub struct ItemHandle<'a> {
    record: &'a [u8],
    location: ItemLocation,
}

impl<'a> ItemHandle<'a> {
    pub(crate) fn new(record: &'a [u8], location: ItemLocation) -> ItemHandle<'a> {
        assert!(record.len() >= ITEM_HEADER_SIZE);
        return ItemHandle {
            record: record,
            location: location,
        };
    }

    pub fn item_type(&self) -> ItemType {
        return self.record[0];
    }

    pub fn is<T: Item>(&self) -> bool {
        return self.item_type() == T::ITEM_TYPE;
    }

    /// Typed view of the item. Asking for the wrong type is a programming
    /// error and panics.
    pub fn get<T: Item>(&self) -> &'a T {
        assert!(
            self.is::<T>(),
            "Item at {:?} has type 0x{:02X}, not {} (0x{:02X})",
            self.location,
            self.item_type(),
            std::any::type_name::<T>(),
            T::ITEM_TYPE
        );
        assert!(self.record.len() >= padded_size_of::<T>());
        unsafe {
            return &*(self.record.as_ptr().add(ITEM_HEADER_SIZE) as *const T);
        }
    }

    pub fn location(&self) -> ItemLocation {
        return self.location;
    }

    /// Size of the record in its segment, header and padding included.
    pub fn len(&self) -> usize {
        return self.record.len();
    }
}

impl fmt::Debug for ItemHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemHandle")
            .field("item_type", &self.item_type())
            .field("location", &self.location)
            .field("len", &self.record.len())
            .finish()
    }
}

/// Scratch space holding a single record outside any segment.
///
/// Used to build an item before the writing client encodes it, and as the
/// destination the reading client decodes into. The item is destroyed when
/// the slot is reset or dropped.
pub struct ItemSlot {
    words: Vec<u64>,
    len: usize,
    destroy: Option<DestroyFn>,
    location: ItemLocation,
}

impl ItemSlot {
    pub fn new() -> ItemSlot {
        return ItemSlot {
            words: Vec::new(),
            len: 0,
            destroy: None,
            location: ItemLocation {
                segment: SegmentId::from_raw(0),
                offset: 0,
            },
        };
    }

    pub(crate) fn set_location(&mut self, location: ItemLocation) {
        self.location = location;
    }

    pub fn emplace<T: Item>(&mut self, item: T) {
        check_layout::<T>();
        self.reset();

        let padded = padded_size_of::<T>();
        let n_words = padded / ITEM_ALIGNMENT;
        if self.words.len() < n_words {
            self.words.resize(n_words, 0);
        }

        let bytes = unsafe {
            std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, padded)
        };
        unsafe {
            write_record(bytes, item);
        }
        self.len = padded;
        if std::mem::needs_drop::<T>() {
            self.destroy = Some(destroy_item::<T> as DestroyFn);
        }
    }

    pub fn is_empty(&self) -> bool {
        return self.len == 0;
    }

    pub fn item_type(&self) -> Option<ItemType> {
        return self.handle().map(|handle| handle.item_type());
    }

    pub fn handle(&self) -> Option<ItemHandle<'_>> {
        if self.len == 0 {
            return None;
        }
        let bytes =
            unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) };
        return Some(ItemHandle::new(bytes, self.location));
    }

    /// Destroys the held item in place, keeps the scratch memory.
    pub fn reset(&mut self) {
        if let Some(destroy) = self.destroy.take() {
            unsafe {
                destroy((self.words.as_mut_ptr() as *mut u8).add(ITEM_HEADER_SIZE));
            }
        }
        self.len = 0;
    }
}

impl Default for ItemSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ItemSlot {
    fn drop(&mut self) {
        self.reset();
    }
}
