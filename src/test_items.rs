// Item types and clients shared by the unit tests.
use crate::client::{ItemBufferReadingClient, ItemBufferWritingClient, ItemEncoder};
use crate::error::DecodeError;
use crate::item::{ApplyItem, Item, ItemHandle, ItemSlot, ItemType};
use crate::registry::ItemRegistry;
use crate::segment::{Segment, SegmentStorage};
use crate::utils::align_up;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Records a line per replayed item.
#[derive(Default)]
pub struct Recorder {
    pub log: Vec<String>,
}

// 8 bytes padded
pub struct Save;

unsafe impl Item for Save {
    const ITEM_TYPE: ItemType = 1;
}

impl ApplyItem<Recorder> for Save {
    fn apply(&self, context: &mut Recorder) {
        context.log.push("save".to_string());
    }
}

// 16 bytes padded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Translate {
    pub dx: f32,
    pub dy: f32,
}

unsafe impl Item for Translate {
    const ITEM_TYPE: ItemType = 2;
}

impl ApplyItem<Recorder> for Translate {
    fn apply(&self, context: &mut Recorder) {
        context.log.push(format!("translate {} {}", self.dx, self.dy));
    }
}

// 24 bytes padded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillRect {
    pub rect: [f32; 4],
}

unsafe impl Item for FillRect {
    const ITEM_TYPE: ItemType = 3;
}

impl ApplyItem<Recorder> for FillRect {
    fn apply(&self, context: &mut Recorder) {
        context.log.push(format!("fill {:?}", self.rect));
    }
}

/// Goes through the writing and reading clients.
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub content: String,
}

unsafe impl Item for Text {
    const ITEM_TYPE: ItemType = 4;
    const IS_INLINE: bool = false;
}

impl ApplyItem<Recorder> for Text {
    fn apply(&self, context: &mut Recorder) {
        context.log.push(format!("text {}", self.content));
    }
}

/// Inline, but has a destructor that must run exactly once.
pub struct Tracked {
    pub drops: Arc<AtomicUsize>,
}

unsafe impl Item for Tracked {
    const ITEM_TYPE: ItemType = 5;
}

impl ApplyItem<Recorder> for Tracked {
    fn apply(&self, context: &mut Recorder) {
        context.log.push("tracked".to_string());
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn registry() -> ItemRegistry<Recorder> {
    let mut registry = ItemRegistry::new();
    registry
        .register::<Save>()
        .register::<Translate>()
        .register::<FillRect>()
        .register::<Text>()
        .register::<Tracked>();
    return registry;
}

/// Heap backed writing client that can be told to fail.
#[derive(Default)]
pub struct TestCodec {
    pub segments_created: AtomicUsize,
    pub fail_allocation: bool,
    pub fail_encoding: bool,
}

impl ItemEncoder for TestCodec {
    fn encode(&self, handle: ItemHandle<'_>) -> Option<Vec<u8>> {
        if self.fail_encoding || !handle.is::<Text>() {
            return None;
        }
        return Some(handle.get::<Text>().content.as_bytes().to_vec());
    }
}

impl ItemBufferWritingClient for TestCodec {
    fn create_segment(&self, minimum_bytes: usize) -> Option<Segment> {
        if self.fail_allocation {
            return None;
        }
        self.segments_created.fetch_add(1, Ordering::SeqCst);
        let n_bytes = align_up(usize::max(minimum_bytes, 64));
        return Some(Segment::from_client(Box::new(ClientMemory(vec![
            0u64;
            n_bytes / 8
        ]))));
    }

    fn encode_item(&self, handle: ItemHandle<'_>) -> Option<Vec<u8>> {
        return self.encode(handle);
    }
}

impl ItemBufferReadingClient for TestCodec {
    fn decode_item(
        &self,
        data: &[u8],
        item_type: ItemType,
        slot: &mut ItemSlot,
    ) -> Result<(), DecodeError> {
        if item_type != Text::ITEM_TYPE {
            return Err(DecodeError::UnknownItemType(item_type));
        }
        let content = String::from_utf8(data.to_vec())
            .map_err(|err| DecodeError::Malformed(format!("{}", err)))?;
        slot.emplace(Text { content: content });
        return Ok(());
    }
}

pub struct ClientMemory(pub Vec<u64>);

impl SegmentStorage for ClientMemory {
    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.0.as_ptr() as *const u8, self.0.len() * 8) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.0.as_mut_ptr() as *mut u8, self.0.len() * 8) }
    }
}
