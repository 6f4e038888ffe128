#![allow(dead_code)]

// A tiny display list vocabulary shared by the example binaries.
use item_buffer::{
    ApplyItem, DecodeError, Item, ItemBufferReadingClient, ItemEncoder, ItemHandle,
    ItemRegistry, ItemSlot, ItemType,
};
use log::info;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/item_buffer_example.sock";

/// Stands in for a graphics context, logs what it is asked to draw.
#[derive(Default)]
pub struct Canvas {
    pub color: [u8; 4],
    pub depth: usize,
}

pub struct Save;

unsafe impl Item for Save {
    const ITEM_TYPE: ItemType = 1;
}

impl ApplyItem<Canvas> for Save {
    fn apply(&self, canvas: &mut Canvas) {
        canvas.depth += 1;
        info!("save (depth {})", canvas.depth);
    }
}

pub struct Restore;

unsafe impl Item for Restore {
    const ITEM_TYPE: ItemType = 2;
}

impl ApplyItem<Canvas> for Restore {
    fn apply(&self, canvas: &mut Canvas) {
        canvas.depth = canvas.depth.saturating_sub(1);
        info!("restore (depth {})", canvas.depth);
    }
}

pub struct SetFillColor {
    pub rgba: [u8; 4],
}

unsafe impl Item for SetFillColor {
    const ITEM_TYPE: ItemType = 3;
}

impl ApplyItem<Canvas> for SetFillColor {
    fn apply(&self, canvas: &mut Canvas) {
        canvas.color = self.rgba;
    }
}

pub struct FillRect {
    pub rect: [f32; 4],
}

unsafe impl Item for FillRect {
    const ITEM_TYPE: ItemType = 4;
}

impl ApplyItem<Canvas> for FillRect {
    fn apply(&self, canvas: &mut Canvas) {
        info!("fill {:?} with {:?}", self.rect, canvas.color);
    }
}

/// Owns heap memory, so it is encoded rather than stored inline.
pub struct DrawText {
    pub origin: [f32; 2],
    pub text: String,
}

unsafe impl Item for DrawText {
    const ITEM_TYPE: ItemType = 5;
    const IS_INLINE: bool = false;
}

impl ApplyItem<Canvas> for DrawText {
    fn apply(&self, canvas: &mut Canvas) {
        info!(
            "text {:?} at {:?} in {:?}",
            self.text, self.origin, canvas.color
        );
    }
}

pub fn registry() -> ItemRegistry<Canvas> {
    let mut registry = ItemRegistry::new();
    registry
        .register::<Save>()
        .register::<Restore>()
        .register::<SetFillColor>()
        .register::<FillRect>()
        .register::<DrawText>();
    return registry;
}

// DrawText blob:
//  0  -- f32 x
//  4  -- f32 y
//  8  -- utf8 text
pub struct DemoCodec;

impl ItemEncoder for DemoCodec {
    fn encode(&self, handle: ItemHandle<'_>) -> Option<Vec<u8>> {
        if !handle.is::<DrawText>() {
            return None;
        }
        let item = handle.get::<DrawText>();
        let mut blob = Vec::with_capacity(8 + item.text.len());
        blob.extend_from_slice(&item.origin[0].to_ne_bytes());
        blob.extend_from_slice(&item.origin[1].to_ne_bytes());
        blob.extend_from_slice(item.text.as_bytes());
        return Some(blob);
    }
}

impl ItemBufferReadingClient for DemoCodec {
    fn decode_item(
        &self,
        data: &[u8],
        item_type: ItemType,
        slot: &mut ItemSlot,
    ) -> Result<(), DecodeError> {
        if item_type != DrawText::ITEM_TYPE {
            return Err(DecodeError::UnknownItemType(item_type));
        }
        if data.len() < 8 {
            return Err(DecodeError::UnexpectedEnd);
        }
        let x = f32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
        let y = f32::from_ne_bytes([data[4], data[5], data[6], data[7]]);
        let text = String::from_utf8(data[8..].to_vec())
            .map_err(|err| DecodeError::Malformed(format!("{}", err)))?;
        slot.emplace(DrawText {
            origin: [x, y],
            text: text,
        });
        return Ok(());
    }
}
