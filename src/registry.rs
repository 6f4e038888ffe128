use crate::error::DecodeError;
use crate::item::{check_layout, ApplyItem, ItemHandle, ItemType};
use crate::utils::padded_size_of;

struct ItemDescriptor<C: ?Sized> {
    name: &'static str,
    padded_size: usize,
    is_inline: bool,
    apply: fn(ItemHandle<'_>, &mut C),
}

fn apply_item<T: ApplyItem<C>, C: ?Sized>(handle: ItemHandle<'_>, context: &mut C) {
    handle.get::<T>().apply(context);
}

/// Everything known about the item types a consumer can replay into a `C`,
/// keyed by type tag.
pub struct ItemRegistry<C: ?Sized> {
    descriptors: Vec<Option<ItemDescriptor<C>>>,
}

impl<C: ?Sized> ItemRegistry<C> {
    pub fn new() -> ItemRegistry<C> {
        let descriptors = (0..=ItemType::MAX as usize).map(|_| None).collect();
        return ItemRegistry {
            descriptors: descriptors,
        };
    }

    /// Panics if another type already claimed `T::ITEM_TYPE`.
    pub fn register<T: ApplyItem<C>>(&mut self) -> &mut Self {
        check_layout::<T>();
        let slot = &mut self.descriptors[T::ITEM_TYPE as usize];
        if let Some(existing) = slot {
            panic!(
                "Item type 0x{:02X} is registered to {}, cannot register {}",
                T::ITEM_TYPE,
                existing.name,
                std::any::type_name::<T>()
            );
        }
        *slot = Some(ItemDescriptor {
            name: std::any::type_name::<T>(),
            padded_size: padded_size_of::<T>(),
            is_inline: T::IS_INLINE,
            apply: apply_item::<T, C>,
        });
        return self;
    }

    fn descriptor(&self, item_type: ItemType) -> Option<&ItemDescriptor<C>> {
        return self.descriptors[item_type as usize].as_ref();
    }

    pub fn contains(&self, item_type: ItemType) -> bool {
        return self.descriptor(item_type).is_some();
    }

    /// Bytes an inline record of this type occupies, header included.
    pub fn padded_size(&self, item_type: ItemType) -> Option<usize> {
        return self.descriptor(item_type).map(|d| d.padded_size);
    }

    pub fn is_inline(&self, item_type: ItemType) -> Option<bool> {
        return self.descriptor(item_type).map(|d| d.is_inline);
    }

    pub fn name(&self, item_type: ItemType) -> Option<&'static str> {
        return self.descriptor(item_type).map(|d| d.name);
    }

    pub fn apply(&self, handle: ItemHandle<'_>, context: &mut C) -> Result<(), DecodeError> {
        let descriptor = self
            .descriptor(handle.item_type())
            .ok_or(DecodeError::UnknownItemType(handle.item_type()))?;
        (descriptor.apply)(handle, context);
        return Ok(());
    }
}

impl<C: ?Sized> Default for ItemRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
