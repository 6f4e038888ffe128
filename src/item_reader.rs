// Walks the records of one segment. Lengths come from the registry for
// inline items and from the record prefix for encoded ones, every length is
// checked against the written end of the segment before it is trusted.
use crate::client::ItemBufferReadingClient;
use crate::constants::{ENC_POS_BLOB, ENC_POS_CRC, ENC_POS_LENGTH, ITEM_HEADER_SIZE};
use crate::error::DecodeError;
use crate::item::{ItemHandle, ItemSlot, ItemType};
use crate::registry::ItemRegistry;
use crate::segment::{ItemLocation, SegmentId};
use crate::utils::{compute_crc32, encoded_record_size};

enum ReadResult {
    // record size, item lives in the segment
    Inline(usize),
    // record size, item was decoded into the slot
    Decoded(usize),
}

fn read_u32_at(data: &[u8], start: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[start..start + 4]);
    return u32::from_ne_bytes(bytes);
}

fn decode_record(
    record: &[u8],
    item_type: ItemType,
    reading_client: Option<&dyn ItemBufferReadingClient>,
    slot: &mut ItemSlot,
    location: ItemLocation,
) -> Result<usize, DecodeError> {
    let client = reading_client.ok_or(DecodeError::MissingReadingClient)?;
    if record.len() < ENC_POS_BLOB {
        return Err(DecodeError::UnexpectedEnd);
    }

    let blob_len = read_u32_at(record, ENC_POS_LENGTH) as usize;
    let crc = read_u32_at(record, ENC_POS_CRC);
    let size = encoded_record_size(blob_len);
    if size > record.len() {
        return Err(DecodeError::UnexpectedEnd);
    }

    let blob = &record[ENC_POS_BLOB..ENC_POS_BLOB + blob_len];
    if compute_crc32(blob) != crc {
        return Err(DecodeError::ChecksumMismatch);
    }

    slot.reset();
    slot.set_location(location);
    client.decode_item(blob, item_type, slot)?;
    match slot.item_type() {
        Some(found) if found == item_type => {
            return Ok(size);
        }
        Some(found) => {
            slot.reset();
            return Err(DecodeError::ItemTypeMismatch {
                expected: item_type,
                found: found,
            });
        }
        None => {
            return Err(DecodeError::Malformed(format!(
                "reading client produced no item for type 0x{:02X}",
                item_type
            )));
        }
    }
}

fn read_record<C: ?Sized>(
    record: &[u8],
    registry: &ItemRegistry<C>,
    reading_client: Option<&dyn ItemBufferReadingClient>,
    slot: &mut ItemSlot,
    location: ItemLocation,
) -> Result<ReadResult, DecodeError> {
    if record.len() < ITEM_HEADER_SIZE {
        return Err(DecodeError::UnexpectedEnd);
    }

    let item_type = record[0];
    match registry.is_inline(item_type) {
        None => {
            return Err(DecodeError::UnknownItemType(item_type));
        }
        Some(false) => {
            let size = decode_record(record, item_type, reading_client, slot, location)?;
            return Ok(ReadResult::Decoded(size));
        }
        Some(true) => {
            let size = registry.padded_size(item_type).unwrap_or(usize::MAX);
            if size > record.len() {
                return Err(DecodeError::UnexpectedEnd);
            }
            return Ok(ReadResult::Inline(size));
        }
    }
}

/// Calls `f` for every record in `data` (the written prefix of one segment)
/// and returns how many there were. Stops at the first record that cannot
/// be read.
pub(crate) fn for_each_item_in_segment<C: ?Sized, F>(
    identifier: SegmentId,
    data: &[u8],
    registry: &ItemRegistry<C>,
    reading_client: Option<&dyn ItemBufferReadingClient>,
    slot: &mut ItemSlot,
    f: &mut F,
) -> Result<usize, DecodeError>
where
    F: FnMut(ItemHandle<'_>),
{
    let mut offset = 0;
    let mut count = 0;
    while offset < data.len() {
        let location = ItemLocation {
            segment: identifier,
            offset: offset,
        };
        let record = &data[offset..];
        match read_record(record, registry, reading_client, slot, location)? {
            ReadResult::Inline(size) => {
                f(ItemHandle::new(&record[..size], location));
                offset += size;
            }
            ReadResult::Decoded(size) => {
                if let Some(handle) = slot.handle() {
                    f(handle);
                }
                slot.reset();
                offset += size;
            }
        }
        count += 1;
    }
    return Ok(count);
}
