use crate::constants::{ENC_POS_BLOB, ITEM_ALIGNMENT, ITEM_HEADER_SIZE};
use crc::{Crc, CRC_32_CKSUM};

pub fn compute_crc32(data: &[u8]) -> u32 {
    let crc = Crc::<u32>::new(&CRC_32_CKSUM);
    let mut digest = crc.digest();
    digest.update(data);
    return digest.finalize();
}

/// Rounds `n_bytes` up to the next multiple of the item alignment.
pub const fn align_up(n_bytes: usize) -> usize {
    return (n_bytes + ITEM_ALIGNMENT - 1) & !(ITEM_ALIGNMENT - 1);
}

/// Bytes one inline record of `T` consumes, header included.
pub const fn padded_size_of<T>() -> usize {
    return ITEM_HEADER_SIZE + align_up(std::mem::size_of::<T>());
}

/// Bytes an encoded record with a blob of `blob_len` bytes consumes.
pub const fn encoded_record_size(blob_len: usize) -> usize {
    return ENC_POS_BLOB + align_up(blob_len);
}
