// Every record in a segment starts on an 8 byte boundary and is padded to a
// multiple of 8 bytes, so the next record is aligned too.

// Inline record layout
//  0  -- u8 item type
//  1  -- u8[7] padding
//  8  -- item, constructed in place
//  8 + size_of(item) -- padding up to a multiple of 8

// Encoded record layout (items that are not inline)
//  0  -- u8 item type
//  1  -- u8[7] padding
//  8  -- u32 blob length
// 12  -- u32 crc32 of the blob
// 16  -- blob bytes
// 16 + length -- padding up to a multiple of 8

pub const ITEM_ALIGNMENT: usize = 8;
pub const ITEM_HEADER_SIZE: usize = 8;
pub const ENCODED_PREFIX_SIZE: usize = 8;

// Positions within an encoded record
pub const ENC_POS_LENGTH: usize = ITEM_HEADER_SIZE;
pub const ENC_POS_CRC: usize = ITEM_HEADER_SIZE + 4;
pub const ENC_POS_BLOB: usize = ITEM_HEADER_SIZE + ENCODED_PREFIX_SIZE;

// Smallest segment the buffer allocates for itself, larger items get a
// segment of their own padded size.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 1 << 10;

// Wire layout (sent with one fd per segment)
//  0  -- u64 client uid
//  8  -- u32 segment count
// 12  -- u32 crc32 of the segment table
// 16  -- segment table
// ------ Repeat every 16 bytes ----
// u64  0 -- segment identifier
// u64  8 -- written length
//      16 -- end
pub const WIRE_HEADER_SIZE: usize = 16;
pub const WIRE_SEGMENT_ENTRY_SIZE: usize = 16;
pub const WIRE_POS_UID: usize = 0;
pub const WIRE_POS_COUNT: usize = 8;
pub const WIRE_POS_CRC: usize = 12;

// SCM_RIGHTS limits how many fds go in one message
pub const MAX_WIRE_SEGMENTS: usize = 64;
