/*
 * Recording into shared memory so another process can replay a buffer
 * without copying it. The producer attaches a SharedMemoryClient as the
 * writing client, every segment is then a memfd. to_wire() describes the
 * written segments and duplicates their fds, the consumer maps them read
 * only with from_wire().
 */
use crate::client::{ItemBufferWritingClient, ItemEncoder};
use crate::constants::{
    ITEM_ALIGNMENT, MAX_WIRE_SEGMENTS, WIRE_HEADER_SIZE, WIRE_POS_COUNT, WIRE_POS_CRC,
    WIRE_POS_UID, WIRE_SEGMENT_ENTRY_SIZE,
};
use crate::error::{Error, ErrorKind};
use crate::item::ItemHandle;
use crate::item_buffer::ItemBuffer;
use crate::mem_fd::MemFd;
use crate::segment::{Segment, SegmentId};
use crate::utils::{align_up, compute_crc32};
use crate::wire_message::WireMessage;
use log::{debug, error, info};
use rand::Rng;
use std::os::fd::BorrowedFd;

pub struct SharedMemoryClient<E: ItemEncoder> {
    name: String,
    uid: u64,
    segment_capacity: usize,
    encoder: E,
}

impl<E: ItemEncoder> SharedMemoryClient<E> {
    pub fn new(name: &str, segment_capacity: usize, encoder: E) -> SharedMemoryClient<E> {
        let mut rng = rand::thread_rng();
        let uid: u64 = rng.gen();
        return SharedMemoryClient {
            name: name.to_string(),
            uid: uid,
            segment_capacity: align_up(usize::max(segment_capacity, ITEM_ALIGNMENT)),
            encoder: encoder,
        };
    }

    /// Random id sent along with every hand-off from this client.
    pub fn uid(&self) -> u64 {
        return self.uid;
    }

    pub fn encoder(&self) -> &E {
        return &self.encoder;
    }
}

impl<E: ItemEncoder> ItemBufferWritingClient for SharedMemoryClient<E> {
    fn create_segment(&self, minimum_bytes: usize) -> Option<Segment> {
        let n_bytes = align_up(usize::max(minimum_bytes, self.segment_capacity));
        match MemFd::new(&self.name, n_bytes) {
            Ok(mem_fd) => {
                let segment = Segment::from_client(Box::new(mem_fd));
                debug!(
                    "Created shared {} ({} bytes) for {}",
                    segment.identifier(),
                    n_bytes,
                    self.name
                );
                return Some(segment);
            }
            Err(err) => {
                error!(
                    "Failed to create a shared segment of {} bytes: {}",
                    n_bytes, err
                );
                return None;
            }
        }
    }

    fn encode_item(&self, handle: ItemHandle<'_>) -> Option<Vec<u8>> {
        return self.encoder.encode(handle);
    }
}

fn read_u64_at(data: &[u8], start: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[start..start + 8]);
    return u64::from_ne_bytes(bytes);
}

fn read_u32_at(data: &[u8], start: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[start..start + 4]);
    return u32::from_ne_bytes(bytes);
}

/// Describes every written segment of `buffer` for another process. All of
/// them must live in shared memory.
pub fn to_wire(buffer: &ItemBuffer, uid: u64) -> Result<WireMessage, Error> {
    let mut table: Vec<u8> = vec![];
    let mut fds = vec![];
    for view in buffer.segments() {
        if fds.len() == MAX_WIRE_SEGMENTS {
            return Err(Error::new(
                ErrorKind::Wire,
                format!(
                    "Buffer has more than {} segments, too many to send at once",
                    MAX_WIRE_SEGMENTS
                ),
            ));
        }
        let raw_fd = match view.raw_fd {
            Some(raw_fd) => raw_fd,
            None => {
                return Err(Error::new(
                    ErrorKind::Wire,
                    format!("{} is not in shared memory", view.identifier),
                ));
            }
        };
        // the segment keeps the fd open for as long as we borrow it
        let fd = unsafe { BorrowedFd::borrow_raw(raw_fd) }.try_clone_to_owned()?;
        table.extend_from_slice(&view.identifier.to_raw().to_ne_bytes());
        table.extend_from_slice(&(view.data.len() as u64).to_ne_bytes());
        fds.push(fd);
    }

    let mut data = Vec::with_capacity(WIRE_HEADER_SIZE + table.len());
    data.extend_from_slice(&uid.to_ne_bytes());
    data.extend_from_slice(&(fds.len() as u32).to_ne_bytes());
    data.extend_from_slice(&compute_crc32(&table).to_ne_bytes());
    data.extend_from_slice(&table);
    info!("Sending {} segments ({} bytes)", fds.len(), buffer.size_in_bytes());
    return Ok(WireMessage {
        data: data,
        fds: fds,
    });
}

/// Maps the segments described by `message` and returns the sender's uid
/// with a read-only buffer over them.
///
/// # Safety
///
/// The sender must have recorded the segments with the same item types the
/// receiver reads them as (see `ItemBuffer::from_read_only_segments`), and
/// must not write to them again.
pub unsafe fn from_wire(message: WireMessage) -> Result<(u64, ItemBuffer), Error> {
    let data = &message.data;
    if data.len() < WIRE_HEADER_SIZE {
        return Err(Error::new(
            ErrorKind::Wire,
            format!("Message of {} bytes is too short", data.len()),
        ));
    }

    let uid = read_u64_at(data, WIRE_POS_UID);
    let count = read_u32_at(data, WIRE_POS_COUNT) as usize;
    let crc = read_u32_at(data, WIRE_POS_CRC);
    if count > MAX_WIRE_SEGMENTS
        || data.len() != WIRE_HEADER_SIZE + count * WIRE_SEGMENT_ENTRY_SIZE
    {
        return Err(Error::new(
            ErrorKind::Wire,
            format!(
                "Message of {} bytes cannot describe {} segments",
                data.len(),
                count
            ),
        ));
    }
    if message.fds.len() != count {
        return Err(Error::new(
            ErrorKind::Wire,
            format!(
                "Message describes {} segments but carried {} fds",
                count,
                message.fds.len()
            ),
        ));
    }
    let table = &data[WIRE_HEADER_SIZE..];
    if compute_crc32(table) != crc {
        return Err(Error::new(
            ErrorKind::Wire,
            format!("Segment table from {} failed its checksum", uid),
        ));
    }

    let mut segments = Vec::with_capacity(count);
    for (i, fd) in message.fds.into_iter().enumerate() {
        let entry = i * WIRE_SEGMENT_ENTRY_SIZE;
        let identifier = SegmentId::from_raw(read_u64_at(table, entry));
        let len = read_u64_at(table, entry + 8) as usize;

        let mem_fd = MemFd::from_owned_fd(fd)?;
        if len > mem_fd.len() || len % ITEM_ALIGNMENT != 0 {
            return Err(Error::new(
                ErrorKind::Wire,
                format!(
                    "{} claims {} written bytes but maps {}",
                    identifier,
                    len,
                    mem_fd.len()
                ),
            ));
        }
        let mut segment = Segment::with_identifier(identifier, Box::new(mem_fd));
        segment.truncate(len);
        segments.push(segment);
    }

    info!("Received {} segments from {}", segments.len(), uid);
    return Ok((uid, ItemBuffer::from_read_only_segments(segments)));
}
