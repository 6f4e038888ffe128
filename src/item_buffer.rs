/*
 * An item buffer records a sequence of items into segments. Items are
 * appended to the writable segment until it runs out of room, at which point
 * it joins the list of read-only segments and a new writable segment is
 * created, either by the writing client (if set) or by the buffer itself.
 *
 * Items that are not inline never land in a segment as-is, the writing
 * client encodes them into a blob which is copied in with a length and crc
 * prefix, and a reading client turns the blob back into an item on replay.
 *
 * Inline items with a destructor are remembered by location and destroyed
 * when the buffer is cleared or dropped. Segments are freed in bulk.
 */
use crate::client::{ItemBufferReadingClient, ItemBufferWritingClient};
use crate::constants::{
    DEFAULT_SEGMENT_CAPACITY, ENC_POS_BLOB, ENC_POS_CRC, ENC_POS_LENGTH, ITEM_HEADER_SIZE,
};
use crate::error::{DecodeError, Error, ErrorKind};
use crate::item::{check_layout, destroy_item, write_record, DestroyFn, Item, ItemHandle, ItemSlot};
use crate::item_reader::for_each_item_in_segment;
use crate::registry::ItemRegistry;
use crate::segment::{ItemLocation, Segment, SegmentId};
use crate::utils::{align_up, compute_crc32, encoded_record_size, padded_size_of};
use log::{debug, error, warn};
use std::os::fd::RawFd;
use std::sync::Arc;

struct PendingDestruction {
    location: ItemLocation,
    // position of the record's segment once frozen, ids of handed-off
    // segments come from another process and may collide with ours
    segment_index: usize,
    destroy: DestroyFn,
}

/// The written bytes of one segment, in the order a consumer must read them.
#[derive(Debug, Clone, Copy)]
pub struct SegmentView<'a> {
    pub identifier: SegmentId,
    pub data: &'a [u8],
    pub raw_fd: Option<RawFd>,
}

pub struct ItemBuffer {
    reading_client: Option<Arc<dyn ItemBufferReadingClient>>,
    writing_client: Option<Arc<dyn ItemBufferWritingClient>>,
    items_to_destroy: Vec<PendingDestruction>,
    read_only_segments: Vec<Segment>,
    writable_segment: Option<Segment>,
    written_bytes: usize,

    // smallest segment we allocate for ourselves
    segment_capacity: usize,
}

impl ItemBuffer {
    pub fn new() -> ItemBuffer {
        return ItemBuffer::with_segment_capacity(DEFAULT_SEGMENT_CAPACITY);
    }

    pub fn with_segment_capacity(segment_capacity: usize) -> ItemBuffer {
        return ItemBuffer {
            reading_client: None,
            writing_client: None,
            items_to_destroy: vec![],
            read_only_segments: vec![],
            writable_segment: None,
            written_bytes: 0,
            segment_capacity: align_up(usize::max(segment_capacity, ITEM_HEADER_SIZE)),
        };
    }

    /// Builds a buffer for replay out of segments recorded elsewhere, each
    /// segment's capacity is taken as its written length.
    ///
    /// # Safety
    ///
    /// Every segment must hold complete records written by an item buffer
    /// with the same item types the consumer will read them as, and nothing
    /// may write to them while this buffer is alive.
    pub unsafe fn from_read_only_segments(segments: Vec<Segment>) -> ItemBuffer {
        let mut buffer = ItemBuffer::new();
        buffer.read_only_segments = segments;
        return buffer;
    }

    pub fn set_writing_client(&mut self, client: Option<Arc<dyn ItemBufferWritingClient>>) {
        self.writing_client = client;
    }

    pub fn set_reading_client(&mut self, client: Option<Arc<dyn ItemBufferReadingClient>>) {
        self.reading_client = client;
    }

    pub fn segment_capacity(&self) -> usize {
        return self.segment_capacity;
    }

    pub fn size_in_bytes(&self) -> usize {
        let read_only: usize = self.read_only_segments.iter().map(|s| s.capacity()).sum();
        return read_only + self.written_bytes;
    }

    pub fn is_empty(&self) -> bool {
        return self.written_bytes == 0 && self.read_only_segments.is_empty();
    }

    /// Read-only segments plus the writable one if anything was written to it.
    pub fn segment_count(&self) -> usize {
        let writable = if self.written_bytes > 0 { 1 } else { 0 };
        return self.read_only_segments.len() + writable;
    }

    /// Read-only segments in creation order, then the written prefix of the
    /// writable segment.
    pub fn segments(&self) -> impl Iterator<Item = SegmentView<'_>> + '_ {
        let read_only = self.read_only_segments.iter().map(|segment| SegmentView {
            identifier: segment.identifier(),
            data: segment.data(),
            raw_fd: segment.raw_fd(),
        });
        let written_bytes = self.written_bytes;
        let writable = self
            .writable_segment
            .as_ref()
            .filter(|_| written_bytes > 0)
            .map(|segment| SegmentView {
                identifier: segment.identifier(),
                data: &segment.data()[..written_bytes],
                raw_fd: segment.raw_fd(),
            });
        return read_only.chain(writable);
    }

    /// Gets a segment of at least `minimum_bytes` from the writing client, or
    /// allocates one if there is no client.
    pub fn create_segment(&self, minimum_bytes: usize) -> Result<Segment, Error> {
        let minimum_bytes = align_up(minimum_bytes);
        if let Some(client) = &self.writing_client {
            let segment = match client.create_segment(minimum_bytes) {
                Some(segment) => segment,
                None => {
                    return Err(Error::new(
                        ErrorKind::SegmentAllocation,
                        format!(
                            "Writing client could not supply a segment of {} bytes",
                            minimum_bytes
                        ),
                    ));
                }
            };
            if segment.capacity() < minimum_bytes {
                return Err(Error::new(
                    ErrorKind::SegmentAllocation,
                    format!(
                        "Writing client supplied {} with {} bytes, {} were requested",
                        segment.identifier(),
                        segment.capacity(),
                        minimum_bytes
                    ),
                ));
            }
            if !segment.is_aligned() {
                return Err(Error::new(
                    ErrorKind::SegmentAllocation,
                    format!(
                        "Writing client supplied {} which is not 8 byte aligned",
                        segment.identifier()
                    ),
                ));
            }
            debug!(
                "Writing client supplied {} ({} bytes)",
                segment.identifier(),
                segment.capacity()
            );
            return Ok(segment);
        }

        let capacity = usize::max(minimum_bytes, self.segment_capacity);
        let segment = Segment::allocate(capacity)?;
        debug!("Allocated {} ({} bytes)", segment.identifier(), capacity);
        return Ok(segment);
    }

    /// Appends `item`. Failing to do so (an item that is not inline with no
    /// writing client, or no memory for a new segment) is fatal.
    pub fn append<T: Item>(&mut self, item: T) {
        if let Err(err) = self.try_append(item) {
            panic!(
                "Failed to append {}: {}",
                std::any::type_name::<T>(),
                err
            );
        }
    }

    /// Same as `append` but reports failures instead of panicking. The buffer
    /// is left untouched when an error is returned.
    pub fn try_append<T: Item>(&mut self, item: T) -> Result<(), Error> {
        check_layout::<T>();

        if !T::IS_INLINE {
            let client = match &self.writing_client {
                Some(client) => client.clone(),
                None => {
                    return Err(Error::new(
                        ErrorKind::MissingWritingClient,
                        format!(
                            "{} is not an inline item and needs a writing client to be encoded",
                            std::any::type_name::<T>()
                        ),
                    ));
                }
            };
            return self.append_encoded(client.as_ref(), item);
        }

        let padded = padded_size_of::<T>();
        let (location, record) = self.reserve(padded)?;
        unsafe {
            write_record(record, item);
        }
        if std::mem::needs_drop::<T>() {
            self.items_to_destroy.push(PendingDestruction {
                location: location,
                segment_index: self.read_only_segments.len(),
                destroy: destroy_item::<T>,
            });
        }
        self.written_bytes += padded;
        return Ok(());
    }

    fn append_encoded<T: Item>(
        &mut self,
        client: &dyn ItemBufferWritingClient,
        item: T,
    ) -> Result<(), Error> {
        let mut slot = ItemSlot::new();
        slot.emplace(item);
        let blob = match slot.handle() {
            Some(handle) => client.encode_item(handle),
            None => None,
        };
        slot.reset();

        match blob {
            Some(blob) => {
                return self.append_encoded_data(T::ITEM_TYPE, &blob);
            }
            None => {
                warn!(
                    "Writing client did not encode {}, dropping it",
                    std::any::type_name::<T>()
                );
                return Ok(());
            }
        }
    }

    fn append_encoded_data(&mut self, item_type: u8, blob: &[u8]) -> Result<(), Error> {
        let blob_len = match u32::try_from(blob.len()) {
            Ok(len) => len,
            Err(_) => {
                return Err(Error::new(
                    ErrorKind::Encoding,
                    format!("Encoded item of {} bytes is too large", blob.len()),
                ));
            }
        };

        let size = encoded_record_size(blob.len());
        let (_, record) = self.reserve(size)?;
        record.fill(0);
        record[0] = item_type;
        record[ENC_POS_LENGTH..ENC_POS_LENGTH + 4].copy_from_slice(&blob_len.to_ne_bytes());
        record[ENC_POS_CRC..ENC_POS_CRC + 4].copy_from_slice(&compute_crc32(blob).to_ne_bytes());
        record[ENC_POS_BLOB..ENC_POS_BLOB + blob.len()].copy_from_slice(blob);
        self.written_bytes += size;
        return Ok(());
    }

    // Makes room for `n_bytes` and returns where they start. The written
    // byte count is left for the caller to advance once the record is
    // complete.
    fn reserve(&mut self, n_bytes: usize) -> Result<(ItemLocation, &mut [u8]), Error> {
        self.swap_writable_segment_if_needed(n_bytes)?;

        let start = self.written_bytes;
        let segment = match self.writable_segment.as_mut() {
            Some(segment) => segment,
            None => unreachable!("A writable segment exists after a successful swap"),
        };
        let location = ItemLocation {
            segment: segment.identifier(),
            offset: start,
        };
        return Ok((location, &mut segment.data_mut()[start..start + n_bytes]));
    }

    fn swap_writable_segment_if_needed(&mut self, n_bytes: usize) -> Result<(), Error> {
        if let Some(segment) = &self.writable_segment {
            if self.written_bytes + n_bytes <= segment.capacity() {
                return Ok(());
            }
        }

        // allocate before touching anything so a failure leaves us unchanged
        let segment = self.create_segment(n_bytes)?;

        if let Some(mut previous) = self.writable_segment.take() {
            if self.written_bytes > 0 {
                debug!(
                    "Freezing {} at {} of {} bytes",
                    previous.identifier(),
                    self.written_bytes,
                    previous.capacity()
                );
                previous.truncate(self.written_bytes);
                self.read_only_segments.push(previous);
            }
        }
        self.writable_segment = Some(segment);
        self.written_bytes = 0;
        return Ok(());
    }

    /// Destroys every item that needs it and releases all segments.
    pub fn clear(&mut self) {
        let items_to_destroy = std::mem::take(&mut self.items_to_destroy);
        if !items_to_destroy.is_empty() {
            debug!("Destroying {} items", items_to_destroy.len());
        }

        let frozen = self.read_only_segments.len();
        for pending in items_to_destroy {
            let segment = if pending.segment_index < frozen {
                self.read_only_segments.get_mut(pending.segment_index)
            } else if pending.segment_index == frozen {
                self.writable_segment.as_mut()
            } else {
                None
            };
            match segment {
                Some(segment) => unsafe {
                    let payload = segment
                        .data_mut()
                        .as_mut_ptr()
                        .add(pending.location.offset + ITEM_HEADER_SIZE);
                    (pending.destroy)(payload);
                },
                None => {
                    error!(
                        "Lost track of segment {} for item at {:?}, it will not be destroyed",
                        pending.segment_index, pending.location
                    );
                }
            }
        }

        self.read_only_segments.clear();
        self.writable_segment = None;
        self.written_bytes = 0;
    }

    /// Calls `f` with every item in append order, decoding encoded items
    /// through the reading client. Returns the number of items visited, or
    /// the first error, after which nothing more is read.
    pub fn for_each_item<C: ?Sized, F>(
        &self,
        registry: &ItemRegistry<C>,
        mut f: F,
    ) -> Result<usize, DecodeError>
    where
        F: FnMut(ItemHandle<'_>),
    {
        let reading_client = self.reading_client.as_deref();
        let mut slot = ItemSlot::new();
        let mut count = 0;
        for view in self.segments() {
            match for_each_item_in_segment(
                view.identifier,
                view.data,
                registry,
                reading_client,
                &mut slot,
                &mut f,
            ) {
                Ok(n) => count += n,
                Err(err) => {
                    error!(
                        "Stopping playback in {} after {} items: {}",
                        view.identifier, count, err
                    );
                    return Err(err);
                }
            }
        }
        return Ok(count);
    }

    /// Applies every item to `context` in append order.
    pub fn replay<C: ?Sized>(
        &self,
        registry: &ItemRegistry<C>,
        context: &mut C,
    ) -> Result<usize, DecodeError> {
        let mut failure = None;
        let count = self.for_each_item(registry, |handle| {
            if failure.is_none() {
                if let Err(err) = registry.apply(handle, context) {
                    failure = Some(err);
                }
            }
        })?;
        return match failure {
            Some(err) => Err(err),
            None => Ok(count),
        };
    }
}

impl Default for ItemBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ItemBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for ItemBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemBuffer")
            .field("read_only_segments", &self.read_only_segments)
            .field("writable_segment", &self.writable_segment)
            .field("written_bytes", &self.written_bytes)
            .field("items_to_destroy", &self.items_to_destroy.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentOrigin;
    use crate::test_items::{
        registry, FillRect, Recorder, Save, TestCodec, Text, Tracked, Translate,
    };
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn replay_log(buffer: &ItemBuffer) -> Vec<String> {
        let mut recorder = Recorder::default();
        buffer
            .replay(&registry(), &mut recorder)
            .expect("Replay should succeed");
        return recorder.log;
    }

    fn codec_buffer(codec: TestCodec) -> (ItemBuffer, Arc<TestCodec>) {
        let codec = Arc::new(codec);
        let mut buffer = ItemBuffer::new();
        buffer.set_writing_client(Some(codec.clone()));
        buffer.set_reading_client(Some(codec.clone()));
        return (buffer, codec);
    }

    #[test]
    fn starts_empty() {
        init();
        let buffer = ItemBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.size_in_bytes(), 0);
        assert_eq!(buffer.segment_count(), 0);
        assert_eq!(buffer.segments().count(), 0);
        assert_eq!(buffer.segment_capacity(), DEFAULT_SEGMENT_CAPACITY);
        assert!(replay_log(&buffer).is_empty());
    }

    #[test]
    fn size_tracks_padded_sizes() {
        init();
        let mut rng = rand::thread_rng();
        for capacity in [8, 24, 64, 1000] {
            let mut buffer = ItemBuffer::with_segment_capacity(capacity);
            let mut expected = 0;
            for _ in 0..200 {
                match rng.gen_range(0..3) {
                    0 => {
                        buffer.append(Save);
                        expected += 8;
                    }
                    1 => {
                        buffer.append(Translate { dx: 1.0, dy: 2.0 });
                        expected += 16;
                    }
                    _ => {
                        buffer.append(FillRect { rect: [0.0; 4] });
                        expected += 24;
                    }
                }
                assert_eq!(buffer.size_in_bytes(), expected);
                assert!(!buffer.is_empty());
            }
        }
    }

    #[test]
    fn rolls_over_into_new_segment() {
        init();
        let mut buffer = ItemBuffer::with_segment_capacity(24);
        buffer.append(Save);
        buffer.append(Translate { dx: 3.0, dy: 4.0 });
        assert_eq!(buffer.segment_count(), 1);
        assert_eq!(buffer.size_in_bytes(), 24);

        buffer.append(Save);
        assert_eq!(buffer.segment_count(), 2);
        assert_eq!(buffer.size_in_bytes(), 32);

        let views: Vec<SegmentView> = buffer.segments().collect();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].data.len(), 24);
        assert_eq!(views[1].data.len(), 8);
        assert!(views[0].identifier < views[1].identifier);

        assert_eq!(replay_log(&buffer), vec!["save", "translate 3 4", "save"]);
    }

    #[test]
    fn rollover_loses_nothing() {
        init();
        let mut small = ItemBuffer::with_segment_capacity(32);
        let mut large = ItemBuffer::with_segment_capacity(1 << 16);
        for i in 0..100 {
            let item = Translate {
                dx: i as f32,
                dy: -(i as f32),
            };
            small.append(item);
            large.append(item);
        }

        // two 16 byte records per 32 byte segment
        assert_eq!(small.segment_count(), 50);
        assert_eq!(large.segment_count(), 1);
        assert_eq!(small.size_in_bytes(), large.size_in_bytes());
        assert_eq!(replay_log(&small), replay_log(&large));

        let mut seen = vec![];
        small
            .for_each_item(&registry(), |handle| {
                seen.push(*handle.get::<Translate>());
            })
            .expect("Should read");
        assert_eq!(seen.len(), 100);
        assert_eq!(seen[57], Translate { dx: 57.0, dy: -57.0 });
    }

    #[test]
    fn records_are_aligned() {
        init();
        let (mut buffer, _codec) = codec_buffer(TestCodec::default());
        for i in 0..50 {
            buffer.append(Save);
            buffer.append(Text {
                content: "x".repeat(i),
            });
            buffer.append(FillRect { rect: [1.0; 4] });
        }

        let mut count = 0;
        buffer
            .for_each_item(&registry(), |handle| {
                assert_eq!(handle.location().offset % 8, 0);
                assert_eq!(handle.len() % 8, 0);
                count += 1;
            })
            .expect("Should read");
        assert_eq!(count, 150);
    }

    #[test]
    fn oversized_item_gets_its_own_segment() {
        init();
        let mut buffer = ItemBuffer::with_segment_capacity(8);
        buffer.append(Save);
        buffer.append(FillRect { rect: [2.0; 4] });
        buffer.append(Save);

        let sizes: Vec<usize> = buffer.segments().map(|view| view.data.len()).collect();
        assert_eq!(sizes, vec![8, 24, 8]);
        assert_eq!(buffer.size_in_bytes(), 40);
    }

    #[test]
    fn clear_destroys_each_item_once() {
        init();
        let drops = Arc::new(AtomicUsize::new(0));
        let mut buffer = ItemBuffer::with_segment_capacity(32);
        for _ in 0..10 {
            buffer.append(Tracked {
                drops: drops.clone(),
            });
            buffer.append(Save);
        }
        assert!(buffer.segment_count() > 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(replay_log(&buffer).len(), 20);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.size_in_bytes(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 10);

        // still usable, and dropping destroys too
        buffer.append(Tracked {
            drops: drops.clone(),
        });
        buffer.clear();
        buffer.clear();
        assert_eq!(drops.load(Ordering::SeqCst), 11);

        buffer.append(Tracked {
            drops: drops.clone(),
        });
        drop(buffer);
        assert_eq!(drops.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn encoded_items_round_trip() {
        init();
        let (mut buffer, codec) = codec_buffer(TestCodec::default());
        buffer.append(Save);
        buffer.append(Text {
            content: "hello".to_string(),
        });
        buffer.append(Text {
            content: String::new(),
        });
        buffer.append(Text {
            content: "a longer string that spans a few words".to_string(),
        });

        assert!(codec.segments_created.load(Ordering::SeqCst) >= 1);
        for view in buffer.segments() {
            assert!(view.data.len() % 8 == 0);
        }
        assert_eq!(
            buffer.size_in_bytes(),
            8 + encoded_record_size(5) + encoded_record_size(0) + encoded_record_size(38)
        );

        let mut decoded = vec![];
        buffer
            .for_each_item(&registry(), |handle| {
                if handle.is::<Text>() {
                    decoded.push(handle.get::<Text>().clone());
                }
            })
            .expect("Should decode");
        assert_eq!(
            decoded,
            vec![
                Text {
                    content: "hello".to_string()
                },
                Text {
                    content: String::new()
                },
                Text {
                    content: "a longer string that spans a few words".to_string()
                },
            ]
        );
    }

    #[test]
    fn client_supplies_segments() {
        init();
        let (mut buffer, codec) = codec_buffer(TestCodec::default());
        for _ in 0..20 {
            buffer.append(FillRect { rect: [0.5; 4] });
        }
        // 64 byte client segments hold two 24 byte records each
        assert_eq!(codec.segments_created.load(Ordering::SeqCst), 10);
        assert_eq!(buffer.segment_count(), 10);
        assert!(buffer
            .read_only_segments
            .iter()
            .all(|s| s.origin() == SegmentOrigin::Client));
        assert_eq!(buffer.size_in_bytes(), 20 * 24);
    }

    #[test]
    fn unencodable_items_are_dropped() {
        init();
        let (mut buffer, _codec) = codec_buffer(TestCodec {
            fail_encoding: true,
            ..Default::default()
        });
        buffer.append(Text {
            content: "lost".to_string(),
        });
        assert!(buffer.is_empty());
        buffer.append(Save);
        assert_eq!(replay_log(&buffer), vec!["save"]);
    }

    #[test]
    fn missing_writing_client_is_an_error() {
        init();
        let mut buffer = ItemBuffer::new();
        buffer.append(Save);
        let err = buffer
            .try_append(Text {
                content: "x".to_string(),
            })
            .expect_err("Should need a writing client");
        assert_eq!(err.kind(), ErrorKind::MissingWritingClient);
        assert_eq!(buffer.size_in_bytes(), 8);
    }

    #[test]
    #[should_panic(expected = "writing client")]
    fn missing_writing_client_is_fatal() {
        init();
        let mut buffer = ItemBuffer::new();
        buffer.append(Text {
            content: "x".to_string(),
        });
    }

    #[test]
    fn allocation_failure_is_an_error() {
        init();
        let (mut buffer, _codec) = codec_buffer(TestCodec {
            fail_allocation: true,
            ..Default::default()
        });
        let err = buffer
            .try_append(Save)
            .expect_err("Should fail to get a segment");
        assert_eq!(err.kind(), ErrorKind::SegmentAllocation);
        assert!(buffer.is_empty());
        assert_eq!(buffer.segment_count(), 0);
    }

    #[test]
    #[should_panic(expected = "could not supply a segment")]
    fn allocation_failure_is_fatal() {
        init();
        let (mut buffer, _codec) = codec_buffer(TestCodec {
            fail_allocation: true,
            ..Default::default()
        });
        buffer.append(Save);
    }

    #[test]
    fn decoding_needs_a_reading_client() {
        init();
        let mut buffer = ItemBuffer::new();
        buffer.set_writing_client(Some(Arc::new(TestCodec::default())));
        buffer.append(Save);
        buffer.append(Text {
            content: "hi".to_string(),
        });
        buffer.append(Save);

        let mut count = 0;
        let err = buffer
            .for_each_item(&registry(), |_| count += 1)
            .expect_err("Should not decode");
        assert_eq!(err, DecodeError::MissingReadingClient);
        assert_eq!(count, 1);
    }

    #[test]
    fn corrupt_blob_stops_playback() {
        init();
        let (mut buffer, _codec) = codec_buffer(TestCodec::default());
        buffer.append(Text {
            content: "checksummed".to_string(),
        });
        buffer.append(Save);

        let segment = buffer.writable_segment.as_mut().expect("Should have a segment");
        segment.data_mut()[ENC_POS_BLOB] ^= 0xFF;

        let mut recorder = Recorder::default();
        let err = buffer
            .replay(&registry(), &mut recorder)
            .expect_err("Should fail the checksum");
        assert_eq!(err, DecodeError::ChecksumMismatch);
        assert!(recorder.log.is_empty());
    }

    #[test]
    fn truncated_blob_stops_playback() {
        init();
        let (mut buffer, _codec) = codec_buffer(TestCodec::default());
        buffer.append(Text {
            content: "long enough".to_string(),
        });
        // claim the blob runs past the end of the segment
        let segment = buffer.writable_segment.as_mut().expect("Should have a segment");
        segment.data_mut()[ENC_POS_LENGTH..ENC_POS_LENGTH + 4]
            .copy_from_slice(&1000u32.to_ne_bytes());

        let err = buffer
            .for_each_item(&registry(), |_| {})
            .expect_err("Should run out of segment");
        assert_eq!(err, DecodeError::UnexpectedEnd);
    }

    #[test]
    fn unknown_item_type_stops_playback() {
        init();
        let mut buffer = ItemBuffer::new();
        buffer.append(Save);
        buffer.append(Save);
        let segment = buffer.writable_segment.as_mut().expect("Should have a segment");
        segment.data_mut()[8] = 0xEE;

        let mut count = 0;
        let err = buffer
            .for_each_item(&registry(), |_| count += 1)
            .expect_err("Should reject the tag");
        assert_eq!(err, DecodeError::UnknownItemType(0xEE));
        assert_eq!(count, 1);
    }

    // copies the written bytes into fresh client memory, the way another
    // process would see them
    fn hand_off(buffer: &ItemBuffer, identifier: impl Fn(SegmentId) -> SegmentId) -> ItemBuffer {
        let segments: Vec<Segment> = buffer
            .segments()
            .map(|view| {
                let mut segment = Segment::with_identifier(
                    identifier(view.identifier),
                    Box::new(crate::test_items::ClientMemory(vec![0; view.data.len() / 8])),
                );
                segment.data_mut().copy_from_slice(view.data);
                segment
            })
            .collect();
        return unsafe { ItemBuffer::from_read_only_segments(segments) };
    }

    /// Hands out exactly sized segments that all carry the same id.
    struct FixedIdMemory(SegmentId);

    impl ItemBufferWritingClient for FixedIdMemory {
        fn create_segment(&self, minimum_bytes: usize) -> Option<Segment> {
            return Some(Segment::with_identifier(
                self.0,
                Box::new(crate::test_items::ClientMemory(vec![0; minimum_bytes / 8])),
            ));
        }

        fn encode_item(&self, _handle: ItemHandle<'_>) -> Option<Vec<u8>> {
            return None;
        }
    }

    #[test]
    fn replays_handed_off_segments() {
        init();
        let mut writer = ItemBuffer::with_segment_capacity(16);
        writer.append(Translate { dx: 1.0, dy: 1.0 });
        writer.append(Save);
        writer.append(FillRect { rect: [3.0; 4] });
        let expected = replay_log(&writer);

        let reader = hand_off(&writer, |identifier| identifier);
        assert_eq!(reader.size_in_bytes(), writer.size_in_bytes());
        assert_eq!(reader.segment_count(), 3);
        assert_eq!(replay_log(&reader), expected);
    }

    #[test]
    fn appends_after_handed_off_segments() {
        init();
        let drops = Arc::new(AtomicUsize::new(0));
        let mut writer = ItemBuffer::with_segment_capacity(16);
        writer.append(Save);
        writer.append(Translate { dx: 2.0, dy: 0.5 });

        let mut reader = hand_off(&writer, |identifier| identifier);
        let handed_off = reader.size_in_bytes();
        reader.append(Tracked {
            drops: drops.clone(),
        });
        reader.append(Save);
        assert_eq!(reader.segment_count(), 3);
        assert_eq!(reader.size_in_bytes(), handed_off + 16 + 8);
        assert_eq!(
            replay_log(&reader),
            vec!["save", "translate 2 0.5", "tracked", "save"]
        );

        reader.clear();
        assert!(reader.is_empty());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(replay_log(&writer), vec!["save", "translate 2 0.5"]);
    }

    #[test]
    fn clear_ignores_colliding_handed_off_ids() {
        init();
        let foreign_drops = Arc::new(AtomicUsize::new(0));
        let local_drops = Arc::new(AtomicUsize::new(0));
        let shared_id = SegmentId::from_raw(u64::MAX - 1);

        let mut writer = ItemBuffer::with_segment_capacity(16);
        writer.append(Tracked {
            drops: foreign_drops.clone(),
        });
        writer.append(Save);

        // every handed-off segment has the id our own segments will get
        let mut reader = hand_off(&writer, |_| shared_id);
        reader.set_writing_client(Some(Arc::new(FixedIdMemory(shared_id))));
        for _ in 0..2 {
            reader.append(Tracked {
                drops: local_drops.clone(),
            });
        }
        assert_eq!(reader.segment_count(), 4);
        assert_eq!(
            replay_log(&reader),
            vec!["tracked", "save", "tracked", "tracked"]
        );

        reader.clear();
        assert_eq!(local_drops.load(Ordering::SeqCst), 2);
        assert_eq!(foreign_drops.load(Ordering::SeqCst), 0);

        drop(writer);
        assert_eq!(foreign_drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn replays_on_another_thread() {
        init();
        let (mut buffer, _codec) = codec_buffer(TestCodec::default());
        buffer.append(Save);
        buffer.append(Text {
            content: "moved".to_string(),
        });

        let log = std::thread::spawn(move || replay_log(&buffer))
            .join()
            .expect("Thread should finish");
        assert_eq!(log, vec!["save", "text moved"]);
    }
}
