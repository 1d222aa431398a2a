//! A fixed capacity ring buffer of variable length records.
//!
//! The buffer is a 16 byte little endian header followed by the record
//! storage.
//!
//! ```text
//! 0        4          8          12         16
//! | magic  | version  | offset   | length   | data[capacity] ...
//! ```
//!
//! `offset` and `length` describe the range of valid bytes in `data`, which
//! wraps around the end of the storage. Each record is a [`crate::varint`]
//! length followed by that many bytes, and both parts can wrap independently.
//! When there is not enough room for a new record, the oldest records are
//! dropped, a record is always dropped in its entirety.

use crate::{Error, varint};
use scroll::Pread;

/// Identifies a serialized ring buffer
pub const MAGIC: u32 = 0xcab0_0d1e;
/// The current, and only supported, ring buffer format version
pub const VERSION: u32 = 1;
/// The size of the header preceding the record storage
pub const HEADER_SIZE: usize = 16;
/// The default capacity of a [`RingBufferData`]
pub const DEFAULT_CAPACITY: usize = 8192;

/// A range of bytes in the record storage of a [`RingBufferData`]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Range {
    pub offset: u32,
    pub length: u32,
}

const fn initial_header() -> [u8; HEADER_SIZE] {
    let mut header = [0; HEADER_SIZE];
    let magic = MAGIC.to_le_bytes();
    let version = VERSION.to_le_bytes();

    let mut i = 0;
    while i < 4 {
        header[i] = magic[i];
        header[4 + i] = version[i];
        i += 1;
    }

    header
}

/// The header and storage of a ring buffer with a capacity of `N` bytes.
///
/// The layout of this struct is exactly its serialized form, so a pointer to
/// it can be handed to an [`crate::Annotation`] to be captured as is.
#[derive(Clone)]
#[repr(C)]
pub struct RingBufferData<const N: usize = DEFAULT_CAPACITY> {
    header: [u8; HEADER_SIZE],
    data: [u8; N],
}

impl<const N: usize> RingBufferData<N> {
    /// The capacity of the record storage
    pub const CAPACITY: u32 = {
        assert!(N > 0 && N <= u32::MAX as usize, "invalid ring buffer capacity");
        N as u32
    };

    pub const fn new() -> Self {
        let _ = Self::CAPACITY;

        Self {
            header: initial_header(),
            data: [0; N],
        }
    }

    /// The range of valid bytes in the record storage
    #[inline]
    pub fn data_range(&self) -> Range {
        let field = |at: usize| {
            let mut bytes = [0; 4];
            bytes.copy_from_slice(&self.header[at..at + 4]);
            u32::from_le_bytes(bytes)
        };

        Range {
            offset: field(8),
            length: field(12),
        }
    }

    #[inline]
    fn set_data_range(&mut self, range: Range) {
        self.header[8..12].copy_from_slice(&range.offset.to_le_bytes());
        self.header[12..16].copy_from_slice(&range.length.to_le_bytes());
    }

    /// True if the buffer doesn't contain any records
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data_range().length == 0
    }

    /// The number of bytes that need to be captured to be able to read every
    /// record in the buffer, including the header.
    ///
    /// Once the valid range has wrapped, this is the entire buffer.
    #[inline]
    pub fn len(&self) -> u32 {
        let range = self.data_range();
        let end = (u64::from(range.offset) + u64::from(range.length)).min(u64::from(Self::CAPACITY));
        HEADER_SIZE as u32 + end as u32
    }

    /// Gets the serialized form of the buffer, [`Self::len`] bytes long
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the struct is `repr(C)` and only contains byte arrays, so it
        // has no padding and the data immediately follows the header
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len() as usize) }
    }

    /// Pointer to the start of the serialized form
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        std::ptr::from_ref(self).cast()
    }

    /// Replaces the contents of this buffer by deserializing `buffer`.
    ///
    /// `buffer` must have a valid header, and must be at most `N` bytes
    /// longer than it. On failure this buffer is left untouched.
    pub fn deserialize_from_buffer(&mut self, buffer: &[u8]) -> Result<(), Error> {
        if buffer.len() > HEADER_SIZE + N {
            return Err(Error::InvalidBufferLength {
                len: buffer.len(),
                capacity: N,
            });
        }

        let (range, stored) = parse_header(buffer, N)?;
        let range = validate_range(range, N, stored.len())?;

        self.data[..stored.len()].copy_from_slice(stored);
        self.data[stored.len()..].fill(0);
        self.set_data_range(range);
        Ok(())
    }

    /// Empties the buffer
    pub fn reset(&mut self) {
        self.set_data_range(Range::default());
    }
}

impl<const N: usize> Default for RingBufferData<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> std::fmt::Debug for RingBufferData<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBufferData")
            .field("capacity", &N)
            .field("data_range", &self.data_range())
            .finish_non_exhaustive()
    }
}

/// Validates the header of a serialized ring buffer, returning the valid
/// range and the record storage that follows the header
fn parse_header(buffer: &[u8], capacity: usize) -> Result<(Range, &[u8]), Error> {
    let read = |at: usize| -> Result<u32, Error> {
        buffer
            .pread_with::<u32>(at, scroll::LE)
            .map_err(|_err| Error::InvalidBufferLength {
                len: buffer.len(),
                capacity,
            })
    };

    let magic = read(0)?;
    if magic != MAGIC {
        return Err(Error::BadMagic {
            expected: MAGIC,
            found: magic,
        });
    }

    let version = read(4)?;
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let range = Range {
        offset: read(8)?,
        length: read(12)?,
    };

    Ok((range, &buffer[HEADER_SIZE..]))
}

/// Ensures `range` can be read from `stored` bytes of a ring buffer with the
/// specified capacity without going out of bounds
fn validate_range(mut range: Range, capacity: usize, stored: usize) -> Result<Range, Error> {
    let capacity_32 = u32::try_from(capacity).unwrap_or(u32::MAX);

    if range.length == 0 {
        range.offset = range.offset.checked_rem(capacity_32).unwrap_or_default();
        return Ok(range);
    }

    let end = u64::from(range.offset) + u64::from(range.length);
    if range.offset >= capacity_32
        || range.length > capacity_32
        || (stored as u64) < end.min(capacity as u64)
    {
        return Err(Error::InvalidRange {
            offset: range.offset,
            length: range.length,
            capacity,
        });
    }

    Ok(range)
}

/// Iterates over the bytes of `range`, consuming them
struct RangeBytes<'data, 'range> {
    data: &'data [u8],
    range: &'range mut Range,
}

impl Iterator for RangeBytes<'_, '_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.range.length == 0 {
            return None;
        }

        let byte = self.data[self.range.offset as usize];
        self.range.offset = (self.range.offset + 1) % self.data.len() as u32;
        self.range.length -= 1;
        Some(byte)
    }
}

/// Copies `out.len()` bytes from the front of `range`, advancing it
fn read_bytes(data: &[u8], range: &mut Range, out: &mut [u8]) -> bool {
    let Ok(len) = u32::try_from(out.len()) else {
        return false;
    };

    if len > range.length {
        return false;
    }

    let offset = range.offset as usize;
    let first = out.len().min(data.len() - offset);
    out[..first].copy_from_slice(&data[offset..offset + first]);
    let rest = out.len() - first;
    out[first..].copy_from_slice(&data[..rest]);

    range.offset = ((u64::from(range.offset) + u64::from(len)) % data.len() as u64) as u32;
    range.length -= len;
    true
}

/// Copies `src` into `data` at `offset`, wrapping around the end, and returns
/// the offset just past the copied bytes
fn write_bytes(data: &mut [u8], offset: u32, src: &[u8]) -> u32 {
    let offset = offset as usize;
    let first = src.len().min(data.len() - offset);
    data[offset..offset + first].copy_from_slice(&src[..first]);
    data[..src.len() - first].copy_from_slice(&src[first..]);

    ((offset + src.len()) % data.len()) as u32
}

/// Appends records to a [`RingBufferData`]
pub struct RingBufferWriter<'rb, const N: usize> {
    ring_buffer: &'rb mut RingBufferData<N>,
}

impl<'rb, const N: usize> RingBufferWriter<'rb, N> {
    /// Creates a writer that appends after the records already in
    /// `ring_buffer`
    #[inline]
    pub fn new(ring_buffer: &'rb mut RingBufferData<N>) -> Self {
        Self { ring_buffer }
    }

    /// Appends `record`, dropping the oldest records if needed to make room.
    ///
    /// Fails without modifying the buffer if `record` is empty, doesn't fit
    /// in the buffer even when it is empty, or if a record that would need to
    /// be dropped is corrupt.
    pub fn push(&mut self, record: &[u8]) -> Result<(), Error> {
        if record.is_empty() {
            return Err(Error::EmptyRecord);
        }

        let capacity = RingBufferData::<N>::CAPACITY;
        let bytes_needed = u32::try_from(record.len())
            .ok()
            .and_then(|len| len.checked_add(varint::encoded_len(len)))
            .filter(|needed| *needed <= capacity)
            .ok_or(Error::RecordTooLarge(record.len()))?;

        let mut readable = self.ring_buffer.data_range();
        let write_offset =
            ((u64::from(readable.offset) + u64::from(readable.length)) % u64::from(capacity)) as u32;

        let mut bytes_available = capacity - readable.length;
        while bytes_available < bytes_needed {
            let (to_skip, prefix_len) = varint::decode(RangeBytes {
                data: &self.ring_buffer.data,
                range: &mut readable,
            })
            .map_err(|_err| Error::CorruptRecord)?;

            if to_skip > readable.length {
                return Err(Error::CorruptRecord);
            }

            readable.offset =
                ((u64::from(readable.offset) + u64::from(to_skip)) % u64::from(capacity)) as u32;
            readable.length -= to_skip;
            bytes_available += prefix_len + to_skip;
        }

        let mut prefix = [0; varint::MAX_LEN];
        let prefix_len = varint::encode(record.len() as u32, &mut prefix);

        let data = &mut self.ring_buffer.data;
        let offset = write_bytes(data, write_offset, &prefix[..prefix_len]);
        write_bytes(data, offset, record);

        self.ring_buffer.set_data_range(Range {
            offset: readable.offset,
            length: readable.length + bytes_needed,
        });

        Ok(())
    }
}

/// Reads records, oldest first, from a [`RingBufferData`].
///
/// The reader tracks its own position, so the buffer itself is never
/// modified.
pub struct RingBufferReader<'rb> {
    data: &'rb [u8],
    data_range: Range,
    finished: bool,
}

impl<'rb> RingBufferReader<'rb> {
    #[inline]
    pub fn new<const N: usize>(ring_buffer: &'rb RingBufferData<N>) -> Self {
        Self {
            data: &ring_buffer.data,
            data_range: ring_buffer.data_range(),
            finished: false,
        }
    }

    /// Creates a reader directly over a serialized ring buffer, eg. the value
    /// of a captured ring buffer annotation, whose capacity is not known.
    ///
    /// A serialized buffer only includes the storage up to the end of the
    /// valid range, unless the range wraps, in which case it includes the
    /// entire storage. Either way the storage in `buffer` can be treated as
    /// the full capacity.
    pub fn from_serialized(buffer: &'rb [u8]) -> Result<Self, Error> {
        let (range, stored) = parse_header(buffer, buffer.len().saturating_sub(HEADER_SIZE))?;
        let data_range = validate_range(range, stored.len(), stored.len())?;

        Ok(Self {
            data: stored,
            data_range,
            finished: false,
        })
    }

    /// Appends the next record to `out`.
    ///
    /// Returns false if there are no more records, or if the next record is
    /// corrupt or was truncated, which is indicated by a length of 0.
    pub fn pop(&mut self, out: &mut Vec<u8>) -> bool {
        let Ok((len, _)) = varint::decode(RangeBytes {
            data: self.data,
            range: &mut self.data_range,
        }) else {
            return false;
        };

        if len == 0 || len > self.data_range.length {
            return false;
        }

        let start = out.len();
        out.resize(start + len as usize, 0);
        if !read_bytes(self.data, &mut self.data_range, &mut out[start..]) {
            out.truncate(start);
            return false;
        }

        true
    }
}

impl Iterator for RingBufferReader<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut record = Vec::new();
        if self.pop(&mut record) {
            Some(record)
        } else {
            self.finished = true;
            None
        }
    }
}
