#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("empty records can't be stored, a length of 0 marks a truncated record")]
    EmptyRecord,
    #[error("record of {0} bytes does not fit in the ring buffer")]
    RecordTooLarge(usize),
    #[error("ring buffer contains a corrupt record")]
    CorruptRecord,
    #[error("varint was truncated")]
    VarintTruncated,
    #[error("varint overflows a 32-bit integer")]
    VarintOverflow,
    #[error("the annotation's guard could not be acquired")]
    GuardUnavailable,
    #[error("expected ring buffer magic {expected:#010x} but found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },
    #[error("ring buffer version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("buffer of {len} bytes is not a valid ring buffer of capacity {capacity}")]
    InvalidBufferLength { len: usize, capacity: usize },
    #[error("ring buffer range {offset}+{length} is invalid for capacity {capacity}")]
    InvalidRange {
        offset: u32,
        length: u32,
        capacity: usize,
    },
}
