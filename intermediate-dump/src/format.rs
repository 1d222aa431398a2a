//! The binary layout of an intermediate dump.
//!
//! A dump is a flat stream of commands, each starting with a one byte tag.
//! `MapStart`, `ArrayStart` and `Property` are followed by a `u16` key, and
//! `Property` additionally by a `usize` length and that many bytes. All
//! multi-byte values are in the byte order of the process that wrote the
//! dump, as dumps are always read on the same architecture.
//!
//! ```text
//! RootMapStart
//!   Property(VERSION, 1, [1])
//!   MapStart(PROCESS_INFO)
//!     Property(PID, 4, [...])
//!   MapEnd
//!   ArrayStart(MODULES)
//!     MapStart            <- maps within an array have no key
//!     MapEnd
//!   ArrayEnd
//! RootMapEnd
//! ```

/// The maximum nesting of maps and arrays, including the root map
pub const MAX_DEPTH: usize = 10;
/// The maximum size of a single property the reader will accept
pub const MAX_PROPERTY_SIZE: usize = 64 * 1024 * 1024;
/// The size of the writer's staging buffer
pub const WRITE_BUFFER_SIZE: usize = 4096;
/// The maximum length of a C string read from process memory, including the
/// terminating NUL
pub const CSTRING_MAX_LENGTH: usize = 1024;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    MapStart = 1,
    MapEnd = 2,
    ArrayStart = 3,
    ArrayEnd = 4,
    Property = 5,
    RootMapStart = 6,
    RootMapEnd = 7,
}

impl Command {
    #[inline]
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::MapStart,
            2 => Self::MapEnd,
            3 => Self::ArrayStart,
            4 => Self::ArrayEnd,
            5 => Self::Property,
            6 => Self::RootMapStart,
            7 => Self::RootMapEnd,
            _ => return None,
        })
    }
}

/// A plain value that is stored as a property in native byte order
pub trait PropertyValue: Sized + Copy {
    type Bytes: AsRef<[u8]>;

    fn to_ne_bytes(self) -> Self::Bytes;
    /// Decodes the value, `bytes` must be exactly the size of the value
    fn from_ne_bytes(bytes: &[u8]) -> Option<Self>;
}

macro_rules! property_value {
    ($($ty:ty),+) => {
        $(
            impl PropertyValue for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                #[inline]
                fn to_ne_bytes(self) -> Self::Bytes {
                    <$ty>::to_ne_bytes(self)
                }

                #[inline]
                fn from_ne_bytes(bytes: &[u8]) -> Option<Self> {
                    Some(<$ty>::from_ne_bytes(bytes.try_into().ok()?))
                }
            }
        )+
    };
}

property_value!(u8, u16, u32, u64, i8, i16, i32, i64, usize, isize, f64);

impl PropertyValue for bool {
    type Bytes = [u8; 1];

    #[inline]
    fn to_ne_bytes(self) -> Self::Bytes {
        [u8::from(self)]
    }

    #[inline]
    fn from_ne_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_tags() {
        for tag in 1..=7 {
            assert_eq!(Command::from_u8(tag).unwrap() as u8, tag);
        }

        assert!(Command::from_u8(0).is_none());
        assert!(Command::from_u8(8).is_none());
    }

    #[test]
    fn values_require_exact_size() {
        assert_eq!(<u32 as PropertyValue>::from_ne_bytes(&42u32.to_ne_bytes()), Some(42));
        assert_eq!(<u32 as PropertyValue>::from_ne_bytes(&[1, 2]), None);
        assert_eq!(<u16 as PropertyValue>::from_ne_bytes(&[0; 4]), None);
        assert_eq!(bool::from_ne_bytes(&[1]), Some(true));
        assert_eq!(bool::from_ne_bytes(&[2]), None);
    }
}
