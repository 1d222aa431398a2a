use std::fmt;

/// Identifies a map, array or property within an intermediate dump.
///
/// The numeric values are part of the dump format and must never change,
/// new keys may only be added. Keys are grouped by the thousands according
/// to the section of the dump they belong to.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(u16);

macro_rules! keys {
    ($($(#[$meta:meta])* $name:ident = $value:literal,)+) => {
        impl Key {
            $(
                $(#[$meta])*
                pub const $name: Self = Self($value);
            )+

            /// The name of the key, if it is one of the well known keys
            pub fn name(self) -> Option<&'static str> {
                Some(match self.0 {
                    $($value => stringify!($name),)+
                    _ => return None,
                })
            }
        }
    };
}

keys! {
    /// Reserved, never valid in a dump
    INVALID = 0,
    /// The format version of the dump
    VERSION = 1,

    MACH_EXCEPTION = 1000,
    CODES = 1001,
    EXCEPTION = 1002,
    FLAVOR = 1003,
    STATE = 1004,

    SIGNAL_EXCEPTION = 2000,
    SIGNAL_NUMBER = 2001,
    SIGNAL_CODE = 2002,
    SIGNAL_ADDRESS = 2003,

    NS_EXCEPTION = 2500,

    MODULES = 3000,
    ADDRESS = 3001,
    FILE_TYPE = 3002,
    NAME = 3003,
    SIZE = 3004,
    DYLIB_CURRENT_VERSION = 3005,
    SOURCE_VERSION = 3006,
    TIMESTAMP = 3007,
    UUID = 3008,
    /// Array of the annotations captured from an [`crash_annotations::AnnotationList`]
    ANNOTATION_OBJECTS = 3009,
    ANNOTATIONS_SIMPLE_MAP = 3010,
    ANNOTATIONS_VECTOR = 3011,
    ANNOTATION_TYPE = 3012,
    ANNOTATION_NAME = 3013,
    ANNOTATION_VALUE = 3014,
    ANNOTATIONS_CRASH_INFO = 3015,
    CRASH_INFO_MESSAGE1 = 3016,
    CRASH_INFO_MESSAGE2 = 3017,
    DYLD_ERROR_STRING = 3018,

    PROCESS_INFO = 4000,
    PARENT_PID = 4001,
    PID = 4002,
    START_TIME = 4003,
    SNAPSHOT_TIME = 4004,
    TASK_BASIC_INFO = 4005,
    TASK_THREAD_TIMES = 4006,
    SYSTEM_TIME = 4007,
    USER_TIME = 4008,

    SYSTEM_INFO = 5000,
    CPU_COUNT = 5001,
    CPU_VENDOR = 5002,
    DAYLIGHT_NAME = 5003,
    DAYLIGHT_OFFSET_SECONDS = 5004,
    HAS_DAYLIGHT_SAVING_TIME = 5005,
    IS_DAYLIGHT_SAVING_TIME = 5006,
    MACHINE_DESCRIPTION = 5007,
    OS_VERSION_BUGFIX = 5008,
    OS_VERSION_BUILD = 5009,
    OS_VERSION_MAJOR = 5010,
    OS_VERSION_MINOR = 5011,
    PAGE_SIZE = 5012,
    STANDARD_NAME = 5013,
    STANDARD_OFFSET_SECONDS = 5014,
    VM_STAT = 5015,
    ACTIVE = 5016,
    FREE = 5017,
    INACTIVE = 5018,
    WIRED = 5019,
    ADDRESS_MASK = 5020,
    CRASHPAD_UPTIME = 5021,

    THREADS = 6000,
    DEBUG_STATE = 6001,
    FLOAT_STATE = 6002,
    THREAD_STATE = 6003,
    PRIORITY = 6004,
    STACK_REGION_ADDRESS = 6005,
    STACK_REGION_DATA = 6006,
    SUSPEND_COUNT = 6007,
    THREAD_ID = 6008,
    THREAD_DATA_ADDRESS = 6009,
    THREAD_UNCAUGHT_NS_EXCEPTION_FRAMES = 6010,
    THREAD_CONTEXT_MEMORY_REGIONS = 6011,
    THREAD_CONTEXT_MEMORY_REGION_ADDRESS = 6012,
    THREAD_CONTEXT_MEMORY_REGION_DATA = 6013,
    THREAD_NAME = 6014,

    /// The largest key that can be encoded
    MAX_VALUE = 65535,
}

impl Key {
    /// Creates a key from its raw value, which doesn't need to be one of the
    /// well known keys
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}({})", self.0)
    }
}
