use crate::{SpinGuard, SpinGuardState};
use std::{
    fmt,
    ptr,
    sync::atomic::{AtomicPtr, AtomicU8, AtomicU32, Ordering},
    time::Duration,
};

/// The type of data stored in an [`Annotation`].
///
/// Values below [`Self::USER_DEFINED_START`] are reserved, clients can create
/// their own types with [`Self::user_defined`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct AnnotationType(u16);

impl AnnotationType {
    /// An invalid annotation, only used for the sentinel nodes of an
    /// [`crate::AnnotationList`]
    pub const INVALID: Self = Self(0);
    /// A string, not `NUL` terminated
    pub const STRING: Self = Self(1);
    /// Clients may declare their own custom types by using values greater
    /// than this.
    pub const USER_DEFINED_START: Self = Self(0x8000);

    /// Creates a user-defined type, `value` is added to
    /// [`Self::USER_DEFINED_START`]
    ///
    /// # Panics
    ///
    /// Panics if `value` is 0 or the result would overflow.
    #[inline]
    pub const fn user_defined(value: u16) -> Self {
        let start = Self::USER_DEFINED_START.0;
        assert!(
            value != 0 && value <= u16::MAX - start,
            "user-defined type is 0 or overflows"
        );
        Self(start + value)
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_user_defined(self) -> bool {
        self.0 > Self::USER_DEFINED_START.0
    }
}

impl fmt::Debug for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::INVALID => f.write_str("Invalid"),
            Self::STRING => f.write_str("String"),
            other if other.is_user_defined() => {
                write!(f, "UserDefined({})", other.0 - Self::USER_DEFINED_START.0)
            }
            other => write!(f, "Reserved({:#06x})", other.0),
        }
    }
}

/// How reads of an [`Annotation`]'s value are protected from concurrent writes
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum GuardMode {
    /// Reads are not protected, a value can be torn if the process crashes
    /// mid-write, or if the crash handler reads it while it is being written.
    Unguarded,
    /// Reads and writes must hold the annotation's [`SpinGuard`], see
    /// [`Annotation::try_acquire_guard`]
    SpinGuarded,
}

/// The kind of payload an [`Annotation`] describes.
///
/// The value is always exposed as plain bytes, this only records which typed
/// wrapper, if any, owns the storage and enforces its invariants.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PayloadKind {
    /// Bytes in storage owned by the client
    Bytes,
    /// Owned by a [`crate::StringAnnotation`]
    String,
    /// The serialized form of a [`crate::RingBufferData`], owned by a
    /// [`crate::RingBufferAnnotation`]
    RingBuffer,
}

/// A named piece of data that is included in crash reports.
///
/// An annotation never owns the bytes it describes, it only points at storage
/// with (effectively) static lifetime, and tracks how many of those bytes are
/// currently meaningful.
///
/// Annotations are not included in a report until [`Self::set_size`] is
/// called with a non-zero size, which also adds the annotation to the active
/// [`crate::AnnotationList`]. Once added, an annotation is never removed from
/// the list, clearing it just makes it invisible to consumers that check
/// [`Self::is_set`].
pub struct Annotation {
    /// Linked list next pointer, only used by [`crate::AnnotationList`].
    ///
    /// This is null until the annotation is added to a list, after which its
    /// presence prevents the annotation from being added again.
    pub(crate) link: AtomicPtr<Annotation>,
    name: &'static str,
    value: AtomicPtr<u8>,
    capacity: AtomicU32,
    size: AtomicU32,
    kind: AnnotationType,
    payload: PayloadKind,
    guard_mode: GuardMode,
    spin_guard: SpinGuardState,
}

impl Annotation {
    /// The maximum length of an annotation's name, in bytes.
    ///
    /// Matches the behavior of Breakpad's `SimpleStringDictionary`
    pub const NAME_MAX_LENGTH: usize = 256;
    /// The maximum size of an annotation's value, in bytes.
    pub const VALUE_MAX_SIZE: u32 = 5 * 4096;

    /// Creates an annotation describing `storage`.
    ///
    /// The client writes the value directly into `storage` and then calls
    /// [`Self::set_size`] with the number of meaningful bytes.
    pub const fn new(kind: AnnotationType, name: &'static str, storage: &'static [AtomicU8]) -> Self {
        assert!(
            storage.len() <= Self::VALUE_MAX_SIZE as usize,
            "annotation storage is larger than the maximum value size"
        );

        Self {
            link: AtomicPtr::new(ptr::null_mut()),
            name,
            value: AtomicPtr::new(storage.as_ptr().cast::<u8>().cast_mut()),
            capacity: AtomicU32::new(storage.len() as u32),
            size: AtomicU32::new(0),
            kind,
            payload: PayloadKind::Bytes,
            guard_mode: GuardMode::Unguarded,
            spin_guard: SpinGuardState::new(),
        }
    }

    /// Creates an annotation over arbitrary client memory.
    ///
    /// # Safety
    ///
    /// `value` must be valid for reads of `capacity` bytes for as long as the
    /// annotation can be reached, which once it is set, is the rest of the
    /// process' lifetime. If `guard_mode` is [`GuardMode::SpinGuarded`], every
    /// write to `value` must be performed while holding the annotation's guard.
    pub const unsafe fn from_raw_parts(
        kind: AnnotationType,
        name: &'static str,
        value: *mut u8,
        capacity: u32,
        guard_mode: GuardMode,
    ) -> Self {
        Self {
            link: AtomicPtr::new(ptr::null_mut()),
            name,
            value: AtomicPtr::new(value),
            capacity: AtomicU32::new(capacity),
            size: AtomicU32::new(0),
            kind,
            payload: PayloadKind::Bytes,
            guard_mode,
            spin_guard: SpinGuardState::new(),
        }
    }

    /// Creates an annotation whose storage is bound later by a typed wrapper
    /// via [`Self::bind_value`], as the wrapper's own address is not known
    /// until it is placed in static memory.
    pub(crate) const fn with_payload(
        kind: AnnotationType,
        name: &'static str,
        payload: PayloadKind,
        guard_mode: GuardMode,
    ) -> Self {
        Self {
            link: AtomicPtr::new(ptr::null_mut()),
            name,
            value: AtomicPtr::new(ptr::null_mut()),
            capacity: AtomicU32::new(0),
            size: AtomicU32::new(0),
            kind,
            payload,
            guard_mode,
            spin_guard: SpinGuardState::new(),
        }
    }

    pub(crate) const fn sentinel() -> Self {
        Self::with_payload(
            AnnotationType::INVALID,
            "",
            PayloadKind::Bytes,
            GuardMode::Unguarded,
        )
    }

    /// Points the annotation at the storage of the typed wrapper that owns it.
    #[inline]
    pub(crate) fn bind_value(&self, value: *mut u8, capacity: u32) {
        self.value.store(value, Ordering::Relaxed);
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Specifies the number of bytes of the value to include in a crash
    /// report.
    ///
    /// A size of 0 is equivalent to calling [`Self::clear`]. This does not
    /// touch the value itself, it only updates the bookkeeping, and adds the
    /// annotation to the active [`crate::AnnotationList`] the first time it is
    /// called with a non-zero size.
    pub fn set_size(&'static self, size: u32) {
        debug_assert!(
            size <= Self::VALUE_MAX_SIZE,
            "annotation size exceeds the maximum value size"
        );
        debug_assert!(
            size <= self.capacity.load(Ordering::Relaxed),
            "annotation size exceeds its storage"
        );

        self.size.store(size, Ordering::Release);

        if size > 0 {
            crate::AnnotationList::register().add(self);
        }
    }

    /// Marks the annotation as cleared, excluding it from crash reports.
    #[inline]
    pub fn clear(&self) {
        self.size.store(0, Ordering::Release);
    }

    /// True if the annotation has a value that should be included in a report
    #[inline]
    pub fn is_set(&self) -> bool {
        self.size() > 0
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn kind(&self) -> AnnotationType {
        self.kind
    }

    #[inline]
    pub fn payload(&self) -> PayloadKind {
        self.payload
    }

    #[inline]
    pub fn guard_mode(&self) -> GuardMode {
        self.guard_mode
    }

    /// The number of meaningful bytes in the value
    #[inline]
    pub fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    /// The number of bytes of storage backing the value
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Relaxed)
    }

    /// The address of the value's storage, which may be null if the
    /// annotation has never been set.
    ///
    /// This is what a crash handler uses to copy the value out with a read
    /// that tolerates the memory being invalid.
    #[inline]
    pub fn value_ptr(&self) -> *const u8 {
        self.value.load(Ordering::Relaxed)
    }

    /// Gets the meaningful bytes of the value.
    ///
    /// # Safety
    ///
    /// No other thread may write the value for the lifetime of the returned
    /// slice, either because the caller holds the annotation's guard, or
    /// because the caller otherwise knows there are no concurrent writers.
    pub unsafe fn value(&self) -> &[u8] {
        let ptr = self.value_ptr();
        let size = self.size().min(self.capacity()) as usize;

        if ptr.is_null() || size == 0 {
            return &[];
        }

        // SAFETY: the storage is valid for `capacity` bytes per the
        // constructor contracts, and the caller guarantees exclusivity
        unsafe { std::slice::from_raw_parts(ptr, size) }
    }

    /// If this annotation guards concurrent access, tries to acquire its
    /// guard within `timeout`.
    ///
    /// Returns `None` if the guard could not be acquired in time, in which
    /// case the value must not be read. Calling this on an unguarded
    /// annotation is a programming error, and always returns `None`.
    pub fn try_acquire_guard(&self, timeout: Duration) -> Option<SpinGuard<'_>> {
        debug_assert_eq!(
            self.guard_mode,
            GuardMode::SpinGuarded,
            "attempted to acquire the guard of an unguarded annotation"
        );

        if self.guard_mode == GuardMode::Unguarded {
            return None;
        }

        SpinGuard::try_acquire(&self.spin_guard, timeout)
    }

    #[inline]
    pub(crate) fn next(&self) -> *mut Annotation {
        self.link.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .field("guard_mode", &self.guard_mode)
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}
