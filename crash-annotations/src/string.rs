use crate::{Annotation, AnnotationType, GuardMode, PayloadKind};
use std::sync::atomic::{AtomicU8, Ordering};

/// An [`Annotation`] that stores a string of at most `N` bytes inline.
///
/// ```
/// use crash_annotations::StringAnnotation;
///
/// static BUILD: StringAnnotation<32> = StringAnnotation::new("build");
///
/// BUILD.set("nightly-2026-10-16");
/// assert_eq!(BUILD.get(), "nightly-2026-10-16");
/// ```
///
/// The value is unguarded, a crash that happens during [`Self::set`] can
/// capture a mix of the old and new strings.
pub struct StringAnnotation<const N: usize> {
    annotation: Annotation,
    value: [AtomicU8; N],
}

impl<const N: usize> StringAnnotation<N> {
    pub const fn new(name: &'static str) -> Self {
        const {
            assert!(
                N > 0 && N <= Annotation::VALUE_MAX_SIZE as usize,
                "string annotation capacity must be within (0, VALUE_MAX_SIZE]"
            );
        }

        Self {
            annotation: Annotation::with_payload(
                AnnotationType::STRING,
                name,
                PayloadKind::String,
                GuardMode::Unguarded,
            ),
            value: [const { AtomicU8::new(0) }; N],
        }
    }

    /// Sets the value, truncating it to `N` bytes.
    ///
    /// The string must not contain `NUL` characters, which is checked in debug
    /// builds. Truncation can split a multi-byte character, which consumers
    /// must tolerate.
    pub fn set(&'static self, value: &str) {
        let bytes = value.as_bytes();
        let len = bytes.len().min(N);
        debug_assert!(
            !bytes[..len].contains(&0),
            "string annotation values may not contain NUL"
        );

        for (dst, src) in self.value.iter().zip(&bytes[..len]) {
            dst.store(*src, Ordering::Relaxed);
        }

        self.annotation
            .bind_value(self.value.as_ptr().cast::<u8>().cast_mut(), N as u32);
        self.annotation.set_size(len as u32);
    }

    /// Gets a copy of the current value, replacing invalid UTF-8 from
    /// truncation
    pub fn get(&self) -> String {
        let size = (self.annotation.size() as usize).min(N);
        let bytes: Vec<u8> = self.value[..size]
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();

        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[inline]
    pub fn clear(&self) {
        self.annotation.clear();
    }

    /// The underlying annotation
    #[inline]
    pub fn annotation(&self) -> &Annotation {
        &self.annotation
    }
}

impl<const N: usize> AsRef<Annotation> for StringAnnotation<N> {
    fn as_ref(&self) -> &Annotation {
        &self.annotation
    }
}
