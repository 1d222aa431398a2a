use crate::{
    Annotation, AnnotationType, Error, GuardMode, PayloadKind,
    ring_buffer::{DEFAULT_CAPACITY, HEADER_SIZE, RingBufferData, RingBufferWriter},
};
use std::{cell::UnsafeCell, time::Duration};

/// An [`Annotation`] whose value is a [`RingBufferData`] of recent records,
/// eg. breadcrumbs or log lines leading up to a crash.
///
/// The value is guarded, so a crash handler that holds the guard always sees
/// a consistent buffer.
pub struct RingBufferAnnotation<const N: usize = DEFAULT_CAPACITY> {
    annotation: Annotation,
    data: UnsafeCell<RingBufferData<N>>,
}

// SAFETY: the ring buffer is only ever accessed while holding the
// annotation's guard
unsafe impl<const N: usize> Sync for RingBufferAnnotation<N> {}

impl<const N: usize> RingBufferAnnotation<N> {
    pub const fn new(kind: AnnotationType, name: &'static str) -> Self {
        const {
            assert!(
                HEADER_SIZE + N <= Annotation::VALUE_MAX_SIZE as usize,
                "ring buffer is larger than the maximum annotation value size"
            );
        }

        Self {
            annotation: Annotation::with_payload(
                kind,
                name,
                PayloadKind::RingBuffer,
                GuardMode::SpinGuarded,
            ),
            data: UnsafeCell::new(RingBufferData::new()),
        }
    }

    /// Appends `record` to the ring buffer, dropping the oldest records if
    /// there isn't enough room.
    ///
    /// This never waits for the guard, if a reader currently holds it the
    /// record is dropped and [`Error::GuardUnavailable`] is returned.
    pub fn push(&'static self, record: &[u8]) -> Result<(), Error> {
        let Some(_guard) = self.annotation.try_acquire_guard(Duration::ZERO) else {
            return Err(Error::GuardUnavailable);
        };

        // SAFETY: we hold the guard
        let data = unsafe { &mut *self.data.get() };
        RingBufferWriter::new(data).push(record)?;

        self.annotation.bind_value(
            self.data.get().cast(),
            std::mem::size_of::<RingBufferData<N>>() as u32,
        );
        self.annotation.set_size(data.len());
        Ok(())
    }

    /// Copies the current contents of the ring buffer, waiting up to
    /// `timeout` for the guard.
    pub fn snapshot(&self, timeout: Duration) -> Result<Box<RingBufferData<N>>, Error> {
        let mut copy = Box::new(RingBufferData::new());

        let Some(_guard) = self.annotation.try_acquire_guard(timeout) else {
            return Err(Error::GuardUnavailable);
        };

        // SAFETY: we hold the guard
        let data = unsafe { &*self.data.get() };
        copy.deserialize_from_buffer(data.as_bytes())?;
        Ok(copy)
    }

    /// Removes every record and clears the annotation
    pub fn reset(&self, timeout: Duration) -> Result<(), Error> {
        let Some(_guard) = self.annotation.try_acquire_guard(timeout) else {
            return Err(Error::GuardUnavailable);
        };

        // SAFETY: we hold the guard
        unsafe { &mut *self.data.get() }.reset();
        self.annotation.clear();
        Ok(())
    }

    /// The underlying annotation
    #[inline]
    pub fn annotation(&self) -> &Annotation {
        &self.annotation
    }
}

impl<const N: usize> AsRef<Annotation> for RingBufferAnnotation<N> {
    fn as_ref(&self) -> &Annotation {
        &self.annotation
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::RingBufferReader;

    fn leak<const N: usize>(name: &'static str) -> &'static RingBufferAnnotation<N> {
        Box::leak(Box::new(RingBufferAnnotation::new(
            AnnotationType::user_defined(0x42),
            name,
        )))
    }

    fn records<const N: usize>(annotation: &RingBufferAnnotation<N>) -> Vec<Vec<u8>> {
        let snapshot = annotation.snapshot(Duration::from_secs(1)).unwrap();
        RingBufferReader::new(&*snapshot).collect()
    }

    #[test]
    fn push_updates_size() {
        let annotation = leak::<DEFAULT_CAPACITY>("push-updates-size");
        assert!(!annotation.annotation().is_set());
        assert_eq!(
            annotation.annotation().guard_mode(),
            GuardMode::SpinGuarded
        );

        annotation.push(b"0123456789").unwrap();
        assert_eq!(
            annotation.annotation().size(),
            HEADER_SIZE as u32 + 1 + 10
        );
        assert_eq!(
            annotation.annotation().capacity(),
            (HEADER_SIZE + DEFAULT_CAPACITY) as u32
        );

        annotation.push(b"abc").unwrap();
        assert_eq!(
            annotation.annotation().size(),
            HEADER_SIZE as u32 + 1 + 10 + 1 + 3
        );
        assert_eq!(records(annotation), [b"0123456789".as_slice(), b"abc"]);
    }

    #[test]
    fn push_is_dropped_while_guard_held() {
        let annotation = leak::<64>("dropped-while-held");
        annotation.push(b"first").unwrap();

        {
            let _guard = annotation
                .annotation()
                .try_acquire_guard(Duration::ZERO)
                .unwrap();
            assert_eq!(annotation.push(b"second"), Err(Error::GuardUnavailable));
            assert!(matches!(
                annotation.snapshot(Duration::ZERO),
                Err(Error::GuardUnavailable)
            ));
        }

        annotation.push(b"third").unwrap();
        assert_eq!(records(annotation), [b"first".as_slice(), b"third"]);
    }

    #[test]
    fn value_is_serialized_ring_buffer() {
        let annotation = leak::<32>("serialized");
        annotation.push(b"hello").unwrap();

        let copy = {
            let _guard = annotation
                .annotation()
                .try_acquire_guard(Duration::ZERO)
                .unwrap();
            // SAFETY: we hold the guard
            unsafe { annotation.annotation().value() }.to_vec()
        };

        let mut rb = RingBufferData::<32>::new();
        rb.deserialize_from_buffer(&copy).unwrap();
        assert_eq!(RingBufferReader::new(&rb).collect::<Vec<_>>(), [b"hello"]);
    }

    #[test]
    fn reset_clears() {
        let annotation = leak::<16>("reset");
        annotation.push(b"a").unwrap();
        annotation.reset(Duration::ZERO).unwrap();

        assert!(!annotation.annotation().is_set());
        assert!(records(annotation).is_empty());

        annotation.push(b"b").unwrap();
        assert_eq!(records(annotation), [b"b"]);
    }

    #[test]
    fn rejects_invalid_records() {
        let annotation = leak::<8>("invalid-records");
        assert_eq!(annotation.push(&[]), Err(Error::EmptyRecord));
        assert_eq!(
            annotation.push(&[0; 8]),
            Err(Error::RecordTooLarge(8))
        );
        assert!(!annotation.annotation().is_set());
    }
}
