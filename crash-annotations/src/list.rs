use crate::Annotation;
use std::{
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

/// The list that [`AnnotationList::register`] installs if no other list has
/// been made active
static PROCESS_LIST: AnnotationList = AnnotationList::new();
/// The list that annotations are added to when they are set
static ACTIVE_LIST: AtomicPtr<AnnotationList> = AtomicPtr::new(ptr::null_mut());

/// An append-only, lock free, singly linked list of [`Annotation`]s.
///
/// The list never allocates, each annotation carries its own link, and is
/// never unlinked once added. This makes both insertion and traversal safe to
/// perform from a signal handler.
///
/// The list is bracketed by a head and a tail sentinel, new annotations are
/// inserted directly after the head, so iteration visits the most recently
/// added annotations first.
pub struct AnnotationList {
    head: Annotation,
    tail: Annotation,
}

impl AnnotationList {
    /// Creates an empty list.
    ///
    /// The sentinels are linked on first use, as the list needs a stable
    /// address first, which is why most methods require `&'static self`.
    pub const fn new() -> Self {
        Self {
            head: Annotation::sentinel(),
            tail: Annotation::sentinel(),
        }
    }

    /// Returns the active list, if one has been registered.
    ///
    /// This is what a crash handler should use, as it never installs a list
    /// that nobody has ever added an annotation to.
    #[inline]
    pub fn get() -> Option<&'static Self> {
        let active = ACTIVE_LIST.load(Ordering::Acquire);
        // SAFETY: the only pointers ever stored are derived from `&'static`
        // references
        unsafe { active.as_ref() }
    }

    /// Returns the active list, making the process wide list the active one
    /// if no list is active yet.
    pub fn register() -> &'static Self {
        if let Some(active) = Self::get() {
            return active;
        }

        let process = ptr::from_ref(&PROCESS_LIST).cast_mut();
        match ACTIVE_LIST.compare_exchange(
            ptr::null_mut(),
            process,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => &PROCESS_LIST,
            // SAFETY: see `get`
            Err(current) => unsafe { &*current },
        }
    }

    /// Makes `list` the active list, returning the previously active list.
    ///
    /// Annotations that were already added to the previous list stay there,
    /// as an annotation can only ever be linked once. Passing `None` means the
    /// next [`Self::register`] installs the process wide list again.
    pub fn set_active(list: Option<&'static Self>) -> Option<&'static Self> {
        let new = list.map_or(ptr::null_mut(), |l| ptr::from_ref(l).cast_mut());
        let previous = ACTIVE_LIST.swap(new, Ordering::AcqRel);
        // SAFETY: see `get`
        unsafe { previous.as_ref() }
    }

    #[inline]
    fn tail_ptr(&'static self) -> *mut Annotation {
        ptr::from_ref(&self.tail).cast_mut()
    }

    /// Gets the node after the head, linking the head to the tail if this is
    /// the first time the list has been touched.
    fn head_next(&'static self) -> *mut Annotation {
        let next = self.head.next();
        if !next.is_null() {
            return next;
        }

        match self.head.link.compare_exchange(
            ptr::null_mut(),
            self.tail_ptr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => self.tail_ptr(),
            Err(current) => current,
        }
    }

    /// Adds `annotation` to the list.
    ///
    /// Adding an annotation that is already in this, or any other, list is a
    /// no-op.
    pub fn add(&'static self, annotation: &'static Annotation) {
        let this = ptr::from_ref(annotation).cast_mut();
        let mut head_next = self.head_next();

        // Claim the annotation, if another thread has already linked it we're
        // done
        if annotation
            .link
            .compare_exchange(
                ptr::null_mut(),
                head_next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return;
        }

        debug_assert!(
            annotation.name().len() <= Annotation::NAME_MAX_LENGTH,
            "annotation name is too long"
        );

        // The annotation isn't reachable until the head points at it, so its
        // link can be updated with a plain store until then
        while let Err(current) = self.head.link.compare_exchange_weak(
            head_next,
            this,
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            head_next = current;
            annotation.link.store(head_next, Ordering::Relaxed);
        }
    }

    /// Iterates over every annotation in the list, whether it is set or not
    #[inline]
    pub fn iter(&'static self) -> Iter {
        let always: fn(*const Annotation) -> bool = |_node| true;
        self.iter_validated(always)
    }

    /// Like [`Self::iter`], but each node is passed to `is_readable` before
    /// it is dereferenced, and iteration stops at the first node that fails.
    ///
    /// A crash handler uses this to avoid faulting on a list that has been
    /// clobbered by the crash it is reporting.
    #[inline]
    pub fn iter_validated<F>(&'static self, is_readable: F) -> Iter<F>
    where
        F: FnMut(*const Annotation) -> bool,
    {
        Iter {
            current: self.head_next(),
            tail: self.tail_ptr(),
            is_readable,
        }
    }
}

impl Default for AnnotationList {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for &'static AnnotationList {
    type Item = &'static Annotation;
    type IntoIter = Iter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the annotations in an [`AnnotationList`]
pub struct Iter<F = fn(*const Annotation) -> bool> {
    current: *mut Annotation,
    tail: *mut Annotation,
    is_readable: F,
}

impl<F> Iterator for Iter<F>
where
    F: FnMut(*const Annotation) -> bool,
{
    type Item = &'static Annotation;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.tail || self.current.is_null() {
            return None;
        }

        if !(self.is_readable)(self.current) {
            self.current = self.tail;
            return None;
        }

        // SAFETY: every node reachable from the head is a `&'static`
        // annotation that is never unlinked
        let annotation = unsafe { &*self.current };
        self.current = annotation.next();
        Some(annotation)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::AnnotationType;
    use std::sync::atomic::AtomicU8;

    fn new_list() -> &'static AnnotationList {
        Box::leak(Box::new(AnnotationList::new()))
    }

    fn new_annotation(name: &'static str) -> &'static Annotation {
        let storage: &'static [AtomicU8] = Box::leak(Box::new([const { AtomicU8::new(0) }; 4]));
        Box::leak(Box::new(Annotation::new(
            AnnotationType::user_defined(1),
            name,
            storage,
        )))
    }

    #[test]
    fn empty_list() {
        let list = new_list();
        assert_eq!(list.iter().count(), 0);
        // Iterating again uses the already initialized head
        assert_eq!(list.iter().count(), 0);
    }

    #[test]
    fn insertion_order() {
        let list = new_list();

        let one = new_annotation("one");
        let two = new_annotation("two");
        let three = new_annotation("three");

        list.add(one);
        list.add(two);
        list.add(three);

        let names: Vec<_> = list.iter().map(|a| a.name()).collect();
        assert_eq!(names, ["three", "two", "one"]);
    }

    #[test]
    fn duplicate_add_is_noop() {
        let list = new_list();
        let one = new_annotation("one");

        list.add(one);
        list.add(one);
        list.add(one);

        assert_eq!(list.iter().count(), 1);

        // Nor can it be added to a different list
        let other = new_list();
        other.add(one);
        assert_eq!(other.iter().count(), 0);
        assert_eq!(list.iter().count(), 1);
    }

    #[test]
    fn concurrent_add() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 64;

        let list = new_list();
        let annotations: Vec<_> = (0..THREADS * PER_THREAD)
            .map(|_| new_annotation("concurrent"))
            .collect();

        std::thread::scope(|s| {
            for chunk in annotations.chunks(PER_THREAD) {
                s.spawn(move || {
                    for annotation in chunk {
                        list.add(*annotation);
                        // Every thread tries to add every one of its
                        // annotations twice
                        list.add(*annotation);
                    }
                });
            }
        });

        let found: Vec<_> = list.iter().collect();
        assert_eq!(found.len(), THREADS * PER_THREAD);

        for annotation in &annotations {
            assert_eq!(
                found.iter().filter(|a| ptr::eq(**a, *annotation)).count(),
                1
            );
        }
    }

    #[test]
    fn register_returns_active() {
        let first = AnnotationList::register();
        let second = AnnotationList::register();
        assert!(ptr::eq(first, second));
        assert!(ptr::eq(AnnotationList::get().unwrap(), first));
    }

    #[test]
    fn validated_iteration_stops() {
        let list = new_list();
        let one = new_annotation("one");
        let two = new_annotation("two");
        let three = new_annotation("three");

        list.add(one);
        list.add(two);
        list.add(three);

        let bad = ptr::from_ref(two);
        let names: Vec<_> = list
            .iter_validated(|node| node != bad)
            .map(|a| a.name())
            .collect();
        assert_eq!(names, ["three"]);
    }
}
