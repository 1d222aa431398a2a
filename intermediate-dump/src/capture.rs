use crate::{IntermediateDumpWriter, Key, SafeRead, debug_print, write_stderr};
use crash_annotations::{Annotation, AnnotationList, GuardMode};
use std::{io::Write, time::Duration};

/// Controls how annotations are captured into a dump
#[derive(Copy, Clone, Debug)]
pub struct CaptureOptions {
    /// How long to wait for the guard of a guarded annotation before skipping
    /// it. Defaults to not waiting at all, as the thread that holds the guard
    /// may well be the one that crashed.
    pub guard_timeout: Duration,
    /// The maximum number of annotations in the list that are visited
    pub max_annotations: usize,
}

impl CaptureOptions {
    pub const DEFAULT_MAX_ANNOTATIONS: usize = 200;
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            guard_timeout: Duration::ZERO,
            max_annotations: Self::DEFAULT_MAX_ANNOTATIONS,
        }
    }
}

/// Writes every set annotation in `list` as an [`Key::ANNOTATION_OBJECTS`]
/// array in the current map, returning the number of annotations written.
///
/// Each element of the array is a map with the annotation's
/// [`Key::ANNOTATION_NAME`], [`Key::ANNOTATION_VALUE`] and
/// [`Key::ANNOTATION_TYPE`].
///
/// This is safe to call from a crash handler. Every node in the list is
/// checked with `memory` before it is read, and the walk stops at the first
/// node that is unreadable. Annotations that are not set, have an invalid
/// size, or whose guard could not be acquired in time, are skipped.
pub fn write_annotations<W: Write, M: SafeRead>(
    writer: &mut IntermediateDumpWriter<W>,
    memory: &M,
    list: &'static AnnotationList,
    options: &CaptureOptions,
) -> usize {
    writer.array(Key::ANNOTATION_OBJECTS, |writer| {
        let nodes = list
            .iter_validated(|node| memory.probe(node as usize, std::mem::size_of::<Annotation>()))
            .take(options.max_annotations);

        let mut written = 0;
        for annotation in nodes {
            if write_annotation(writer, memory, annotation, options) {
                written += 1;
            }
        }

        written
    })
}

fn write_annotation<W: Write, M: SafeRead>(
    writer: &mut IntermediateDumpWriter<W>,
    memory: &M,
    annotation: &Annotation,
    options: &CaptureOptions,
) -> bool {
    // The size and value of a guarded annotation can only be read while
    // holding its guard
    let _guard = if annotation.guard_mode() == GuardMode::SpinGuarded {
        let Some(guard) = annotation.try_acquire_guard(options.guard_timeout) else {
            // Expected if the annotation is being written to
            debug_print!("intermediate dump: skipping busy annotation");
            return false;
        };
        Some(guard)
    } else {
        None
    };

    let size = annotation.size() as usize;
    if size == 0 {
        return false;
    }

    if size > Annotation::VALUE_MAX_SIZE as usize {
        write_stderr("intermediate dump: annotation has an invalid size\n");
        return false;
    }

    let name = annotation.name();
    let name = &name.as_bytes()[..name.len().min(Annotation::NAME_MAX_LENGTH)];
    let value = annotation.value_ptr() as usize;

    // Only start the map once everything in it is known to be readable
    if value == 0 || !memory.probe(value, size) || !memory.probe(name.as_ptr() as usize, name.len())
    {
        write_stderr("intermediate dump: unable to read annotation\n");
        return false;
    }

    writer.array_map(|writer| {
        writer.add_property_from(memory, Key::ANNOTATION_NAME, name.as_ptr() as usize, name.len())
            & writer.add_property_from(memory, Key::ANNOTATION_VALUE, value, size)
            & writer.add_property(Key::ANNOTATION_TYPE, annotation.kind().raw())
    })
}
