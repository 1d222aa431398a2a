use crate::{DumpMap, Key};
use crash_annotations::{Annotation, AnnotationType, RingBufferReader};

/// An annotation decoded from a dump
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationSnapshot {
    pub name: String,
    pub kind: AnnotationType,
    pub value: Vec<u8>,
}

impl AnnotationSnapshot {
    /// The value as a string, if it is a [`AnnotationType::STRING`] annotation
    pub fn string(&self) -> Option<String> {
        (self.kind == AnnotationType::STRING)
            .then(|| String::from_utf8_lossy(&self.value).into_owned())
    }

    /// Decodes the value as a serialized ring buffer, returning its records
    /// oldest first
    pub fn ring_buffer_records(&self) -> Result<Vec<Vec<u8>>, crash_annotations::Error> {
        Ok(RingBufferReader::from_serialized(&self.value)?.collect())
    }
}

/// Gets every valid annotation in the [`Key::ANNOTATION_OBJECTS`] list of
/// `map`, in the order they were written.
///
/// Annotations with a missing or invalid name, type or value are logged and
/// skipped.
pub fn extract_annotations(map: &DumpMap) -> Vec<AnnotationSnapshot> {
    let Some(objects) = map.get_as_list(Key::ANNOTATION_OBJECTS) else {
        return Vec::new();
    };

    objects
        .iter()
        .filter_map(|object| {
            let name = object.required_data(Key::ANNOTATION_NAME)?;
            if name.is_empty() || name.len() > Annotation::NAME_MAX_LENGTH {
                log::error!("invalid annotation name length {}", name.len());
                return None;
            }

            let kind = object.required_value::<u16>(Key::ANNOTATION_TYPE)?;

            let value = object.required_data(Key::ANNOTATION_VALUE)?;
            if value.len() > Annotation::VALUE_MAX_SIZE as usize {
                log::error!("invalid annotation value length {}", value.len());
                return None;
            }

            Some(AnnotationSnapshot {
                name: name.string(),
                kind: AnnotationType::from_raw(kind),
                value: value.bytes().to_vec(),
            })
        })
        .collect()
}
