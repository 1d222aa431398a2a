use crate::{Key, PropertyValue};
use std::collections::BTreeMap;

/// A node in a decoded intermediate dump
#[derive(Debug, Clone, PartialEq)]
pub enum DumpObject {
    Data(DumpData),
    Map(DumpMap),
    List(DumpList),
}

impl DumpObject {
    #[inline]
    pub fn as_data(&self) -> Option<&DumpData> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    #[inline]
    pub fn as_map(&self) -> Option<&DumpMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&DumpList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Map(_) => "map",
            Self::List(_) => "list",
        }
    }
}

/// The bytes of a single property
#[derive(Clone, PartialEq, Eq, Default)]
pub struct DumpData(Vec<u8>);

impl DumpData {
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The data as a string, invalid UTF-8 is replaced
    pub fn string(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// The data as a plain value, `None` if the data is not exactly the size
    /// of `T`
    pub fn value<T: PropertyValue>(&self) -> Option<T> {
        let value = T::from_ne_bytes(&self.0);
        if value.is_none() {
            log::error!(
                "data of {} bytes is not a valid {}",
                self.0.len(),
                std::any::type_name::<T>()
            );
        }
        value
    }
}

impl std::fmt::Debug for DumpData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DumpData({} bytes)", self.0.len())
    }
}

/// An ordered list of maps
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DumpList(Vec<DumpMap>);

impl DumpList {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, map: DumpMap) {
        self.0.push(map);
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&DumpMap> {
        self.0.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, DumpMap> {
        self.0.iter()
    }
}

impl<'l> IntoIterator for &'l DumpList {
    type Item = &'l DumpMap;
    type IntoIter = std::slice::Iter<'l, DumpMap>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A map of unique keys to objects
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DumpMap(BTreeMap<Key, DumpObject>);

impl DumpMap {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `object` under `key`, a previous object with the same key is
    /// replaced and logged, as keys in a well formed dump are unique
    pub fn insert(&mut self, key: Key, object: DumpObject) {
        if let Some(previous) = self.0.insert(key, object) {
            log::warn!("duplicate key {key:?}, replaced the previous {}", previous.kind());
        }
    }

    #[inline]
    pub fn get(&self, key: Key) -> Option<&DumpObject> {
        self.0.get(&key)
    }

    #[inline]
    pub fn get_as_data(&self, key: Key) -> Option<&DumpData> {
        self.get(key)?.as_data()
    }

    #[inline]
    pub fn get_as_map(&self, key: Key) -> Option<&DumpMap> {
        self.get(key)?.as_map()
    }

    #[inline]
    pub fn get_as_list(&self, key: Key) -> Option<&DumpList> {
        self.get(key)?.as_list()
    }

    /// Gets the data under `key`, logging an error if it is missing or is
    /// not data
    pub fn required_data(&self, key: Key) -> Option<&DumpData> {
        let data = self.get_as_data(key);
        if data.is_none() {
            log::error!("missing data {key:?}");
        }
        data
    }

    /// Gets the map under `key`, logging an error if it is missing or is not
    /// a map
    pub fn required_map(&self, key: Key) -> Option<&DumpMap> {
        let map = self.get_as_map(key);
        if map.is_none() {
            log::error!("missing map {key:?}");
        }
        map
    }

    /// Gets the list under `key`, logging an error if it is missing or is
    /// not a list
    pub fn required_list(&self, key: Key) -> Option<&DumpList> {
        let list = self.get_as_list(key);
        if list.is_none() {
            log::error!("missing list {key:?}");
        }
        list
    }

    #[inline]
    pub fn required_string(&self, key: Key) -> Option<String> {
        self.required_data(key).map(DumpData::string)
    }

    #[inline]
    pub fn required_value<T: PropertyValue>(&self, key: Key) -> Option<T> {
        self.required_data(key)?.value()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, Key, DumpObject> {
        self.0.iter()
    }
}

impl<'m> IntoIterator for &'m DumpMap {
    type Item = (&'m Key, &'m DumpObject);
    type IntoIter = std::collections::btree_map::Iter<'m, Key, DumpObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
