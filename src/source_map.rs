//! Mapping between memory addresses and source code.

use std::collections::BTreeMap;
use std::iter::FromIterator;

/// Mapping from text addresses into source information. This type is generic over the value.
/// The assembler produces a `SourceMap<usize>` of source line numbers, while the object file
/// loader recovers a `SourceMap<String>` of source lines from the comments of the object file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMap<V> {
    inner: BTreeMap<u16, V>,
}

impl<V> Default for SourceMap<V> {
    fn default() -> Self {
        SourceMap {
            inner: BTreeMap::new(),
        }
    }
}

impl<V> FromIterator<(u16, V)> for SourceMap<V> {
    fn from_iter<I>(iter: I) -> Self
        where I: IntoIterator<Item = (u16, V)>
    {
        SourceMap {
            inner: BTreeMap::from_iter(iter),
        }
    }
}

impl<V> SourceMap<V> {
    pub fn new() -> SourceMap<V> {
        SourceMap::default()
    }

    pub fn insert(&mut self, address: u16, value: V) {
        self.inner.insert(address, value);
    }

    /// Returns the source information recorded exactly for the given address.
    pub fn get(&self, address: u16) -> Option<&V> {
        self.inner.get(&address)
    }

    /// Returns the entry for the given address or, if there is none, the closest entry before
    /// it. A source instruction usually spans many micro-operations but only the first of them
    /// carries source information.
    pub fn find(&self, address: u16) -> Option<(u16, &V)> {
        self.inner
            .range(..=address)
            .next_back()
            .map(|(addr, value)| (*addr, value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &V)> {
        self.inner.iter().map(|(addr, value)| (*addr, value))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[test]
fn test_find_preceding() {
    let map: SourceMap<&str> = vec![(19, "movw $5,%ax"), (23, "ret")].into_iter().collect();

    assert_eq!(map.get(19), Some(&"movw $5,%ax"));
    assert_eq!(map.get(20), None);
    assert_eq!(map.find(22), Some((19, &"movw $5,%ax")));
    assert_eq!(map.find(23), Some((23, &"ret")));
    assert_eq!(map.find(3), None);
}
