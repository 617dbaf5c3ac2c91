//! Attribute lists: unordered identifier -> value maps.
//!
//! An attribute list doubles as descriptive metadata and as the lookup key
//! for renditions, which are uniquely identified by their attributes. Key
//! serialization is positional: an externally supplied identifier ordering
//! (the archive-wide key format) decides where each value lands.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use byteorder::{ByteOrder, LittleEndian};
use smallvec::SmallVec;

pub use crate::format::AttributeIdentifier;

/// Unordered mapping of attribute identifiers to 16-bit values.
///
/// Equality and hashing are defined over the full pair set regardless of
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    values: HashMap<AttributeIdentifier, u16>,
}

impl AttributeList {
    /// Create an empty attribute list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of an attribute.
    pub fn get(&self, identifier: AttributeIdentifier) -> Option<u16> {
        self.values.get(&identifier).copied()
    }

    /// Set the value of an attribute. Inserts if absent, overwrites if present.
    pub fn set(&mut self, identifier: AttributeIdentifier, value: u16) {
        self.values.insert(identifier, value);
    }

    /// The number of attributes in the list.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Whether the list holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over the contents of the list. Unordered.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeIdentifier, u16)> + '_ {
        self.values.iter().map(|(&id, &value)| (id, value))
    }

    /// Load an attribute list from parallel identifier and value arrays, as
    /// stored alongside the archive key format. Unknown identifier codes are
    /// skipped; they cannot be represented and carry no key semantics here.
    pub fn load(identifiers: &[u32], values: &[u16]) -> Self {
        let mut list = Self::new();
        for (&raw, &value) in identifiers.iter().zip(values.iter()) {
            if let Ok(code) = u16::try_from(raw) {
                if let Some(identifier) = AttributeIdentifier::from_u16(code) {
                    list.set(identifier, value);
                }
            }
        }
        list
    }

    /// Load an attribute list from packed {identifier, value} u16 pairs, as
    /// stored in facet values.
    pub fn load_pairs(pairs: &[(u16, u16)]) -> Self {
        let mut list = Self::new();
        for &(raw, value) in pairs {
            if let Some(identifier) = AttributeIdentifier::from_u16(raw) {
                list.set(identifier, value);
            }
        }
        list
    }

    /// Serialize the list into key bytes under the given identifier ordering.
    ///
    /// Output is exactly `order.len() * 2` bytes: one little-endian u16 per
    /// identifier in `order`, zero for identifiers this list does not carry.
    /// Never fails.
    pub fn write(&self, order: &[AttributeIdentifier]) -> Vec<u8> {
        let mut bytes = vec![0u8; order.len() * 2];
        for (slot, &identifier) in order.iter().enumerate() {
            let value = self.get(identifier).unwrap_or(0);
            LittleEndian::write_u16(&mut bytes[slot * 2..slot * 2 + 2], value);
        }
        bytes
    }

    /// Pairs sorted ascending by identifier, for order-independent hashing
    /// and for serializing facet values.
    pub(crate) fn sorted_pairs(&self) -> SmallVec<[(AttributeIdentifier, u16); 8]> {
        let mut pairs: SmallVec<[(AttributeIdentifier, u16); 8]> =
            self.iter().collect();
        pairs.sort_unstable_by_key(|&(id, _)| id);
        pairs
    }
}

impl Hash for AttributeList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for pair in self.sorted_pairs() {
            pair.hash(state);
        }
    }
}

impl FromIterator<(AttributeIdentifier, u16)> for AttributeList {
    fn from_iter<T: IntoIterator<Item = (AttributeIdentifier, u16)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
