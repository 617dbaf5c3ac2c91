//! Facets: named logical asset entries.
//!
//! A facet owns a name and an attribute list. It does not own renditions;
//! the join is logical, through a shared "identifier" attribute value.

use byteorder::{ByteOrder, LittleEndian};

use crate::attributes::AttributeList;
use crate::format::{read_u16_le, AttributeIdentifier};
use crate::reader::Reader;
use crate::rendition::Rendition;
use crate::store::ContainerSource;
use crate::util::{Error, Result};

/// Named asset entry keyed by an attribute list.
#[derive(Debug, Clone, PartialEq)]
pub struct Facet {
    name: String,
    attributes: AttributeList,
    hot_spot: (u16, u16),
}

impl Facet {
    /// Create a facet from a name and attributes.
    pub fn create(name: impl Into<String>, attributes: AttributeList) -> Self {
        Self {
            name: name.into(),
            attributes,
            hot_spot: (0, 0),
        }
    }

    /// The facet name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The facet's attribute list.
    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// The facet hot spot, usually (0, 0).
    pub fn hot_spot(&self) -> (u16, u16) {
        self.hot_spot
    }

    /// Set the facet hot spot.
    pub fn set_hot_spot(&mut self, x: u16, y: u16) {
        self.hot_spot = (x, y);
    }

    /// Visit every rendition in `reader` whose "identifier" attribute equals
    /// this facet's own. No-op if the facet lacks that attribute.
    pub fn rendition_iterate<S, F>(&self, reader: &Reader<S>, mut f: F) -> Result<()>
    where
        S: ContainerSource,
        F: FnMut(&Rendition),
    {
        let facet_identifier = match self.attributes.get(AttributeIdentifier::Identifier) {
            Some(identifier) => identifier,
            None => return Ok(()),
        };

        reader.rendition_iterate(|rendition| {
            let rendition_identifier = rendition
                .attributes()
                .get(AttributeIdentifier::Identifier);
            if rendition_identifier == Some(facet_identifier) {
                f(rendition);
            }
        })
    }

    /// Load a facet from its serialized value bytes.
    ///
    /// Layout: hot spot {x:u16, y:u16}, attribute count u16, then
    /// {identifier:u16, value:u16} pairs.
    pub fn load(name: impl Into<String>, raw: &[u8]) -> Result<Self> {
        if raw.len() < 6 {
            return Err(Error::corrupt("facet value truncated"));
        }

        let hot_spot = (read_u16_le(&raw[0..]), read_u16_le(&raw[2..]));
        let count = read_u16_le(&raw[4..]) as usize;
        if raw.len() < 6 + count * 4 {
            return Err(Error::corrupt("facet attribute pairs truncated"));
        }

        let mut pairs = Vec::with_capacity(count);
        for i in 0..count {
            let at = 6 + i * 4;
            pairs.push((read_u16_le(&raw[at..]), read_u16_le(&raw[at + 2..])));
        }

        Ok(Self {
            name: name.into(),
            attributes: AttributeList::load_pairs(&pairs),
            hot_spot,
        })
    }

    /// Serialize the facet value. Pairs are written in ascending identifier
    /// order so equal facets always serialize identically.
    pub fn write(&self) -> Vec<u8> {
        let pairs = self.attributes.sorted_pairs();
        let mut bytes = vec![0u8; 6 + pairs.len() * 4];
        LittleEndian::write_u16(&mut bytes[0..2], self.hot_spot.0);
        LittleEndian::write_u16(&mut bytes[2..4], self.hot_spot.1);
        LittleEndian::write_u16(&mut bytes[4..6], pairs.len() as u16);
        for (i, &(identifier, value)) in pairs.iter().enumerate() {
            let at = 6 + i * 4;
            LittleEndian::write_u16(&mut bytes[at..at + 2], identifier as u16);
            LittleEndian::write_u16(&mut bytes[at + 2..at + 4], value);
        }
        bytes
    }
}
