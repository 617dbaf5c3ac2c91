//! Archive reader.
//!
//! Opens a container source, validates the archive header, and exposes
//! iteration and lookup over facets and renditions. Entity values are parsed
//! lazily during iteration; rendition payloads stay compressed until asked
//! for, so walking an archive's metadata never inflates pixel data.

use tracing::debug;

use crate::attributes::AttributeList;
use crate::facet::Facet;
use crate::format::*;
use crate::rendition::Rendition;
use crate::store::ContainerSource;
use crate::util::{Error, Result};

/// Read-side view of a compiled asset archive.
pub struct Reader<S: ContainerSource> {
    source: S,
    header: ArchiveHeader,
    key_format: Vec<u32>,
}

impl<S: ContainerSource> Reader<S> {
    /// Open an archive over a container source.
    ///
    /// Validates the archive header and loads the key format up front; both
    /// variables are required, so a store that never held an archive fails
    /// here rather than on first iteration.
    pub fn new(source: S) -> Result<Self> {
        let header = ArchiveHeader::parse(&source.variable(CAR_HEADER_VARIABLE)?)?;
        let key_format = parse_key_format(&source.variable(KEY_FORMAT_VARIABLE)?)?;
        debug!(
            rendition_count = header.rendition_count,
            key_format_len = key_format.len(),
            "opened archive"
        );
        Ok(Self {
            source,
            header,
            key_format,
        })
    }

    /// The parsed archive header.
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// The archive's key format as raw identifier codes, in key order.
    /// Unknown codes are preserved so key positions stay aligned.
    pub fn key_format(&self) -> &[u32] {
        &self.key_format
    }

    /// The rendition count recorded in the archive header.
    pub fn rendition_count(&self) -> u32 {
        self.header.rendition_count
    }

    /// Visit every facet, in name order.
    pub fn facet_iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Facet),
    {
        self.source.tree_iterate(FACET_KEYS_VARIABLE, &mut |key, value| {
            let name = String::from_utf8(key.to_vec())?;
            let facet = Facet::load(name, value)?;
            f(&facet);
            Ok(())
        })
    }

    /// Visit every rendition, in key order.
    ///
    /// Each rendition key holds one little-endian u16 value per key format
    /// position. Short keys fail as corrupt; a trailing odd byte is too.
    pub fn rendition_iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Rendition),
    {
        self.source
            .tree_iterate(RENDITIONS_VARIABLE, &mut |key, value| {
                let attributes = self.attributes_from_key(key)?;
                let rendition = Rendition::load(attributes, value)?;
                f(&rendition);
                Ok(())
            })
    }

    /// Look up a single facet by name.
    pub fn facet(&self, name: &str) -> Result<Option<Facet>> {
        let mut found = None;
        self.source.tree_iterate(FACET_KEYS_VARIABLE, &mut |key, value| {
            if key == name.as_bytes() {
                found = Some(Facet::load(name, value)?);
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Number of facets stored in the archive.
    pub fn facet_count(&self) -> Result<usize> {
        let mut count = 0;
        self.source
            .tree_iterate(FACET_KEYS_VARIABLE, &mut |_, _| {
                count += 1;
                Ok(())
            })?;
        Ok(count)
    }

    fn attributes_from_key(&self, key: &[u8]) -> Result<AttributeList> {
        if key.len() % 2 != 0 || key.len() / 2 != self.key_format.len() {
            return Err(Error::corrupt(format!(
                "rendition key holds {} bytes for {} key format positions",
                key.len(),
                self.key_format.len()
            )));
        }
        let values: Vec<u16> = key
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(AttributeList::load(&self.key_format, &values))
    }
}
