//! Archive writer.
//!
//! A writer accumulates facets and renditions, then performs one terminal
//! [`Writer::write`]: it derives the archive-wide key format, serializes
//! every entity into the container store, and flushes. Single-threaded by
//! design; the store handle is exclusively borrowed for the writer's
//! lifetime, so nothing else can insert concurrently.

use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::{debug, warn};

use crate::compression::{CompressionBackend, ZlibBackend};
use crate::facet::Facet;
use crate::format::*;
use crate::rendition::Rendition;
use crate::store::ContainerStore;
use crate::util::{Error, Result};

/// One rendition whose payload could not be encoded. The record was still
/// written, with an empty payload.
#[derive(Debug)]
pub struct EncodeFailure {
    pub file_name: String,
    pub identifier: u16,
    pub error: Error,
}

/// Outcome of a completed write. Per-rendition encode failures degrade to
/// empty payloads and are reported here instead of aborting the batch.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub facet_count: usize,
    pub rendition_count: usize,
    /// [`Error::MissingIdentifier`] per rendition excluded at add time.
    /// Non-fatal; excluded renditions are simply absent from the archive.
    pub excluded: Vec<Error>,
    pub encode_failures: Vec<EncodeFailure>,
}

impl WriteReport {
    /// Whether every rendition payload encoded cleanly.
    pub fn is_complete(&self) -> bool {
        self.encode_failures.is_empty()
    }
}

/// Assembles facets and renditions into a container store.
pub struct Writer<'a, S: ContainerStore> {
    store: &'a mut S,
    facets: HashMap<String, Facet>,
    renditions: Vec<(u16, Rendition)>,
    excluded: Vec<Error>,
}

impl<'a, S: ContainerStore> Writer<'a, S> {
    /// Create a writer over an open container store.
    pub fn new(store: &'a mut S) -> Self {
        Self {
            store,
            facets: HashMap::new(),
            renditions: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// Add a facet, keyed by name. Last write wins on duplicates.
    pub fn add_facet(&mut self, facet: Facet) {
        self.facets.insert(facet.name().to_string(), facet);
    }

    /// Add a rendition, keyed by its "identifier" attribute. Renditions
    /// lacking that attribute cannot be indexed; they are excluded from the
    /// archive and surfaced in the report rather than aborting anything.
    pub fn add_rendition(&mut self, rendition: Rendition) {
        match rendition.attributes().get(AttributeIdentifier::Identifier) {
            Some(identifier) => self.renditions.push((identifier, rendition)),
            None => {
                let error = Error::MissingIdentifier(rendition.file_name().to_string());
                debug!(%error, "excluding rendition from archive");
                self.excluded.push(error);
            }
        }
    }

    /// The canonical key format: the union of all facet and rendition
    /// attribute identifiers, sorted ascending. Recomputed on every call, so
    /// the same entity set always yields the same ordering.
    pub fn key_format(&self) -> Vec<AttributeIdentifier> {
        let mut identifiers = BTreeSet::new();
        for facet in self.facets.values() {
            identifiers.extend(facet.attributes().iter().map(|(id, _)| id));
        }
        for (_, rendition) in &self.renditions {
            identifiers.extend(rendition.attributes().iter().map(|(id, _)| id));
        }
        identifiers.into_iter().collect()
    }

    /// Write the archive with a thread-local random source and the default
    /// zlib backend.
    pub fn write(self) -> Result<WriteReport> {
        let mut rng = rand::thread_rng();
        self.write_with(&mut rng, &ZlibBackend)
    }

    /// Write the archive. The random source feeds the header UUID; injecting
    /// a seeded generator makes writes deterministic for tests.
    pub fn write_with(
        self,
        rng: &mut impl Rng,
        backend: &dyn CompressionBackend,
    ) -> Result<WriteReport> {
        let key_format = self.key_format();

        // Archive header under its reserved variable. Store failures here
        // are fatal to the whole write.
        let uuid: [u8; 16] = rng.gen();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        let header = ArchiveHeader::new(uuid, timestamp, self.renditions.len() as u32);
        let header_index = self.store.add_blob(&header.to_bytes())?;
        self.store
            .register_variable(CAR_HEADER_VARIABLE, header_index)?;

        // Key format record.
        let key_format_index = self.store.add_blob(&write_key_format(&key_format))?;
        self.store
            .register_variable(KEY_FORMAT_VARIABLE, key_format_index)?;

        // Facets, under their name keys.
        let facets_tree = self.store.tree(FACET_KEYS_VARIABLE)?;
        for (name, facet) in &self.facets {
            self.store
                .insert(facets_tree, name.as_bytes(), &facet.write())?;
        }

        // Renditions: key bytes per the key format, value is the encoded
        // record. Payload failures degrade to an empty payload.
        let renditions_tree = self.store.tree(RENDITIONS_VARIABLE)?;
        let mut encode_failures = Vec::new();
        for (identifier, rendition) in &self.renditions {
            let key = rendition.attributes().write(&key_format);
            let value = match rendition.encode_payload(backend) {
                Ok(payload) => rendition.write_record(&payload),
                Err(error) => {
                    warn!(
                        file_name = rendition.file_name(),
                        identifier,
                        %error,
                        "rendition payload failed to encode; writing empty payload"
                    );
                    let record = rendition.write_record(&[]);
                    encode_failures.push(EncodeFailure {
                        file_name: rendition.file_name().to_string(),
                        identifier: *identifier,
                        error,
                    });
                    record
                }
            };
            self.store.insert(renditions_tree, &key, &value)?;
        }

        self.store.flush()?;

        Ok(WriteReport {
            facet_count: self.facets.len(),
            rendition_count: self.renditions.len(),
            excluded: self.excluded,
            encode_failures,
        })
    }
}
