//! Ordered key/value container store interface.
//!
//! The archive's outer format is a generic container store: named blobs
//! ("variables") plus named ordered subtrees of key/value entries. The store
//! internals are a collaborator, consumed behind the [`ContainerStore`] /
//! [`ContainerSource`] traits so real container backends can be plugged in.
//!
//! This module also ships a flat stand-in implementation used by the default
//! pipeline and the test suite:
//!
//! ```text
//! +------------------+
//! | Magic: "CST1"    |  4 bytes
//! +------------------+
//! | Variable count   |  4 bytes (u32 LE)
//! +------------------+
//! | Tree count       |  4 bytes (u32 LE)
//! +------------------+
//! | Variables        |  name_len, name, data_len, data
//! +------------------+
//! | Trees            |  name_len, name, entry_count, entries (key order)
//! +------------------+
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use parking_lot::RwLock;

use crate::format::read_u32_le;
use crate::util::{Error, Result};

/// Magic bytes at the start of a flat store file.
pub const STORE_MAGIC: &[u8; 4] = b"CST1";

/// Size of the flat store header in bytes.
pub const STORE_HEADER_SIZE: usize = 12;

/// Opaque handle to a subtree inside a container store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHandle(usize);

/// Write side of the container store collaborator.
pub trait ContainerStore {
    /// Add an anonymous blob, returning its index.
    fn add_blob(&mut self, data: &[u8]) -> Result<u32>;

    /// Bind a name to a previously added blob index.
    fn register_variable(&mut self, name: &str, index: u32) -> Result<()>;

    /// Get or create the named subtree.
    fn tree(&mut self, name: &str) -> Result<TreeHandle>;

    /// Insert a key/value entry into a subtree. Last write wins on equal keys.
    fn insert(&mut self, tree: TreeHandle, key: &[u8], value: &[u8]) -> Result<()>;

    /// Flush everything to the underlying sink. Terminal.
    fn flush(&mut self) -> Result<()>;
}

/// Read side of the container store collaborator.
pub trait ContainerSource {
    /// Fetch a named blob.
    fn variable(&self, name: &str) -> Result<Vec<u8>>;

    /// Visit every entry of the named subtree in ascending key order.
    /// A missing tree is an empty tree.
    fn tree_iterate(
        &self,
        name: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()>;
}

// ============================================================================
// Flat store writer
// ============================================================================

/// Flat store accumulating in memory, serialized on [`ContainerStore::flush`].
pub struct FlatStoreWriter<W: Write> {
    sink: W,
    blobs: Vec<Vec<u8>>,
    variables: Vec<(String, u32)>,
    trees: Vec<(String, BTreeMap<Vec<u8>, Vec<u8>>)>,
    flushed: bool,
}

impl FlatStoreWriter<BufWriter<File>> {
    /// Create a flat store writing to the given file path.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_sink(BufWriter::with_capacity(
            2 * 1024 * 1024,
            file,
        )))
    }
}

impl<W: Write> FlatStoreWriter<W> {
    /// Create a flat store writing to an arbitrary byte sink.
    pub fn from_sink(sink: W) -> Self {
        Self {
            sink,
            blobs: Vec::new(),
            variables: Vec::new(),
            trees: Vec::new(),
            flushed: false,
        }
    }

    fn write_sized(sink: &mut W, bytes: &[u8]) -> Result<()> {
        sink.write_u32::<LittleEndian>(bytes.len() as u32)?;
        sink.write_all(bytes)?;
        Ok(())
    }
}

impl<W: Write> ContainerStore for FlatStoreWriter<W> {
    fn add_blob(&mut self, data: &[u8]) -> Result<u32> {
        let index = self.blobs.len() as u32;
        self.blobs.push(data.to_vec());
        Ok(index)
    }

    fn register_variable(&mut self, name: &str, index: u32) -> Result<()> {
        if index as usize >= self.blobs.len() {
            return Err(Error::AllocationFailure(format!(
                "no blob at index {}",
                index
            )));
        }
        self.variables.push((name.to_string(), index));
        Ok(())
    }

    fn tree(&mut self, name: &str) -> Result<TreeHandle> {
        if let Some(at) = self.trees.iter().position(|(n, _)| n == name) {
            return Ok(TreeHandle(at));
        }
        self.trees.push((name.to_string(), BTreeMap::new()));
        Ok(TreeHandle(self.trees.len() - 1))
    }

    fn insert(&mut self, tree: TreeHandle, key: &[u8], value: &[u8]) -> Result<()> {
        let (_, entries) = self
            .trees
            .get_mut(tree.0)
            .ok_or_else(|| Error::AllocationFailure(format!("no tree handle {}", tree.0)))?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.flushed {
            return Err(Error::other("store already flushed"));
        }

        self.sink.write_all(STORE_MAGIC)?;
        self.sink
            .write_u32::<LittleEndian>(self.variables.len() as u32)?;
        self.sink.write_u32::<LittleEndian>(self.trees.len() as u32)?;

        for (name, index) in &self.variables {
            Self::write_sized(&mut self.sink, name.as_bytes())?;
            Self::write_sized(&mut self.sink, &self.blobs[*index as usize])?;
        }

        for (name, entries) in &self.trees {
            Self::write_sized(&mut self.sink, name.as_bytes())?;
            self.sink.write_u32::<LittleEndian>(entries.len() as u32)?;
            for (key, value) in entries {
                Self::write_sized(&mut self.sink, key)?;
                Self::write_sized(&mut self.sink, value)?;
            }
        }

        self.sink.flush()?;
        self.flushed = true;
        Ok(())
    }
}

// ============================================================================
// Flat store reader
// ============================================================================

enum SourceInner {
    /// Memory-mapped file (preferred)
    Mmap(Mmap),
    /// Buffered file access (fallback)
    File(Arc<RwLock<File>>),
    /// In-memory buffer
    Buffer(Vec<u8>),
}

/// Flat store reader over a file or in-memory buffer.
///
/// The whole table of contents is parsed on open; blob and entry payloads are
/// fetched on demand.
pub struct FlatStoreReader {
    inner: SourceInner,
    size: u64,
    variables: Vec<(String, Span)>,
    trees: Vec<(String, Vec<(Span, Span)>)>,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    pos: u64,
    len: usize,
}

impl FlatStoreReader {
    /// Open a flat store file, memory-mapping it when possible.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_opts(path, cfg!(feature = "mmap"))
    }

    /// Open a flat store file with optional memory mapping.
    pub fn open_opts(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;

        let size = file.metadata()?.len();
        if size < STORE_HEADER_SIZE as u64 {
            return Err(Error::UnexpectedEof(size));
        }

        let inner = if use_mmap && size > 0 {
            // Safety: file is opened read-only
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            SourceInner::Mmap(mmap)
        } else {
            SourceInner::File(Arc::new(RwLock::new(file)))
        };

        Self::from_inner(inner, size)
    }

    /// Open a flat store from an in-memory buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let size = bytes.len() as u64;
        Self::from_inner(SourceInner::Buffer(bytes), size)
    }

    fn from_inner(inner: SourceInner, size: u64) -> Result<Self> {
        let mut reader = Self {
            inner,
            size,
            variables: Vec::new(),
            trees: Vec::new(),
        };
        reader.parse_toc()?;
        Ok(reader)
    }

    /// Total store size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    fn read_bytes(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        if pos + len as u64 > self.size {
            return Err(Error::UnexpectedEof(pos + len as u64));
        }
        match &self.inner {
            SourceInner::Mmap(mmap) => Ok(mmap[pos as usize..pos as usize + len].to_vec()),
            SourceInner::Buffer(buf) => Ok(buf[pos as usize..pos as usize + len].to_vec()),
            SourceInner::File(file) => {
                let mut f = file.write();
                f.seek(SeekFrom::Start(pos))?;
                let mut buf = vec![0u8; len];
                f.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }

    fn read_u32(&self, pos: u64) -> Result<u32> {
        let bytes = self.read_bytes(pos, 4)?;
        Ok(read_u32_le(&bytes))
    }

    /// Read a length-prefixed field, returning its span and advancing `pos`.
    fn read_span(&self, pos: &mut u64) -> Result<Span> {
        let len = self.read_u32(*pos)? as usize;
        let span = Span {
            pos: *pos + 4,
            len,
        };
        *pos += 4 + len as u64;
        if *pos > self.size {
            return Err(Error::UnexpectedEof(*pos));
        }
        Ok(span)
    }

    fn read_name(&self, pos: &mut u64) -> Result<String> {
        let span = self.read_span(pos)?;
        String::from_utf8(self.read_bytes(span.pos, span.len)?).map_err(Error::from)
    }

    fn parse_toc(&mut self) -> Result<()> {
        let magic = self.read_bytes(0, 4)?;
        if magic != STORE_MAGIC {
            return Err(Error::InvalidMagic {
                expected: *STORE_MAGIC,
                actual: [magic[0], magic[1], magic[2], magic[3]],
            });
        }

        let variable_count = self.read_u32(4)?;
        let tree_count = self.read_u32(8)?;
        let mut pos = STORE_HEADER_SIZE as u64;

        for _ in 0..variable_count {
            let name = self.read_name(&mut pos)?;
            let data = self.read_span(&mut pos)?;
            self.variables.push((name, data));
        }

        for _ in 0..tree_count {
            let name = self.read_name(&mut pos)?;
            let entry_count = self.read_u32(pos)?;
            pos += 4;

            let mut entries = Vec::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                let key = self.read_span(&mut pos)?;
                let value = self.read_span(&mut pos)?;
                entries.push((key, value));
            }
            self.trees.push((name, entries));
        }

        Ok(())
    }
}

impl ContainerSource for FlatStoreReader {
    fn variable(&self, name: &str) -> Result<Vec<u8>> {
        let span = self
            .variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, span)| *span)
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))?;
        self.read_bytes(span.pos, span.len)
    }

    fn tree_iterate(
        &self,
        name: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let entries = match self.trees.iter().find(|(n, _)| n == name) {
            Some((_, entries)) => entries,
            None => return Ok(()),
        };
        for (key, value) in entries {
            let key_bytes = self.read_bytes(key.pos, key.len)?;
            let value_bytes = self.read_bytes(value.pos, value.len)?;
            f(&key_bytes, &value_bytes)?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory store (both sides)
// ============================================================================

/// In-memory store implementing both collaborator traits. Used in tests and
/// wherever no file round trip is wanted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Vec<Vec<u8>>,
    variables: Vec<(String, u32)>,
    trees: Vec<(String, BTreeMap<Vec<u8>, Vec<u8>>)>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContainerStore for MemoryStore {
    fn add_blob(&mut self, data: &[u8]) -> Result<u32> {
        let index = self.blobs.len() as u32;
        self.blobs.push(data.to_vec());
        Ok(index)
    }

    fn register_variable(&mut self, name: &str, index: u32) -> Result<()> {
        if index as usize >= self.blobs.len() {
            return Err(Error::AllocationFailure(format!(
                "no blob at index {}",
                index
            )));
        }
        self.variables.push((name.to_string(), index));
        Ok(())
    }

    fn tree(&mut self, name: &str) -> Result<TreeHandle> {
        if let Some(at) = self.trees.iter().position(|(n, _)| n == name) {
            return Ok(TreeHandle(at));
        }
        self.trees.push((name.to_string(), BTreeMap::new()));
        Ok(TreeHandle(self.trees.len() - 1))
    }

    fn insert(&mut self, tree: TreeHandle, key: &[u8], value: &[u8]) -> Result<()> {
        let (_, entries) = self
            .trees
            .get_mut(tree.0)
            .ok_or_else(|| Error::AllocationFailure(format!("no tree handle {}", tree.0)))?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ContainerSource for MemoryStore {
    fn variable(&self, name: &str) -> Result<Vec<u8>> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, index)| self.blobs[*index as usize].clone())
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))
    }

    fn tree_iterate(
        &self,
        name: &str,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let entries = match self.trees.iter().find(|(n, _)| n == name) {
            Some((_, entries)) => entries,
            None => return Ok(()),
        };
        for (key, value) in entries {
            f(key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(store: &mut impl ContainerStore) {
        let index = store.add_blob(b"header bytes").unwrap();
        store.register_variable("HEADER", index).unwrap();

        let tree = store.tree("ENTRIES").unwrap();
        store.insert(tree, b"beta", b"2").unwrap();
        store.insert(tree, b"alpha", b"1").unwrap();
        store.insert(tree, b"alpha", b"one").unwrap(); // last write wins
    }

    fn check(source: &impl ContainerSource) {
        assert_eq!(source.variable("HEADER").unwrap(), b"header bytes");
        assert!(matches!(
            source.variable("MISSING"),
            Err(Error::VariableNotFound(_))
        ));

        let mut seen = Vec::new();
        source
            .tree_iterate("ENTRIES", &mut |key, value| {
                seen.push((key.to_vec(), value.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (b"alpha".to_vec(), b"one".to_vec()),
                (b"beta".to_vec(), b"2".to_vec()),
            ]
        );

        // Missing tree iterates nothing
        source
            .tree_iterate("NOPE", &mut |_, _| panic!("unexpected entry"))
            .unwrap();
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        populate(&mut store);
        check(&store);
    }

    #[test]
    fn test_flat_store_buffer_round_trip() {
        let mut writer = FlatStoreWriter::from_sink(Vec::new());
        populate(&mut writer);
        writer.flush().unwrap();

        let reader = FlatStoreReader::from_bytes(writer.sink).unwrap();
        check(&reader);
    }

    #[test]
    fn test_flat_store_file_round_trip() {
        let temp = tempfile::NamedTempFile::new().unwrap();

        let mut writer = FlatStoreWriter::create(temp.path()).unwrap();
        populate(&mut writer);
        writer.flush().unwrap();

        let reader = FlatStoreReader::open(temp.path()).unwrap();
        check(&reader);

        let reader = FlatStoreReader::open_opts(temp.path(), false).unwrap();
        check(&reader);
    }

    #[test]
    fn test_double_flush_fails() {
        let mut writer = FlatStoreWriter::from_sink(Vec::new());
        writer.flush().unwrap();
        assert!(writer.flush().is_err());
    }

    #[test]
    fn test_register_unknown_blob_fails() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            store.register_variable("X", 3),
            Err(Error::AllocationFailure(_))
        ));
    }

    #[test]
    fn test_truncated_store_fails() {
        let result = FlatStoreReader::from_bytes(b"CST1\x01".to_vec());
        assert!(result.is_err());
    }
}
