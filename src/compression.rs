//! Pluggable compression backends for rendition payloads.
//!
//! The archive wraps zlib/deflate payloads in a gzip container (the original
//! decoder runs inflate with `16 + MAX_WBITS`). The lzvn/lzfse family is a
//! host capability: backends report whether a matching native decoder is
//! available, and core codec logic branches on that flag rather than on any
//! platform check.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::format::Compression;
use crate::util::{Error, Result};

/// Compression backend consumed by the rendition codec.
pub trait CompressionBackend {
    /// Compress `data` as a gzip-wrapped deflate stream.
    fn deflate_compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress one gzip-wrapped deflate stream. `expected_size` is an
    /// upper bound used for buffer sizing; the stream may legitimately
    /// produce fewer bytes when payloads span multiple chunks.
    fn deflate_decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>>;

    /// Whether a native decoder exists for the given algorithm. Only the
    /// lzvn/lzfse family can ever be supported this way.
    fn supports_native(&self, _algorithm: Compression) -> bool {
        false
    }

    /// Decompress one chunk with a native codec. Backends without the
    /// capability fail with [`Error::UnsupportedCompression`].
    fn native_decompress(
        &self,
        _data: &[u8],
        _expected_size: usize,
        algorithm: Compression,
    ) -> Result<Vec<u8>> {
        Err(Error::UnsupportedCompression(algorithm as u32))
    }
}

/// Default backend: zlib/deflate via flate2, no native codecs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibBackend;

impl CompressionBackend for ZlibBackend {
    fn deflate_compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(data.len() / 2 + 64),
            flate2::Compression::default(),
        );
        encoder
            .write_all(data)
            .map_err(|e| Error::corrupt(format!("deflate failure: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| Error::corrupt(format!("deflate finish failure: {}", e)))
    }

    fn deflate_decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut output = Vec::with_capacity(expected_size);
        decoder
            .read_to_end(&mut output)
            .map_err(|e| Error::corrupt(format!("inflate failure: {}", e)))?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_round_trip() {
        let backend = ZlibBackend;
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();

        let compressed = backend.deflate_compress(&payload).unwrap();
        assert!(!compressed.is_empty());

        let restored = backend
            .deflate_decompress(&compressed, payload.len())
            .unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_inflate_garbage_fails() {
        let backend = ZlibBackend;
        let result = backend.deflate_decompress(&[0xde, 0xad, 0xbe, 0xef], 16);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn test_no_native_capability() {
        let backend = ZlibBackend;
        assert!(!backend.supports_native(Compression::Lzvn));
        assert!(matches!(
            backend.native_decompress(&[], 0, Compression::JpegLzfse),
            Err(Error::UnsupportedCompression(_))
        ));
    }
}
