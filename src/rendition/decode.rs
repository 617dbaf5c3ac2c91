//! Rendition payload decoding.
//!
//! The compressed payload sits immediately after the fixed header and the
//! info section. A primary chunk header carries the compression algorithm
//! tag; when the uncompressed output exceeds one compression block, the
//! remainder follows as chained secondary chunks. Decode is all-or-nothing:
//! any stream-level failure discards partial output.

use super::{PixelDataFormat, RenditionData};
use crate::compression::CompressionBackend;
use crate::format::*;
use crate::util::{Error, Result};

/// Decode the payload of a serialized rendition value.
///
/// Pure function of the stored bytes; allocates its own output buffer and
/// touches no shared state, so callers may run decodes in parallel across
/// renditions.
pub(super) fn decode(raw: &[u8], backend: &dyn CompressionBackend) -> Result<RenditionData> {
    if raw.len() < RENDITION_HEADER_SIZE {
        return Err(Error::corrupt("rendition value truncated"));
    }

    let pixel_format = read_u32_le(&raw[24..]);
    let format = PixelDataFormat::from_fourcc(pixel_format)
        .ok_or(Error::UnsupportedPixelFormat(pixel_format))?;

    let width = read_u32_le(&raw[12..]) as usize;
    let height = read_u32_le(&raw[16..]) as usize;
    let info_len = read_u32_le(&raw[168..]) as usize;
    let uncompressed_length = width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
        .ok_or_else(|| Error::corrupt("rendition dimensions overflow"))?;

    // Advance past the header and the info section; the payload starts with
    // the primary chunk header.
    let payload_at = RENDITION_HEADER_SIZE
        .checked_add(info_len)
        .filter(|&at| at + PRIMARY_CHUNK_HEADER_SIZE <= raw.len())
        .ok_or_else(|| Error::corrupt("payload chunk header out of bounds"))?;

    if &raw[payload_at..payload_at + 4] != PRIMARY_CHUNK_MAGIC {
        return Err(Error::corrupt("primary chunk magic mismatch"));
    }
    let compression_tag = read_u32_le(&raw[payload_at + 4..]);
    let primary_length = read_u32_le(&raw[payload_at + 8..]) as usize;

    let mut cursor = payload_at + PRIMARY_CHUNK_HEADER_SIZE;
    let mut chunk_length = primary_length;
    if cursor + chunk_length > raw.len() {
        return Err(Error::corrupt("primary chunk data truncated"));
    }

    // A secondary header inside the primary chunk's data is the real chunk.
    if chunk_length >= SECONDARY_CHUNK_HEADER_SIZE
        && &raw[cursor..cursor + 4] == SECONDARY_CHUNK_MAGIC
    {
        chunk_length = read_u32_le(&raw[cursor + 4..]) as usize;
        cursor += SECONDARY_CHUNK_HEADER_SIZE;
    }

    let mut output = Vec::with_capacity(uncompressed_length);
    while output.len() < uncompressed_length {
        if cursor + chunk_length > raw.len() {
            return Err(Error::corrupt("payload chunk truncated"));
        }
        let chunk = &raw[cursor..cursor + chunk_length];
        let remaining = uncompressed_length - output.len();

        let produced = decompress_chunk(chunk, remaining, compression_tag, backend)?;
        if produced.is_empty() {
            return Err(Error::corrupt("payload chunk produced no output"));
        }
        if produced.len() > remaining {
            return Err(Error::corrupt("payload chunk overran expected size"));
        }
        output.extend_from_slice(&produced);
        cursor += chunk_length;

        if output.len() < uncompressed_length {
            // Chained chunk: secondary header directly after the prior
            // chunk's compressed bytes.
            if cursor + SECONDARY_CHUNK_HEADER_SIZE > raw.len() {
                return Err(Error::corrupt("chained chunk header truncated"));
            }
            if &raw[cursor..cursor + 4] != SECONDARY_CHUNK_MAGIC {
                return Err(Error::corrupt("chained chunk magic mismatch"));
            }
            chunk_length = read_u32_le(&raw[cursor + 4..]) as usize;
            cursor += SECONDARY_CHUNK_HEADER_SIZE;
        }
    }

    Ok(RenditionData::new(output, format))
}

/// Decompress one chunk according to the payload's algorithm tag.
fn decompress_chunk(
    chunk: &[u8],
    expected_size: usize,
    compression_tag: u32,
    backend: &dyn CompressionBackend,
) -> Result<Vec<u8>> {
    let algorithm = Compression::from_u32(compression_tag)
        .ok_or(Error::UnsupportedCompression(compression_tag))?;

    match algorithm {
        Compression::Zlib => backend.deflate_decompress(chunk, expected_size),
        Compression::Lzvn | Compression::JpegLzfse => {
            if backend.supports_native(algorithm) {
                backend.native_decompress(chunk, expected_size, algorithm)
            } else {
                Err(Error::UnsupportedCompression(compression_tag))
            }
        }
        Compression::Rle | Compression::Unknown1 | Compression::BlurredImage => {
            Err(Error::UnsupportedCompression(compression_tag))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeList;
    use crate::compression::ZlibBackend;
    use crate::rendition::Rendition;

    fn record_with_payload(width: u32, height: u32, payload: &[u8]) -> Vec<u8> {
        let pixels: Vec<u8> = vec![0; (width * height * 4) as usize];
        let mut rendition = Rendition::create(
            AttributeList::new(),
            RenditionData::new(pixels, PixelDataFormat::PremultipliedBGRA8),
        );
        rendition.set_width(width);
        rendition.set_height(height);
        rendition.write_record(payload)
    }

    fn chunk_header(compression: u32, length: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PRIMARY_CHUNK_HEADER_SIZE);
        bytes.extend_from_slice(PRIMARY_CHUNK_MAGIC);
        bytes.extend_from_slice(&compression.to_le_bytes());
        bytes.extend_from_slice(&(length as u32).to_le_bytes());
        bytes
    }

    fn secondary_header(length: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SECONDARY_CHUNK_HEADER_SIZE);
        bytes.extend_from_slice(SECONDARY_CHUNK_MAGIC);
        bytes.extend_from_slice(&(length as u32).to_le_bytes());
        bytes
    }

    #[test]
    fn test_chained_chunks_match_single_chunk() {
        let backend = ZlibBackend;
        let width = 16u32;
        let height = 16u32;
        let pixels: Vec<u8> = (0..width * height * 4).map(|i| (i % 249) as u8).collect();
        let (front, back) = pixels.split_at(pixels.len() / 2);

        // Single-block encode of the full payload.
        let whole = backend.deflate_compress(&pixels).unwrap();
        let mut single = chunk_header(Compression::Zlib as u32, whole.len());
        single.extend_from_slice(&whole);
        let single_record = record_with_payload(width, height, &single);

        // The same content split into two chained chunks.
        let first = backend.deflate_compress(front).unwrap();
        let second = backend.deflate_compress(back).unwrap();
        let mut chained = chunk_header(Compression::Zlib as u32, first.len());
        chained.extend_from_slice(&first);
        chained.extend_from_slice(&secondary_header(second.len()));
        chained.extend_from_slice(&second);
        let chained_record = record_with_payload(width, height, &chained);

        let a = decode(&single_record, &backend).unwrap();
        let b = decode(&chained_record, &backend).unwrap();
        assert_eq!(a.data(), &pixels[..]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_secondary_header_inside_primary() {
        let backend = ZlibBackend;
        let pixels: Vec<u8> = (0..4 * 4 * 4).map(|i| i as u8).collect();
        let compressed = backend.deflate_compress(&pixels).unwrap();

        let mut inner = secondary_header(compressed.len());
        inner.extend_from_slice(&compressed);
        let mut payload = chunk_header(Compression::Zlib as u32, inner.len());
        payload.extend_from_slice(&inner);

        let record = record_with_payload(4, 4, &payload);
        let decoded = decode(&record, &backend).unwrap();
        assert_eq!(decoded.data(), &pixels[..]);
    }

    #[test]
    fn test_unsupported_pixel_format() {
        let backend = ZlibBackend;
        let rendition_bytes = record_with_payload(2, 2, &chunk_header(Compression::Zlib as u32, 0));
        let mut patched = rendition_bytes;
        patched[24..28].copy_from_slice(&PIXEL_FORMAT_JPEG.to_le_bytes());

        assert!(matches!(
            decode(&patched, &backend),
            Err(Error::UnsupportedPixelFormat(code)) if code == PIXEL_FORMAT_JPEG
        ));
    }

    #[test]
    fn test_unsupported_compression_tags() {
        let backend = ZlibBackend;
        for tag in [
            Compression::Rle,
            Compression::Unknown1,
            Compression::Lzvn,
            Compression::JpegLzfse,
            Compression::BlurredImage,
        ] {
            let payload = chunk_header(tag as u32, 4);
            let mut record = record_with_payload(1, 1, &payload);
            record.extend_from_slice(&[0u8; 4]);
            assert!(matches!(
                decode(&record, &backend),
                Err(Error::UnsupportedCompression(_))
            ));
        }
    }

    #[test]
    fn test_oversized_dimensions_fail() {
        let backend = ZlibBackend;
        let mut record = record_with_payload(2, 2, &chunk_header(Compression::Zlib as u32, 0));
        record[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        record[16..20].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode(&record, &backend),
            Err(Error::CorruptData(_))
        ));
    }

    #[test]
    fn test_bad_primary_magic() {
        let backend = ZlibBackend;
        let mut payload = chunk_header(Compression::Zlib as u32, 0);
        payload[0..4].copy_from_slice(b"XXXX");
        let record = record_with_payload(2, 2, &payload);
        assert!(matches!(
            decode(&record, &backend),
            Err(Error::CorruptData(_))
        ));
    }

    #[test]
    fn test_truncated_chunk_data() {
        let backend = ZlibBackend;
        // Header claims 64 compressed bytes; none follow.
        let payload = chunk_header(Compression::Zlib as u32, 64);
        let record = record_with_payload(2, 2, &payload);
        assert!(matches!(
            decode(&record, &backend),
            Err(Error::CorruptData(_))
        ));
    }

    #[test]
    fn test_garbage_stream_fails() {
        let backend = ZlibBackend;
        let garbage = [0xDEu8, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33];
        let mut payload = chunk_header(Compression::Zlib as u32, garbage.len());
        payload.extend_from_slice(&garbage);
        let record = record_with_payload(2, 2, &payload);
        assert!(matches!(
            decode(&record, &backend),
            Err(Error::CorruptData(_))
        ));
    }
}
