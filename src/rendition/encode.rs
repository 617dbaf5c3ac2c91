//! Rendition payload encoding and record assembly.
//!
//! The serialized value is assembled in fixed order: the 184-byte header,
//! then the slices / metrics / composition / bitmap-info / bytes-per-row
//! info records, then the compressed payload. Compression is always
//! zlib/deflate regardless of the declared pixel format.

use byteorder::{ByteOrder, LittleEndian};

use super::{PixelDataFormat, Rendition};
use crate::compression::CompressionBackend;
use crate::format::*;
use crate::util::{Error, Result};

/// Compress the rendition's payload, prefixed with the primary chunk header.
///
/// Fails with [`Error::EmptyPayload`] when the payload is absent, empty, or
/// opaque data; fails with decode errors when a lazy payload cannot be
/// re-decoded.
pub(super) fn encode_payload(
    rendition: &Rendition,
    backend: &dyn CompressionBackend,
) -> Result<Vec<u8>> {
    let data = rendition.data_with(backend)?;
    if data.data().is_empty() {
        return Err(Error::EmptyPayload(format!(
            "rendition '{}' has no bitmap data",
            rendition.file_name()
        )));
    }
    if data.format() == PixelDataFormat::Data {
        return Err(Error::EmptyPayload(format!(
            "rendition '{}' holds opaque data; compression unsupported",
            rendition.file_name()
        )));
    }

    let compressed = backend.deflate_compress(data.data())?;

    let mut payload = Vec::with_capacity(PRIMARY_CHUNK_HEADER_SIZE + compressed.len());
    payload.extend_from_slice(PRIMARY_CHUNK_MAGIC);
    payload.extend_from_slice(&(Compression::Zlib as u32).to_le_bytes());
    payload.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    payload.extend_from_slice(&compressed);
    Ok(payload)
}

/// Assemble the full rendition value around an already-encoded payload.
pub(super) fn write_record(rendition: &Rendition, payload: &[u8]) -> Vec<u8> {
    let slice_count = rendition.layout().slice_count();
    let slices_record_len = 4 + slice_count * SLICE_RECORD_SIZE;

    // The uti record is present only when a type identifier was supplied;
    // its string bytes are padded to a 4-byte boundary.
    let uti_record_len = match rendition.uti() {
        Some(uti) => INFO_HEADER_SIZE + 4 + pad4(uti.len()),
        None => 0,
    };

    let info_len = INFO_HEADER_SIZE + slices_record_len    // slices
        + INFO_HEADER_SIZE + 28                            // metrics
        + INFO_HEADER_SIZE + 8                             // composition
        + uti_record_len
        + INFO_HEADER_SIZE + 4                             // bitmap info
        + INFO_HEADER_SIZE + 4;                            // bytes per row

    let mut out = Vec::with_capacity(RENDITION_HEADER_SIZE + info_len + payload.len());

    // Fixed header, zero-initialized then populated.
    let mut header = [0u8; RENDITION_HEADER_SIZE];
    header[0..4].copy_from_slice(RENDITION_MAGIC);
    LittleEndian::write_u32(&mut header[4..8], RENDITION_VERSION);

    let mut flags = 0u32;
    if rendition.is_vector() {
        flags |= RENDITION_FLAG_IS_VECTOR;
    }
    if rendition.is_opaque() {
        flags |= RENDITION_FLAG_IS_OPAQUE;
    }
    flags |= 1 << RENDITION_FLAG_BITMAP_ENCODING_SHIFT;
    LittleEndian::write_u32(&mut header[8..12], flags);

    LittleEndian::write_u32(&mut header[12..16], rendition.width());
    LittleEndian::write_u32(&mut header[16..20], rendition.height());
    LittleEndian::write_u32(
        &mut header[20..24],
        (rendition.scale() * 100.0).round() as u32,
    );
    LittleEndian::write_u32(&mut header[24..28], rendition.pixel_format());
    LittleEndian::write_u32(&mut header[28..32], CAR_COLOR_SPACE_ID);

    // Metadata: modification date stays zero, layout, 128-byte name field.
    LittleEndian::write_u16(&mut header[36..38], rendition.layout() as u16);
    let name = rendition.file_name().as_bytes();
    let name_len = name.len().min(128);
    header[40..40 + name_len].copy_from_slice(&name[..name_len]);

    LittleEndian::write_u32(&mut header[168..172], info_len as u32);
    LittleEndian::write_u32(&mut header[172..176], 1); // bitmap count
    LittleEndian::write_u32(&mut header[180..184], payload.len() as u32);
    out.extend_from_slice(&header);

    write_slices(&mut out, rendition, slice_count);
    write_metrics(&mut out, rendition);
    write_composition(&mut out);
    if let Some(uti) = rendition.uti() {
        write_uti(&mut out, uti);
    }
    write_bitmap_info(&mut out);
    write_bytes_per_row(&mut out, rendition);

    out.extend_from_slice(payload);
    out
}

fn info_header(out: &mut Vec<u8>, magic: u32, length: usize) {
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&(length as u32).to_le_bytes());
}

/// Slices record. Caller-supplied slices are written verbatim (zero-padded
/// to the layout's count); only the single-slice case synthesizes the
/// full-frame rectangle. Multi-part geometry is never computed here.
fn write_slices(out: &mut Vec<u8>, rendition: &Rendition, slice_count: usize) {
    info_header(out, INFO_MAGIC_SLICES, 4 + slice_count * SLICE_RECORD_SIZE);
    out.extend_from_slice(&(slice_count as u32).to_le_bytes());

    let supplied = rendition.slices();
    for i in 0..slice_count {
        let slice = supplied.get(i).copied().unwrap_or_else(|| {
            if slice_count == 1 {
                super::Slice {
                    x: 0,
                    y: 0,
                    width: rendition.width(),
                    height: rendition.height(),
                }
            } else {
                super::Slice::default()
            }
        });
        out.extend_from_slice(&slice.x.to_le_bytes());
        out.extend_from_slice(&slice.y.to_le_bytes());
        out.extend_from_slice(&slice.width.to_le_bytes());
        out.extend_from_slice(&slice.height.to_le_bytes());
    }
}

/// Metrics record: one metric, zeroed insets, full image size.
fn write_metrics(out: &mut Vec<u8>, rendition: &Rendition) {
    info_header(out, INFO_MAGIC_METRICS, 28);
    out.extend_from_slice(&1u32.to_le_bytes()); // nmetrics
    out.extend_from_slice(&[0u8; 8]); // top right inset
    out.extend_from_slice(&[0u8; 8]); // bottom left inset
    out.extend_from_slice(&rendition.width().to_le_bytes());
    out.extend_from_slice(&rendition.height().to_le_bytes());
}

/// Composition record: normal blend mode, full opacity.
fn write_composition(out: &mut Vec<u8>) {
    info_header(out, INFO_MAGIC_COMPOSITION, 8);
    out.extend_from_slice(&0u32.to_le_bytes()); // blend mode
    out.extend_from_slice(&1.0f32.to_le_bytes()); // opacity
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// Uniform type identifier record: string length, then the string bytes
/// zero-padded to a 4-byte boundary.
fn write_uti(out: &mut Vec<u8>, uti: &str) {
    let padded = pad4(uti.len());
    info_header(out, INFO_MAGIC_UTI, 4 + padded);
    out.extend_from_slice(&(uti.len() as u32).to_le_bytes());
    out.extend_from_slice(uti.as_bytes());
    out.resize(out.len() + (padded - uti.len()), 0);
}

/// Bitmap info record: default exif orientation.
fn write_bitmap_info(out: &mut Vec<u8>) {
    info_header(out, INFO_MAGIC_BITMAP_INFO, 4);
    out.extend_from_slice(&1u32.to_le_bytes());
}

fn write_bytes_per_row(out: &mut Vec<u8>, rendition: &Rendition) {
    let bytes_per_pixel = match PixelDataFormat::from_fourcc(rendition.pixel_format()) {
        Some(format) => format.bytes_per_pixel() as u32,
        None => 0,
    };
    info_header(out, INFO_MAGIC_BYTES_PER_ROW, 4);
    out.extend_from_slice(&(rendition.width() * bytes_per_pixel).to_le_bytes());
}
