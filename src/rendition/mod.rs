//! Renditions: per-variant metadata + pixel payload records.
//!
//! A rendition is one concrete bitmap/vector record in the archive (one
//! scale/idiom/size variant). Its serialized value is a fixed 184-byte
//! header, a run of tagged info sub-records, and a compressed pixel payload.
//!
//! Decoding is deferred: loading a rendition parses metadata only, and each
//! [`Rendition::data`] call decompresses the payload afresh. Results are
//! deliberately never memoized.

mod decode;
mod encode;

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::attributes::AttributeList;
use crate::compression::{CompressionBackend, ZlibBackend};
use crate::format::*;
use crate::util::{Error, Result};

/// Decoded pixel payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelDataFormat {
    /// Premultiplied BGRA, 8 bits per channel (4 bytes per pixel)
    PremultipliedBGRA8,
    /// Premultiplied gray + alpha, 8 bits per channel (2 bytes per pixel)
    PremultipliedGA8,
    /// Opaque data (JPEG, PDF, raw). Compression is unsupported.
    Data,
}

impl PixelDataFormat {
    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::PremultipliedBGRA8 => 4,
            Self::PremultipliedGA8 => 2,
            Self::Data => 1,
        }
    }

    /// Map a stored pixel-format fourCC to a decodable format.
    /// Codes the codec cannot decode yield `None`.
    pub fn from_fourcc(code: u32) -> Option<Self> {
        match code {
            PIXEL_FORMAT_ARGB => Some(Self::PremultipliedBGRA8),
            PIXEL_FORMAT_GA8 => Some(Self::PremultipliedGA8),
            _ => None,
        }
    }

    /// The fourCC written for this format.
    pub fn fourcc(self) -> u32 {
        match self {
            Self::PremultipliedBGRA8 => PIXEL_FORMAT_ARGB,
            Self::PremultipliedGA8 => PIXEL_FORMAT_GA8,
            Self::Data => PIXEL_FORMAT_DATA,
        }
    }
}

/// Decoded rendition payload: raw bytes plus their pixel format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionData {
    data: Vec<u8>,
    format: PixelDataFormat,
}

impl RenditionData {
    /// Wrap raw bytes in a payload.
    pub fn new(data: Vec<u8>, format: PixelDataFormat) -> Self {
        Self { data, format }
    }

    /// The raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The pixel format.
    pub fn format(&self) -> PixelDataFormat {
        self.format
    }

    /// Consume into the raw bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// One slice rectangle of a multi-part rendition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slice {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Payload storage: eager bytes, or the raw serialized value decoded fresh
/// on every access.
#[derive(Clone)]
enum Payload {
    Eager(RenditionData),
    Lazy(Arc<Vec<u8>>),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eager(data) => f
                .debug_struct("Eager")
                .field("len", &data.data().len())
                .field("format", &data.format())
                .finish(),
            Self::Lazy(raw) => f.debug_struct("Lazy").field("len", &raw.len()).finish(),
        }
    }
}

/// One concrete bitmap/vector record in the archive.
#[derive(Debug, Clone)]
pub struct Rendition {
    attributes: AttributeList,
    file_name: String,
    width: u32,
    height: u32,
    scale: f32,
    layout: Layout,
    slices: SmallVec<[Slice; 9]>,
    is_vector: bool,
    is_opaque: bool,
    uti: Option<String>,
    pixel_format: u32,
    payload: Payload,
}

impl Rendition {
    /// Create a rendition around an eager payload.
    pub fn create(attributes: AttributeList, data: RenditionData) -> Self {
        let pixel_format = data.format().fourcc();
        Self {
            attributes,
            file_name: String::new(),
            width: 0,
            height: 0,
            scale: 1.0,
            layout: Layout::OnePartFixedSize,
            slices: SmallVec::new(),
            is_vector: false,
            is_opaque: false,
            uti: None,
            pixel_format,
            payload: Payload::Eager(data),
        }
    }

    /// Load a rendition from its serialized value bytes. Parses the fixed
    /// header and the info section; payload decode is deferred.
    pub fn load(attributes: AttributeList, raw: &[u8]) -> Result<Self> {
        if raw.len() < RENDITION_HEADER_SIZE {
            return Err(Error::corrupt("rendition value truncated"));
        }
        expect_magic(raw, RENDITION_MAGIC)?;

        let flags = read_u32_le(&raw[8..]);
        let width = read_u32_le(&raw[12..]);
        let height = read_u32_le(&raw[16..]);
        let scale_factor = read_u32_le(&raw[20..]);
        let pixel_format = read_u32_le(&raw[24..]);

        let layout_code = read_u16_le(&raw[36..]);
        let layout = Layout::from_u16(layout_code)
            .ok_or_else(|| Error::corrupt(format!("unknown layout {}", layout_code)))?;

        let name_bytes = &raw[40..168];
        let name_len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        let file_name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

        let info_len = read_u32_le(&raw[168..]) as usize;
        if RENDITION_HEADER_SIZE + info_len > raw.len() {
            return Err(Error::corrupt("rendition info section truncated"));
        }

        let mut rendition = Self {
            attributes,
            file_name,
            width,
            height,
            scale: scale_factor as f32 / 100.0,
            layout,
            slices: SmallVec::new(),
            is_vector: flags & RENDITION_FLAG_IS_VECTOR != 0,
            is_opaque: flags & RENDITION_FLAG_IS_OPAQUE != 0,
            uti: None,
            pixel_format,
            payload: Payload::Lazy(Arc::new(raw.to_vec())),
        };
        rendition.parse_info(&raw[RENDITION_HEADER_SIZE..RENDITION_HEADER_SIZE + info_len])?;
        Ok(rendition)
    }

    /// Walk the tagged info sub-records. Unrecognized tags are skipped by
    /// their declared length so later records stay parseable.
    fn parse_info(&mut self, info: &[u8]) -> Result<()> {
        let mut pos = 0;
        while pos + INFO_HEADER_SIZE <= info.len() {
            let magic = read_u32_le(&info[pos..]);
            let length = read_u32_le(&info[pos + 4..]) as usize;
            let payload_at = pos + INFO_HEADER_SIZE;
            if payload_at + length > info.len() {
                return Err(Error::corrupt("rendition info record truncated"));
            }
            let payload = &info[payload_at..payload_at + length];

            match magic {
                INFO_MAGIC_SLICES => self.parse_slices(payload)?,
                INFO_MAGIC_UTI => self.parse_uti(payload)?,
                INFO_MAGIC_METRICS
                | INFO_MAGIC_COMPOSITION
                | INFO_MAGIC_BITMAP_INFO
                | INFO_MAGIC_BYTES_PER_ROW
                | INFO_MAGIC_REFERENCE
                | INFO_MAGIC_ALPHA_CROPPED_FRAME => {}
                other => {
                    debug!(magic = other, length, "skipping unknown rendition info record");
                }
            }

            pos = payload_at + length;
        }
        Ok(())
    }

    fn parse_slices(&mut self, payload: &[u8]) -> Result<()> {
        let count = self.layout.slice_count();
        if payload.len() < 4 + count * SLICE_RECORD_SIZE {
            return Err(Error::corrupt("slices info record truncated"));
        }
        let mut slices = SmallVec::new();
        for i in 0..count {
            let at = 4 + i * SLICE_RECORD_SIZE;
            slices.push(Slice {
                x: read_u32_le(&payload[at..]),
                y: read_u32_le(&payload[at + 4..]),
                width: read_u32_le(&payload[at + 8..]),
                height: read_u32_le(&payload[at + 12..]),
            });
        }
        self.slices = slices;
        Ok(())
    }

    fn parse_uti(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() < 4 {
            return Err(Error::corrupt("uti info record truncated"));
        }
        let length = read_u32_le(payload) as usize;
        if 4 + length > payload.len() {
            return Err(Error::corrupt("uti string truncated"));
        }
        self.uti = Some(String::from_utf8_lossy(&payload[4..4 + length]).into_owned());
        Ok(())
    }

    /// The rendition's attribute list.
    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// The stored file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Set the stored file name (truncated to 128 bytes on write).
    pub fn set_file_name(&mut self, name: impl Into<String>) {
        self.file_name = name.into();
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Set the width in pixels.
    pub fn set_width(&mut self, width: u32) {
        self.width = width;
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Set the height in pixels.
    pub fn set_height(&mut self, height: u32) {
        self.height = height;
    }

    /// Display scale (stored as an integer ×100).
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Set the display scale.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    /// The layout shape descriptor.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Set the layout. Resize mode and slice count follow automatically.
    pub fn set_layout(&mut self, layout: Layout) {
        self.layout = layout;
    }

    /// Resize mode, derived from the layout.
    pub fn resize_mode(&self) -> ResizeMode {
        self.layout.resize_mode()
    }

    /// Slice rectangles recovered from or destined for the slices record.
    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// Supply precomputed slice rectangles. The writer serializes whatever is
    /// present; multi-part geometry is never synthesized.
    pub fn set_slices(&mut self, slices: impl IntoIterator<Item = Slice>) {
        self.slices = slices.into_iter().collect();
    }

    /// Whether the rendition is a vector asset.
    pub fn is_vector(&self) -> bool {
        self.is_vector
    }

    /// Mark the rendition as a vector asset.
    pub fn set_vector(&mut self, is_vector: bool) {
        self.is_vector = is_vector;
    }

    /// Whether the rendition is fully opaque.
    pub fn is_opaque(&self) -> bool {
        self.is_opaque
    }

    /// Mark the rendition as fully opaque.
    pub fn set_opaque(&mut self, is_opaque: bool) {
        self.is_opaque = is_opaque;
    }

    /// A rendition is resizable iff its layout is multi-part and slices were
    /// recovered or supplied.
    pub fn is_resizable(&self) -> bool {
        self.layout.is_multi_part() && !self.slices.is_empty()
    }

    /// Uniform type identifier string, when the uti record is present.
    pub fn uti(&self) -> Option<&str> {
        self.uti.as_deref()
    }

    /// Set the uniform type identifier string.
    pub fn set_uti(&mut self, uti: impl Into<String>) {
        self.uti = Some(uti.into());
    }

    /// The stored pixel-format fourCC.
    pub fn pixel_format(&self) -> u32 {
        self.pixel_format
    }

    /// Decode the payload with the default zlib backend.
    ///
    /// Lazy payloads are decoded fresh on every call; nothing is cached.
    pub fn data(&self) -> Result<RenditionData> {
        self.data_with(&ZlibBackend)
    }

    /// Decode the payload with a caller-supplied compression backend.
    pub fn data_with(&self, backend: &dyn CompressionBackend) -> Result<RenditionData> {
        match &self.payload {
            Payload::Eager(data) => Ok(data.clone()),
            Payload::Lazy(raw) => decode::decode(raw, backend),
        }
    }

    /// Serialize the full rendition value with the default zlib backend.
    pub fn write(&self) -> Result<Vec<u8>> {
        self.write_with(&ZlibBackend)
    }

    /// Serialize the full rendition value: header, info records, compressed
    /// payload. Fails with [`Error::EmptyPayload`] when the payload is opaque
    /// data or empty.
    pub fn write_with(&self, backend: &dyn CompressionBackend) -> Result<Vec<u8>> {
        let payload = encode::encode_payload(self, backend)?;
        Ok(encode::write_record(self, &payload))
    }

    /// Serialize the rendition value around an already-encoded payload.
    /// Used by the writer to emit an empty payload when encoding degrades.
    pub(crate) fn write_record(&self, payload: &[u8]) -> Vec<u8> {
        encode::write_record(self, payload)
    }

    pub(crate) fn encode_payload(&self, backend: &dyn CompressionBackend) -> Result<Vec<u8>> {
        encode::encode_payload(self, backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AttributeIdentifier;

    fn bgra_payload(width: u32, height: u32) -> RenditionData {
        let bytes: Vec<u8> = (0..width * height * 4).map(|i| (i % 255) as u8).collect();
        RenditionData::new(bytes, PixelDataFormat::PremultipliedBGRA8)
    }

    fn sample_rendition(width: u32, height: u32) -> Rendition {
        let mut attributes = AttributeList::new();
        attributes.set(AttributeIdentifier::Identifier, 1);
        attributes.set(AttributeIdentifier::Scale, 2);

        let mut rendition = Rendition::create(attributes, bgra_payload(width, height));
        rendition.set_width(width);
        rendition.set_height(height);
        rendition.set_scale(2.0);
        rendition.set_file_name("icon@2x.png");
        rendition
    }

    #[test]
    fn test_round_trip_bgra8() {
        let rendition = sample_rendition(8, 8);
        let original = rendition.data().unwrap();

        let bytes = rendition.write().unwrap();
        let loaded = Rendition::load(rendition.attributes().clone(), &bytes).unwrap();

        assert_eq!(loaded.width(), 8);
        assert_eq!(loaded.height(), 8);
        assert_eq!(loaded.scale(), 2.0);
        assert_eq!(loaded.file_name(), "icon@2x.png");
        assert_eq!(loaded.layout(), Layout::OnePartFixedSize);

        let decoded = loaded.data().unwrap();
        assert_eq!(decoded.format(), PixelDataFormat::PremultipliedBGRA8);
        assert_eq!(decoded.data().len(), 8 * 8 * 4);
        assert_eq!(decoded.data(), original.data());
    }

    #[test]
    fn test_round_trip_ga8() {
        let mut attributes = AttributeList::new();
        attributes.set(AttributeIdentifier::Identifier, 3);
        let bytes: Vec<u8> = (0..4 * 4 * 2).map(|i| i as u8).collect();
        let mut rendition = Rendition::create(
            attributes,
            RenditionData::new(bytes.clone(), PixelDataFormat::PremultipliedGA8),
        );
        rendition.set_width(4);
        rendition.set_height(4);

        let raw = rendition.write().unwrap();
        let loaded = Rendition::load(rendition.attributes().clone(), &raw).unwrap();
        let decoded = loaded.data().unwrap();
        assert_eq!(decoded.format(), PixelDataFormat::PremultipliedGA8);
        assert_eq!(decoded.data(), &bytes[..]);
    }

    #[test]
    fn test_lazy_decode_is_fresh_each_call() {
        let rendition = sample_rendition(4, 4);
        let raw = rendition.write().unwrap();
        let loaded = Rendition::load(rendition.attributes().clone(), &raw).unwrap();

        let first = loaded.data().unwrap();
        let second = loaded.data().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_flags_round_trip() {
        let mut rendition = sample_rendition(2, 2);
        rendition.set_vector(true);
        rendition.set_opaque(true);

        let raw = rendition.write().unwrap();
        let loaded = Rendition::load(rendition.attributes().clone(), &raw).unwrap();
        assert!(loaded.is_vector());
        assert!(loaded.is_opaque());
    }

    #[test]
    fn test_resizable_requires_slices() {
        let mut rendition = sample_rendition(9, 3);
        rendition.set_layout(Layout::ThreePartHorizontalScale);
        assert!(!rendition.is_resizable());

        rendition.set_slices([
            Slice { x: 0, y: 0, width: 3, height: 3 },
            Slice { x: 3, y: 0, width: 3, height: 3 },
            Slice { x: 6, y: 0, width: 3, height: 3 },
        ]);
        assert!(rendition.is_resizable());

        let raw = rendition.write().unwrap();
        let loaded = Rendition::load(rendition.attributes().clone(), &raw).unwrap();
        assert!(loaded.is_resizable());
        assert_eq!(loaded.slices().len(), 3);
        assert_eq!(loaded.slices()[2].x, 6);
        assert_eq!(loaded.resize_mode(), ResizeMode::Scale);
    }

    #[test]
    fn test_uti_round_trip() {
        let mut rendition = sample_rendition(2, 2);
        rendition.set_uti("public.png");

        let raw = rendition.write().unwrap();
        let loaded = Rendition::load(rendition.attributes().clone(), &raw).unwrap();
        assert_eq!(loaded.uti(), Some("public.png"));
        assert_eq!(loaded.data().unwrap().data().len(), 2 * 2 * 4);
    }

    #[test]
    fn test_load_bad_magic() {
        let raw = vec![0u8; RENDITION_HEADER_SIZE];
        assert!(Rendition::load(AttributeList::new(), &raw).is_err());
    }

    #[test]
    fn test_load_truncated() {
        assert!(matches!(
            Rendition::load(AttributeList::new(), b"ISTC"),
            Err(Error::CorruptData(_))
        ));
    }

    #[test]
    fn test_unknown_info_records_are_skipped() {
        let rendition = sample_rendition(2, 2);
        let payload = rendition.encode_payload(&ZlibBackend).unwrap();
        let raw = rendition.write_record(&payload);

        // Splice an unrecognized info record ahead of the existing section.
        let info_len = read_u32_le(&raw[168..]) as usize;
        let mut patched = raw[..RENDITION_HEADER_SIZE].to_vec();
        patched.extend_from_slice(&9999u32.to_le_bytes());
        patched.extend_from_slice(&4u32.to_le_bytes());
        patched.extend_from_slice(&[0xAA; 4]);
        patched.extend_from_slice(&raw[RENDITION_HEADER_SIZE..]);
        let new_len = (info_len + 12) as u32;
        patched[168..172].copy_from_slice(&new_len.to_le_bytes());

        let loaded = Rendition::load(rendition.attributes().clone(), &patched).unwrap();
        assert_eq!(loaded.width(), 2);
        let decoded = loaded.data().unwrap();
        assert_eq!(decoded.data().len(), 2 * 2 * 4);
    }
}
