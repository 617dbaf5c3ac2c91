//! Compiled asset archive format constants and fixed structures.
//!
//! All integers are little-endian. The archive is built on top of an ordered
//! key/value container store; the records described here are the blobs and
//! tree entries stored inside it.
//!
//! ## Record overview
//!
//! ```text
//! CARHEADER   -> archive header blob (436 bytes)
//! KEYFORMAT   -> key format record (12 bytes + 4 per identifier)
//! FACETKEYS   -> tree: facet name -> facet value (hot spot + attribute pairs)
//! RENDITIONS  -> tree: key bytes (per KEYFORMAT) -> rendition value
//! ```

use crate::util::{Error, Result};

/// Magic bytes at the start of the archive header blob.
pub const CAR_HEADER_MAGIC: &[u8; 4] = b"RATC";

/// Magic bytes of the key format record.
pub const KEY_FORMAT_MAGIC: &[u8; 4] = b"kfmt";

/// Magic bytes of each rendition value header.
pub const RENDITION_MAGIC: &[u8; 4] = b"ISTC";

/// Magic bytes of the primary compressed-payload chunk header.
pub const PRIMARY_CHUNK_MAGIC: &[u8; 4] = b"MLEC";

/// Magic bytes of chained secondary chunk headers.
pub const SECONDARY_CHUNK_MAGIC: &[u8; 4] = b"KCBC";

/// Size of the archive header blob in bytes.
pub const CAR_HEADER_SIZE: usize = 436;

/// Size of the fixed rendition value header in bytes.
pub const RENDITION_HEADER_SIZE: usize = 184;

/// Size of an info sub-record header ({magic, length}) in bytes.
pub const INFO_HEADER_SIZE: usize = 8;

/// Size of the primary chunk header ({magic, compression, length}) in bytes.
pub const PRIMARY_CHUNK_HEADER_SIZE: usize = 12;

/// Size of a secondary chunk header ({magic, length}) in bytes.
pub const SECONDARY_CHUNK_HEADER_SIZE: usize = 8;

/// Size of one slice record ({x, y, width, height}) in bytes.
pub const SLICE_RECORD_SIZE: usize = 16;

/// Store variable name of the archive header blob.
pub const CAR_HEADER_VARIABLE: &str = "CARHEADER";

/// Store variable name of the key format blob.
pub const KEY_FORMAT_VARIABLE: &str = "KEYFORMAT";

/// Store subtree name holding facet entries.
pub const FACET_KEYS_VARIABLE: &str = "FACETKEYS";

/// Store subtree name holding rendition entries.
pub const RENDITIONS_VARIABLE: &str = "RENDITIONS";

/// `ui_version` written into new archive headers.
pub const CAR_UI_VERSION: u32 = 0x131;

/// `storage_version` written into new archive headers.
pub const CAR_STORAGE_VERSION: u32 = 0xC;

/// `schema_version` written into new archive headers.
pub const CAR_SCHEMA_VERSION: u32 = 4;

/// `color_space_id` written into new archive headers and renditions.
pub const CAR_COLOR_SPACE_ID: u32 = 1;

/// `key_semantics` written into new archive headers.
pub const CAR_KEY_SEMANTICS: u32 = 1;

/// Primary creator string in the archive header (128-byte field).
pub const CAR_FILE_CREATOR: &str = "asset catalog compiler\n";

/// Secondary creator string in the archive header (256-byte field).
pub const CAR_OTHER_CREATOR: &str = "version 1.0";

/// Rendition value header version.
pub const RENDITION_VERSION: u32 = 1;

// Rendition flag bits.
pub const RENDITION_FLAG_IS_VECTOR: u32 = 1 << 2;
pub const RENDITION_FLAG_IS_OPAQUE: u32 = 1 << 3;
pub const RENDITION_FLAG_BITMAP_ENCODING_SHIFT: u32 = 4;
pub const RENDITION_FLAG_BITMAP_ENCODING_MASK: u32 = 0xF << 4;

// Pixel format fourCC codes, stored as big-endian character constants.
pub const PIXEL_FORMAT_ARGB: u32 = 0x4152_4742; // 'ARGB'
pub const PIXEL_FORMAT_GA8: u32 = 0x4741_3820; // 'GA8 '
pub const PIXEL_FORMAT_DATA: u32 = 0x4441_5441; // 'DATA'
pub const PIXEL_FORMAT_JPEG: u32 = 0x4a50_4547; // 'JPEG'
pub const PIXEL_FORMAT_PDF: u32 = 0x5044_4620; // 'PDF '

// Info sub-record magics.
pub const INFO_MAGIC_SLICES: u32 = 1001;
pub const INFO_MAGIC_METRICS: u32 = 1003;
pub const INFO_MAGIC_COMPOSITION: u32 = 1004;
pub const INFO_MAGIC_UTI: u32 = 1005;
pub const INFO_MAGIC_BITMAP_INFO: u32 = 1006;
pub const INFO_MAGIC_BYTES_PER_ROW: u32 = 1007;
pub const INFO_MAGIC_REFERENCE: u32 = 1010;
pub const INFO_MAGIC_ALPHA_CROPPED_FRAME: u32 = 1011;

/// Attribute identifier domain. Identifiers key both facet attribute pairs
/// and the serialized rendition keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum AttributeIdentifier {
    Element = 1,
    Part = 2,
    Size = 3,
    Direction = 4,
    Placeholder = 5,
    Value = 6,
    Appearance = 7,
    Dimension1 = 8,
    Dimension2 = 9,
    State = 10,
    Layer = 11,
    Scale = 12,
    Unknown13 = 13,
    PresentationState = 14,
    Idiom = 15,
    Subtype = 16,
    Identifier = 17,
    PreviousValue = 18,
    PreviousState = 19,
    SizeClassHorizontal = 20,
    SizeClassVertical = 21,
    MemoryClass = 22,
    GraphicsClass = 23,
    DisplayGamut = 24,
    DeploymentTarget = 25,
}

impl AttributeIdentifier {
    /// All known identifiers in ascending numeric order.
    pub const ALL: [AttributeIdentifier; 25] = [
        Self::Element,
        Self::Part,
        Self::Size,
        Self::Direction,
        Self::Placeholder,
        Self::Value,
        Self::Appearance,
        Self::Dimension1,
        Self::Dimension2,
        Self::State,
        Self::Layer,
        Self::Scale,
        Self::Unknown13,
        Self::PresentationState,
        Self::Idiom,
        Self::Subtype,
        Self::Identifier,
        Self::PreviousValue,
        Self::PreviousState,
        Self::SizeClassHorizontal,
        Self::SizeClassVertical,
        Self::MemoryClass,
        Self::GraphicsClass,
        Self::DisplayGamut,
        Self::DeploymentTarget,
    ];

    /// Convert a raw identifier code. Unknown codes yield `None`.
    pub fn from_u16(value: u16) -> Option<Self> {
        if value >= 1 && value <= 25 {
            Some(Self::ALL[(value - 1) as usize])
        } else {
            None
        }
    }
}

/// Enumerated rendition shape. Drives resize mode and slice count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Layout {
    OnePartFixedSize = 10,
    OnePartTile = 11,
    OnePartScale = 12,
    ThreePartHorizontalTile = 20,
    ThreePartHorizontalScale = 21,
    ThreePartHorizontalUniform = 22,
    ThreePartVerticalTile = 23,
    ThreePartVerticalScale = 24,
    ThreePartVerticalUniform = 25,
    NinePartTile = 30,
    NinePartScale = 31,
    NinePartHorizontalUniformVerticalScale = 32,
    NinePartHorizontalScaleVerticalUniform = 33,
    SixPart = 40,
    Gradient = 50,
    Effect = 60,
    AnimationFilmstrip = 70,
    RawData = 90,
    ExternalLink = 91,
    LayerStack = 92,
    InternalLink = 93,
    AssetPack = 94,
}

impl Layout {
    /// Convert a raw layout code. Unknown codes yield `None`.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            10 => Some(Self::OnePartFixedSize),
            11 => Some(Self::OnePartTile),
            12 => Some(Self::OnePartScale),
            20 => Some(Self::ThreePartHorizontalTile),
            21 => Some(Self::ThreePartHorizontalScale),
            22 => Some(Self::ThreePartHorizontalUniform),
            23 => Some(Self::ThreePartVerticalTile),
            24 => Some(Self::ThreePartVerticalScale),
            25 => Some(Self::ThreePartVerticalUniform),
            30 => Some(Self::NinePartTile),
            31 => Some(Self::NinePartScale),
            32 => Some(Self::NinePartHorizontalUniformVerticalScale),
            33 => Some(Self::NinePartHorizontalScaleVerticalUniform),
            40 => Some(Self::SixPart),
            50 => Some(Self::Gradient),
            60 => Some(Self::Effect),
            70 => Some(Self::AnimationFilmstrip),
            90 => Some(Self::RawData),
            91 => Some(Self::ExternalLink),
            92 => Some(Self::LayerStack),
            93 => Some(Self::InternalLink),
            94 => Some(Self::AssetPack),
            _ => None,
        }
    }

    /// Number of slice records this layout carries.
    pub fn slice_count(self) -> usize {
        match self {
            Self::OnePartFixedSize | Self::OnePartTile | Self::OnePartScale => 1,

            Self::ThreePartHorizontalTile
            | Self::ThreePartHorizontalScale
            | Self::ThreePartHorizontalUniform
            | Self::ThreePartVerticalTile
            | Self::ThreePartVerticalScale
            | Self::ThreePartVerticalUniform => 3,

            Self::NinePartTile
            | Self::NinePartScale
            | Self::NinePartHorizontalUniformVerticalScale
            | Self::NinePartHorizontalScaleVerticalUniform => 9,

            Self::SixPart => 6,

            Self::Gradient
            | Self::Effect
            | Self::AnimationFilmstrip
            | Self::RawData
            | Self::ExternalLink
            | Self::LayerStack
            | Self::InternalLink
            | Self::AssetPack => 0,
        }
    }

    /// Resize mode implied by this layout.
    pub fn resize_mode(self) -> ResizeMode {
        match self {
            Self::OnePartFixedSize
            | Self::ThreePartHorizontalUniform
            | Self::ThreePartVerticalUniform => ResizeMode::FixedSize,

            Self::OnePartTile
            | Self::ThreePartHorizontalTile
            | Self::ThreePartVerticalTile
            | Self::NinePartTile => ResizeMode::Tile,

            Self::OnePartScale
            | Self::ThreePartHorizontalScale
            | Self::ThreePartVerticalScale
            | Self::NinePartScale => ResizeMode::Scale,

            Self::NinePartHorizontalUniformVerticalScale => {
                ResizeMode::HorizontalUniformVerticalScale
            }
            Self::NinePartHorizontalScaleVerticalUniform => {
                ResizeMode::HorizontalScaleVerticalUniform
            }

            Self::SixPart
            | Self::Gradient
            | Self::Effect
            | Self::AnimationFilmstrip
            | Self::RawData
            | Self::ExternalLink
            | Self::LayerStack
            | Self::InternalLink
            | Self::AssetPack => ResizeMode::FixedSize,
        }
    }

    /// Whether this layout is in the multi-part range that can be resizable
    /// (given recovered slices).
    pub fn is_multi_part(self) -> bool {
        let code = self as u16;
        (Self::ThreePartHorizontalTile as u16..=Self::NinePartHorizontalScaleVerticalUniform as u16)
            .contains(&code)
    }
}

/// How a rendition stretches when drawn at a non-native size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeMode {
    FixedSize,
    Tile,
    Scale,
    HorizontalUniformVerticalScale,
    HorizontalScaleVerticalUniform,
}

/// Compression algorithm tag carried by the primary chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Compression {
    Rle = 0,
    Unknown1 = 1,
    Zlib = 2,
    Lzvn = 3,
    JpegLzfse = 4,
    BlurredImage = 5,
}

impl Compression {
    /// Convert a raw compression tag. Unknown tags yield `None`.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Rle),
            1 => Some(Self::Unknown1),
            2 => Some(Self::Zlib),
            3 => Some(Self::Lzvn),
            4 => Some(Self::JpegLzfse),
            5 => Some(Self::BlurredImage),
            _ => None,
        }
    }
}

// ============================================================================
// Archive header record
// ============================================================================

/// Parsed archive header blob (the `CARHEADER` variable, 436 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub ui_version: u32,
    pub storage_version: u32,
    pub storage_timestamp: u32,
    pub rendition_count: u32,
    pub file_creator: String,
    pub other_creator: String,
    pub uuid: [u8; 16],
    pub associated_checksum: u32,
    pub schema_version: u32,
    pub color_space_id: u32,
    pub key_semantics: u32,
}

impl ArchiveHeader {
    /// Build a header for a fresh archive.
    pub fn new(uuid: [u8; 16], storage_timestamp: u32, rendition_count: u32) -> Self {
        Self {
            ui_version: CAR_UI_VERSION,
            storage_version: CAR_STORAGE_VERSION,
            storage_timestamp,
            rendition_count,
            file_creator: CAR_FILE_CREATOR.to_string(),
            other_creator: CAR_OTHER_CREATOR.to_string(),
            uuid,
            associated_checksum: 0,
            schema_version: CAR_SCHEMA_VERSION,
            color_space_id: CAR_COLOR_SPACE_ID,
            key_semantics: CAR_KEY_SEMANTICS,
        }
    }

    /// Parse the header blob.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CAR_HEADER_SIZE {
            return Err(Error::UnexpectedEof(bytes.len() as u64));
        }
        expect_magic(bytes, CAR_HEADER_MAGIC)?;

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[404..420]);

        Ok(Self {
            ui_version: read_u32_le(&bytes[4..]),
            storage_version: read_u32_le(&bytes[8..]),
            storage_timestamp: read_u32_le(&bytes[12..]),
            rendition_count: read_u32_le(&bytes[16..]),
            file_creator: read_fixed_string(&bytes[20..148]),
            other_creator: read_fixed_string(&bytes[148..404]),
            uuid,
            associated_checksum: read_u32_le(&bytes[420..]),
            schema_version: read_u32_le(&bytes[424..]),
            color_space_id: read_u32_le(&bytes[428..]),
            key_semantics: read_u32_le(&bytes[432..]),
        })
    }

    /// Serialize the header blob.
    pub fn to_bytes(&self) -> [u8; CAR_HEADER_SIZE] {
        let mut bytes = [0u8; CAR_HEADER_SIZE];
        bytes[0..4].copy_from_slice(CAR_HEADER_MAGIC);
        bytes[4..8].copy_from_slice(&self.ui_version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.storage_version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.storage_timestamp.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.rendition_count.to_le_bytes());
        write_fixed_string(&mut bytes[20..148], &self.file_creator);
        write_fixed_string(&mut bytes[148..404], &self.other_creator);
        bytes[404..420].copy_from_slice(&self.uuid);
        bytes[420..424].copy_from_slice(&self.associated_checksum.to_le_bytes());
        bytes[424..428].copy_from_slice(&self.schema_version.to_le_bytes());
        bytes[428..432].copy_from_slice(&self.color_space_id.to_le_bytes());
        bytes[432..436].copy_from_slice(&self.key_semantics.to_le_bytes());
        bytes
    }
}

fn read_fixed_string(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

fn write_fixed_string(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

// ============================================================================
// Key format record
// ============================================================================

/// Serialize the key format record (the `KEYFORMAT` variable).
pub fn write_key_format(identifiers: &[AttributeIdentifier]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(12 + identifiers.len() * 4);
    bytes.extend_from_slice(KEY_FORMAT_MAGIC);
    bytes.extend_from_slice(&0u32.to_le_bytes()); // reserved
    bytes.extend_from_slice(&(identifiers.len() as u32).to_le_bytes());
    for &identifier in identifiers {
        bytes.extend_from_slice(&(identifier as u32).to_le_bytes());
    }
    bytes
}

/// Parse the key format record into raw identifier codes. Raw codes are kept
/// as written so key bytes stay positionally aligned even for identifiers
/// this library does not know.
pub fn parse_key_format(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() < 12 {
        return Err(Error::UnexpectedEof(bytes.len() as u64));
    }
    expect_magic(bytes, KEY_FORMAT_MAGIC)?;

    let count = read_u32_le(&bytes[8..]) as usize;
    if bytes.len() < 12 + count * 4 {
        return Err(Error::corrupt("key format identifier list truncated"));
    }

    let mut identifiers = Vec::with_capacity(count);
    for i in 0..count {
        identifiers.push(read_u32_le(&bytes[12 + i * 4..]));
    }
    Ok(identifiers)
}

// ============================================================================
// Little-endian slice helpers
// ============================================================================

/// Read little-endian u16 from bytes.
#[inline]
pub(crate) fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read little-endian u32 from bytes.
#[inline]
pub(crate) fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Check four magic bytes at the start of `bytes`.
pub(crate) fn expect_magic(bytes: &[u8], expected: &[u8; 4]) -> Result<()> {
    if bytes.len() < 4 {
        return Err(Error::UnexpectedEof(bytes.len() as u64));
    }
    let actual = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if &actual != expected {
        return Err(Error::InvalidMagic {
            expected: *expected,
            actual,
        });
    }
    Ok(())
}
