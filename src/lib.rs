//! # car
//!
//! Rust implementation of the compiled asset archive (.car) binary format.
//!
//! The original format ships with proprietary asset-catalog tooling; this is
//! an independent Rust implementation aiming to match it as closely as
//! possible for binary compatibility.
//!
//! ## Modules
//!
//! - [`util`] - Error handling and shared plumbing
//! - [`format`] - Binary constants, fixed struct layouts, derived tables
//! - [`attributes`] - Attribute identifiers and attribute lists
//! - [`facet`] - Named asset entries
//! - [`rendition`] - Per-rendition metadata + pixel payload codec
//! - [`compression`] - Pluggable compression backends
//! - [`store`] - Ordered key/value container store interface
//! - [`writer`] / [`reader`] - Archive assembly and consumption
//!
//! ## Example
//!
//! ```ignore
//! use car::{Reader, store::FlatStoreReader};
//!
//! let source = FlatStoreReader::open("Assets.car")?;
//! let archive = Reader::new(source)?;
//!
//! archive.facet_iterate(|facet| {
//!     println!("{}", facet.name());
//! })?;
//! ```

pub mod util;
pub mod format;
pub mod attributes;
pub mod facet;
pub mod rendition;
pub mod compression;
pub mod store;
pub mod writer;
pub mod reader;

// Re-export commonly used types
pub use util::{Error, Result};
pub use attributes::{AttributeIdentifier, AttributeList};
pub use facet::Facet;
pub use rendition::{Rendition, RenditionData, PixelDataFormat};
pub use writer::{Writer, WriteReport};
pub use reader::Reader;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result};
    pub use crate::attributes::{AttributeIdentifier, AttributeList};
    pub use crate::facet::Facet;
    pub use crate::format::{Layout, ResizeMode};
    pub use crate::rendition::{Rendition, RenditionData, PixelDataFormat};
    pub use crate::writer::{Writer, WriteReport};
    pub use crate::reader::Reader;
}
