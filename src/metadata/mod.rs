//! Metadata reading and the write-verify-restore engine.
//!
//! - [`reader`] — cheap in-place "already described?" check (no tools)
//! - [`MetadataWriter`] — verified writes with backup and restoration
//! - [`MetadataTool`] / [`ExifToolCli`] — the external metadata tool seam
//!
//! The writer routes by container capability: PNG gets named text
//! chunks, EXIF-capable formats go through the metadata tool with date
//! re-assertion, and everything else gets a PNG companion file.

mod backup;
pub(crate) mod png_text;
pub mod reader;
mod tool;
mod writer;

pub use backup::{DATE_FIELDS, MetadataBackup};
pub use reader::{ExistingMetadata, has_description, read_existing};
pub use tool::{ExifToolCli, MetadataTool};
pub use writer::{Container, MetadataWriter, WriteOutcome, WriteRequest, container_for};
