//! # tagsmith
//!
//! AI-powered batch image describer: turns arbitrary image files into
//! AI-described, metadata-tagged files while avoiding duplicate work and
//! never corrupting the original file.
//!
//! ## Quick Start
//!
//! The simplest way to use the library is through the orchestrator,
//! which drives the full dedup → normalize → describe → write flow:
//!
//! ```rust,no_run
//! use tagsmith::config::Config;
//! use tagsmith::describe::DescriptionClient;
//! use tagsmith::metadata::ExifToolCli;
//! use tagsmith::orchestrator::Orchestrator;
//! use tagsmith::tracking::TrackingStore;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!
//!     let store = TrackingStore::open(&config.db_path())?;
//!     let client = DescriptionClient::from_config(&config.service);
//!
//!     let mut orchestrator =
//!         Orchestrator::new(config, Some(store), Box::new(ExifToolCli::new()), client);
//!     let stats = orchestrator.run(&[PathBuf::from("./photos")]).await?;
//!
//!     println!("{}", stats.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! The three core engines can be driven individually:
//!
//! ```rust,no_run
//! use tagsmith::metadata::{ExifToolCli, MetadataWriter, WriteRequest};
//! use tagsmith::normalize::Normalizer;
//! use tagsmith::retry::RetryPolicy;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     let path = Path::new("photo.heic");
//!
//!     // 1. Produce a decodable form of an exotic input
//!     let normalizer = Normalizer::new(10 * 1024);
//!     let outcome = normalizer.normalize(path)?;
//!     println!("normalized: {outcome:?}");
//!
//!     // 2. Write metadata with verify-and-restore
//!     let tool = ExifToolCli::new();
//!     let writer = MetadataWriter::new(
//!         &tool,
//!         RetryPolicy::exponential(4, Duration::from_millis(500)),
//!         std::env::temp_dir().join("tagsmith-backups"),
//!         false,
//!     );
//!     let tags = vec!["beach".to_string(), "sunset".to_string()];
//!     let result = writer.write(path, &WriteRequest {
//!         description: "A golden sunset over the beach",
//!         tags: &tags,
//!     });
//!     println!("attempts: {:?}", result.map(|r| r.attempts));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Write Strategies
//!
//! | Format | Strategy |
//! |--------|----------|
//! | JPEG, TIFF, WebP, HEIC/HEIF | Metadata tool write with date re-assertion and byte-copy backup |
//! | PNG | `Description`/`Tags` tEXt chunks, chunk-level surgery |
//! | GIF, BMP | PNG companion file; original untouched |
//!
//! ## Modules
//!
//! - [`config`] — immutable configuration, loaded once at startup
//! - [`describe`] — description service client, watchdog, recovery trigger
//! - [`error`] — per-file error taxonomy
//! - [`metadata`] — in-place read, write-verify-restore engine, tool seam
//! - [`normalize`] — format-normalization fallback chain
//! - [`orchestrator`] — batch run driver and statistics
//! - [`retry`] — bounded retry schedules
//! - [`tracking`] — content-addressed dedup store

pub mod config;
pub mod describe;
pub mod error;
pub mod metadata;
pub mod normalize;
pub mod orchestrator;
pub mod retry;
pub mod tracking;
