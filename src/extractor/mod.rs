//! Everything that talks to the external extraction tool.
//!
//! - [`MetadataInvoker`] runs a metadata query and normalizes the result into [`VideoInfo`]
//! - [`DownloadInvoker`] drives a download into a directory or a byte sink
//!
//! Both spawn one process per call and keep no state between calls.

pub mod download;
pub mod error;
pub mod formats;
pub mod metadata;
pub mod process;
pub mod progress;

pub use download::{ByteSink, Destination, DownloadInvoker, DownloadRequest, MediaKind, ProgressSink};
pub use error::{ExtractorError, Result};
pub use formats::FormatOption;
pub use metadata::{AvailableFormats, MetadataInvoker, VideoInfo};
pub use process::ToolCommand;
pub use progress::OutputPatterns;
