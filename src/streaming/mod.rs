//! Delivery of media bytes to clients.
//!
//! Two paths exist: direct range-capable serving of files that already
//! have a known length, and tail-following of transcode artifacts that
//! are still growing while the encoder runs.

pub mod direct;
pub mod tail;

pub use direct::{content_type_for_path, parse_range_header, serve_source};
pub use tail::{follow, TailError};
