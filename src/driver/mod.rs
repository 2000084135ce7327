//! Compression and decompression drivers
//!
//! The drivers own the run state (input bytes or archive, the
//! statistical model, per-block coder state) and implement the parser
//! hook contract from [`crate::hooks`]. A hosted H.264 parser drives
//! them; without one, [`crate::hooks::PassthroughParser`] degrades both
//! passes to literal passthrough, which still round-trips any input.

pub mod compress;
pub mod decompress;
pub mod surrogate;

pub use compress::Compressor;
pub use decompress::Decompressor;
pub use surrogate::SURROGATE_MARKER_BYTES;

use crate::archive::Archive;
use crate::error::Result;
use crate::hooks::Parser;

/// Compress a byte blob into an archive using the given parser.
pub fn compress(input: &[u8], parser: &mut dyn Parser) -> Result<Archive> {
    Compressor::new(input.to_vec()).run(parser)
}

/// Decompress an archive back into the original bytes using the given
/// parser.
pub fn decompress(archive: Archive, parser: &mut dyn Parser) -> Result<Vec<u8>> {
    Decompressor::new(archive).run(parser)
}
