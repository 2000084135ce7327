//! Parser-facing callback contract
//!
//! The H.264 bitstream parser is an external collaborator: it owns slice
//! headers, binarization, and macroblock reconstruction, and drives the
//! compressor or decompressor through the [`CodingHooks`] trait while it
//! decodes. The hooks supply input bytes, intercept each CABAC block,
//! and observe every entropy-coded symbol along with enough positional
//! context (frame, macroblock, sub-block, coding phase) for the
//! statistical model to key its estimators.
//!
//! A parser that honors this contract can be replayed deterministically:
//! the decompressor feeds it surrogate bytes and answers its symbol
//! requests from the recoded stream.

use crate::error::Result;

/// Phase of entropy decoding the parser is in, as bracketed by
/// [`CodingHooks::begin_coding_type`] / [`CodingHooks::end_coding_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingType {
    /// Anything not otherwise classified (macroblock types, motion
    /// vectors, coded block patterns, ...).
    Unknown,
    /// A position no conforming parser asks about.
    Unreachable,
    /// Coefficient magnitude and sign bins.
    Residuals,
    /// The significance map of a sub-block.
    SignificanceMap,
    /// End-of-block flags inside a significance map.
    SignificanceEob,
    /// The nonzero-count serialization of a sub-block.
    SignificanceNz,
}

/// Geometry of the sub-block the parser is currently decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBlockSpec {
    /// Residual category (0..14, per the H.264 residual_block cats).
    pub cat: u8,
    /// scan-8 slot of the sub-block (48..51 for DC blocks).
    pub scan8_index: u8,
    /// Number of coefficients in the sub-block (4, 8, 15, 16, or 64).
    pub max_coeff: u16,
    /// Whether this is a DC block.
    pub is_dc: bool,
    /// Whether the stream is 4:2:2 chroma (changes DC geometry).
    pub chroma422: bool,
}

impl SubBlockSpec {
    /// Coefficient capacity used for significance tracking.
    pub fn size(&self) -> u32 {
        self.max_coeff as u32
    }

    /// Whether the sub-block uses the 8x8 transform.
    pub fn is_8x8(&self) -> bool {
        self.max_coeff > 16
    }
}

/// Callbacks the parser drives while decoding.
///
/// `init_cabac` returning `Ok(false)` instructs the parser to decode
/// that block with its own unhooked CABAC engine and not to route its
/// symbols through `get`/`get_bypass`/`get_terminate`.
pub trait CodingHooks {
    /// Supply up to `buf.len()` input bytes; returns the count supplied.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// A CABAC-coded slice payload starts. `buf` holds the unescaped
    /// payload bytes the parser will decode.
    fn init_cabac(&mut self, buf: &[u8]) -> Result<bool>;

    /// Decode one context-coded symbol. `ctx_index` identifies the
    /// parser's context slot; `state` is that slot's state byte and must
    /// be updated exactly once.
    fn get(&mut self, ctx_index: u16, state: &mut u8) -> Result<u8>;

    /// Decode one bypass symbol.
    fn get_bypass(&mut self) -> Result<u8>;

    /// Decode the end-of-slice terminate symbol.
    fn get_terminate(&mut self) -> Result<u8>;

    /// The parser announces the frame it is about to decode.
    fn frame_spec(&mut self, frame_num: i32, mb_width: usize, mb_height: usize);

    /// The parser moves to a macroblock.
    fn mb_xy(&mut self, x: usize, y: usize);

    /// A residual sub-block starts.
    fn begin_sub_mb(&mut self, spec: SubBlockSpec);

    /// A residual sub-block is complete; `coeffs` holds its
    /// coefficients in scan order.
    fn end_sub_mb(&mut self, spec: SubBlockSpec, coeffs: &[i16]);

    /// A coding phase starts.
    fn begin_coding_type(&mut self, ct: CodingType, zigzag_index: u32, p0: i32, p1: i32);

    /// A coding phase ends.
    fn end_coding_type(&mut self, ct: CodingType) -> Result<()>;
}

/// A hosted H.264 parser the drivers can run a file through.
pub trait Parser {
    /// Pull the whole input through `read_packet` and replay every
    /// decoding event against the hooks.
    fn drive(&mut self, hooks: &mut dyn CodingHooks) -> Result<()>;
}

/// Fallback collaborator used when no H.264 parser is wired in: drains
/// the input and recognizes no CABAC blocks, so every byte passes
/// through as a literal run.
pub struct PassthroughParser {
    chunk: usize,
}

impl PassthroughParser {
    pub fn new() -> Self {
        PassthroughParser { chunk: 64 * 1024 }
    }
}

impl Default for PassthroughParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for PassthroughParser {
    fn drive(&mut self, hooks: &mut dyn CodingHooks) -> Result<()> {
        let mut buf = vec![0u8; self.chunk];
        loop {
            let n = hooks.read_packet(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
        }
    }
}
