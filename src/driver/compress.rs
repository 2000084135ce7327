//! Compression driver
//!
//! Owns the input bytes and implements the parser hooks for the
//! compression pass. The parser pulls the raw file through
//! `read_packet`; at every CABAC init the driver locates the handed
//! payload inside the window of bytes already delivered but not yet
//! claimed by an earlier block, emits the preceding gap as a literal
//! record, and re-encodes the block's symbols under the statistical
//! model. Payloads that cannot be located byte-exactly (NAL-escaped) or
//! are too short to carry a surrogate marker are recorded as
//! `skip_coded` and pass through inside a later literal run.

use tracing::{debug, info};

use crate::archive::{Archive, Block};
use crate::coder::arithmetic::ArithmeticEncoder;
use crate::coder::cabac::CabacDecoder;
use crate::driver::surrogate::SURROGATE_MARKER_BYTES;
use crate::error::{Error, Result};
use crate::hooks::{CodingHooks, CodingType, Parser, SubBlockSpec};
use crate::model::estimator::ModelKey;
use crate::model::{Model, SignificanceSymbol};

struct ActiveBlock {
    /// Standard CABAC engine decoding the original payload.
    shadow: CabacDecoder,
    /// Model-driven re-encoder for the archive stream.
    encoder: ArithmeticEncoder,
    /// Index of the `cabac` record to fill on terminate.
    out_index: usize,
}

/// One compression run over a byte blob.
pub struct Compressor {
    original: Vec<u8>,
    read_offset: usize,
    prev_coded_block_end: usize,
    model: Model,
    blocks: Vec<Block>,
    active: Option<ActiveBlock>,
    /// Significance-phase symbols held back until the nonzero count is
    /// known and serialized.
    sig_buffer: Vec<u8>,
    skipped_blocks: usize,
    coded_blocks: usize,
}

impl Compressor {
    pub fn new(original: Vec<u8>) -> Self {
        Compressor {
            original,
            read_offset: 0,
            prev_coded_block_end: 0,
            model: Model::new(),
            blocks: Vec::new(),
            active: None,
            sig_buffer: Vec::new(),
            skipped_blocks: 0,
            coded_blocks: 0,
        }
    }

    /// Drive the parser over the input and assemble the archive.
    pub fn run(mut self, parser: &mut dyn Parser) -> Result<Archive> {
        parser.drive(&mut self)?;
        if self.active.is_some() {
            return Err(Error::parser("input ended inside a CABAC block"));
        }
        // Everything after the last coded block passes through.
        let tail = self.original[self.prev_coded_block_end..].to_vec();
        self.blocks.push(Block::Literal(tail));

        let archive = Archive { blocks: self.blocks };
        info!(
            input_bytes = self.original.len(),
            records = archive.blocks.len(),
            coded_blocks = self.coded_blocks,
            skipped_blocks = self.skipped_blocks,
            estimators = self.model.estimator_count(),
            "compression pass complete"
        );
        Ok(archive)
    }

    fn active_mut(&mut self) -> Result<&mut ActiveBlock> {
        self.active
            .as_mut()
            .ok_or_else(|| Error::parser("symbol request outside a hooked CABAC block"))
    }

    fn encode_with(&mut self, key: &ModelKey, symbol: u8) -> Result<()> {
        let model = &self.model;
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| Error::parser("symbol request outside a hooked CABAC block"))?;
        active
            .encoder
            .put(symbol != 0, |range| model.probability_of_one(range, key));
        self.model.update(key, symbol);
        Ok(())
    }

    /// Serialize the significance phase of the current sub-block: the
    /// nonzero count first, then the buffered map symbols, with the
    /// end-of-block flags omitted entirely.
    fn flush_significance(&mut self) -> Result<()> {
        if self.sig_buffer.is_empty() {
            return Ok(());
        }
        let total = self.model.significance_observed();
        if total == 0 {
            return Err(Error::parser("significance map closed without a coefficient"));
        }
        self.model.set_significance_total(total);
        self.model.reset_mb_significance_state_tracking();

        let width = self.model.nonzero_count_width();
        let value = total - 1;
        for position in (0..width).rev() {
            let bit = ((value >> position) & 1) as u8;
            let key = self.model.nonzero_count_key();
            self.encode_with(&key, bit)?;
            self.model.absorb_count_bit(bit);
        }

        for symbol in std::mem::take(&mut self.sig_buffer) {
            match self.model.classify_significance() {
                SignificanceSymbol::Map => {
                    let key = self.model.significance_map_key();
                    self.encode_with(&key, symbol)?;
                }
                SignificanceSymbol::Eob | SignificanceSymbol::DeterminedOne => {}
            }
            self.model.advance_significance(symbol);
        }
        Ok(())
    }

    /// Locate the payload in the delivered-but-unclaimed window. Found
    /// and large enough: emit the gap literal and open a `cabac` record.
    /// Otherwise: record a `skip_coded` and let the bytes flow through a
    /// later literal.
    fn find_coded_block(&mut self, buf: &[u8]) -> Option<usize> {
        let window = &self.original[self.prev_coded_block_end..self.read_offset];
        let found = if buf.is_empty() || window.len() < buf.len() {
            None
        } else {
            window.windows(buf.len()).position(|w| w == buf)
        };
        match found {
            Some(gap) if buf.len() >= SURROGATE_MARKER_BYTES => {
                self.blocks
                    .push(Block::Literal(window[..gap].to_vec()));
                self.prev_coded_block_end += gap + buf.len();
                let out_index = self.blocks.len();
                self.blocks.push(Block::Cabac {
                    data: Vec::new(),
                    size: buf.len() as u32,
                    length_parity: buf.len() % 2 == 1,
                    last_byte: buf[buf.len() - 1],
                });
                Some(out_index)
            }
            _ => None,
        }
    }
}

impl CodingHooks for Compressor {
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.original.len() - self.read_offset);
        buf[..n].copy_from_slice(&self.original[self.read_offset..self.read_offset + n]);
        self.read_offset += n;
        Ok(n)
    }

    fn init_cabac(&mut self, buf: &[u8]) -> Result<bool> {
        if self.active.is_some() {
            return Err(Error::parser("CABAC init while a block is still open"));
        }
        match self.find_coded_block(buf) {
            Some(out_index) => {
                self.coded_blocks += 1;
                debug!(size = buf.len(), "re-coding CABAC block");
                self.model.reset();
                self.sig_buffer.clear();
                self.active = Some(ActiveBlock {
                    shadow: CabacDecoder::new(buf.to_vec()),
                    encoder: ArithmeticEncoder::recode(),
                    out_index,
                });
                Ok(true)
            }
            None => {
                // Unlocatable or undersized: pass through verbatim.
                self.skipped_blocks += 1;
                debug!(size = buf.len(), "skipping CABAC block");
                self.blocks.push(Block::SkipCoded { size: buf.len() as u32 });
                Ok(false)
            }
        }
    }

    fn get(&mut self, ctx_index: u16, state: &mut u8) -> Result<u8> {
        let symbol = self.active_mut()?.shadow.decode_decision(state);
        if self.model.in_significance_map() {
            self.sig_buffer.push(symbol);
            self.model.advance_significance(symbol);
        } else {
            let key = self.model.context_key(ctx_index);
            self.encode_with(&key, symbol)?;
        }
        Ok(symbol)
    }

    fn get_bypass(&mut self) -> Result<u8> {
        if self.model.in_significance_map() {
            return Err(Error::parser("bypass symbol inside a significance map"));
        }
        let symbol = self.active_mut()?.shadow.decode_bypass();
        let key = self.model.bypass_key();
        self.encode_with(&key, symbol)?;
        Ok(symbol)
    }

    fn get_terminate(&mut self) -> Result<u8> {
        if self.model.in_significance_map() {
            return Err(Error::parser("terminate symbol inside a significance map"));
        }
        let symbol = self.active_mut()?.shadow.decode_terminate();
        let key = self.model.terminate_key();
        self.encode_with(&key, symbol)?;
        if symbol != 0 {
            let active = self
                .active
                .take()
                .ok_or_else(|| Error::parser("terminate outside a hooked CABAC block"))?;
            let data = active.encoder.finish();
            match self.blocks.get_mut(active.out_index) {
                Some(Block::Cabac { data: slot, .. }) => *slot = data,
                _ => return Err(Error::parser("coded block record out of sync")),
            }
        }
        Ok(symbol)
    }

    fn frame_spec(&mut self, frame_num: i32, mb_width: usize, mb_height: usize) {
        self.model.frame_spec(frame_num, mb_width, mb_height);
    }

    fn mb_xy(&mut self, x: usize, y: usize) {
        self.model.mb_xy(x, y);
    }

    fn begin_sub_mb(&mut self, spec: SubBlockSpec) {
        self.model.begin_sub_mb(spec);
    }

    fn end_sub_mb(&mut self, spec: SubBlockSpec, coeffs: &[i16]) {
        self.model.end_sub_mb(spec, coeffs);
    }

    fn begin_coding_type(&mut self, ct: CodingType, zigzag_index: u32, p0: i32, p1: i32) {
        if ct == CodingType::SignificanceMap {
            self.sig_buffer.clear();
        }
        self.model.begin_coding_type(ct, zigzag_index, p0, p1);
    }

    fn end_coding_type(&mut self, ct: CodingType) -> Result<()> {
        if ct == CodingType::SignificanceMap && self.active.is_some() {
            self.flush_significance()?;
        }
        self.model.end_coding_type(ct);
        Ok(())
    }
}
