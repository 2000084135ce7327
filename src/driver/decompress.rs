//! Decompression driver
//!
//! Replays the parser against a surrogate input stream assembled from
//! the archive: literal records pass through, re-coded CABAC records are
//! replaced by a unique marker plus NAL-safe padding of the original
//! length, and skip_coded records contribute nothing (their bytes arrive
//! in the following literal). When the parser reaches a CABAC init, the
//! driver recognizes the block by its marker, decodes the recoded
//! symbol stream under the same model the compressor used, and re-emits
//! the original CABAC bytes through the CABAC re-encoder. Output is the
//! concatenation of every block's bytes in record order.

use tracing::{debug, info};

use crate::archive::{Archive, Block};
use crate::coder::arithmetic::ArithmeticDecoder;
use crate::coder::cabac::CabacEncoder;
use crate::driver::surrogate::{make_surrogate_block, SurrogateMarkers, SURROGATE_MARKER_BYTES};
use crate::error::{Error, Result};
use crate::hooks::{CodingHooks, CodingType, Parser, SubBlockSpec};
use crate::model::estimator::ModelKey;
use crate::model::{Model, SignificanceSymbol};

#[derive(Default, Clone)]
struct BlockState {
    coded: bool,
    marker: Option<[u8; SURROGATE_MARKER_BYTES]>,
    out_bytes: Vec<u8>,
    done: bool,
}

struct ActiveBlock {
    /// Model-driven decoder over the recoded stream.
    decoder: ArithmeticDecoder,
    /// Re-encoder producing the original CABAC bytes.
    emitter: CabacEncoder,
    /// Index of the archive record being reconstructed.
    index: usize,
}

/// One decompression run over a parsed archive.
pub struct Decompressor {
    archive: Archive,
    states: Vec<BlockState>,
    read_index: usize,
    read_block: Vec<u8>,
    read_offset: usize,
    /// Head of the coded-block queue: records staged by `read_packet`
    /// but not yet claimed by a CABAC init.
    next_coded_block: usize,
    markers: SurrogateMarkers,
    model: Model,
    active: Option<ActiveBlock>,
    /// Set while a significance phase awaits its nonzero-count prelude.
    prelude_pending: bool,
}

impl Decompressor {
    pub fn new(archive: Archive) -> Self {
        let states = vec![BlockState::default(); archive.blocks.len()];
        Decompressor {
            archive,
            states,
            read_index: 0,
            read_block: Vec::new(),
            read_offset: 0,
            next_coded_block: 0,
            markers: SurrogateMarkers::new(),
            model: Model::new(),
            active: None,
            prelude_pending: false,
        }
    }

    /// Drive the parser over the surrogate stream and return the
    /// reconstructed original bytes.
    pub fn run(mut self, parser: &mut dyn Parser) -> Result<Vec<u8>> {
        parser.drive(&mut self)?;
        if self.active.is_some() {
            return Err(Error::parser("archive ended inside a CABAC block"));
        }
        let mut out = Vec::new();
        for (index, state) in self.states.iter().enumerate() {
            if !state.done {
                return Err(Error::surrogate(format!(
                    "block {} was never reconstructed",
                    index
                )));
            }
            out.extend_from_slice(&state.out_bytes);
        }
        info!(
            records = self.states.len(),
            output_bytes = out.len(),
            estimators = self.model.estimator_count(),
            "decompression pass complete"
        );
        Ok(out)
    }

    /// Stage the record at `read_index` into the surrogate stream.
    fn stage_block(&mut self, index: usize) -> Result<()> {
        match &self.archive.blocks[index] {
            Block::Literal(data) => {
                self.states[index].out_bytes = data.clone();
                self.states[index].done = true;
                self.read_block = data.clone();
            }
            Block::Cabac { size, .. } => {
                let marker = self.markers.next_marker();
                self.read_block = make_surrogate_block(&marker, *size as usize)?;
                let state = &mut self.states[index];
                state.coded = true;
                state.marker = Some(marker);
            }
            Block::SkipCoded { .. } => {
                // Flag only: the parser sees the original bytes via the
                // following literal record.
                let state = &mut self.states[index];
                state.coded = true;
                state.done = true;
            }
        }
        Ok(())
    }

    /// Match a CABAC init against the next staged coded record.
    fn recognize_coded_block(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            if self.next_coded_block >= self.read_index
                || self.next_coded_block >= self.states.len()
            {
                return Err(Error::surrogate(
                    "coded block expected, but not recorded in the compressed data",
                ));
            }
            if self.states[self.next_coded_block].coded {
                break;
            }
            self.next_coded_block += 1;
        }
        let index = self.next_coded_block;
        self.next_coded_block += 1;

        match &self.archive.blocks[index] {
            Block::Cabac { size, .. } => {
                if *size as usize != buf.len() {
                    return Err(Error::surrogate(format!(
                        "coded block size {} does not match record size {}",
                        buf.len(),
                        size
                    )));
                }
                let marker = self.states[index]
                    .marker
                    .ok_or_else(|| Error::surrogate("coded block staged without a marker"))?;
                if buf.len() < marker.len() || buf[..marker.len()] != marker {
                    return Err(Error::surrogate("invalid surrogate marker in coded block"));
                }
            }
            Block::SkipCoded { size } => {
                if *size as usize != buf.len() {
                    return Err(Error::surrogate(format!(
                        "skip_coded block size {} does not match record size {}",
                        buf.len(),
                        size
                    )));
                }
            }
            Block::Literal(_) => {
                return Err(Error::surrogate("literal record claimed as a coded block"));
            }
        }
        Ok(index)
    }

    fn decode_with(&mut self, key: &ModelKey) -> Result<u8> {
        let model = &self.model;
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| Error::parser("symbol request outside a hooked CABAC block"))?;
        let symbol = active
            .decoder
            .get(|range| model.probability_of_one(range, key)) as u8;
        self.model.update(key, symbol);
        Ok(symbol)
    }

    /// Read the nonzero-count prelude that precedes a sub-block's map
    /// symbols in the recoded stream.
    fn decode_prelude(&mut self) -> Result<()> {
        let width = self.model.nonzero_count_width();
        for _ in 0..width {
            let key = self.model.nonzero_count_key();
            let bit = self.decode_with(&key)?;
            self.model.absorb_count_bit(bit);
        }
        let total = self.model.serialized_count() + 1;
        self.model.set_significance_total(total);
        self.prelude_pending = false;
        Ok(())
    }

    /// Close out a finished block: trim the lone stop-bit byte, apply
    /// the stored length-parity fixup, and store the reconstruction.
    fn finish_block(&mut self, active: ActiveBlock) -> Result<()> {
        let mut bytes = active.emitter.finish();
        if bytes.last() == Some(&0x80) {
            bytes.pop();
        }
        if let Block::Cabac { length_parity, last_byte, .. } = &self.archive.blocks[active.index] {
            if (bytes.len() % 2 == 1) != *length_parity {
                bytes.push(*last_byte);
            } else if let Some(last) = bytes.last_mut() {
                *last = *last_byte;
            }
        }
        debug!(index = active.index, bytes = bytes.len(), "reconstructed CABAC block");
        let state = &mut self.states[active.index];
        state.out_bytes = bytes;
        state.done = true;
        Ok(())
    }
}

impl CodingHooks for Decompressor {
    fn read_packet(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < out.len() && self.read_index < self.archive.blocks.len() {
            if self.read_block.is_empty() && self.read_offset == 0 {
                self.stage_block(self.read_index)?;
            }
            if self.read_offset < self.read_block.len() {
                let n = (out.len() - written).min(self.read_block.len() - self.read_offset);
                out[written..written + n]
                    .copy_from_slice(&self.read_block[self.read_offset..self.read_offset + n]);
                self.read_offset += n;
                written += n;
            }
            if self.read_offset >= self.read_block.len() {
                self.read_block.clear();
                self.read_offset = 0;
                self.read_index += 1;
            }
        }
        Ok(written)
    }

    fn init_cabac(&mut self, buf: &[u8]) -> Result<bool> {
        if self.active.is_some() {
            return Err(Error::parser("CABAC init while a block is still open"));
        }
        let index = self.recognize_coded_block(buf)?;
        match &self.archive.blocks[index] {
            Block::Cabac { data, .. } => {
                self.model.reset();
                self.prelude_pending = false;
                self.active = Some(ActiveBlock {
                    decoder: ArithmeticDecoder::recode(data.clone()),
                    emitter: CabacEncoder::new()?,
                    index,
                });
                Ok(true)
            }
            Block::SkipCoded { .. } => Ok(false),
            Block::Literal(_) => Err(Error::surrogate("literal record claimed as coded")),
        }
    }

    fn get(&mut self, ctx_index: u16, state: &mut u8) -> Result<u8> {
        let symbol = if self.model.in_significance_map() {
            if self.prelude_pending {
                self.decode_prelude()?;
            }
            let symbol = match self.model.classify_significance() {
                SignificanceSymbol::Map => {
                    let key = self.model.significance_map_key();
                    self.decode_with(&key)?
                }
                SignificanceSymbol::Eob => self.model.implied_eob(),
                SignificanceSymbol::DeterminedOne => 1,
            };
            self.model.advance_significance(symbol);
            symbol
        } else {
            let key = self.model.context_key(ctx_index);
            self.decode_with(&key)?
        };
        self.active
            .as_mut()
            .ok_or_else(|| Error::parser("symbol request outside a hooked CABAC block"))?
            .emitter
            .put(symbol, state);
        Ok(symbol)
    }

    fn get_bypass(&mut self) -> Result<u8> {
        if self.model.in_significance_map() {
            return Err(Error::parser("bypass symbol inside a significance map"));
        }
        let key = self.model.bypass_key();
        let symbol = self.decode_with(&key)?;
        self.active
            .as_mut()
            .ok_or_else(|| Error::parser("symbol request outside a hooked CABAC block"))?
            .emitter
            .put_bypass(symbol);
        Ok(symbol)
    }

    fn get_terminate(&mut self) -> Result<u8> {
        if self.model.in_significance_map() {
            return Err(Error::parser("terminate symbol inside a significance map"));
        }
        let key = self.model.terminate_key();
        let symbol = self.decode_with(&key)?;
        {
            let active = self
                .active
                .as_mut()
                .ok_or_else(|| Error::parser("symbol request outside a hooked CABAC block"))?;
            active.emitter.put_terminate(symbol != 0);
        }
        if symbol != 0 {
            let active = self
                .active
                .take()
                .ok_or_else(|| Error::parser("terminate outside a hooked CABAC block"))?;
            self.finish_block(active)?;
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
        self.model.begin_coding_type(ct, zigzag_index, p0, p1);
        if ct == CodingType::SignificanceMap && self.active.is_some() {
            self.prelude_pending = true;
        }
    }

    fn end_coding_type(&mut self, ct: CodingType) -> Result<()> {
        if ct == CodingType::SignificanceMap {
            self.prelude_pending = false;
        }
        self.model.end_coding_type(ct);
        Ok(())
    }
}
