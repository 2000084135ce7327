//! H.264 statistical model
//!
//! For every symbol the drivers process, the model classifies it by
//! coding phase, derives a model key for the estimator table, and keeps
//! a decoding-position state machine in sync so that the compressor and
//! decompressor compute identical keys for the same symbol.
//!
//! The significance map of each sub-block is handled specially: the
//! sub-block's total nonzero count is serialized as a short binary
//! prelude keyed on neighboring counts, after which end-of-block flags
//! need not be coded at all: they are implied by the count. The map
//! symbols themselves are re-coded under keys conditioned on the count
//! and the running position. This is the model's main win over plain
//! CABAC.
//!
//! Estimators persist across blocks and frames within a run;
//! [`Model::reset`] only clears per-block scratch.

pub mod estimator;
pub mod frame;
pub mod scan;

use crate::hooks::{CodingType, SubBlockSpec};
use estimator::{Context, EstimatorTable, ModelKey};
use frame::FramePair;
use scan::{
    get_neighbor, CoefficientCoordinate, CAT_LOOKUP, SIG_COEFF_FLAG_OFFSET_8X8,
    SIG_DC_OFFSET_422,
};

/// What the next symbol of a significance phase is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignificanceSymbol {
    /// A significance-map bit: coded.
    Map,
    /// An end-of-block flag: implied by the nonzero count, never coded.
    Eob,
    /// A position whose value is already determined (the implied last
    /// coefficient); never coded.
    DeterminedOne,
}

#[derive(Default)]
struct SignificanceTracker {
    total_nonzeros: u32,
    total_known: bool,
    nonzeros_observed: u32,
    start_zigzag: u32,
    zigzag_index: u32,
    expect_eob: bool,
    done: bool,
    bits_done: u32,
    serialized: u32,
}

/// The per-run statistical model.
pub struct Model {
    estimators: EstimatorTable,
    frames: FramePair,
    mb_x: usize,
    mb_y: usize,
    sub_mb: Option<SubBlockSpec>,
    coding_type: CodingType,
    significance: SignificanceTracker,
}

impl Model {
    pub fn new() -> Self {
        Model {
            estimators: EstimatorTable::new(),
            frames: FramePair::new(),
            mb_x: 0,
            mb_y: 0,
            sub_mb: None,
            coding_type: CodingType::Unknown,
            significance: SignificanceTracker::default(),
        }
    }

    /// Clear per-block scratch. Estimators and frame state survive: the
    /// model warms up over the whole run.
    pub fn reset(&mut self) {
        self.coding_type = CodingType::Unknown;
        self.sub_mb = None;
        self.significance = SignificanceTracker::default();
    }

    // ------------------------------------------------------------------
    // Position bookkeeping driven by the parser hooks
    // ------------------------------------------------------------------

    pub fn frame_spec(&mut self, frame_num: i32, mb_width: usize, mb_height: usize) {
        self.frames.enter_frame(frame_num, mb_width, mb_height);
    }

    pub fn mb_xy(&mut self, x: usize, y: usize) {
        self.mb_x = x;
        self.mb_y = y;
    }

    pub fn begin_sub_mb(&mut self, spec: SubBlockSpec) {
        self.sub_mb = Some(spec);
    }

    /// Record a finished sub-block into the current frame buffer.
    pub fn end_sub_mb(&mut self, spec: SubBlockSpec, coeffs: &[i16]) {
        let frame = self.frames.current_mut();
        if self.mb_x >= frame.width() || self.mb_y >= frame.height() {
            return;
        }
        let cell = frame.at_mut(self.mb_x, self.mb_y);
        cell.coded = true;
        if spec.is_8x8() {
            cell.is_8x8 = true;
            // An 8x8 block spans four scan-8 slots of sixteen
            // coefficients each.
            for quarter in 0..4usize {
                let slot = spec.scan8_index as usize + quarter;
                if slot >= scan::SUB_BLOCKS {
                    break;
                }
                let mut nonzeros = 0u8;
                for i in 0..16 {
                    let coeff = coeffs.get(quarter * 16 + i).copied().unwrap_or(0);
                    cell.residual[slot][i] = coeff;
                    nonzeros += (coeff != 0) as u8;
                }
                cell.num_nonzeros[slot] = nonzeros;
            }
        } else {
            let slot = spec.scan8_index as usize;
            if slot >= scan::SUB_BLOCKS {
                return;
            }
            let mut nonzeros = 0u8;
            for i in 0..frame::COEFFS_PER_SUB_BLOCK {
                let coeff = coeffs.get(i).copied().unwrap_or(0);
                cell.residual[slot][i] = coeff;
                nonzeros += (coeff != 0) as u8;
            }
            cell.num_nonzeros[slot] = nonzeros;
        }
        self.sub_mb = None;
    }

    pub fn begin_coding_type(&mut self, ct: CodingType, zigzag_index: u32, _p0: i32, _p1: i32) {
        self.coding_type = ct;
        if ct == CodingType::SignificanceMap {
            self.significance = SignificanceTracker {
                start_zigzag: zigzag_index,
                zigzag_index,
                ..SignificanceTracker::default()
            };
        }
    }

    pub fn end_coding_type(&mut self, _ct: CodingType) {
        self.coding_type = CodingType::Unknown;
    }

    pub fn coding_type(&self) -> CodingType {
        self.coding_type
    }

    // ------------------------------------------------------------------
    // Estimator access
    // ------------------------------------------------------------------

    /// Subrange of a `1` at the key against the coder's current range.
    pub fn probability_of_one(&self, range: u64, key: &ModelKey) -> u64 {
        self.estimators.probability_of_one(range, key)
    }

    /// Record an observed symbol at a key.
    pub fn update(&mut self, key: &ModelKey, symbol: u8) {
        self.estimators.update(key, symbol != 0);
    }

    /// Key for an unclassified context-coded symbol.
    pub fn context_key(&self, ctx_index: u16) -> ModelKey {
        ModelKey::plain(Context::CabacState(ctx_index))
    }

    /// Key for bypass symbols.
    pub fn bypass_key(&self) -> ModelKey {
        ModelKey::plain(Context::Bypass)
    }

    /// Key for the terminate symbol.
    pub fn terminate_key(&self) -> ModelKey {
        ModelKey::plain(Context::Terminate)
    }

    // ------------------------------------------------------------------
    // Significance state machine
    // ------------------------------------------------------------------

    /// Whether the current phase is a significance map.
    pub fn in_significance_map(&self) -> bool {
        self.coding_type == CodingType::SignificanceMap
    }

    /// Classify the next significance-phase symbol.
    pub fn classify_significance(&self) -> SignificanceSymbol {
        let t = &self.significance;
        if t.done {
            return SignificanceSymbol::DeterminedOne;
        }
        if t.expect_eob {
            return SignificanceSymbol::Eob;
        }
        if t.zigzag_index + 1 >= self.sub_mb_size() {
            SignificanceSymbol::DeterminedOne
        } else {
            SignificanceSymbol::Map
        }
    }

    /// Advance the significance state machine past one symbol.
    pub fn advance_significance(&mut self, symbol: u8) {
        if self.significance.done {
            return;
        }
        if self.significance.expect_eob {
            if symbol != 0 {
                self.significance.done = true;
            } else {
                self.significance.expect_eob = false;
                self.significance.zigzag_index += 1;
                self.check_implied_last();
            }
        } else if symbol != 0 {
            self.significance.nonzeros_observed += 1;
            self.significance.expect_eob = true;
        } else {
            self.significance.zigzag_index += 1;
            self.check_implied_last();
        }
    }

    fn check_implied_last(&mut self) {
        let size = self.sub_mb_size();
        let t = &mut self.significance;
        if !t.done && !t.expect_eob && t.zigzag_index + 1 >= size {
            // The remaining position carries the last nonzero
            // coefficient without any coded flag.
            t.nonzeros_observed += 1;
            t.done = true;
        }
    }

    /// Rewind the per-sub-block tracking so buffered symbols replay with
    /// the same keys they were observed under. The known total survives.
    pub fn reset_mb_significance_state_tracking(&mut self) {
        let t = &mut self.significance;
        t.nonzeros_observed = 0;
        t.zigzag_index = t.start_zigzag;
        t.expect_eob = false;
        t.done = false;
        t.bits_done = 0;
        t.serialized = 0;
    }

    /// Nonzero coefficients seen so far in the current sub-block.
    pub fn significance_observed(&self) -> u32 {
        self.significance.nonzeros_observed
    }

    /// Fix the sub-block's total nonzero count (from the observation
    /// pass on the compress side, from the prelude on the decompress
    /// side).
    pub fn set_significance_total(&mut self, total: u32) {
        self.significance.total_nonzeros = total;
        self.significance.total_known = true;
    }

    pub fn significance_total(&self) -> u32 {
        debug_assert!(self.significance.total_known);
        self.significance.total_nonzeros
    }

    /// The implied end-of-block flag at the current position.
    pub fn implied_eob(&self) -> u8 {
        (self.significance.nonzeros_observed >= self.significance_total()) as u8
    }

    // ------------------------------------------------------------------
    // Nonzero-count prelude
    // ------------------------------------------------------------------

    /// Bits in the nonzero-count prelude for the current sub-block.
    pub fn nonzero_count_width(&self) -> u32 {
        let size = self.sub_mb_size();
        if size <= 4 {
            2
        } else if size <= 16 {
            4
        } else {
            6
        }
    }

    /// Key for the next prelude bit.
    pub fn nonzero_count_key(&self) -> ModelKey {
        let t = &self.significance;
        let i = self.nonzero_count_width() - 1 - t.bits_done;
        let spec = self.current_sub_mb();
        let here = CoefficientCoordinate {
            mb_x: self.mb_x,
            mb_y: self.mb_y,
            scan8_index: spec.scan8_index,
            zigzag_index: 0,
        };
        let size = spec.size() as usize;
        let threshold = |count: u8| (count as u32 >= 1 << i) as u32;
        let prev = threshold(self.frames.previous().num_nonzeros_at(here));
        let left = threshold(
            get_neighbor(false, size, here)
                .map(|n| self.frames.current().num_nonzeros_at(n))
                .unwrap_or(0),
        );
        let above = threshold(
            get_neighbor(true, size, here)
                .map(|n| self.frames.current().num_nonzeros_at(n))
                .unwrap_or(0),
        );
        ModelKey {
            context: Context::NonzeroCount(i as u8),
            d1: t.serialized << 3 | prev << 2 | left << 1 | above,
            d2: self.sub_mb_discriminator(),
        }
    }

    /// Absorb one serialized prelude bit (most significant first).
    pub fn absorb_count_bit(&mut self, bit: u8) {
        let t = &mut self.significance;
        t.serialized = t.serialized << 1 | bit as u32;
        t.bits_done += 1;
    }

    /// Prelude bits absorbed so far.
    pub fn count_bits_done(&self) -> u32 {
        self.significance.bits_done
    }

    /// The count value accumulated from absorbed prelude bits.
    pub fn serialized_count(&self) -> u32 {
        self.significance.serialized
    }

    /// Key for the significance-map bit at the current position.
    pub fn significance_map_key(&self) -> ModelKey {
        let t = &self.significance;
        debug_assert!(t.total_known);
        let spec = self.current_sub_mb();
        let zz = t.zigzag_index as usize;
        let zigzag_offset = if spec.is_dc && spec.chroma422 {
            SIG_DC_OFFSET_422[zz.min(SIG_DC_OFFSET_422.len() - 1)] as u32
        } else if spec.max_coeff > 16 {
            SIG_COEFF_FLAG_OFFSET_8X8[0][zz.min(62)] as u32
        } else {
            zz as u32
        };
        ModelKey {
            context: Context::SignificanceMap,
            d1: 64 * t.total_nonzeros + t.nonzeros_observed,
            d2: spec.is_dc as u32 + zigzag_offset * 2 + 32 * CAT_LOOKUP[spec.cat as usize] as u32,
        }
    }

    fn sub_mb_discriminator(&self) -> u32 {
        let spec = self.current_sub_mb();
        spec.is_8x8() as u32
            | (spec.is_dc as u32) << 1
            | (spec.chroma422 as u32) << 2
            | (spec.cat as u32) << 3
    }

    fn sub_mb_size(&self) -> u32 {
        self.sub_mb.map(|s| s.size()).unwrap_or(16)
    }

    fn current_sub_mb(&self) -> SubBlockSpec {
        self.sub_mb.unwrap_or(SubBlockSpec {
            cat: 0,
            scan8_index: 0,
            max_coeff: 16,
            is_dc: false,
            chroma422: false,
        })
    }

    /// Number of distinct estimator slots materialized so far.
    pub fn estimator_count(&self) -> usize {
        self.estimators.len()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}
