//! Adaptive binary probability estimators
//!
//! Every coded symbol is billed to a model key: a context discriminant
//! plus two integer discriminators. Each key owns a pair of counts
//! `(pos, neg)` starting at (1, 1); the probability of a `1` at the key
//! is `pos / (pos + neg)`, scaled into the coder's current range with a
//! fixed division order so the result always stays below the range.
//! Counts are halved (rounding up) once their sum passes the phase's
//! cap, which keeps the estimate adaptive.
//!
//! Estimators persist for a whole compress or decompress run; they are
//! deliberately not cleared between coded blocks so the model warms up
//! across the file.

use std::collections::HashMap;

/// Which family of decisions a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    /// A parser CABAC context slot, identified by index.
    CabacState(u16),
    /// Bypass (equiprobable) symbols.
    Bypass,
    /// The end-of-slice terminate symbol.
    Terminate,
    /// Bit `i` of a sub-block's nonzero-count prelude.
    NonzeroCount(u8),
    /// Significance map symbols.
    SignificanceMap,
}

/// Identifies one estimator slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub context: Context,
    pub d1: u32,
    pub d2: u32,
}

impl ModelKey {
    pub fn plain(context: Context) -> Self {
        ModelKey { context, d1: 0, d2: 0 }
    }
}

/// A pair of positive counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimator {
    pub pos: u32,
    pub neg: u32,
}

/// Count cap for most phases.
const ESTIMATOR_CAP: u32 = 0x60;

/// Count cap for significance-map estimators.
const SIGNIFICANCE_CAP: u32 = 0x50;

fn initial_estimate(context: Context) -> Estimator {
    match context {
        // The terminate symbol is almost always 0; start it biased.
        Context::Terminate => Estimator { pos: 1, neg: 0x180 / 2 },
        _ => Estimator { pos: 1, neg: 1 },
    }
}

/// The estimator table for one run.
pub struct EstimatorTable {
    estimators: HashMap<ModelKey, Estimator>,
}

impl EstimatorTable {
    pub fn new() -> Self {
        EstimatorTable { estimators: HashMap::new() }
    }

    /// Subrange of the `1` symbol for the current range at this key.
    ///
    /// The division happens before the multiplication so the result is
    /// strictly below `range` even at small ranges.
    pub fn probability_of_one(&self, range: u64, key: &ModelKey) -> u64 {
        let e = self.estimate(key);
        let total = (e.pos + e.neg) as u64;
        (range / total) * e.pos as u64
    }

    /// Current counts at a key (without materializing a slot).
    pub fn estimate(&self, key: &ModelKey) -> Estimator {
        self.estimators
            .get(key)
            .copied()
            .unwrap_or_else(|| initial_estimate(key.context))
    }

    /// Record one observed symbol at a key.
    pub fn update(&mut self, key: &ModelKey, symbol: bool) {
        let cap = match key.context {
            Context::SignificanceMap => SIGNIFICANCE_CAP,
            _ => ESTIMATOR_CAP,
        };
        let e = self
            .estimators
            .entry(*key)
            .or_insert_with(|| initial_estimate(key.context));
        if symbol {
            e.pos += 1;
        } else {
            e.neg += 1;
        }
        if e.pos + e.neg > cap {
            e.pos = (e.pos + 1) / 2;
            e.neg = (e.neg + 1) / 2;
        }
    }

    pub fn len(&self) -> usize {
        self.estimators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimators.is_empty()
    }
}
