//! Generic binary arithmetic coding
//!
//! A 64-bit fixed-point binary arithmetic encoder/decoder pair. The same
//! engine backs both the recoded block streams and the CABAC re-emission
//! path; the two uses differ only in digit width, minimum range, and
//! initial range (see [`crate::coder::cabac`]).
//!
//! # Fixed-point representation
//!
//! Probabilities and interval bounds are fractions of [`FIXED_ONE`]
//! (2^63). The encoder maintains an interval `[low, low + range)` and
//! emits digits of `DIGIT_BITS` bits whenever `range` drops below the
//! configured minimum. A digit whose value could still be changed by a
//! later carry is parked in a deferred queue and only written once an
//! unambiguous digit settles it.

use crate::error::{Error, Result};

/// The representation of 1.0 in fixed point.
pub const FIXED_ONE: u64 = 1 << 63;

/// Digit width of the recoded block streams.
pub const RECODE_DIGIT_BITS: u32 = 8;

/// Minimum range of the recoded block streams.
pub const RECODE_MIN_RANGE: u64 = (FIXED_ONE >> RECODE_DIGIT_BITS) / 16;

fn check_params(digit_bits: u32, min_range: u64, initial_range: u64) -> Result<()> {
    if digit_bits != 8 && digit_bits != 16 {
        return Err(Error::coder(format!(
            "unsupported digit width: {} bits",
            digit_bits
        )));
    }
    if min_range < 2 || min_range >= FIXED_ONE >> digit_bits {
        return Err(Error::coder(format!(
            "min_range {:#x} outside [2, {:#x})",
            min_range,
            FIXED_ONE >> digit_bits
        )));
    }
    if initial_range == 0 || initial_range > FIXED_ONE {
        return Err(Error::coder(format!(
            "initial range {:#x} outside (0, {:#x}]",
            initial_range, FIXED_ONE
        )));
    }
    Ok(())
}

/// Binary arithmetic encoder
///
/// Symbols are pushed with [`put`](Self::put); the caller supplies a
/// closure mapping the current range to the subrange of the `1` symbol.
/// [`finish`](Self::finish) consumes the encoder and returns the shortest
/// byte stream from which a matching [`ArithmeticDecoder`] recovers the
/// symbol sequence.
pub struct ArithmeticEncoder {
    low: u64,
    range: u64,
    digit_bits: u32,
    min_range: u64,
    /// Digits whose final value still depends on a possible carry.
    /// Emitted FIFO; carries propagate LIFO from the tail.
    pending: Vec<u64>,
    out: Vec<u8>,
}

impl ArithmeticEncoder {
    /// Create an encoder with explicit digit width, minimum range, and
    /// initial range. Fails if the parameters violate the fixed-point
    /// constraints.
    pub fn new(digit_bits: u32, min_range: u64, initial_range: u64) -> Result<Self> {
        check_params(digit_bits, min_range, initial_range)?;
        Ok(ArithmeticEncoder {
            low: 0,
            range: initial_range,
            digit_bits,
            min_range,
            pending: Vec::new(),
            out: Vec::new(),
        })
    }

    /// Encoder configured for recoded block streams (8-bit digits).
    pub fn recode() -> Self {
        ArithmeticEncoder {
            low: 0,
            range: FIXED_ONE,
            digit_bits: RECODE_DIGIT_BITS,
            min_range: RECODE_MIN_RANGE,
            pending: Vec::new(),
            out: Vec::new(),
        }
    }

    /// Encode one binary symbol.
    ///
    /// `p1_of_range` receives the current range and must return the
    /// subrange assigned to symbol `1`, in `[1, range)`.
    pub fn put(&mut self, symbol: bool, p1_of_range: impl FnOnce(u64) -> u64) {
        let p1 = p1_of_range(self.range);
        debug_assert!(p1 >= 1 && p1 < self.range);
        let r0 = self.range - p1;
        if symbol {
            self.low += r0;
            self.range = p1;
            if self.low >= FIXED_ONE {
                self.propagate_carry();
                self.low -= FIXED_ONE;
            }
        } else {
            self.range = r0;
        }
        while self.range < self.min_range {
            self.emit_digit();
        }
    }

    /// Number of bytes written so far (excluding deferred digits).
    pub fn bytes_written(&self) -> usize {
        self.out.len()
    }

    /// Finish encoding and return the compressed bytes.
    ///
    /// Picks the multiple of the largest power of two not exceeding the
    /// final range that lies inside the interval, producing the shortest
    /// sufficient suffix.
    pub fn finish(self) -> Vec<u8> {
        let step = 1u64 << self.range.ilog2();
        let value = (self.low + step - 1) & !(step - 1);
        self.finish_at(value)
    }

    /// Finish with the value the H.264 CABAC flush procedure commits to:
    /// the interval's low bound with the stop bit set one position below
    /// the final range.
    pub(crate) fn finish_stop_bit(self) -> Vec<u8> {
        let value = self.low | (1u64 << (self.range.ilog2() - 1));
        self.finish_at(value)
    }

    fn finish_at(mut self, mut value: u64) -> Vec<u8> {
        if value >= FIXED_ONE {
            self.propagate_carry();
            value -= FIXED_ONE;
        }
        self.flush_pending();
        // The tail is emitted byte-wise down to the last nonzero byte,
        // independent of the internal digit width.
        while value != 0 {
            self.out.push((value >> 55) as u8);
            value = (value & (FIXED_ONE / 256 - 1)) << 8;
        }
        self.out
    }

    fn emit_digit(&mut self) {
        let shift = 63 - self.digit_bits;
        let digit = self.low >> shift;
        let top = (self.low + self.range - 1) >> shift;
        if digit == top {
            // The whole interval shares this digit: nothing later can
            // carry into it or into anything queued before it.
            self.flush_pending();
            self.push_digit(digit);
        } else {
            self.pending.push(digit);
        }
        self.low = (self.low - (digit << shift)) << self.digit_bits;
        self.range <<= self.digit_bits;
    }

    fn propagate_carry(&mut self) {
        let max_digit = (1u64 << self.digit_bits) - 1;
        for digit in self.pending.iter_mut().rev() {
            if *digit == max_digit {
                *digit = 0;
            } else {
                *digit += 1;
                return;
            }
        }
        // A carry with no deferred digit to absorb it would rewrite
        // bytes already written, which the emission rule rules out.
        panic!("arithmetic coder carry propagated past the deferred digit queue");
    }

    fn flush_pending(&mut self) {
        for digit in std::mem::take(&mut self.pending) {
            self.push_digit(digit);
        }
    }

    fn push_digit(&mut self, digit: u64) {
        let mut b = self.digit_bits;
        while b > 0 {
            b -= 8;
            self.out.push((digit >> b) as u8);
        }
    }
}

/// Binary arithmetic decoder
///
/// Mirrors [`ArithmeticEncoder`]: [`get`](Self::get) must be called with
/// the same subrange closure the encoder saw for the corresponding
/// symbol. Reads past the end of the input behave as zero digits, which
/// matches the encoder dropping trailing zeroes.
pub struct ArithmeticDecoder {
    data: Vec<u8>,
    pos: usize,
    /// Offset of the encoded value above the interval's low bound,
    /// doubled so that input digits land on integer weights.
    value: u64,
    range: u64,
    digit_bits: u32,
    min_range: u64,
}

impl ArithmeticDecoder {
    /// Create a decoder with explicit parameters, mirroring
    /// [`ArithmeticEncoder::new`].
    pub fn new(
        data: impl Into<Vec<u8>>,
        digit_bits: u32,
        min_range: u64,
        initial_range: u64,
    ) -> Result<Self> {
        check_params(digit_bits, min_range, initial_range)?;
        let mut decoder = ArithmeticDecoder {
            data: data.into(),
            pos: 0,
            value: 0,
            range: initial_range,
            digit_bits,
            min_range,
        };
        for _ in 0..8 {
            decoder.value = decoder.value << 8 | decoder.next_byte();
        }
        Ok(decoder)
    }

    /// Decoder configured for recoded block streams (8-bit digits).
    pub fn recode(data: impl Into<Vec<u8>>) -> Self {
        let mut decoder = ArithmeticDecoder {
            data: data.into(),
            pos: 0,
            value: 0,
            range: FIXED_ONE,
            digit_bits: RECODE_DIGIT_BITS,
            min_range: RECODE_MIN_RANGE,
        };
        for _ in 0..8 {
            decoder.value = decoder.value << 8 | decoder.next_byte();
        }
        decoder
    }

    /// Decode one binary symbol.
    pub fn get(&mut self, p1_of_range: impl FnOnce(u64) -> u64) -> bool {
        let p1 = p1_of_range(self.range);
        debug_assert!(p1 >= 1 && p1 < self.range);
        let r0 = self.range - p1;
        let symbol = self.value >= r0 << 1;
        if symbol {
            self.value -= r0 << 1;
            self.range = p1;
        } else {
            self.range = r0;
        }
        while self.range < self.min_range {
            let mut digit = 0u64;
            let mut b = self.digit_bits;
            while b > 0 {
                b -= 8;
                digit = digit << 8 | self.next_byte();
            }
            self.value = self.value << self.digit_bits | digit;
            self.range <<= self.digit_bits;
        }
        symbol
    }

    /// Bytes consumed from the input so far.
    pub fn position(&self) -> usize {
        self.pos.min(self.data.len())
    }

    fn next_byte(&mut self) -> u64 {
        let byte = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte as u64
    }
}
