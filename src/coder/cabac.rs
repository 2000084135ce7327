//! CABAC (Context-Adaptive Binary Arithmetic Coding) for H.264/AVC
//!
//! Two engines live here:
//!
//! - [`CabacEncoder`]: reproduces the exact byte stream an H.264 CABAC
//!   encoder emits for a trace of (symbol, context-state) pairs plus
//!   bypass and terminate symbols. It is a thin probability adapter over
//!   the generic [`ArithmeticEncoder`]; because the numerical invariants
//!   of the two coders coincide, feeding the standardized state tables
//!   through it is bit-exact with the H.264 encoding procedure.
//! - [`CabacDecoder`]: the standard 9-bit range/offset decoding engine,
//!   used by the compressor to shadow-decode a hooked slice with the
//!   parser's own context bytes.
//!
//! Context state bytes follow the packing `(p_state_idx << 1) | val_mps`
//! with `p_state_idx` in 0..64.

use crate::coder::arithmetic::ArithmeticEncoder;
use crate::error::Result;

/// Digit width of the CABAC re-emission coder (serialized as two bytes,
/// most significant first).
pub const CABAC_DIGIT_BITS: u32 = 16;

/// Minimum range of the CABAC re-emission coder. At least 0x200 so that
/// `range / 2` in bypass coding never loses precision.
pub const CABAC_MIN_RANGE: u64 = 0x200;

/// Initial range: `range >> normalize` equals 0x1FE as the CABAC
/// initialization requires.
pub const CABAC_INITIAL_RANGE: u64 = 0x1FE << 54;

/// LPS subrange table, indexed by `[p_state_idx][range bits 6..8]`
/// (Rec. ITU-T H.264 table 9-44).
pub const LPS_RANGE: [[u8; 4]; 64] = [
    [128, 176, 208, 240], [128, 167, 197, 227], [128, 158, 187, 216], [123, 150, 178, 205],
    [116, 142, 169, 195], [111, 135, 160, 185], [105, 128, 152, 175], [100, 122, 144, 166],
    [95, 116, 137, 158], [90, 110, 130, 150], [85, 104, 123, 142], [81, 99, 117, 135],
    [77, 94, 111, 128], [73, 89, 105, 122], [69, 85, 100, 116], [66, 80, 95, 110],
    [62, 76, 90, 104], [59, 72, 86, 99], [56, 69, 81, 94], [53, 65, 77, 89],
    [51, 62, 73, 85], [48, 59, 69, 80], [46, 56, 66, 76], [43, 53, 63, 72],
    [41, 50, 59, 69], [39, 48, 56, 65], [37, 45, 54, 62], [35, 43, 51, 59],
    [33, 41, 48, 56], [32, 39, 46, 53], [30, 37, 43, 50], [29, 35, 41, 48],
    [27, 33, 39, 45], [26, 31, 37, 43], [24, 30, 35, 41], [23, 28, 33, 39],
    [22, 27, 32, 37], [21, 26, 30, 35], [20, 24, 29, 33], [19, 23, 27, 31],
    [18, 22, 26, 30], [17, 21, 25, 28], [16, 20, 23, 27], [15, 19, 22, 25],
    [14, 18, 21, 24], [14, 17, 20, 23], [13, 16, 19, 22], [12, 15, 18, 21],
    [12, 14, 17, 20], [11, 14, 16, 19], [11, 13, 15, 18], [10, 12, 15, 17],
    [10, 12, 14, 16], [9, 11, 13, 15], [9, 11, 12, 14], [8, 10, 12, 14],
    [8, 9, 11, 13], [7, 9, 11, 12], [7, 9, 10, 12], [7, 8, 10, 11],
    [6, 8, 9, 11], [6, 7, 9, 10], [6, 7, 8, 9], [2, 2, 2, 2],
];

/// State transition on the most probable symbol, by `p_state_idx`
/// (Rec. ITU-T H.264 table 9-45, transIdxMPS).
pub const NEXT_STATE_MPS: [u8; 64] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
    17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32,
    33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48,
    49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

/// State transition on the least probable symbol, by `p_state_idx`
/// (Rec. ITU-T H.264 table 9-45, transIdxLPS).
pub const NEXT_STATE_LPS: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12,
    13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21, 21, 22, 22, 23, 24,
    24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33,
    33, 33, 34, 34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

/// Combined state-byte transition table: entry `128 + s` is the next
/// state after the more probable symbol in state `s`, entry `127 - s`
/// after the less probable symbol (with the MPS flip at p_state_idx 0).
pub const MLPS_STATE: [u8; 256] = build_mlps_state();

const fn build_mlps_state() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut s = 0usize;
    while s < 128 {
        let p = s >> 1;
        let m = (s & 1) as u8;
        table[128 + s] = (NEXT_STATE_MPS[p] << 1) | m;
        table[127 - s] = if p == 0 {
            m ^ 1
        } else {
            (NEXT_STATE_LPS[p] << 1) | m
        };
        s += 1;
    }
    table
}

fn lps_subrange(range: u64, state: u8) -> u64 {
    // Scale such that range >> normalize lands in [0x100, 0x200), then
    // index the table with the two bits below the leading one.
    let normalize = (range / 0x100).ilog2();
    let range_approx = range >> (normalize - 1);
    let q = ((range_approx >> 7) & 3) as usize;
    (LPS_RANGE[(state >> 1) as usize][q] as u64) << normalize
}

/// CABAC re-encoder
///
/// Reproduces the H.264 CABAC byte stream from decoded symbols and the
/// context bytes the parser hands back. The caller is responsible for
/// calling [`finish`](Self::finish) after the end-of-stream terminate
/// symbol.
pub struct CabacEncoder {
    inner: ArithmeticEncoder,
}

impl CabacEncoder {
    /// Create a re-encoder with the CABAC initial range.
    pub fn new() -> Result<Self> {
        Ok(CabacEncoder {
            inner: ArithmeticEncoder::new(CABAC_DIGIT_BITS, CABAC_MIN_RANGE, CABAC_INITIAL_RANGE)?,
        })
    }

    /// Encode one context-coded symbol and update the context byte.
    pub fn put(&mut self, symbol: u8, state: &mut u8) {
        let s = *state;
        let lps = (symbol & 1) != (s & 1);
        self.inner.put(lps, |range| lps_subrange(range, s));
        *state = if lps {
            MLPS_STATE[(127 - s) as usize]
        } else {
            MLPS_STATE[128 + s as usize]
        };
    }

    /// Encode one bypass symbol (probability exactly one half).
    pub fn put_bypass(&mut self, symbol: u8) {
        self.inner.put(symbol & 1 != 0, |range| range / 2);
    }

    /// Encode the end-of-slice terminate symbol (probability ~2/256).
    pub fn put_terminate(&mut self, end_of_stream: bool) {
        self.inner
            .put(end_of_stream, |range| 2 << (range / 0x100).ilog2());
    }

    /// Finish after a terminate symbol and return the CABAC bytes,
    /// including the stop bit the flush procedure writes.
    pub fn finish(self) -> Vec<u8> {
        self.inner.finish_stop_bit()
    }
}

/// CABAC arithmetic decoder (standard 9-bit engine)
pub struct CabacDecoder {
    data: Vec<u8>,
    pos: usize,
    bit: u32,
    range: u32,
    offset: u32,
}

impl CabacDecoder {
    /// Create a decoder over a coded slice payload. The offset register
    /// is primed with the first nine bits.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let mut decoder = CabacDecoder {
            data: data.into(),
            pos: 0,
            bit: 0,
            range: 510,
            offset: 0,
        };
        for _ in 0..9 {
            decoder.offset = decoder.offset << 1 | decoder.read_bit();
        }
        decoder
    }

    /// Decode one context-coded symbol and update the context byte.
    pub fn decode_decision(&mut self, state: &mut u8) -> u8 {
        let q = ((self.range >> 6) & 3) as usize;
        let r_lps = LPS_RANGE[(*state >> 1) as usize][q] as u32;
        self.range -= r_lps;
        let bin;
        if self.offset >= self.range {
            bin = (*state & 1) ^ 1;
            self.offset -= self.range;
            self.range = r_lps;
            *state = MLPS_STATE[(127 - *state) as usize];
        } else {
            bin = *state & 1;
            *state = MLPS_STATE[128 + *state as usize];
        }
        self.renormalize();
        bin
    }

    /// Decode one bypass symbol.
    pub fn decode_bypass(&mut self) -> u8 {
        self.offset = self.offset << 1 | self.read_bit();
        if self.offset >= self.range {
            self.offset -= self.range;
            1
        } else {
            0
        }
    }

    /// Decode the end-of-slice terminate symbol.
    pub fn decode_terminate(&mut self) -> u8 {
        self.range -= 2;
        if self.offset >= self.range {
            1
        } else {
            self.renormalize();
            0
        }
    }

    /// Bytes consumed so far (partial bytes count as consumed).
    pub fn position(&self) -> usize {
        (self.pos + if self.bit > 0 { 1 } else { 0 }).min(self.data.len())
    }

    fn renormalize(&mut self) {
        while self.range < 0x100 {
            self.range <<= 1;
            self.offset = self.offset << 1 | self.read_bit();
        }
    }

    fn read_bit(&mut self) -> u32 {
        let byte = self.data.get(self.pos).copied().unwrap_or(0);
        let bit = (byte >> (7 - self.bit)) & 1;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.pos += 1;
        }
        bit as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mlps_state_mps_advances() {
        // The more probable symbol strengthens the state and keeps the
        // MPS bit.
        for s in 0..128u8 {
            let next = MLPS_STATE[128 + s as usize];
            assert_eq!(next & 1, s & 1);
            assert!(next >> 1 >= s >> 1);
        }
    }

    #[test]
    fn test_mlps_state_lps_flips_at_zero() {
        assert_eq!(MLPS_STATE[127], 1); // state 0: MPS 0 becomes MPS 1
        assert_eq!(MLPS_STATE[126], 0); // state 1: MPS 1 becomes MPS 0
    }

    #[test]
    fn test_mlps_state_end_state_sticky() {
        // p_state_idx 63 never leaves.
        for s in [126u8, 127u8] {
            assert_eq!(MLPS_STATE[128 + s as usize] >> 1, 63);
            assert_eq!(MLPS_STATE[(127 - s) as usize] >> 1, 63);
        }
    }

    #[test]
    fn test_lps_subrange_scaling() {
        // At the initial range the table applies unscaled except for the
        // normalization shift.
        let r = lps_subrange(CABAC_INITIAL_RANGE, 0);
        // 0x1FE >> normalize-trick picks quarter 3 for state 0.
        assert_eq!(r >> 54, LPS_RANGE[0][3] as u64);
    }

    #[test]
    fn test_encoder_reencodes_decodable_stream() {
        // Encode a trace, then decode it with the standard engine using
        // an identical context evolution.
        let symbols = [1u8, 0, 0, 1, 1, 1, 0, 1, 0, 0, 1, 0, 1, 1, 0, 0];
        let mut enc_state = 0x22u8;
        let mut encoder = CabacEncoder::new().unwrap();
        for &s in &symbols {
            encoder.put(s, &mut enc_state);
        }
        encoder.put_terminate(true);
        let bytes = encoder.finish();
        assert!(!bytes.is_empty());

        let mut dec_state = 0x22u8;
        let mut decoder = CabacDecoder::new(bytes);
        for &s in &symbols {
            assert_eq!(decoder.decode_decision(&mut dec_state), s);
        }
        assert_eq!(decoder.decode_terminate(), 1);
        assert_eq!(enc_state, dec_state);
    }

    #[test]
    fn test_bypass_roundtrip() {
        let mut encoder = CabacEncoder::new().unwrap();
        let bits = [1u8, 1, 0, 1, 0, 0, 0, 1, 1, 0];
        for &b in &bits {
            encoder.put_bypass(b);
        }
        encoder.put_terminate(true);
        let bytes = encoder.finish();

        let mut decoder = CabacDecoder::new(bytes);
        for &b in &bits {
            assert_eq!(decoder.decode_bypass(), b);
        }
        assert_eq!(decoder.decode_terminate(), 1);
    }

    #[test]
    fn test_terminate_zero_keeps_going() {
        let mut encoder = CabacEncoder::new().unwrap();
        let mut state = 0x40u8;
        encoder.put(1, &mut state);
        encoder.put_terminate(false);
        encoder.put(0, &mut state);
        encoder.put_terminate(true);
        let bytes = encoder.finish();

        let mut dec_state = 0x40u8;
        let mut decoder = CabacDecoder::new(bytes);
        assert_eq!(decoder.decode_decision(&mut dec_state), 1);
        assert_eq!(decoder.decode_terminate(), 0);
        assert_eq!(decoder.decode_decision(&mut dec_state), 0);
        assert_eq!(decoder.decode_terminate(), 1);
    }
}
