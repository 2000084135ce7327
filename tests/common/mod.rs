//! Common test utilities for recavc integration tests
//!
//! Provides a reference H.264 CABAC encoder (implemented straight from
//! the standard's flowcharts, independently of the production coder), a
//! scripted parser that replays synthesized decoding traces against the
//! driver hooks, and builders for synthetic clip files.

// Each integration test binary uses its own slice of these helpers.
#![allow(dead_code)]

use recavc_lib::coder::cabac::{LPS_RANGE, MLPS_STATE};
use recavc_lib::error::{Error, Result};
use recavc_lib::hooks::{CodingHooks, CodingType, Parser, SubBlockSpec};

// ============================================================================
// Reference CABAC encoder (Rec. ITU-T H.264 clause 9.3.4)
// ============================================================================

/// Bit-level writer, most significant bit first.
struct BitWriter {
    out: Vec<u8>,
    cur: u8,
    nbits: u8,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter { out: Vec::new(), cur: 0, nbits: 0 }
    }

    fn push(&mut self, bit: u8) {
        self.cur = self.cur << 1 | (bit & 1);
        self.nbits += 1;
        if self.nbits == 8 {
            self.out.push(self.cur);
            self.cur = 0;
            self.nbits = 0;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.cur <<= 8 - self.nbits;
            self.out.push(self.cur);
        }
        self.out
    }
}

/// Reference arithmetic encoding engine with PutBit/outstanding-bit
/// carry handling, as the standard specifies it.
pub struct RefCabacEncoder {
    low: u32,
    range: u32,
    outstanding: u32,
    first_bit: bool,
    bits: BitWriter,
}

impl RefCabacEncoder {
    pub fn new() -> Self {
        RefCabacEncoder {
            low: 0,
            range: 510,
            outstanding: 0,
            first_bit: true,
            bits: BitWriter::new(),
        }
    }

    pub fn encode_decision(&mut self, state: &mut u8, bin: u8) {
        let q = ((self.range >> 6) & 3) as usize;
        let r_lps = LPS_RANGE[(*state >> 1) as usize][q] as u32;
        self.range -= r_lps;
        if bin & 1 != *state & 1 {
            self.low += self.range;
            self.range = r_lps;
            *state = MLPS_STATE[(127 - *state) as usize];
        } else {
            *state = MLPS_STATE[128 + *state as usize];
        }
        self.renormalize();
    }

    pub fn encode_bypass(&mut self, bin: u8) {
        self.low <<= 1;
        if bin & 1 != 0 {
            self.low += self.range;
        }
        if self.low >= 0x400 {
            self.put_bit(1);
            self.low -= 0x400;
        } else if self.low < 0x200 {
            self.put_bit(0);
        } else {
            self.outstanding += 1;
            self.low -= 0x200;
        }
    }

    pub fn encode_terminate(&mut self, bin: u8) {
        self.range -= 2;
        if bin & 1 != 0 {
            self.low += self.range;
            self.flush();
        } else {
            self.renormalize();
        }
    }

    /// Byte stream produced so far; only valid after a terminate(1).
    pub fn finish(self) -> Vec<u8> {
        self.bits.finish()
    }

    fn renormalize(&mut self) {
        while self.range < 0x100 {
            if self.low < 0x100 {
                self.put_bit(0);
            } else if self.low >= 0x200 {
                self.put_bit(1);
                self.low -= 0x200;
            } else {
                self.outstanding += 1;
                self.low -= 0x100;
            }
            self.low <<= 1;
            self.range <<= 1;
        }
    }

    fn flush(&mut self) {
        self.range = 2;
        self.renormalize();
        self.put_bit(((self.low >> 9) & 1) as u8);
        let tail = ((self.low >> 7) & 3) | 1;
        self.bits.push(((tail >> 1) & 1) as u8);
        self.bits.push((tail & 1) as u8);
    }

    fn put_bit(&mut self, bit: u8) {
        if self.first_bit {
            self.first_bit = false;
        } else {
            self.bits.push(bit);
        }
        while self.outstanding > 0 {
            self.bits.push(1 - bit);
            self.outstanding -= 1;
        }
    }
}

// ============================================================================
// Decoding traces
// ============================================================================

pub const STATE_SLOTS: usize = 1024;

/// Fixed context initialization shared by the trace encoder and the
/// scripted parser (stands in for the slice-QP-derived init).
pub fn initial_states() -> Vec<u8> {
    (0..STATE_SLOTS).map(|i| ((i * 5 + 3) % 128) as u8).collect()
}

/// One recorded decoding event. Symbol-producing events carry the
/// symbol value the original stream encoded, so replays can be checked.
#[derive(Debug, Clone)]
pub enum TraceEv {
    FrameSpec { frame_num: i32, mb_width: usize, mb_height: usize },
    MbXy { x: usize, y: usize },
    BeginSubMb(SubBlockSpec),
    EndSubMb(SubBlockSpec, Vec<i16>),
    BeginCt(CodingType, u32),
    EndCt(CodingType),
    Get { ctx: u16, bin: u8 },
    Bypass { bin: u8 },
    Terminate { bin: u8 },
}

/// Encode a trace's symbol events with the reference encoder, producing
/// the CABAC payload a real encoder would have written.
pub fn encode_trace(events: &[TraceEv]) -> Vec<u8> {
    let mut states = initial_states();
    let mut encoder = RefCabacEncoder::new();
    for ev in events {
        match ev {
            TraceEv::Get { ctx, bin } => {
                encoder.encode_decision(&mut states[*ctx as usize], *bin)
            }
            TraceEv::Bypass { bin } => encoder.encode_bypass(*bin),
            TraceEv::Terminate { bin } => encoder.encode_terminate(*bin),
            _ => {}
        }
    }
    encoder.finish()
}

// ============================================================================
// Scripted parser
// ============================================================================

/// One CABAC block of a scripted clip.
#[derive(Debug, Clone)]
pub struct ScriptBlock {
    /// Offset of the payload in the container stream.
    pub offset: usize,
    /// Payload length in the container stream.
    pub len: usize,
    /// The unescaped payload handed to `init_cabac`. When it matches
    /// the container bytes the parser slices the read stream instead,
    /// so surrogate substitution takes effect on decompression.
    pub payload: Vec<u8>,
    /// Whether the container holds an escaped (different) byte
    /// sequence, forcing the skip_coded path.
    pub escaped: bool,
    /// Decoding events for hooked replay.
    pub events: Vec<TraceEv>,
}

/// A synthesized clip: container bytes plus the parser script.
#[derive(Debug, Clone, Default)]
pub struct Clip {
    pub file: Vec<u8>,
    pub blocks: Vec<ScriptBlock>,
}

/// A parser that replays a fixed script of decoding events, checking
/// every hook-returned symbol against the original trace.
pub struct ScriptedParser {
    clip: Clip,
}

impl ScriptedParser {
    pub fn new(clip: Clip) -> Self {
        ScriptedParser { clip }
    }
}

impl Parser for ScriptedParser {
    fn drive(&mut self, hooks: &mut dyn CodingHooks) -> Result<()> {
        // Pull the whole container through the IO callback first, the
        // way a buffering demuxer would.
        let mut stream = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = hooks.read_packet(&mut buf)?;
            if n == 0 {
                break;
            }
            stream.extend_from_slice(&buf[..n]);
        }

        for block in &self.clip.blocks {
            let payload: Vec<u8> = if block.escaped {
                block.payload.clone()
            } else {
                stream
                    .get(block.offset..block.offset + block.len)
                    .ok_or_else(|| Error::parser("script block outside stream"))?
                    .to_vec()
            };
            let hooked = hooks.init_cabac(&payload)?;
            if !hooked {
                // The parser decodes this block with its own CABAC
                // engine; no hook traffic.
                continue;
            }
            let mut states = initial_states();
            for ev in &block.events {
                match ev {
                    TraceEv::FrameSpec { frame_num, mb_width, mb_height } => {
                        hooks.frame_spec(*frame_num, *mb_width, *mb_height)
                    }
                    TraceEv::MbXy { x, y } => hooks.mb_xy(*x, *y),
                    TraceEv::BeginSubMb(spec) => hooks.begin_sub_mb(*spec),
                    TraceEv::EndSubMb(spec, coeffs) => hooks.end_sub_mb(*spec, coeffs),
                    TraceEv::BeginCt(ct, zigzag) => {
                        hooks.begin_coding_type(*ct, *zigzag, 0, 0)
                    }
                    TraceEv::EndCt(ct) => hooks.end_coding_type(*ct)?,
                    TraceEv::Get { ctx, bin } => {
                        let symbol = hooks.get(*ctx, &mut states[*ctx as usize])?;
                        if symbol != *bin {
                            return Err(Error::parser(format!(
                                "replayed symbol {} != original {} at ctx {}",
                                symbol, bin, ctx
                            )));
                        }
                    }
                    TraceEv::Bypass { bin } => {
                        let symbol = hooks.get_bypass()?;
                        if symbol != *bin {
                            return Err(Error::parser("replayed bypass symbol mismatch"));
                        }
                    }
                    TraceEv::Terminate { bin } => {
                        let symbol = hooks.get_terminate()?;
                        if symbol != *bin {
                            return Err(Error::parser("replayed terminate symbol mismatch"));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Clip builders
// ============================================================================

/// Significance/EOB context bases in the scripted state table.
const SIG_CTX_BASE: u16 = 100;
const EOB_CTX_BASE: u16 = 200;
const LEVEL_CTX_BASE: u16 = 300;

/// Events for one residual sub-block with the given coefficients (in
/// scan order), following the H.264 residual_block_cabac structure.
/// At least one coefficient must be nonzero.
pub fn sub_block_events(spec: SubBlockSpec, coeffs: &[i16]) -> Vec<TraceEv> {
    let size = spec.max_coeff as usize;
    assert_eq!(coeffs.len(), size);
    let nonzeros: Vec<usize> = (0..size).filter(|&i| coeffs[i] != 0).collect();
    assert!(!nonzeros.is_empty());
    let last_nonzero = *nonzeros.last().unwrap();

    let mut events = vec![TraceEv::BeginSubMb(spec)];

    // Significance map: coded flags for all positions but the last.
    events.push(TraceEv::BeginCt(CodingType::SignificanceMap, 0));
    for i in 0..size - 1 {
        let significant = coeffs[i] != 0;
        events.push(TraceEv::Get {
            ctx: SIG_CTX_BASE + (i % 64) as u16,
            bin: significant as u8,
        });
        if significant {
            let last = i == last_nonzero;
            events.push(TraceEv::Get {
                ctx: EOB_CTX_BASE + (i % 64) as u16,
                bin: last as u8,
            });
            if last {
                break;
            }
        }
    }
    events.push(TraceEv::EndCt(CodingType::SignificanceMap));

    // Coefficient levels: a magnitude bin and a bypass sign per
    // nonzero coefficient.
    events.push(TraceEv::BeginCt(CodingType::Residuals, 0));
    for &i in nonzeros.iter().rev() {
        let magnitude_is_one = coeffs[i].unsigned_abs() == 1;
        events.push(TraceEv::Get {
            ctx: LEVEL_CTX_BASE + (i % 16) as u16,
            bin: !magnitude_is_one as u8,
        });
        events.push(TraceEv::Bypass { bin: (coeffs[i] < 0) as u8 });
    }
    events.push(TraceEv::EndCt(CodingType::Residuals));

    events.push(TraceEv::EndSubMb(spec, coeffs.to_vec()));
    events
}

/// Assemble a container file around already-encoded CABAC payloads:
/// distinctive junk, then each payload (escaped blocks get their
/// container form), then a tail.
pub fn build_clip(blocks: Vec<(Vec<TraceEv>, bool)>) -> Clip {
    let mut file: Vec<u8> = (0u8..64).map(|i| i.wrapping_mul(37) | 1).collect();
    let mut script_blocks = Vec::new();

    for (events, escaped) in blocks {
        let payload = encode_trace(&events);
        let container_bytes = if escaped {
            // Stand in for NAL escaping: the container carries an
            // expanded byte sequence the parser unescapes before
            // handing it to the hooks.
            let mut escaped_bytes = Vec::with_capacity(payload.len() + 4);
            for (i, &b) in payload.iter().enumerate() {
                escaped_bytes.push(b);
                if i % 3 == 2 {
                    escaped_bytes.push(0x03);
                }
            }
            escaped_bytes
        } else {
            payload.clone()
        };
        let offset = file.len();
        let len = container_bytes.len();
        file.extend_from_slice(&container_bytes);
        // Separator junk between blocks.
        file.extend_from_slice(&[0x47, 0x11, 0x5A, 0x33, 0x99, 0x01]);
        script_blocks.push(ScriptBlock {
            offset,
            len: if escaped { len } else { payload.len() },
            payload,
            escaped,
            events,
        });
    }

    file.extend((0u8..32).map(|i| i.wrapping_mul(29) | 3));
    Clip { file, blocks: script_blocks }
}
