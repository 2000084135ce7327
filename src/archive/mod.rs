//! Archive container format
//!
//! The compressed output is a self-contained stream of tagged records.
//! Record order is the only sequencing primitive: the decompressor
//! replays blocks strictly in the order the compressor appended them.
//!
//! ## Layout (Little Endian)
//!
//! ```text
//! +------------------------+
//! | magic "RAVC" + version |
//! +------------------------+
//! | record 0               |
//! | record 1 ...           |
//! +------------------------+
//! ```
//!
//! Each record starts with a one-byte tag:
//!
//! | Tag | Record     | Fields                                          |
//! |-----|------------|-------------------------------------------------|
//! | 1   | literal    | len:u32, bytes                                  |
//! | 2   | cabac      | len:u32, bytes, size:u32, parity:u8, last:u8    |
//! | 3   | skip_coded | size:u32                                        |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Magic bytes of the archive format.
pub const MAGIC: &[u8; 4] = b"RAVC";

/// Current archive format version.
pub const FORMAT_VERSION: u8 = 1;

const TAG_LITERAL: u8 = 1;
const TAG_CABAC: u8 = 2;
const TAG_SKIP_CODED: u8 = 3;

/// One archive record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Bytes passed through untouched.
    Literal(Vec<u8>),
    /// A re-coded CABAC block.
    Cabac {
        /// The re-coded stream.
        data: Vec<u8>,
        /// Length of the original CABAC payload.
        size: u32,
        /// Parity of the original payload length.
        length_parity: bool,
        /// Final byte of the original payload, for re-emission fixup.
        last_byte: u8,
    },
    /// A CABAC block left un-coded; its bytes arrive in the following
    /// literal record.
    SkipCoded {
        /// Length of the original CABAC payload.
        size: u32,
    },
}

impl Block {
    /// Whether this record corresponds to a CABAC init in the parser.
    pub fn is_coded(&self) -> bool {
        matches!(self, Block::Cabac { .. } | Block::SkipCoded { .. })
    }
}

/// An ordered sequence of records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Archive {
    pub blocks: Vec<Block>,
}

impl Archive {
    pub fn new() -> Self {
        Archive { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Total payload bytes held in literal and cabac records.
    pub fn payload_bytes(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| match b {
                Block::Literal(data) => data.len(),
                Block::Cabac { data, .. } => data.len(),
                Block::SkipCoded { .. } => 0,
            })
            .sum()
    }

    /// Serialize to a writer.
    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_u8(FORMAT_VERSION)?;
        for block in &self.blocks {
            match block {
                Block::Literal(data) => {
                    w.write_u8(TAG_LITERAL)?;
                    w.write_u32::<LittleEndian>(data.len() as u32)?;
                    w.write_all(data)?;
                }
                Block::Cabac { data, size, length_parity, last_byte } => {
                    w.write_u8(TAG_CABAC)?;
                    w.write_u32::<LittleEndian>(data.len() as u32)?;
                    w.write_all(data)?;
                    w.write_u32::<LittleEndian>(*size)?;
                    w.write_u8(*length_parity as u8)?;
                    w.write_u8(*last_byte)?;
                }
                Block::SkipCoded { size } => {
                    w.write_u8(TAG_SKIP_CODED)?;
                    w.write_u32::<LittleEndian>(*size)?;
                }
            }
        }
        Ok(())
    }

    /// Serialize to an owned buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Parse an archive from bytes, validating structure strictly.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = std::io::Cursor::new(bytes);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)
            .map_err(|_| Error::archive("truncated header"))?;
        if &magic != MAGIC {
            return Err(Error::archive("bad magic"));
        }
        let version = r
            .read_u8()
            .map_err(|_| Error::archive("truncated header"))?;
        if version != FORMAT_VERSION {
            return Err(Error::archive(format!("unsupported version {}", version)));
        }

        let mut blocks = Vec::new();
        loop {
            let tag = match r.read_u8() {
                Ok(tag) => tag,
                Err(_) => break,
            };
            let block = match tag {
                TAG_LITERAL => {
                    let len = r
                        .read_u32::<LittleEndian>()
                        .map_err(|_| Error::archive("literal record missing length"))?;
                    let mut data = vec![0u8; len as usize];
                    r.read_exact(&mut data)
                        .map_err(|_| Error::archive("literal record truncated"))?;
                    Block::Literal(data)
                }
                TAG_CABAC => {
                    let len = r
                        .read_u32::<LittleEndian>()
                        .map_err(|_| Error::archive("cabac record missing length"))?;
                    let mut data = vec![0u8; len as usize];
                    r.read_exact(&mut data)
                        .map_err(|_| Error::archive("cabac record truncated"))?;
                    let size = r
                        .read_u32::<LittleEndian>()
                        .map_err(|_| Error::archive("cabac record missing size"))?;
                    let parity = r
                        .read_u8()
                        .map_err(|_| Error::archive("cabac record missing parity"))?;
                    if parity > 1 {
                        return Err(Error::archive(format!("invalid parity {}", parity)));
                    }
                    let last_byte = r
                        .read_u8()
                        .map_err(|_| Error::archive("cabac record missing last byte"))?;
                    Block::Cabac {
                        data,
                        size,
                        length_parity: parity != 0,
                        last_byte,
                    }
                }
                TAG_SKIP_CODED => {
                    let size = r
                        .read_u32::<LittleEndian>()
                        .map_err(|_| Error::archive("skip_coded record missing size"))?;
                    Block::SkipCoded { size }
                }
                other => {
                    return Err(Error::archive(format!("unknown record tag {}", other)));
                }
            };
            blocks.push(block);
        }
        Ok(Archive { blocks })
    }
}
