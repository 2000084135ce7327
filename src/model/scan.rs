//! Sub-block scanning topology for H.264 macroblocks
//!
//! Sub-blocks are addressed through the scan-8 layout: an 8-wide virtual
//! grid in which the 16 luma 4x4 blocks occupy columns 4..8 of rows 1..5,
//! the two chroma planes occupy the same columns of rows 6..10 and
//! 11..15, and the three DC blocks sit in column 0 of rows 0, 5 and 10.
//! Left and above neighbors are one cell (or eight cells) away; lookups
//! that leave the grid band cross into the adjacent macroblock.
//!
//! Zig-zag permutations map scan positions to raster positions inside a
//! transform grid (2x2 chroma DC, 4x4, 8x8).

/// Number of AC sub-block slots per macroblock (3 planes x 16).
pub const AC_SUB_BLOCKS: usize = 48;

/// Total sub-block slots including the three DC blocks.
pub const SUB_BLOCKS: usize = 51;

/// scan-8 index of the luma DC block.
pub const SCAN8_LUMA_DC: u8 = 48;

/// scan-8 index of the Cb DC block.
pub const SCAN8_CHROMA_U_DC: u8 = 49;

/// scan-8 index of the Cr DC block.
pub const SCAN8_CHROMA_V_DC: u8 = 50;

/// Packed cell ids (`x + 8 * y`) for each sub-block index.
pub const SCAN_8: [u8; SUB_BLOCKS] = [
    4 + 1 * 8, 5 + 1 * 8, 4 + 2 * 8, 5 + 2 * 8,
    6 + 1 * 8, 7 + 1 * 8, 6 + 2 * 8, 7 + 2 * 8,
    4 + 3 * 8, 5 + 3 * 8, 4 + 4 * 8, 5 + 4 * 8,
    6 + 3 * 8, 7 + 3 * 8, 6 + 4 * 8, 7 + 4 * 8,
    4 + 6 * 8, 5 + 6 * 8, 4 + 7 * 8, 5 + 7 * 8,
    6 + 6 * 8, 7 + 6 * 8, 6 + 7 * 8, 7 + 7 * 8,
    4 + 8 * 8, 5 + 8 * 8, 4 + 9 * 8, 5 + 9 * 8,
    6 + 8 * 8, 7 + 8 * 8, 6 + 9 * 8, 7 + 9 * 8,
    4 + 11 * 8, 5 + 11 * 8, 4 + 12 * 8, 5 + 12 * 8,
    6 + 11 * 8, 7 + 11 * 8, 6 + 12 * 8, 7 + 12 * 8,
    4 + 13 * 8, 5 + 13 * 8, 4 + 14 * 8, 5 + 14 * 8,
    6 + 13 * 8, 7 + 13 * 8, 6 + 14 * 8, 7 + 14 * 8,
    0 + 0 * 8, 0 + 5 * 8, 0 + 10 * 8,
];

/// Inverse of [`SCAN_8`]: sub-block index per grid cell, or -1 for cells
/// outside every band. A lookup landing on -1 crossed a macroblock
/// boundary.
pub const REVERSE_SCAN_8: [[i8; 8]; 15] = build_reverse_scan_8();

const fn build_reverse_scan_8() -> [[i8; 8]; 15] {
    let mut table = [[-1i8; 8]; 15];
    let mut i = 0;
    while i < SUB_BLOCKS {
        let cell = SCAN_8[i] as usize;
        table[cell >> 3][cell & 7] = i as i8;
        i += 1;
    }
    table
}

/// 2x2 chroma DC scan (raster position per scan position).
pub const ZIGZAG_4: [u8; 4] = [0, 1, 2, 3];

/// 4x4 zig-zag scan.
pub const ZIGZAG_16: [u8; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// 8x8 zig-zag scan.
pub const ZIGZAG_64: [u8; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5,
    12, 19, 26, 33, 40, 48, 41, 34, 27, 20, 13, 6, 7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Inverse of [`ZIGZAG_4`].
pub const UNZIGZAG_4: [u8; 4] = invert::<4>(&ZIGZAG_4);

/// Inverse of [`ZIGZAG_16`].
pub const UNZIGZAG_16: [u8; 16] = invert::<16>(&ZIGZAG_16);

/// Inverse of [`ZIGZAG_64`].
pub const UNZIGZAG_64: [u8; 64] = invert::<64>(&ZIGZAG_64);

const fn invert<const N: usize>(scan: &[u8; N]) -> [u8; N] {
    let mut inv = [0u8; N];
    let mut i = 0;
    while i < N {
        inv[scan[i] as usize] = i as u8;
        i += 1;
    }
    inv
}

/// Context offsets for significant_coeff_flag in 8x8 blocks, by scan
/// position (Rec. ITU-T H.264 table 9-43). Row 0 is the frame-coded map;
/// the field-coded row is defined but never selected here.
pub const SIG_COEFF_FLAG_OFFSET_8X8: [[u8; 63]; 2] = [
    [
        0, 1, 2, 3, 4, 5, 5, 4, 4, 3, 3, 4, 4, 4, 5, 5,
        4, 4, 4, 4, 3, 3, 6, 7, 7, 7, 8, 9, 10, 9, 8, 7,
        7, 6, 11, 12, 13, 11, 6, 7, 8, 9, 14, 10, 9, 8, 6, 11,
        12, 13, 11, 6, 9, 14, 10, 9, 11, 12, 13, 11, 14, 10, 12,
    ],
    [
        0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 7,
        8, 4, 5, 6, 9, 10, 10, 8, 11, 12, 11, 9, 9, 10, 10, 8,
        11, 12, 11, 9, 9, 10, 10, 8, 11, 12, 11, 9, 9, 10, 10, 8,
        13, 13, 9, 9, 10, 10, 8, 13, 13, 9, 9, 10, 10, 14, 14,
    ],
];

/// Context offsets for 4:2:2 chroma DC significance positions.
pub const SIG_DC_OFFSET_422: [u8; 7] = [0, 0, 1, 1, 2, 2, 2];

/// Folds the 14 residual categories into the model's category classes;
/// the 4:4:4 chroma categories share their luma analogues.
pub const CAT_LOOKUP: [u8; 14] = [0, 1, 2, 3, 4, 5, 0, 1, 2, 5, 0, 1, 2, 5];

/// Position of one coefficient (or one whole sub-block, with the zig-zag
/// index along for the ride) in the frame's macroblock grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoefficientCoordinate {
    pub mb_x: usize,
    pub mb_y: usize,
    pub scan8_index: u8,
    pub zigzag_index: u8,
}

/// Transform grid dimensions (width, height) for a sub-block size.
pub fn grid_dims(sub_mb_size: usize) -> (usize, usize) {
    match sub_mb_size {
        4 => (2, 2),
        8 => (2, 4),
        64 => (8, 8),
        _ => (4, 4),
    }
}

/// Raster position for a scan position within a sub-block grid.
pub fn raster_of(sub_mb_size: usize, zigzag_index: u8) -> usize {
    match sub_mb_size {
        4 => ZIGZAG_4[zigzag_index as usize] as usize,
        64 => ZIGZAG_64[zigzag_index as usize] as usize,
        8 => zigzag_index as usize,
        _ => ZIGZAG_16[zigzag_index as usize] as usize,
    }
}

/// Scan position for a raster position within a sub-block grid.
pub fn scan_of(sub_mb_size: usize, raster: usize) -> u8 {
    match sub_mb_size {
        4 => UNZIGZAG_4[raster],
        64 => UNZIGZAG_64[raster],
        8 => raster as u8,
        _ => UNZIGZAG_16[raster],
    }
}

/// Look up the sub-block neighbor above or to the left of `c`.
///
/// Returns `None` at frame edges. Lookups that cross a macroblock
/// boundary consume `mb_x - 1` or `mb_y - 1` and re-enter the grid on
/// the opposite edge of the same plane band.
pub fn get_neighbor(
    above: bool,
    _sub_mb_size: usize,
    c: CoefficientCoordinate,
) -> Option<CoefficientCoordinate> {
    if c.scan8_index >= AC_SUB_BLOCKS as u8 {
        // DC blocks neighbor the same DC slot of the adjacent macroblock.
        return if above {
            (c.mb_y > 0).then(|| CoefficientCoordinate { mb_y: c.mb_y - 1, ..c })
        } else {
            (c.mb_x > 0).then(|| CoefficientCoordinate { mb_x: c.mb_x - 1, ..c })
        };
    }

    let cell = SCAN_8[c.scan8_index as usize] as usize;
    let (x, y) = (cell & 7, cell >> 3);
    if above {
        let index = REVERSE_SCAN_8[y - 1][x];
        if index >= 0 {
            return Some(CoefficientCoordinate { scan8_index: index as u8, ..c });
        }
        if c.mb_y == 0 {
            return None;
        }
        // Bottom row of the same band in the macroblock above.
        let index = REVERSE_SCAN_8[y + 3][x];
        debug_assert!(index >= 0);
        Some(CoefficientCoordinate {
            mb_y: c.mb_y - 1,
            scan8_index: index as u8,
            ..c
        })
    } else {
        let index = REVERSE_SCAN_8[y][x - 1];
        if index >= 0 {
            return Some(CoefficientCoordinate { scan8_index: index as u8, ..c });
        }
        if c.mb_x == 0 {
            return None;
        }
        // Rightmost column of the macroblock to the left.
        let index = REVERSE_SCAN_8[y][7];
        debug_assert!(index >= 0);
        Some(CoefficientCoordinate {
            mb_x: c.mb_x - 1,
            scan8_index: index as u8,
            ..c
        })
    }
}

/// Look up the coefficient above or to the left of `c` in raster terms,
/// stepping into the neighboring sub-block when the raster position
/// leaves the transform grid.
pub fn get_neighbor_coefficient(
    above: bool,
    sub_mb_size: usize,
    c: CoefficientCoordinate,
) -> Option<CoefficientCoordinate> {
    let (w, h) = grid_dims(sub_mb_size);
    let raster = raster_of(sub_mb_size, c.zigzag_index);
    let (x, y) = (raster % w, raster / w);
    if above {
        if y > 0 {
            return Some(CoefficientCoordinate {
                zigzag_index: scan_of(sub_mb_size, raster - w),
                ..c
            });
        }
        let neighbor = get_neighbor(true, sub_mb_size, c)?;
        Some(CoefficientCoordinate {
            zigzag_index: scan_of(sub_mb_size, x + (h - 1) * w),
            ..neighbor
        })
    } else {
        if x > 0 {
            return Some(CoefficientCoordinate {
                zigzag_index: scan_of(sub_mb_size, raster - 1),
                ..c
            });
        }
        let neighbor = get_neighbor(false, sub_mb_size, c)?;
        Some(CoefficientCoordinate {
            zigzag_index: scan_of(sub_mb_size, (w - 1) + y * w),
            ..neighbor
        })
    }
}
