//! Per-set calibration tables and header

use super::leaf::{EXTENDED_HEADER_BIT, LeafId, read_leaf};
use super::CalSet;
use crate::bytes::{self, FieldReader};
use std::path::Path;
use tracing::{debug, warn};

/// Header leaf length in format 0 (32 × f64)
pub const HEADER_LEN_V0: usize = 0x100;
/// Header leaf length in formats 1 and 2
pub const HEADER_LEN_V1: usize = 0x68;

/// Header block stored alongside each set's tables
#[derive(Debug, Clone, PartialEq)]
pub struct SetHeader {
    /// Device configuration words (format 0 stores them as doubles)
    pub cfg: [u16; 32],
    pub gsk_voltage_min: u16,
    pub gsk_voltage_max: u16,
    /// Target histogram centre of mass for the gain loop, as a fraction of full scale
    pub histogram_peak_target: f32,
    pub delta_thermistor: [f32; 3],
    /// Radiometric linearisation: `s < d4 ? s·d0 + d1 : s·d2 + d3`
    pub dist_param: [f32; 5],
}

impl SetHeader {
    pub const EMPTY: SetHeader = SetHeader {
        cfg: [0; 32],
        gsk_voltage_min: 0,
        gsk_voltage_max: 0,
        histogram_peak_target: 0.0,
        delta_thermistor: [0.0; 3],
        dist_param: [0.0; 5],
    };

    /// Parse a header leaf. Returns the header and whether it carried the extended fields;
    /// `None` if the length does not match the format.
    pub fn parse(src: &[u8], ver_format: u16) -> Option<(Self, bool)> {
        let mut header = Self::EMPTY;
        match (ver_format, src.len()) {
            (0, HEADER_LEN_V0) => {
                let mut r = FieldReader::new(src);
                for word in header.cfg.iter_mut() {
                    // Format 0 stores small integers as doubles
                    *word = r.f64() as i16 as u16;
                }
                Some((header, false))
            }
            (1 | 2, HEADER_LEN_V1) => {
                let mut r = FieldReader::new(src);
                for word in header.cfg.iter_mut() {
                    *word = r.u16();
                }
                header.gsk_voltage_min = r.u16();
                header.gsk_voltage_max = r.u16();
                header.histogram_peak_target = r.f32();
                header.delta_thermistor = r.f32_array::<3>();
                header.dist_param = r.f32_array::<5>();
                Some((header, true))
            }
            _ => None,
        }
    }
}

impl Default for SetHeader {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Decode a per-pixel table of `len` entries.
///
/// Format 0 stores doubles, formats 1/2 store floats. Any other byte length means the table
/// does not fit the NUC geometry and is treated as absent.
pub fn parse_table(src: &[u8], ver_format: u16, len: usize) -> Option<Box<[f32]>> {
    match ver_format {
        0 if src.len() == len * 8 => Some(bytes::f64_table(src)),
        1 | 2 if src.len() == len * 4 => Some(bytes::f32_table(src)),
        _ => None,
    }
}

/// One calibration set: its per-pixel tables, header and presence mask
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    tables: [Option<Box<[f32]>>; LeafId::COUNT],
    header: SetHeader,
    valid: u32,
}

impl CalibrationSet {
    pub fn empty() -> Self {
        Self {
            tables: std::array::from_fn(|_| None),
            header: SetHeader::EMPTY,
            valid: 0,
        }
    }

    /// Load every leaf of `set` from `dir`.
    ///
    /// The parameter leaf is handled by the caller; every other leaf is optional and a failure
    /// only leaves its bit clear.
    pub fn load(dir: &Path, set: CalSet, ver_format: u16, nuc_len: usize) -> Self {
        let mut cal = Self::empty();

        for leaf in LeafId::all().filter(|&l| l != LeafId::PARAMS) {
            let Some(raw) = read_leaf(dir, leaf, set) else {
                continue;
            };

            if !leaf.is_table() {
                match SetHeader::parse(&raw, ver_format) {
                    Some((header, extended)) => {
                        cal.header = header;
                        cal.valid |= leaf.bit();
                        if extended {
                            cal.valid |= EXTENDED_HEADER_BIT;
                        }
                    }
                    None => warn!(
                        "{}: header is {} bytes, unexpected for format {}",
                        leaf.file_name(set),
                        raw.len(),
                        ver_format
                    ),
                }
                continue;
            }

            match parse_table(&raw, ver_format, nuc_len) {
                Some(table) => {
                    cal.tables[leaf.index()] = Some(table);
                    cal.valid |= leaf.bit();
                }
                None => warn!(
                    "{}: {} bytes does not match {} pixels in format {}",
                    leaf.file_name(set),
                    raw.len(),
                    nuc_len,
                    ver_format
                ),
            }
        }

        debug!("Set {:?}: valid mask {:#010x}", set, cal.valid);
        cal
    }

    pub fn table(&self, leaf: LeafId) -> Option<&[f32]> {
        self.tables[leaf.index()].as_deref()
    }

    pub fn header(&self) -> &SetHeader {
        &self.header
    }

    pub fn valid(&self) -> u32 {
        self.valid
    }

    /// True if every bit of `mask` is present
    pub fn has(&self, mask: u32) -> bool {
        self.valid & mask == mask
    }

    pub(crate) fn mark_valid(&mut self, mask: u32) {
        self.valid |= mask;
    }
}

impl Default for CalibrationSet {
    fn default() -> Self {
        Self::empty()
    }
}
