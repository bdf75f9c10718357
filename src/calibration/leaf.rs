//! Calibration leaf files
//!
//! Each calibration parameter lives in its own file `{id}{variant}.bin` inside the
//! per-serial-number directory. The variant suffix selects the calibration set.

use super::CalSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Identifier of a calibration leaf file (0..=22)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId(u8);

impl LeafId {
    /// Number of leaf ids per calibration set
    pub const COUNT: usize = 23;

    pub const PARAMS: Self = Self(0);
    pub const LIVE: Self = Self(1);
    pub const OFFSET: Self = Self(2);
    pub const PX: Self = Self(3);
    pub const PX2: Self = Self(4);
    pub const TFPA: Self = Self(5);
    pub const TFPA2: Self = Self(6);
    pub const VGSK: Self = Self(7);
    pub const VGSK2: Self = Self(8);
    pub const TFPA_PX: Self = Self(9);
    pub const VGSK_PX: Self = Self(10);
    pub const HEADER: Self = Self(11);
    pub const PX3: Self = Self(12);
    pub const PX4: Self = Self(13);
    pub const TFPA2_PX2: Self = Self(14);
    pub const TRANSIENT_DELTA: Self = Self(15);
    pub const TRANSIENT_OFFSET: Self = Self(16);

    pub const fn new(id: u8) -> Option<Self> {
        if (id as usize) < Self::COUNT {
            Some(Self(id))
        } else {
            None
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit for this leaf in a set's presence mask
    pub const fn bit(self) -> u32 {
        1 << self.0
    }

    /// Leaves holding a per-pixel table (everything except parameters and header)
    pub const fn is_table(self) -> bool {
        self.0 != Self::PARAMS.0 && self.0 != Self::HEADER.0
    }

    pub fn all() -> impl Iterator<Item = LeafId> {
        (0..Self::COUNT as u8).map(Self)
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "parameters",
            1 => "live",
            2 => "offset",
            3 => "px",
            4 => "px2",
            5 => "tfpa",
            6 => "tfpa2",
            7 => "vgsk",
            8 => "vgsk2",
            9 => "tfpa_px",
            10 => "vgsk_px",
            11 => "header",
            12 => "px3",
            13 => "px4",
            14 => "tfpa2_px2",
            15 => "transient_delta",
            16 => "transient_offset",
            _ => "unassigned",
        }
    }

    pub fn file_name(self, set: CalSet) -> String {
        format!("{}{}.bin", self.0, set.suffix())
    }
}

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// Presence bit recorded when a format 1/2 header carried the gain/distortion fields.
/// Sits just above the leaf id bits.
pub const EXTENDED_HEADER_BIT: u32 = 1 << LeafId::COUNT;

/// Build a presence mask from a list of leaves.
pub const fn mask_of(leaves: &[LeafId]) -> u32 {
    let mut mask = 0;
    let mut i = 0;
    while i < leaves.len() {
        mask |= leaves[i].bit();
        i += 1;
    }
    mask
}

/// Read a whole leaf file.
///
/// Missing, empty and unreadable files all come back as `None`; only unexpected I/O
/// failures are worth a warning since absent leaves are routine.
pub fn read_leaf(dir: &Path, leaf: LeafId, set: CalSet) -> Option<Vec<u8>> {
    let path = dir.join(leaf.file_name(set));
    trace!("Reading {}", path.display());

    match fs::read(&path) {
        Ok(buf) if buf.is_empty() => {
            debug!("{}: empty file, treating as absent", path.display());
            None
        }
        Ok(buf) => {
            debug!("Read {} ({} bytes)", path.display(), buf.len());
            Some(buf)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            trace!("{}: not present", path.display());
            None
        }
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(LeafId::PARAMS.file_name(CalSet::Nv), "0.bin");
        assert_eq!(LeafId::HEADER.file_name(CalSet::Lo), "11a.bin");
        assert_eq!(LeafId::PX4.file_name(CalSet::Med), "13b.bin");
        assert_eq!(LeafId::new(22).unwrap().file_name(CalSet::Hi), "22c.bin");
    }

    #[test]
    fn test_leaf_bounds() {
        assert!(LeafId::new(22).is_some());
        assert!(LeafId::new(23).is_none());
        assert_eq!(LeafId::all().count(), LeafId::COUNT);
        assert_eq!(LeafId::all().filter(|l| l.is_table()).count(), 21);
    }

    #[test]
    fn test_mask_of() {
        let mask = mask_of(&[LeafId::PARAMS, LeafId::LIVE, LeafId::HEADER]);
        assert_eq!(mask, 0b1000_0000_0011);
        assert_eq!(EXTENDED_HEADER_BIT & ((1 << LeafId::COUNT) - 1), 0);
    }

    #[test]
    fn test_read_leaf_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_leaf(dir.path(), LeafId::OFFSET, CalSet::Nv).is_none());

        std::fs::write(dir.path().join("2.bin"), b"").unwrap();
        assert!(read_leaf(dir.path(), LeafId::OFFSET, CalSet::Nv).is_none());

        std::fs::write(dir.path().join("2.bin"), [1u8, 2, 3]).unwrap();
        assert_eq!(
            read_leaf(dir.path(), LeafId::OFFSET, CalSet::Nv),
            Some(vec![1, 2, 3])
        );
    }
}
