//! Calibration store
//!
//! Loads the vendor calibration directory for one camera, keyed by serial number:
//!
//! ```text
//! <root>/<serial>/0.bin      global parameters (NV set only)
//! <root>/<serial>/{id}.bin   NV set leaves
//! <root>/<serial>/{id}a.bin  LO set leaves
//! <root>/<serial>/{id}b.bin  MED set leaves
//! <root>/<serial>/{id}c.bin  HI set leaves
//! ```
//!
//! Every table is indexed in NUC coordinates; the image sits centred inside the NUC area
//! when the device reads out a smaller window. Anything missing or malformed degrades to
//! the auto-calibration set so the camera always streams.

mod autocal;
mod leaf;
mod params;
mod set;

pub use autocal::{AUTOCAL_FRAMES, AutoCalibrator, AutocalProgress, BAD_PIXEL_THRESHOLD};
pub use leaf::{EXTENDED_HEADER_BIT, LeafId, mask_of, read_leaf};
pub use params::{
    CAL_TYPE_THERMOGRAPHY, GlobalParams, PARAMS_LEN, RangeThresholds, TransientParams,
    nuc_table_size,
};
pub use set::{CalibrationSet, HEADER_LEN_V0, HEADER_LEN_V1, SetHeader, parse_table};

use crate::bpr;
use crate::frame::FrameHeader;
use crate::{Result, ThermError};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Leaves the non-radiometric (NV) set needs
pub const NV_REQUIRED: u32 = mask_of(&[LeafId::PARAMS, LeafId::LIVE, LeafId::OFFSET, LeafId::PX]);

/// Leaves set 0 must provide before any thermography set can be used
pub const THERMOGRAPHY_BASE_REQUIRED: u32 = mask_of(&[LeafId::PARAMS, LeafId::LIVE]);

/// Leaves each of LO/MED/HI must provide, plus the extended header
pub const THERMOGRAPHY_SET_REQUIRED: u32 = mask_of(&[
    LeafId::HEADER,
    LeafId::OFFSET,
    LeafId::PX,
    LeafId::PX2,
    LeafId::PX3,
    LeafId::PX4,
    LeafId::TFPA,
    LeafId::TFPA2,
    LeafId::TFPA_PX,
    LeafId::TFPA2_PX2,
]) | EXTENDED_HEADER_BIT;

/// Leaves enabling the transient drift term
pub const TRANSIENT_REQUIRED: u32 = mask_of(&[LeafId::TRANSIENT_DELTA, LeafId::TRANSIENT_OFFSET]);

/// Calibration set selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalSet {
    /// Non-radiometric ("night vision") factory set
    Nv,
    /// Thermography, low scene-temperature range
    Lo,
    /// Thermography, medium range
    Med,
    /// Thermography, high range
    Hi,
    /// Built-in fallback: offset-only correction estimated from the first frames
    Auto,
}

impl CalSet {
    pub const FACTORY: [CalSet; 4] = [CalSet::Nv, CalSet::Lo, CalSet::Med, CalSet::Hi];

    /// Slot in the factory set array, `None` for the auto set
    pub fn index(self) -> Option<usize> {
        match self {
            CalSet::Nv => Some(0),
            CalSet::Lo => Some(1),
            CalSet::Med => Some(2),
            CalSet::Hi => Some(3),
            CalSet::Auto => None,
        }
    }

    /// File-name variant suffix
    pub fn suffix(self) -> &'static str {
        match self {
            CalSet::Nv | CalSet::Auto => "",
            CalSet::Lo => "a",
            CalSet::Med => "b",
            CalSet::Hi => "c",
        }
    }

    pub fn is_thermography(self) -> bool {
        matches!(self, CalSet::Lo | CalSet::Med | CalSet::Hi)
    }
}

impl fmt::Display for CalSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CalSet::Nv => "NV",
            CalSet::Lo => "LO",
            CalSet::Med => "MED",
            CalSet::Hi => "HI",
            CalSet::Auto => "AUTO",
        };
        f.write_str(name)
    }
}

/// Placement of the image window inside the NUC table area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub image_w: usize,
    pub image_h: usize,
    pub nuc_w: usize,
    pub nuc_h: usize,
    pub ofs_x: usize,
    pub ofs_y: usize,
}

impl Geometry {
    /// NUC area identical to the image
    pub fn uncentered(image_w: usize, image_h: usize) -> Self {
        Self {
            image_w,
            image_h,
            nuc_w: image_w,
            nuc_h: image_h,
            ofs_x: 0,
            ofs_y: 0,
        }
    }

    /// Image centred in the NUC area. An odd vertical remainder goes to the top.
    pub fn centered(nuc_w: usize, nuc_h: usize, image_w: usize, image_h: usize) -> Self {
        debug_assert!(image_w <= nuc_w && image_h <= nuc_h);
        Self {
            image_w,
            image_h,
            nuc_w,
            nuc_h,
            ofs_x: (nuc_w - image_w) / 2,
            ofs_y: (nuc_h - image_h + 1) / 2,
        }
    }

    pub fn image_len(&self) -> usize {
        self.image_w * self.image_h
    }

    pub fn nuc_len(&self) -> usize {
        self.nuc_w * self.nuc_h
    }

    /// NUC index of image pixel (x, y)
    #[inline]
    pub fn nuc_index(&self, x: usize, y: usize) -> usize {
        (y + self.ofs_y) * self.nuc_w + x + self.ofs_x
    }

    /// NUC index of the image origin
    pub fn origin(&self) -> usize {
        self.nuc_index(0, 0)
    }

    /// True if a frame with this header can be processed under this geometry
    pub fn matches(&self, header: &FrameHeader) -> bool {
        header.data_w as usize == self.image_w && header.data_h as usize == self.image_h
    }
}

/// Tables for the current set, with absent ones replaced by zeros
#[derive(Debug, Clone, Copy)]
pub struct ActiveTables<'a> {
    pub set: CalSet,
    pub header: &'a SetHeader,
    pub offset: &'a [f32],
    pub px: &'a [f32],
    pub px2: &'a [f32],
    pub px3: &'a [f32],
    pub px4: &'a [f32],
    pub tfpa: &'a [f32],
    pub tfpa2: &'a [f32],
    pub vgsk: &'a [f32],
    pub vgsk2: &'a [f32],
    pub tfpa_px: &'a [f32],
    pub vgsk_px: &'a [f32],
    pub tfpa2_px2: &'a [f32],
    pub transient_delta: &'a [f32],
    pub transient_offset: &'a [f32],
    /// Both transient tables were loaded for this set
    pub has_transient: bool,
}

impl<'a> ActiveTables<'a> {
    /// Every table pointing at `zeros`
    pub fn zeroed(set: CalSet, header: &'a SetHeader, zeros: &'a [f32]) -> Self {
        Self {
            set,
            header,
            offset: zeros,
            px: zeros,
            px2: zeros,
            px3: zeros,
            px4: zeros,
            tfpa: zeros,
            tfpa2: zeros,
            vgsk: zeros,
            vgsk2: zeros,
            tfpa_px: zeros,
            vgsk_px: zeros,
            tfpa2_px2: zeros,
            transient_delta: zeros,
            transient_offset: zeros,
            has_transient: false,
        }
    }
}

static AUTO_HEADER: SetHeader = SetHeader::EMPTY;

/// Calibration for one camera
pub struct Calibration {
    serial_num: u32,
    hardware_num: u16,
    firmware_num: u16,
    params: GlobalParams,
    sets: [CalibrationSet; 4],
    current: CalSet,
    geometry: Geometry,
    factory_live: Option<Box<[bool]>>,
    auto_offset: Box<[f32]>,
    auto_live: Box<[bool]>,
    zeros: Box<[f32]>,
    bpr_seed: usize,
}

impl Calibration {
    /// Built-in calibration for the frame geometry in `header`.
    ///
    /// Auto set selected, experimental temperature coefficients, every pixel good and no
    /// offset until auto-calibration fills it in.
    pub fn builtin(header: &FrameHeader) -> Self {
        let geometry = Geometry::uncentered(header.data_w as usize, header.data_h as usize);
        let mut cal = Self {
            serial_num: header.serial_num(),
            hardware_num: header.hardware_num,
            firmware_num: header.firmware_revision(),
            params: GlobalParams::experimental(),
            sets: Default::default(),
            current: CalSet::Auto,
            geometry,
            factory_live: None,
            auto_offset: Box::default(),
            auto_live: Box::default(),
            zeros: Box::default(),
            bpr_seed: 0,
        };
        cal.allocate(geometry);
        cal
    }

    /// Open the calibration for the camera that produced `header`.
    ///
    /// Never fails: without a root, or with an unusable directory, the built-in calibration
    /// is returned. Otherwise the NV set is selected when it is complete.
    pub fn open(root: Option<&Path>, header: &FrameHeader) -> Self {
        let mut cal = Self::builtin(header);

        let Some(root) = root else {
            info!("No calibration directory, using auto-calibration");
            return cal;
        };

        let dir = root.join(cal.serial_num.to_string());
        match cal.load_factory(&dir, header) {
            Ok(()) => {
                cal.log_summary();
                cal.select_set(CalSet::Nv);
            }
            Err(e) => warn!(
                "Factory calibration unavailable in {}: {}; using auto-calibration",
                dir.display(),
                e
            ),
        }

        cal.init_bad_pixel_repair();
        cal
    }

    fn allocate(&mut self, geometry: Geometry) {
        let len = geometry.nuc_len();
        self.geometry = geometry;
        self.auto_offset = vec![0.0; len].into_boxed_slice();
        self.auto_live = vec![true; len].into_boxed_slice();
        self.zeros = vec![0.0; len].into_boxed_slice();
    }

    fn load_factory(&mut self, dir: &Path, header: &FrameHeader) -> Result<()> {
        if !dir.is_dir() {
            return Err(ThermError::Calibration("no directory for this serial number".into()));
        }

        let raw = read_leaf(dir, LeafId::PARAMS, CalSet::Nv)
            .ok_or_else(|| ThermError::Calibration("missing parameter leaf".into()))?;
        let params = GlobalParams::parse(&raw)?;

        let (nuc_w, nuc_h) = nuc_table_size(params.ver_format).ok_or_else(|| {
            ThermError::Calibration(format!("unsupported format version {}", params.ver_format))
        })?;

        let (fpa_w, fpa_h) = (header.fpa_w as usize, header.fpa_h as usize);
        if (fpa_w, fpa_h) != (nuc_w, nuc_h) {
            return Err(ThermError::Calibration(format!(
                "calibration is for a {}x{} array, device reports {}x{}",
                nuc_w, nuc_h, fpa_w, fpa_h
            )));
        }

        let (image_w, image_h) = (header.data_w as usize, header.data_h as usize);
        if image_w > fpa_w || image_h > fpa_h {
            return Err(ThermError::Calibration(format!(
                "image {}x{} exceeds array {}x{}",
                image_w, image_h, fpa_w, fpa_h
            )));
        }

        let geometry = Geometry::centered(nuc_w, nuc_h, image_w, image_h);
        self.allocate(geometry);
        debug!(
            "NUC {}x{}, image {}x{} at ({}, {})",
            nuc_w, nuc_h, image_w, image_h, geometry.ofs_x, geometry.ofs_y
        );

        let set_count = if params.is_thermography() { 4 } else { 1 };
        for set in &CalSet::FACTORY[..set_count] {
            if let Some(i) = set.index() {
                self.sets[i] = CalibrationSet::load(dir, *set, params.ver_format, geometry.nuc_len());
            }
        }
        self.sets[0].mark_valid(LeafId::PARAMS.bit());

        self.factory_live = self.sets[0]
            .table(LeafId::LIVE)
            .map(|live| live.iter().map(|&v| v != 0.0).collect());
        self.params = params;
        Ok(())
    }

    fn log_summary(&self) {
        let p = &self.params;
        info!(
            "Calibration for serial {}: {} / {} ({}), dated {}, format v{} data v{}, type {}",
            self.serial_num,
            p.model,
            p.lens,
            p.description,
            p.cal_date,
            p.ver_format,
            p.ver_data,
            p.cal_type
        );
        for set in CalSet::FACTORY {
            if let Some(i) = set.index()
                && self.sets[i].valid() != 0
            {
                info!("  set {}: valid mask {:#010x}", set, self.sets[i].valid());
            }
        }
    }

    pub fn serial_num(&self) -> u32 {
        self.serial_num
    }

    pub fn hardware_num(&self) -> u16 {
        self.hardware_num
    }

    pub fn firmware_num(&self) -> u16 {
        self.firmware_num
    }

    /// Global parameters; the experimental defaults when no factory data was loaded
    pub fn params(&self) -> &GlobalParams {
        &self.params
    }

    /// Whether the parameter leaf was loaded from disk
    pub fn has_factory_params(&self) -> bool {
        self.sets[0].has(LeafId::PARAMS.bit())
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn current_set(&self) -> CalSet {
        self.current
    }

    /// Factory set data, `None` for the auto set
    pub fn set(&self, set: CalSet) -> Option<&CalibrationSet> {
        set.index().map(|i| &self.sets[i])
    }

    /// Whether `set` has everything it needs to be selected
    pub fn can_select(&self, set: CalSet) -> bool {
        match set {
            CalSet::Auto => true,
            CalSet::Nv => self.sets[0].has(NV_REQUIRED),
            CalSet::Lo | CalSet::Med | CalSet::Hi => {
                self.params.is_thermography()
                    && self.sets[0].has(THERMOGRAPHY_BASE_REQUIRED)
                    && self.sets[1..].iter().all(|s| s.has(THERMOGRAPHY_SET_REQUIRED))
            }
        }
    }

    /// Switch the current set, falling back to auto if `set` is incomplete.
    ///
    /// Returns true if the current set changed.
    pub fn select_set(&mut self, set: CalSet) -> bool {
        let target = if self.can_select(set) {
            set
        } else {
            if set != CalSet::Auto {
                debug!("Calibration set {} incomplete, falling back to auto", set);
            }
            CalSet::Auto
        };

        if target == self.current {
            return false;
        }

        info!("Calibration set {} -> {}", self.current, target);
        self.current = target;
        true
    }

    /// Whether the auto set still needs its offset estimated
    pub fn needs_autocal(&self) -> bool {
        !self.can_select(CalSet::Nv)
    }

    /// Per-pixel good/bad mask in NUC coordinates.
    ///
    /// The factory live table wins whenever it exists.
    pub fn live_mask(&self) -> &[bool] {
        self.factory_live.as_deref().unwrap_or(&self.auto_live)
    }

    /// Tables for the current set
    pub fn active(&self) -> ActiveTables<'_> {
        let zeros = &self.zeros[..];

        let Some(i) = self.current.index() else {
            return ActiveTables {
                offset: &self.auto_offset,
                ..ActiveTables::zeroed(CalSet::Auto, &AUTO_HEADER, zeros)
            };
        };

        let set = &self.sets[i];
        let table = |leaf: LeafId| set.table(leaf).unwrap_or(zeros);
        ActiveTables {
            set: self.current,
            header: set.header(),
            offset: table(LeafId::OFFSET),
            px: table(LeafId::PX),
            px2: table(LeafId::PX2),
            px3: table(LeafId::PX3),
            px4: table(LeafId::PX4),
            tfpa: table(LeafId::TFPA),
            tfpa2: table(LeafId::TFPA2),
            vgsk: table(LeafId::VGSK),
            vgsk2: table(LeafId::VGSK2),
            tfpa_px: table(LeafId::TFPA_PX),
            vgsk_px: table(LeafId::VGSK_PX),
            tfpa2_px2: table(LeafId::TFPA2_PX2),
            transient_delta: table(LeafId::TRANSIENT_DELTA),
            transient_offset: table(LeafId::TRANSIENT_OFFSET),
            has_transient: set.has(TRANSIENT_REQUIRED),
        }
    }

    /// Locate the raster seed for bad-pixel repair from the current live mask.
    pub fn init_bad_pixel_repair(&mut self) {
        self.bpr_seed = bpr::find_seed(&self.geometry, self.live_mask());
        debug!("Bad-pixel repair seed at image index {}", self.bpr_seed);
    }

    /// Image index used to fill the origin when it is bad
    pub fn bpr_seed(&self) -> usize {
        self.bpr_seed
    }

    /// Number of pixels inside the image window marked bad
    pub fn bad_pixel_count(&self) -> usize {
        let g = &self.geometry;
        let mask = self.live_mask();
        (0..g.image_h)
            .flat_map(|y| (0..g.image_w).map(move |x| g.nuc_index(x, y)))
            .filter(|&i| !mask[i])
            .count()
    }
}

impl fmt::Debug for Calibration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Calibration")
            .field("serial_num", &self.serial_num)
            .field("current", &self.current)
            .field("geometry", &self.geometry)
            .field("factory_live", &self.factory_live.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn header_for(w: u16, h: u16) -> FrameHeader {
        FrameHeader {
            serial_num_lo: 4242,
            data_w: w,
            data_h: h,
            ..FrameHeader::initial_config()
        }
    }

    #[test]
    fn test_builtin_defaults() {
        let cal = Calibration::open(None, &header_for(8, 4));
        assert_eq!(cal.current_set(), CalSet::Auto);
        assert_eq!(cal.geometry(), &Geometry::uncentered(8, 4));
        assert!(cal.live_mask().iter().all(|&good| good));
        assert!(!cal.has_factory_params());
        assert!(cal.needs_autocal());

        let active = cal.active();
        assert_eq!(active.offset.len(), 32);
        assert!(active.px.iter().all(|&v| v == 0.0));
        assert_eq!(active.header, &SetHeader::EMPTY);
    }

    #[test]
    fn test_missing_directory_falls_back() {
        let root = tempfile::tempdir().unwrap();
        let cal = Calibration::open(Some(root.path()), &header_for(384, 288));
        assert_eq!(cal.current_set(), CalSet::Auto);
        assert_eq!(cal.serial_num(), 4242);
    }

    #[test]
    fn test_centered_geometry() {
        let g = Geometry::centered(384, 288, 383, 287);
        assert_eq!((g.ofs_x, g.ofs_y), (0, 1));
        assert_eq!(g.origin(), 384);

        let g = Geometry::centered(640, 480, 636, 476);
        assert_eq!((g.ofs_x, g.ofs_y), (2, 2));
        assert_eq!(g.nuc_index(1, 1), 3 * 640 + 3);
    }

    #[test]
    fn test_select_set_without_data() {
        let mut cal = Calibration::builtin(&header_for(4, 4));
        assert!(!cal.select_set(CalSet::Nv));
        assert!(!cal.select_set(CalSet::Med));
        assert_eq!(cal.current_set(), CalSet::Auto);
    }

    #[test]
    fn test_cal_set_suffixes() {
        let suffixes: Vec<_> = CalSet::FACTORY.iter().map(|s| s.suffix()).collect();
        assert_eq!(suffixes, ["", "a", "b", "c"]);
        assert_eq!(CalSet::Auto.index(), None);
        assert!(CalSet::Hi.is_thermography());
        assert!(!CalSet::Nv.is_thermography());
    }
}
