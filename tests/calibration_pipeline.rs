//! End-to-end tests over synthetic calibration directories and captures

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thermapp::calibration::{HEADER_LEN_V1, PARAMS_LEN, nuc_table_size};
use thermapp::replay::record_len;
use thermapp::runtime::NoGainControl;
use thermapp::{
    CalSet, Calibration, Frame, FrameHeader, FrameProcessor, GainWriter, ProcessorConfig,
    ReplaySource, Stream, WorkError, WorkResult, nuc,
};

const SERIAL: u32 = 70_123;
const NUC_LEN: usize = 384 * 288;

fn header(w: u16, h: u16) -> FrameHeader {
    FrameHeader {
        serial_num_lo: SERIAL as u16,
        serial_num_hi: (SERIAL >> 16) as u16,
        data_w: w,
        data_h: h,
        ..FrameHeader::initial_config()
    }
}

/// Header for a device with a `fpa_w`x`fpa_h` array reading out `w`x`h`
fn header_on(fpa_w: u16, fpa_h: u16, w: u16, h: u16) -> FrameHeader {
    FrameHeader {
        fpa_w,
        fpa_h,
        ..header(w, h)
    }
}

fn uniform(header: FrameHeader, value: u16) -> Frame {
    Frame::new(header, vec![value; header.pixel_count()])
}

/// Writes leaf files for one serial number under a temporary root
struct CalDir {
    root: tempfile::TempDir,
    ver_format: u16,
    nuc_w: usize,
    nuc_h: usize,
}

impl CalDir {
    fn new(ver_format: u16, cal_type: u16) -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join(SERIAL.to_string())).unwrap();
        let (nuc_w, nuc_h) = nuc_table_size(ver_format).unwrap();
        let dir = Self {
            root,
            ver_format,
            nuc_w,
            nuc_h,
        };
        dir.write("0.bin", &params(ver_format, cal_type));
        dir
    }

    fn root(&self) -> &Path {
        self.root.path()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(SERIAL.to_string()).join(name)
    }

    fn write(&self, name: &str, bytes: &[u8]) {
        fs::write(self.path(name), bytes).unwrap();
    }

    /// Per-pixel table in the directory's storage format
    fn table(&self, name: &str, value: impl Fn(usize) -> f32) {
        let mut bytes = Vec::new();
        for i in 0..self.nuc_w * self.nuc_h {
            match self.ver_format {
                0 => bytes.extend_from_slice(&(value(i) as f64).to_le_bytes()),
                _ => bytes.extend_from_slice(&value(i).to_le_bytes()),
            }
        }
        self.write(name, &bytes);
    }
}

fn params(ver_format: u16, cal_type: u16) -> Vec<u8> {
    fn text(buf: &mut Vec<u8>, s: &str, len: usize) {
        let mut field = vec![0u8; len];
        field[..s.len()].copy_from_slice(s.as_bytes());
        buf.extend_from_slice(&field);
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(&ver_format.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&cal_type.to_le_bytes());
    text(&mut buf, "ThermApp", 20);
    text(&mut buf, "6.8mm", 10);
    text(&mut buf, "synthetic", 30);
    text(&mut buf, "160101", 6);
    let floats: [f32; 20] = [
        -10.0, 100.0, // range
        0.0, 1.0, // fpa diode
        0.0, 0.01, 0.0, 0.0, 0.0, 0.0, // thermistor
        1.0, 1.0, // alphas
        150.0, 250.0, 300.0, 400.0, // thresholds
        0.0, 0.0, 0.0, 0.0, // transient
    ];
    for f in floats {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    assert_eq!(buf.len(), PARAMS_LEN);
    buf
}

fn set_header(gsk_min: u16, gsk_max: u16, target: f32) -> Vec<u8> {
    let mut buf = vec![0u8; 64];
    buf.extend_from_slice(&gsk_min.to_le_bytes());
    buf.extend_from_slice(&gsk_max.to_le_bytes());
    buf.extend_from_slice(&target.to_le_bytes());
    // delta thermistor, then identity distortion
    for f in [0.0f32, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0e9] {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    assert_eq!(buf.len(), HEADER_LEN_V1);
    buf
}

fn nv_dir(ver_format: u16) -> CalDir {
    let dir = CalDir::new(ver_format, 0);
    dir.table("1.bin", |_| 1.0);
    let nuc_w = dir.nuc_w;
    dir.table("2.bin", move |i| (i % nuc_w) as f32);
    dir.table("3.bin", |_| 2.0);
    dir.table("4.bin", |_| 0.5);
    dir
}

fn thermography_dir() -> CalDir {
    let dir = CalDir::new(1, 2);
    dir.table("1.bin", |_| 1.0);
    for suffix in ["a", "b", "c"] {
        dir.write(&format!("11{}.bin", suffix), &set_header(1000, 2000, 0.5));
        dir.table(&format!("2{}.bin", suffix), |_| 5.0);
        dir.table(&format!("3{}.bin", suffix), |_| 2.0);
        for id in [4, 5, 6, 9, 12, 13, 14] {
            dir.table(&format!("{}{}.bin", id, suffix), |_| 0.0);
        }
    }
    dir
}

#[derive(Default)]
struct RecordingGain {
    writes: Vec<u16>,
}

impl GainWriter for RecordingGain {
    fn write_gain(&mut self, value: u16) -> WorkResult<()> {
        self.writes.push(value);
        Ok(())
    }
}

#[test]
fn test_nv_polynomial_format1() {
    let dir = nv_dir(1);
    let cal = Calibration::open(Some(dir.root()), &header(384, 288));
    assert_eq!(cal.current_set(), CalSet::Nv);
    assert!(cal.has_factory_params());
    assert_eq!(cal.params().model, "ThermApp");

    // p2 = 0.5·p + 2; s = p2·p + offset
    let corrected = nuc::apply(&cal, &uniform(header(384, 288), 10), Default::default()).unwrap();
    assert_eq!(corrected.pixels[0], 70.0);
    assert_eq!(corrected.pixels[3], 73.0);
    assert_eq!(corrected.min, 70.0);
    assert_eq!(corrected.max, 70.0 + 383.0);
}

#[test]
fn test_nv_polynomial_format0() {
    let dir = nv_dir(0);
    let cal = Calibration::open(Some(dir.root()), &header(384, 288));
    assert_eq!(cal.current_set(), CalSet::Nv);

    let corrected = nuc::apply(&cal, &uniform(header(384, 288), 10), Default::default()).unwrap();
    assert_eq!(corrected.pixels[384 + 7], 77.0);
}

#[test]
fn test_nv_polynomial_format2() {
    let dir = nv_dir(2);
    let h = header_on(640, 480, 640, 480);
    let cal = Calibration::open(Some(dir.root()), &h);
    assert_eq!(cal.current_set(), CalSet::Nv);
    assert!(cal.has_factory_params());
    let g = cal.geometry();
    assert_eq!((g.nuc_w, g.nuc_h), (640, 480));

    let corrected = nuc::apply(&cal, &uniform(h, 10), Default::default()).unwrap();
    assert_eq!(corrected.pixels[3], 73.0);
    assert_eq!(corrected.pixels[640 + 600], 670.0);
    assert_eq!(corrected.max, 70.0 + 639.0);
}

#[test]
fn test_fpa_mismatch_falls_back() {
    // 640x480 tables on a device reporting a 384x288 array
    let dir = nv_dir(2);
    let cal = Calibration::open(Some(dir.root()), &header(384, 288));
    assert_eq!(cal.current_set(), CalSet::Auto);
    assert!(!cal.has_factory_params());
    assert!(cal.needs_autocal());
    let g = cal.geometry();
    assert_eq!((g.image_w, g.image_h), (384, 288));
}

#[test]
fn test_image_larger_than_fpa_rejected() {
    let dir = nv_dir(1);
    let h = header_on(384, 288, 400, 288);
    let cal = Calibration::open(Some(dir.root()), &h);
    assert_eq!(cal.current_set(), CalSet::Auto);
    assert!(!cal.has_factory_params());
}

#[test]
fn test_wrong_table_size_falls_back_to_auto() {
    let dir = nv_dir(1);
    dir.write("2.bin", &[0u8; 1000]);

    let cal = Calibration::open(Some(dir.root()), &header(384, 288));
    assert_eq!(cal.current_set(), CalSet::Auto);
    assert!(cal.needs_autocal());
    // Parameters still loaded
    assert!(cal.has_factory_params());
}

#[test]
fn test_bad_parameter_leaf_uses_builtin() {
    let dir = nv_dir(1);
    dir.write("0.bin", &[0u8; PARAMS_LEN - 1]);

    let cal = Calibration::open(Some(dir.root()), &header(384, 288));
    assert_eq!(cal.current_set(), CalSet::Auto);
    assert!(!cal.has_factory_params());
}

#[test]
fn test_smaller_image_is_centered() {
    let dir = nv_dir(1);
    let cal = Calibration::open(Some(dir.root()), &header(383, 287));
    let g = cal.geometry();
    assert_eq!((g.ofs_x, g.ofs_y), (0, 1));

    let corrected = nuc::apply(&cal, &uniform(header(383, 287), 10), Default::default()).unwrap();
    assert_eq!(corrected.pixels.len(), 383 * 287);
    assert_eq!(corrected.pixels[5], 75.0);
}

#[test]
fn test_bad_pixels_from_live_table_are_repaired() {
    let dir = nv_dir(1);
    dir.table("1.bin", |i| if i == 384 + 10 { 0.0 } else { 1.0 });

    let cal = Calibration::open(Some(dir.root()), &header(384, 288));
    assert_eq!(cal.bad_pixel_count(), 1);

    let mut processor = FrameProcessor::new(
        cal,
        ProcessorConfig::new().with_gain_control(false),
    )
    .unwrap();
    let mut frame = uniform(header(384, 288), 10);
    frame.pixels[384 + 10] = 60_000;
    processor
        .process(&frame, &mut NoGainControl)
        .unwrap()
        .unwrap();

    let image = processor.corrected();
    // Interior bad pixel takes the value of a good neighbour
    assert!(image.pixels[384 + 10] < 100.0);
    assert_eq!(image.max, 70.0 + 383.0);
}

#[test]
fn test_thermography_sets() {
    let dir = thermography_dir();
    let mut cal = Calibration::open(Some(dir.root()), &header(384, 288));
    // NV tables absent, thermography complete
    assert_eq!(cal.current_set(), CalSet::Auto);
    assert!(cal.can_select(CalSet::Med));

    assert!(cal.select_set(CalSet::Med));
    assert_eq!(cal.current_set(), CalSet::Med);

    // s = 2·p + 5 through the identity distortion
    let corrected = nuc::apply(&cal, &uniform(header(384, 288), 100), Default::default()).unwrap();
    assert_eq!(corrected.pixels[0], 205.0);
    assert_eq!(corrected.pixels[NUC_LEN - 1], 205.0);
}

#[test]
fn test_thermography_missing_leaf_blocks_all_ranges() {
    let dir = thermography_dir();
    fs::remove_file(dir.path("13c.bin")).unwrap();

    let mut cal = Calibration::open(Some(dir.root()), &header(384, 288));
    assert!(!cal.can_select(CalSet::Lo));
    assert!(!cal.select_set(CalSet::Lo));
    assert_eq!(cal.current_set(), CalSet::Auto);
}

#[test]
fn test_gain_loop_waits_for_readback() {
    let dir = thermography_dir();
    let cal = Calibration::open(Some(dir.root()), &header(384, 288));
    let config = ProcessorConfig::new().with_initial_set(CalSet::Med);
    let mut processor = FrameProcessor::new(cal, config).unwrap();
    assert!(!processor.is_calibrating());
    let mut gain = RecordingGain::default();

    // bin (100 >> 4) = 6, delta (128 - 6) / 7
    let mut frame = uniform(header(384, 288), 100);
    frame.header.vout_c = 1524;
    processor.process(&frame, &mut gain).unwrap();
    assert_eq!(gain.writes, [1541]);

    // Readback has not caught up: no second write
    processor.process(&frame, &mut gain).unwrap();
    assert_eq!(gain.writes, [1541]);

    frame.header.vout_c = 1541;
    processor.process(&frame, &mut gain).unwrap();
    assert_eq!(gain.writes, [1541, 1558]);
}

#[test]
fn test_autocal_through_processor() {
    let h = header(16, 12);
    let cal = Calibration::open(None, &h);
    let mut processor = FrameProcessor::new(cal, ProcessorConfig::default()).unwrap();

    let mut emitted = 0;
    for _ in 0..50 {
        if processor
            .process(&uniform(h, 1000), &mut NoGainControl)
            .unwrap()
            .is_some()
        {
            emitted += 1;
        }
    }
    assert_eq!(emitted, 0);
    assert!(!processor.is_calibrating());
    assert!(
        processor
            .calibration()
            .active()
            .offset
            .iter()
            .all(|&v| v == -1000.0)
    );
    assert_eq!(processor.calibration().bad_pixel_count(), 0);

    let out = processor
        .process(&uniform(h, 1000), &mut NoGainControl)
        .unwrap()
        .unwrap();
    assert_eq!(out.data.len(), 16 * 12);
    assert!(processor.corrected().pixels.iter().all(|&v| v == 0.0));
}

#[test]
fn test_leaving_auto_before_warmup_ends_resumes_output() {
    let dir = nv_dir(1);
    let h = header(384, 288);
    let cal = Calibration::open(Some(dir.root()), &h);
    let config = ProcessorConfig::new().with_gain_control(false);
    let mut processor = FrameProcessor::new(cal, config).unwrap();
    assert!(!processor.is_calibrating());
    let frame = uniform(h, 10);
    assert!(processor.process(&frame, &mut NoGainControl).unwrap().is_some());

    assert!(processor.select_set(CalSet::Auto));
    assert!(processor.is_calibrating());
    assert!(processor.process(&frame, &mut NoGainControl).unwrap().is_none());

    // Back on NV the half-finished average is dropped
    assert!(processor.select_set(CalSet::Nv));
    assert!(!processor.is_calibrating());
    let mut emitted = 0;
    for _ in 0..10 {
        if processor.process(&frame, &mut NoGainControl).unwrap().is_some() {
            emitted += 1;
        }
    }
    assert_eq!(emitted, 10);
    assert_eq!(processor.corrected().pixels[3], 73.0);
}

#[test]
fn test_replay_through_stream() {
    let h = header(16, 12);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for count in 1..=20u16 {
        let mut frame = uniform(h, 2000 + count);
        frame.header.frame_count_lo = count;
        let mut bytes = frame.encode();
        bytes.resize(record_len(&frame.header), 0);
        file.write_all(&bytes).unwrap();
    }
    file.flush().unwrap();

    let source = ReplaySource::open(file.path()).unwrap();
    let cal = Calibration::open(None, &h);
    let config = ProcessorConfig::new().with_autocal_frames(2);
    let mut processor = FrameProcessor::new(cal, config).unwrap();
    let mut stream = Stream::spawn(source).unwrap();

    let mut last = 0;
    loop {
        match stream.recv() {
            Ok(frame) => {
                assert!(frame.header.frame_count() > last);
                last = frame.header.frame_count();
                processor.process(&frame, &mut NoGainControl).unwrap();
                stream.recycle(frame);
            }
            Err(WorkError::Shutdown) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let stats = stream.join();
    assert_eq!(stats.frames_read, 20);
    assert_eq!(last, 20);
    assert_eq!(
        processor.stats().frames_in + stats.frames_superseded,
        20
    );
}
