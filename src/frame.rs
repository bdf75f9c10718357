//! Device frame model
//!
//! A ThermApp frame is a 64-byte control/status block followed by `data_w × data_h`
//! little-endian 16-bit detector samples. The same 64-byte block layout is written back to
//! the device to change its configuration (e.g. the gain DAC).

use crate::bytes::{self, FieldReader};
use crate::{Result, ThermError};
use std::fmt;

/// Size of the header block in bytes
pub const HEADER_SIZE: usize = 64;

/// Frame start marker; the transport syncs on these four words
pub const PREAMBLE: [u16; 4] = [0xa5a5, 0xa5a5, 0xa5a5, 0xa5d5];

/// Firmware revision some units report instead of 7
const FIRMWARE_SENTINEL: u16 = 256;

/// Decoded device header
///
/// Word layout (u16, little-endian): 0-3 preamble, 4 modes, 5/6 serial lo/hi, 7 hardware,
/// 8 firmware, 9/10 FPA height/width, 11/12 data height/width, 15 thermistor, 16 VoutA,
/// 17 FPA diode, 18-20 VoutC/D/E, 25 data offset, 26/27 frame counter lo/hi.
///
/// Words 17 and 27 are never written by the host; their meaning is inferred from device
/// readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub preamble: [u16; 4],
    pub modes: u16,
    pub serial_num_lo: u16,
    pub serial_num_hi: u16,
    pub hardware_num: u16,
    pub firmware_num: u16,
    pub fpa_h: u16,
    pub fpa_w: u16,
    pub data_h: u16,
    pub data_w: u16,
    /// Raw thermistor reading (signed)
    pub temp_thermistor: i16,
    /// Raw FPA diode reading
    pub temp_fpa_diode: u16,
    pub vout_a: u16,
    /// Gain DAC (VGSK) readback
    pub vout_c: u16,
    pub vout_d: u16,
    pub vout_e: u16,
    /// Byte offset of the pixel data from the start of the frame
    pub data_offset: u16,
    pub frame_count_lo: u16,
    pub frame_count_hi: u16,
}

impl FrameHeader {
    /// Control block the host sends after connecting: test-pattern-low mode, full 384x288
    /// readout and the vendor application's DAC settings.
    pub fn initial_config() -> Self {
        Self {
            preamble: PREAMBLE,
            modes: 0x0002,
            serial_num_lo: 0,
            serial_num_hi: 0,
            hardware_num: 0,
            firmware_num: 0,
            fpa_h: 288,
            fpa_w: 384,
            data_h: 288,
            data_w: 384,
            temp_thermistor: 0,
            temp_fpa_diode: 0,
            vout_a: 0x0795,
            vout_c: 0x058f,
            vout_d: 0x08a2,
            vout_e: 0x0b6d,
            data_offset: HEADER_SIZE as u16,
            frame_count_lo: 0,
            frame_count_hi: 0,
        }
    }

    /// Decode the header from the first 64 bytes of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(ThermError::InvalidFrame(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                src.len()
            )));
        }

        let mut r = FieldReader::new(&src[..HEADER_SIZE]);
        let preamble = [r.u16(), r.u16(), r.u16(), r.u16()];
        let modes = r.u16();
        let serial_num_lo = r.u16();
        let serial_num_hi = r.u16();
        let hardware_num = r.u16();
        let firmware_num = r.u16();
        let fpa_h = r.u16();
        let fpa_w = r.u16();
        let data_h = r.u16();
        let data_w = r.u16();

        Ok(Self {
            preamble,
            modes,
            serial_num_lo,
            serial_num_hi,
            hardware_num,
            firmware_num,
            fpa_h,
            fpa_w,
            data_h,
            data_w,
            temp_thermistor: bytes::read_i16(src, 15 * 2),
            vout_a: bytes::read_u16(src, 16 * 2),
            temp_fpa_diode: bytes::read_u16(src, 17 * 2),
            vout_c: bytes::read_u16(src, 18 * 2),
            vout_d: bytes::read_u16(src, 19 * 2),
            vout_e: bytes::read_u16(src, 20 * 2),
            data_offset: bytes::read_u16(src, 25 * 2),
            frame_count_lo: bytes::read_u16(src, 26 * 2),
            frame_count_hi: bytes::read_u16(src, 27 * 2),
        })
    }

    /// Encode into the 64-byte wire layout. Reserved words are written as zero.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut words = [0u16; HEADER_SIZE / 2];
        words[..4].copy_from_slice(&self.preamble);
        words[4] = self.modes;
        words[5] = self.serial_num_lo;
        words[6] = self.serial_num_hi;
        words[7] = self.hardware_num;
        words[8] = self.firmware_num;
        words[9] = self.fpa_h;
        words[10] = self.fpa_w;
        words[11] = self.data_h;
        words[12] = self.data_w;
        words[15] = self.temp_thermistor as u16;
        words[16] = self.vout_a;
        words[17] = self.temp_fpa_diode;
        words[18] = self.vout_c;
        words[19] = self.vout_d;
        words[20] = self.vout_e;
        words[25] = self.data_offset;
        words[26] = self.frame_count_lo;
        words[27] = self.frame_count_hi;

        let mut out = [0u8; HEADER_SIZE];
        for (chunk, word) in out.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn has_preamble(&self) -> bool {
        self.preamble == PREAMBLE
    }

    pub fn serial_num(&self) -> u32 {
        self.serial_num_lo as u32 | (self.serial_num_hi as u32) << 16
    }

    /// Firmware revision with the known 256 sentinel mapped back to 7
    pub fn firmware_revision(&self) -> u16 {
        if self.firmware_num == FIRMWARE_SENTINEL {
            7
        } else {
            self.firmware_num
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count_lo as u32 | (self.frame_count_hi as u32) << 16
    }

    /// Number of pixels carried by a frame with this header
    pub fn pixel_count(&self) -> usize {
        self.data_w as usize * self.data_h as usize
    }

    /// Total frame length in bytes (header, padding up to `data_offset`, pixels)
    pub fn frame_len(&self) -> usize {
        self.data_offset as usize + self.pixel_count() * 2
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Header[serial={}, hw={}, fw={}, fpa={}x{}, data={}x{}, vgsk={}, frame={}]",
            self.serial_num(),
            self.hardware_num,
            self.firmware_num,
            self.fpa_w,
            self.fpa_h,
            self.data_w,
            self.data_h,
            self.vout_c,
            self.frame_count()
        )
    }
}

/// A decoded frame: header plus raw detector samples in raster order
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub pixels: Vec<u16>,
}

impl Frame {
    pub fn new(header: FrameHeader, pixels: Vec<u16>) -> Self {
        Self { header, pixels }
    }

    /// Decode a complete frame from raw bytes.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut frame = Self {
            header: FrameHeader::initial_config(),
            pixels: Vec::new(),
        };
        frame.decode_from(src)?;
        Ok(frame)
    }

    /// Decode into this frame, reusing the pixel allocation.
    pub fn decode_from(&mut self, src: &[u8]) -> Result<()> {
        let header = FrameHeader::decode(src)?;
        let start = header.data_offset as usize;
        if start < HEADER_SIZE {
            return Err(ThermError::InvalidFrame(format!(
                "data offset {} overlaps the header",
                start
            )));
        }
        if src.len() < header.frame_len() {
            return Err(ThermError::InvalidFrame(format!(
                "frame needs {} bytes for {}x{} pixels, got {}",
                header.frame_len(),
                header.data_w,
                header.data_h,
                src.len()
            )));
        }

        self.pixels.resize(header.pixel_count(), 0);
        bytes::u16_table(&src[start..], &mut self.pixels);
        self.header = header;
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.header.data_w as usize
    }

    pub fn height(&self) -> usize {
        self.header.data_h as usize
    }

    /// Encode back to the wire layout (used by capture writers and tests).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.header.frame_len().max(HEADER_SIZE)];
        out[..HEADER_SIZE].copy_from_slice(&self.header.encode());
        let start = self.header.data_offset as usize;
        for (chunk, px) in out[start..].chunks_exact_mut(2).zip(&self.pixels) {
            chunk.copy_from_slice(&px.to_le_bytes());
        }
        out
    }
}

/// Pixel formats a video sink can be handed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte per pixel, 0 = black
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Tone-mapped output frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Gray8,
            data: vec![0; width * height * PixelFormat::Gray8.bytes_per_pixel()],
        }
    }
}
