//! Little-endian field decoding for calibration leaves and frame headers
//!
//! All multi-byte fields on the wire and on disk are little-endian regardless of host.
//! Callers dispatch on exact buffer lengths before decoding, so these helpers index directly
//! and panic on a short slice rather than returning an error.

use byteorder::{ByteOrder, LittleEndian};

#[inline]
pub fn read_u16(src: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&src[offset..offset + 2])
}

#[inline]
pub fn read_i16(src: &[u8], offset: usize) -> i16 {
    LittleEndian::read_i16(&src[offset..offset + 2])
}

#[inline]
pub fn read_f32(src: &[u8], offset: usize) -> f32 {
    LittleEndian::read_f32(&src[offset..offset + 4])
}

#[inline]
pub fn read_f64(src: &[u8], offset: usize) -> f64 {
    LittleEndian::read_f64(&src[offset..offset + 8])
}

/// Decode a fixed-length text field, stopping at the first NUL.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected; the vendor tool
/// writes plain ASCII but pads with whatever was in its buffer.
pub fn read_string(src: &[u8], offset: usize, len: usize) -> String {
    let field = &src[offset..offset + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Sequential reader over a byte slice.
///
/// Keeps the running offset so field-by-field layouts read top to bottom.
pub struct FieldReader<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn u16(&mut self) -> u16 {
        let v = read_u16(self.src, self.pos);
        self.pos += 2;
        v
    }

    pub fn f32(&mut self) -> f32 {
        let v = read_f32(self.src, self.pos);
        self.pos += 4;
        v
    }

    pub fn f64(&mut self) -> f64 {
        let v = read_f64(self.src, self.pos);
        self.pos += 8;
        v
    }

    pub fn string(&mut self, len: usize) -> String {
        let v = read_string(self.src, self.pos, len);
        self.pos += len;
        v
    }

    /// Read `N` consecutive `f32` values.
    pub fn f32_array<const N: usize>(&mut self) -> [f32; N] {
        let mut out = [0.0; N];
        for v in out.iter_mut() {
            *v = self.f32();
        }
        out
    }
}

/// Convert a table of little-endian `f32` values.
pub fn f32_table(src: &[u8]) -> Box<[f32]> {
    let mut out = vec![0.0f32; src.len() / 4];
    LittleEndian::read_f32_into(&src[..out.len() * 4], &mut out);
    out.into_boxed_slice()
}

/// Convert a table of little-endian `f64` values, narrowing to `f32`.
pub fn f64_table(src: &[u8]) -> Box<[f32]> {
    src.chunks_exact(8)
        .map(|chunk| LittleEndian::read_f64(chunk) as f32)
        .collect()
}

/// Convert little-endian `u16` pixel data.
pub fn u16_table(src: &[u8], dst: &mut [u16]) {
    LittleEndian::read_u16_into(&src[..dst.len() * 2], dst);
}
