use std::path::Path;

use chrono::NaiveDate;
use ndarray::Array2;

use castor_core::config::Precision;
use castor_core::frame::Timestamp;
use castor_core::io::fits::{write_image, FitsHeader, HeaderValue};

pub const FIELD_SIZE: usize = 128;
pub const SKY_LEVEL: f32 = 100.0;
pub const STAR_SIGMA: f64 = 1.5;

/// A synthetic star: position in pixels and peak amplitude above the sky.
#[derive(Clone, Copy, Debug)]
pub struct Star {
    pub x: f64,
    pub y: f64,
    pub amplitude: f64,
}

/// Deterministic pseudo-random value in [0, 1).
pub fn hash01(seed: u64, a: u64, b: u64) -> f64 {
    let mut h = seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(a.wrapping_mul(0xBF58_476D_1CE4_E5B9))
        .wrapping_add(b.wrapping_mul(0x94D0_49BB_1331_11EB));
    h ^= h >> 31;
    h = h.wrapping_mul(0xD6E8_FEB8_6659_FD93);
    h ^= h >> 29;
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// 25 stars on a jittered 5x5 grid, with distinct amplitudes.
pub fn star_list() -> Vec<Star> {
    let mut stars = Vec::new();
    for i in 0..5u64 {
        for j in 0..5u64 {
            let jx = hash01(7, i, j) * 8.0 - 4.0;
            let jy = hash01(11, i, j) * 8.0 - 4.0;
            stars.push(Star {
                x: 16.0 + 24.0 * i as f64 + jx,
                y: 16.0 + 24.0 * j as f64 + jy,
                amplitude: 200.0 + 35.0 * (i * 5 + j) as f64,
            });
        }
    }
    stars
}

/// Move every star by (dx, dy).
pub fn shifted(stars: &[Star], dx: f64, dy: f64) -> Vec<Star> {
    stars
        .iter()
        .map(|s| Star {
            x: s.x + dx,
            y: s.y + dy,
            amplitude: s.amplitude,
        })
        .collect()
}

/// Render Gaussian stars over a flat sky with uniform noise in [-2, 2).
pub fn render_field(stars: &[Star], noise_seed: u64) -> Array2<f32> {
    Array2::from_shape_fn((FIELD_SIZE, FIELD_SIZE), |(r, c)| {
        let mut v = SKY_LEVEL as f64 + (hash01(noise_seed, r as u64, c as u64) * 4.0 - 2.0);
        for s in stars {
            let d2 = (c as f64 - s.x).powi(2) + (r as f64 - s.y).powi(2);
            if d2 < 100.0 {
                v += s.amplitude * (-d2 / (2.0 * STAR_SIGMA * STAR_SIGMA)).exp();
            }
        }
        v as f32
    })
}

/// A star-less frame of the same size.
pub fn blank_field(noise_seed: u64) -> Array2<f32> {
    render_field(&[], noise_seed)
}

pub fn timestamp(hour: u32, minute: u32, second: u32) -> Timestamp {
    Timestamp(
        NaiveDate::from_ymd_opt(2019, 8, 8)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap(),
    )
}

/// Write a single-exposure frame with `EXPTIME` and `DATE-OBS` cards.
pub fn write_frame(path: &Path, data: &Array2<f32>, exptime: f64, date_obs: &str) {
    let mut header = FitsHeader::new();
    header.set("EXPTIME", HeaderValue::Float(exptime));
    header.set("DATE-OBS", HeaderValue::Text(date_obs.to_string()));
    write_image(path, data, &header, Precision::Single).unwrap();
}

/// 80-character header card, for hand-built FITS files.
pub fn card(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(80, b' ');
    bytes
}

/// Pad a byte buffer to a whole number of 2880-byte blocks.
pub fn pad_block(buf: &mut Vec<u8>, fill: u8) {
    let rem = buf.len() % 2880;
    if rem != 0 {
        buf.resize(buf.len() + 2880 - rem, fill);
    }
}
