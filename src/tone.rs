//! Generated feeder sources

use std::{f32::consts::TAU, sync::Arc};

/// Sawtooth test pattern: `len` bytes counting up by two and wrapping
pub fn ramp(len: usize) -> Arc<[u8]> {
    (0..len).map(|i| (i as u8).wrapping_mul(2)).collect()
}

/// Interleaved unsigned 8-bit sine wave at `frequency` Hz, `frames` frames long
pub fn sine(rate: u32, channels: u32, frequency: f32, frames: usize) -> Arc<[u8]> {
    let mut out = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let x = (t * frequency * TAU).sin();
        let sample = (128.0 + 127.0 * x).round() as u8;
        out.extend((0..channels).map(|_| sample));
    }
    out.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_wraps() {
        let r = ramp(8000);
        assert_eq!(r.len(), 8000);
        assert_eq!(r[..4], [0, 2, 4, 6]);
        assert_eq!(r[127], 254);
        assert_eq!(r[128], 0);
    }

    #[test]
    fn sine_layout() {
        let s = sine(8000, 2, 2000.0, 4);
        assert_eq!(s.len(), 8);
        // Quarter-period steps: 0, peak, 0, trough
        assert_eq!(s[..], [128, 128, 255, 255, 128, 128, 1, 1]);
    }
}
