//! Numeric building blocks shared by the audio, video, and integration
//! models: the MOS<->R transfer function, the exponential/sigmoid helpers
//! used throughout the coefficient tables, frame-size compensation,
//! resolution parsing, and the percentile/moving-average primitives used by
//! the integration module's temporal pooling.

use base::{bail_t, Error};

use crate::model::FrameType;
use crate::tables::{R_FROM_MOS_KEYS, R_FROM_MOS_VALUES};

pub const MOS_MIN: f64 = 1.05;
pub const MOS_MAX: f64 = 4.9;

/// Clamps `x` to `[lo, hi]`.
pub fn constrain(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

/// `MOS_from_R(Q) = 1.05 + (4.9-1.05)*Q/100 + Q*(Q-60)*(100-Q)*7e-6`, clamped
/// to `[MOS_MIN, MOS_MAX]`.
pub fn mos_from_r(q: f64) -> f64 {
    let mos = MOS_MIN + (MOS_MAX - MOS_MIN) * q / 100.0 + q * (q - 60.0) * (100.0 - q) * 0.000007;
    constrain(mos, MOS_MIN, MOS_MAX)
}

/// Inverse of [`mos_from_r`]: a piecewise-linear lookup over the tabulated
/// anchor points in `tables`, realised as a binary search followed by
/// linear interpolation between the two bracketing points. Values of `mos`
/// outside `[MOS_MIN, MOS_MAX]` clamp to the table's endpoints.
pub fn r_from_mos(mos: f64) -> f64 {
    let mos = constrain(mos, MOS_MIN, MOS_MAX);

    match R_FROM_MOS_KEYS.binary_search_by(|probe| probe.partial_cmp(&mos).unwrap()) {
        Ok(i) => R_FROM_MOS_VALUES[i],
        Err(0) => R_FROM_MOS_VALUES[0],
        Err(i) if i >= R_FROM_MOS_KEYS.len() => R_FROM_MOS_VALUES[R_FROM_MOS_KEYS.len() - 1],
        Err(i) => {
            let (x0, x1) = (R_FROM_MOS_KEYS[i - 1], R_FROM_MOS_KEYS[i]);
            let (y0, y1) = (R_FROM_MOS_VALUES[i - 1], R_FROM_MOS_VALUES[i]);
            let frac = (mos - x0) / (x1 - x0);
            y0 + (y1 - y0) * frac
        }
    }
}

/// Two-anchor exponential decay: start `a`, asymptote `b`, anchor `c`,
/// half-life scale `d`.
pub fn exp_helper(a: f64, b: f64, c: f64, d: f64, x: f64) -> f64 {
    b + (a - b) * (-(x - c) * (0.5f64).ln() / -(d - c)).exp()
}

/// Sigmoid saturating between `min_y`..`max_y` (by this model's convention,
/// `min_x` is actually the low-saturation *value*, not an x-coordinate; the
/// name is kept for parity with the standard's own parameter naming).
pub fn sigmoid(min_x: f64, min_y: f64, sat_lo: f64, sat_hi: f64, x: f64) -> f64 {
    let scaled_x = 10.0 / (sat_hi - sat_lo);
    let middle_x = (sat_lo + sat_hi) / 2.0;
    min_x + (min_y - min_x) / (1.0 + (-scaled_x * (x - middle_x)).exp())
}

/// Compensates source-reported frame sizes for container/NAL overhead:
/// `800` bytes are subtracted from the very first frame of a PVS (`dts==0`),
/// `55` bytes from I-frames, `11` bytes from everything else. Floors at `0`.
pub fn compensated_frame_size(frame_type: FrameType, size: f64, dts: f64) -> f64 {
    let compensated = if dts == 0.0 {
        size - 800.0
    } else if frame_type == FrameType::I {
        size - 55.0
    } else {
        size - 11.0
    };
    compensated.max(0.0)
}

/// Parses a `"WxH"` resolution string into a pixel count.
pub fn parse_resolution(s: &str) -> Result<f64, Error> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| base::format_err_t!(SchemaError, "malformed resolution: {}", s))?;
    let w: f64 = w
        .parse()
        .map_err(|_| base::format_err_t!(SchemaError, "malformed resolution: {}", s))?;
    let h: f64 = h
        .parse()
        .map_err(|_| base::format_err_t!(SchemaError, "malformed resolution: {}", s))?;
    Ok(w * h)
}

/// Checks that `starts[i] == starts[i-1] + durations[i-1]` within `0.01s`,
/// logging a warning (not an error) for each violation.
pub fn check_segment_continuity(starts: &[f64], durations: &[f64], kind: &str) {
    for i in 1..starts.len() {
        let expected = starts[i - 1] + durations[i - 1];
        if (expected - starts[i]).abs() > 0.01 {
            tracing::warn!(
                "{kind} segment starts at {actual} but last one ended at {expected}",
                kind = kind,
                actual = starts[i],
                expected = expected,
            );
        }
    }
}

/// Percentile of `values` at rank `p` (0..=100) using linear interpolation:
/// `sorted[k] + (sorted[k+1]-sorted[k])*frac` where `k = floor(p*(n-1)/100)`.
/// `values` need not be pre-sorted.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    assert!(!values.is_empty());
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = p * (n - 1) as f64 / 100.0;
    let k = rank.floor() as usize;
    let frac = rank - k as f64;
    if k + 1 >= n {
        sorted[n - 1]
    } else {
        sorted[k] + (sorted[k + 1] - sorted[k]) * frac
    }
}

/// Symmetric moving average of order `order` (must be odd... in practice
/// this model always calls it with `order = 5`), with boundary replication:
/// the first and last value are each repeated `order-1` times before a
/// `valid`-mode convolution, so the output is `order-1` elements longer than
/// the input, not the same length.
pub fn moving_average(values: &[f64], order: usize) -> Vec<f64> {
    assert!(!values.is_empty());
    let pad = order - 1;
    let mut padded = Vec::with_capacity(values.len() + 2 * pad);
    padded.extend(std::iter::repeat(values[0]).take(pad));
    padded.extend_from_slice(values);
    padded.extend(std::iter::repeat(*values.last().unwrap()).take(pad));

    let kernel = 1.0 / order as f64;
    let out_len = padded.len() - order + 1;
    (0..out_len)
        .map(|i| padded[i..i + order].iter().sum::<f64>() * kernel)
        .collect()
}

/// Ensures `s` is a valid (non-empty, well-formed) resolution early, turning
/// a malformed `displaySize`/`resolution` field into a [`ErrorKind::SchemaError`].
pub fn require_resolution(s: &str) -> Result<(), Error> {
    if parse_resolution(s).is_ok() {
        Ok(())
    } else {
        bail_t!(SchemaError, "malformed resolution: {}", s)
    }
}

/// Chunk-identity hash for a video frame lacking an explicit `representation`:
/// `bitrate ++ codec ++ fps [++ displaySize]`.
pub fn chunk_hash_video(bitrate: f64, codec: &str, fps: f64, display_size: Option<&str>) -> String {
    let mut hash = format!("{bitrate}{codec}{fps}");
    if let Some(d) = display_size {
        hash.push_str(d);
    }
    hash
}

/// Chunk-identity hash for an audio frame lacking an explicit `representation`:
/// `bitrate ++ codec`.
pub fn chunk_hash_audio(bitrate: f64, codec: &str) -> String {
    format!("{bitrate}{codec}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mos_r_roundtrip() {
        for i in 0..=100 {
            let q = i as f64;
            let mos = mos_from_r(q);
            let q2 = r_from_mos(mos);
            assert!((q2 - q).abs() < 1e-3, "q={q} mos={mos} q2={q2}");
        }
    }

    #[test]
    fn mos_r_clamp_endpoints() {
        assert_eq!(r_from_mos(0.0), r_from_mos(MOS_MIN));
        assert_eq!(r_from_mos(10.0), r_from_mos(MOS_MIN));
        assert_eq!(r_from_mos(5.0), r_from_mos(MOS_MAX));
    }

    #[test]
    fn parse_resolution_ok() {
        assert_eq!(parse_resolution("1920x1080").unwrap(), 1920.0 * 1080.0);
    }

    #[test]
    fn parse_resolution_malformed() {
        assert!(parse_resolution("garbage").is_err());
    }

    #[test]
    fn compensated_size_first_frame() {
        assert_eq!(compensated_frame_size(FrameType::I, 1000.0, 0.0), 200.0);
    }

    #[test]
    fn compensated_size_floors_at_zero() {
        assert_eq!(compensated_frame_size(FrameType::P, 5.0, 1.0), 0.0);
    }

    #[test]
    fn percentile_linear() {
        let v = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 100.0), 5.0);
        assert_eq!(percentile(&v, 50.0), 3.0);
    }

    #[test]
    fn moving_average_grows_by_order_minus_one() {
        let v = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let out = moving_average(&v, 5);
        assert_eq!(out.len(), v.len() + 4);
    }
}
