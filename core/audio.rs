//! Audio short-term quality model Pa: maps (codec, bitrate) per chunk to a
//! per-second MOS sequence `O21[t]`.

use base::{bail_t, Error};

use crate::model::{AudioSegment, SynthFrame};
use crate::numeric::mos_from_r;
use crate::window::{chunk_at, last_frame_before, ChunkKind, MeasurementWindow};

const SAMPLE_RATE: f64 = 100.0;

struct Coeffs {
    a1: f64,
    a2: f64,
    a3: f64,
}

fn coeffs_for(codec: &str) -> Result<Coeffs, Error> {
    Ok(match codec {
        "mp2" => Coeffs { a1: 100.0, a2: -0.02, a3: 15.48 },
        "ac3" => Coeffs { a1: 100.0, a2: -0.03, a3: 15.70 },
        "aaclc" => Coeffs { a1: 100.0, a2: -0.05, a3: 14.60 },
        "heaac" => Coeffs { a1: 100.0, a2: -0.11, a3: 20.06 },
        other => bail_t!(UnsupportedAudioCodec, "unsupported audio codec: {}", other),
    })
}

/// `q_cod_a = A1*exp(A2*bitrate)+A3`; `O21 = MOS_from_R(100 - q_cod_a)`.
fn audio_model_function(codec: &str, bitrate: f64) -> Result<f64, Error> {
    let c = coeffs_for(codec)?;
    let q_cod_a = c.a1 * (c.a2 * bitrate).exp() + c.a3;
    Ok(mos_from_r(100.0 - q_cod_a))
}

/// Normalizes a segment's codec, aliasing `aac` to `aaclc` with a one-time
/// warning (tracked by the caller via `warned`).
fn normalize_codec<'a>(codec: &'a str, warned: &mut bool) -> std::borrow::Cow<'a, str> {
    if codec == "aac" {
        if !*warned {
            tracing::warn!("assumed that 'aac' means 'aaclc'; please fix your input file");
            *warned = true;
        }
        std::borrow::Cow::Borrowed("aaclc")
    } else {
        std::borrow::Cow::Borrowed(codec)
    }
}

/// Computes `O21[t]` for `segments` using the 20-second measurement window
/// (the standards-conformant path).
pub fn calculate(segments: &[AudioSegment]) -> Result<Vec<f64>, Error> {
    let starts: Vec<f64> = segments.iter().map(|s| s.start).collect();
    let durations: Vec<f64> = segments.iter().map(|s| s.duration).collect();
    crate::numeric::check_segment_continuity(&starts, &durations, "audio");

    let mut o21 = Vec::new();
    {
        let mut window = MeasurementWindow::new(|t, frames: &[SynthFrame]| {
            let idx = match last_frame_before(frames, t as f64) {
                Some(i) => i,
                None => return Ok(()),
            };
            let chunk = chunk_at(frames, idx, ChunkKind::Audio, true);
            let first = &chunk[0];
            let score = audio_model_function(&first.codec, first.bitrate)?;
            o21.push(score);
            Ok(())
        });

        let mut dts = 0.0;
        let mut warned = false;
        for segment in segments {
            let codec = normalize_codec(&segment.codec, &mut warned).into_owned();
            let num_frames = (segment.duration * SAMPLE_RATE) as i64;
            let frame_duration = 1.0 / SAMPLE_RATE;
            for _ in 0..num_frames {
                window.add_frame(SynthFrame {
                    duration: frame_duration,
                    dts,
                    bitrate: segment.bitrate,
                    codec: codec.clone(),
                    fps: None,
                    resolution: None,
                    frame_type: None,
                    size: None,
                    qp_values: None,
                    representation: segment.representation.clone().unwrap_or_default(),
                })?;
                dts += frame_duration;
            }
        }
        window.stream_finished()?;
    }
    Ok(o21)
}

/// Fast-mode shortcut (non-standards-conformant): one score per segment,
/// repeated `floor(duration)` times, bypassing the measurement window.
pub fn calculate_fast_mode(segments: &[AudioSegment]) -> Result<Vec<f64>, Error> {
    tracing::warn!("using fast mode of the audio model, results may not be accurate to the second");
    let mut o21 = Vec::new();
    let mut warned = false;
    for segment in segments {
        let codec = normalize_codec(&segment.codec, &mut warned);
        let score = audio_model_function(&codec, segment.bitrate)?;
        let count = segment.duration.floor() as usize;
        o21.extend(std::iter::repeat(score).take(count));
    }
    Ok(o21)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(codec: &str, bitrate: f64, start: f64, duration: f64) -> AudioSegment {
        AudioSegment {
            codec: codec.into(),
            start,
            duration,
            bitrate,
            representation: None,
        }
    }

    #[test]
    fn unsupported_codec_fails() {
        assert!(audio_model_function("opus", 128.0).is_err());
    }

    #[test]
    fn fast_mode_matches_window_mode_for_constant_segment() {
        let segs = vec![segment("aaclc", 192.0, 0.0, 15.0)];
        let fast = calculate_fast_mode(&segs).unwrap();
        let windowed = calculate(&segs).unwrap();
        assert_eq!(fast.len(), windowed.len());
        for (a, b) in fast.iter().zip(windowed.iter()) {
            assert!((a - b).abs() < 1e-6, "fast={a} windowed={b}");
        }
    }

    #[test]
    fn higher_bitrate_yields_higher_or_equal_mos() {
        let low = audio_model_function("aaclc", 32.0).unwrap();
        let high = audio_model_function("aaclc", 256.0).unwrap();
        assert!(high >= low);
    }

    #[test]
    fn short_session_yields_no_scores() {
        let segs = vec![segment("aaclc", 192.0, 0.0, 5.0)];
        let o21 = calculate(&segs).unwrap();
        assert!(o21.is_empty());
    }
}
