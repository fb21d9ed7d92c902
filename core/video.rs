//! Video short-term quality model Pv: three levels of input fidelity
//! (segment metadata only, + frame type/size, + quantization parameters)
//! computing a per-second MOS sequence `O22[t]`.

use base::{bail_t, Error};

use crate::model::{FrameType, SynthFrame, VideoSegment};
use crate::numeric::{compensated_frame_size, constrain, mos_from_r, parse_resolution, r_from_mos, sigmoid};
use crate::window::{chunk_at, last_frame_before, ChunkKind, MeasurementWindow};

const H265_COEFFS: [f64; 4] = [-0.05196039, 0.39430046, 0.17486221, 0.50008018];
const VP9_COEFFS: [f64; 4] = [-0.04129014, 0.30953836, 0.32314399, 0.5284358];

fn validate_codec(codec: &str) -> Result<(), Error> {
    match codec {
        "h264" | "h265" | "hevc" | "vp9" => Ok(()),
        other => bail_t!(UnsupportedVideoCodec, "unsupported video codec: {}", other),
    }
}

/// Degradation due to upscaling from `coding_pixels` to `display_pixels`.
fn deg_scal(coding_pixels: f64, display_pixels: f64) -> f64 {
    let scale = (display_pixels / coding_pixels).max(1.0);
    constrain(72.61 * (0.32 * (scale - 1.0) + 1.0).log10(), 0.0, 100.0)
}

/// Degradation due to frame-rate reduction below 24fps.
fn deg_fr(deg_cod: f64, deg_scal: f64, fps: f64) -> f64 {
    let raw = if fps < 24.0 {
        (100.0 - deg_cod - deg_scal) * (30.98 - 1.29 * fps) / (64.65 + fps)
    } else {
        0.0
    };
    constrain(raw, 0.0, 100.0)
}

fn integrate(deg_cod: f64, deg_scal: f64, deg_fr: f64) -> f64 {
    let q = 100.0 - constrain(deg_cod + deg_scal + deg_fr, 0.0, 100.0);
    mos_from_r(q)
}

fn mos_cod_to_deg(mos_cod: f64) -> f64 {
    constrain(100.0 - r_from_mos(mos_cod), 0.0, 100.0)
}

fn quant_mos(a1: f64, a2: f64, a3: f64, a4: f64, bitrate: f64, coding_pixels: f64, fps: f64) -> f64 {
    let quant = a1
        + a2 * (a3 + bitrate.ln() + (bitrate * bitrate / (coding_pixels * fps) + a4).ln());
    constrain(4.66 + (-0.07) * (4.06 * quant).exp(), 1.0, 5.0)
}

/// Mode 0: coarse, bitrate-based coding degradation.
fn mode0_score(coding_pixels: f64, display_pixels: f64, bitrate: f64, fps: f64) -> f64 {
    let mos_cod = quant_mos(11.9983519, -2.99991847, 41.2475074001, 0.13183165961, bitrate, coding_pixels, fps);
    let deg_cod = mos_cod_to_deg(mos_cod);
    let scal = deg_scal(coding_pixels, display_pixels);
    let fr = deg_fr(deg_cod, scal, fps);
    integrate(deg_cod, scal, fr)
}

/// Mode 1: frame-size-based coding degradation plus an I-frame complexity
/// correction.
fn mode1_score(
    coding_pixels: f64,
    display_pixels: f64,
    bitrate: f64,
    fps: f64,
    chunk: &[SynthFrame],
) -> f64 {
    let mut mos_cod = quant_mos(5.00011566, -1.19630824, 41.3585049, 0.0, bitrate, coding_pixels, fps);

    let mut i_sizes = Vec::new();
    let mut noni_sizes = Vec::new();
    for f in chunk {
        let ft = f.frame_type.expect("mode 1 frame missing frame_type");
        let size = compensated_frame_size(ft, f.size.unwrap_or(0.0), f.dts);
        if ft == FrameType::I {
            i_sizes.push(size);
        } else {
            noni_sizes.push(size);
        }
    }
    let iframe_ratio = if !i_sizes.is_empty() && !noni_sizes.is_empty() {
        mean(&i_sizes) / mean(&noni_sizes)
    } else {
        0.0
    };
    let complexity = sigmoid(-0.91562479, 0.0, -3.28579526, 20.4098663, iframe_ratio);
    mos_cod += complexity;
    mos_cod = constrain(mos_cod, 1.0, 5.0);

    let deg_cod = mos_cod_to_deg(mos_cod);
    let scal = deg_scal(coding_pixels, display_pixels);
    let fr = deg_fr(deg_cod, scal, fps);
    integrate(deg_cod, scal, fr)
}

/// Mode 3: average-QP-based coding degradation.
fn mode3_score(coding_pixels: f64, display_pixels: f64, fps: f64, chunk: &[SynthFrame]) -> Result<f64, Error> {
    let mut qppb: Vec<f64> = Vec::new();
    for f in chunk {
        let ft = f.frame_type.expect("mode 3 frame missing frame_type");
        match ft {
            FrameType::P | FrameType::B => {
                let qp = f
                    .qp_values
                    .as_ref()
                    .ok_or_else(|| base::format_err_t!(MissingQPValues, "missing QP values for a P/B frame"))?;
                qppb.extend(qp.iter().copied());
            }
            FrameType::I => {
                if !qppb.is_empty() {
                    if qppb.len() > 1 {
                        let prev = qppb[qppb.len() - 2];
                        *qppb.last_mut().unwrap() = prev;
                    } else {
                        qppb.clear();
                    }
                }
            }
        }
    }
    let avg_qp = if qppb.is_empty() { 0.0 } else { mean(&qppb) };
    let quant = avg_qp / 51.0;

    let mos_cod = constrain(4.66 + (-0.07) * (4.06 * quant).exp(), 1.0, 5.0);
    let deg_cod = mos_cod_to_deg(mos_cod);
    let scal = deg_scal(coding_pixels, display_pixels);
    let fr = deg_fr(deg_cod, scal, fps);
    Ok(integrate(deg_cod, scal, fr))
}

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

/// Non-H.264 codec compensation, applied after the normal score when every
/// frame in the chunk shares a single non-H.264 codec.
fn non_h264_correction(score: f64, codec: &str) -> Result<f64, Error> {
    let coeffs = match codec {
        "h265" | "hevc" => H265_COEFFS,
        "vp9" => VP9_COEFFS,
        other => bail_t!(UnsupportedVideoCodec, "unsupported video codec: {}", other),
    };
    let [a, b, c, d] = coeffs;
    let x = score;
    Ok(constrain(a * x * x * x + b * x * x + c * x + d, 1.0, 5.0))
}

/// Determines which of modes {0, 1, 3} applies: 0 if any segment omits
/// frame-level data, 3 if every frame carries QP values, 1 otherwise.
fn determine_mode(segments: &[VideoSegment]) -> Result<i32, Error> {
    if segments.iter().any(|s| s.frames.is_none()) {
        return Ok(0);
    }
    let mut saw_frame = false;
    let mut all_have_qp = true;
    for segment in segments {
        for frame in segment.frames.as_ref().unwrap() {
            saw_frame = true;
            if frame.qp_values.is_none() {
                all_have_qp = false;
            }
        }
    }
    if !saw_frame {
        return Ok(0);
    }
    Ok(if all_have_qp { 3 } else { 1 })
}

/// Computes `(O22[t], mode)` for `segments` against a display resolution.
pub fn calculate(segments: &[VideoSegment], display_res: &str) -> Result<(Vec<f64>, i32), Error> {
    let starts: Vec<f64> = segments.iter().map(|s| s.start).collect();
    let durations: Vec<f64> = segments.iter().map(|s| s.duration).collect();
    crate::numeric::check_segment_continuity(&starts, &durations, "video");

    let mode = determine_mode(segments)?;

    let codecs: std::collections::HashSet<&str> = segments.iter().map(|s| s.codec.as_str()).collect();
    for codec in &codecs {
        validate_codec(codec)?;
        if *codec != "h264" {
            tracing::warn!("non-standard codec used; O22 output will not be ITU-T P.1203 compliant");
            if mode != 0 {
                bail_t!(UnsupportedMode, "non-standard codec calculation only possible with mode 0");
            }
        }
    }

    let display_pixels = parse_resolution(display_res)?;

    let mut o22 = Vec::new();
    {
        let mut window = MeasurementWindow::new(|t, frames: &[SynthFrame]| {
            let idx = match last_frame_before(frames, t as f64) {
                Some(i) => i,
                None => return Ok(()),
            };
            let chunk = chunk_at(frames, idx, ChunkKind::Video, false);
            let first = &chunk[0];
            let coding_pixels = parse_resolution(first.resolution.as_deref().unwrap_or(""))?;

            let mut score = match mode {
                0 => {
                    let bitrate = mean(&chunk.iter().map(|f| f.bitrate).collect::<Vec<_>>());
                    mode0_score(coding_pixels, display_pixels, bitrate, first.fps.unwrap_or(0.0))
                }
                1 => {
                    let sizes: Vec<f64> = chunk
                        .iter()
                        .map(|f| compensated_frame_size(f.frame_type.unwrap(), f.size.unwrap_or(0.0), f.dts))
                        .collect();
                    let duration: f64 = chunk.iter().map(|f| f.duration).sum();
                    let bitrate = sizes.iter().sum::<f64>() * 8.0 / duration / 1000.0;
                    mode1_score(coding_pixels, display_pixels, bitrate, first.fps.unwrap_or(0.0), chunk)
                }
                3 => mode3_score(coding_pixels, display_pixels, first.fps.unwrap_or(0.0), chunk)?,
                other => bail_t!(UnsupportedMode, "unsupported mode: {}", other),
            };

            let codec_list: std::collections::HashSet<&str> = chunk.iter().map(|f| f.codec.as_str()).collect();
            if codec_list.len() > 1 {
                bail_t!(CodecSwitchInWindow, "codec switching within a measurement window");
            }
            let codec = *codec_list.iter().next().unwrap();
            if codec != "h264" {
                score = non_h264_correction(score, codec)?;
            }

            o22.push(score);
            Ok(())
        });

        let mut dts = 0.0;
        for segment in segments {
            let num_frames = match (mode, &segment.frames) {
                (0, _) | (_, None) => (segment.duration * segment.fps) as i64,
                (_, Some(frames)) => {
                    let assumed = (segment.duration * segment.fps) as i64;
                    if frames.len() as i64 != assumed {
                        tracing::warn!(
                            "segment specifies {} frames but based on duration/fps there should be {}",
                            frames.len(),
                            assumed
                        );
                    }
                    frames.len() as i64
                }
            };
            let frame_duration = 1.0 / segment.fps;
            let representation = segment.representation.clone().unwrap_or_default();

            for i in 0..num_frames {
                let (frame_type, size, qp_values) = match (mode, &segment.frames) {
                    (0, _) => (None, None, None),
                    (_, Some(frames)) => {
                        let f = &frames[i as usize];
                        let qp = if mode == 3 {
                            Some(f.qp_values.clone().ok_or_else(|| {
                                base::format_err_t!(
                                    MissingQPValues,
                                    "no QP values for frame {} of segment",
                                    i
                                )
                            })?)
                        } else {
                            None
                        };
                        (Some(FrameType::parse(&f.frame_type)?), Some(f.frame_size), qp)
                    }
                    (_, None) => (None, None, None),
                };
                window.add_frame(SynthFrame {
                    duration: frame_duration,
                    dts,
                    bitrate: segment.bitrate,
                    codec: segment.codec.clone(),
                    fps: Some(segment.fps),
                    resolution: Some(segment.resolution.clone()),
                    frame_type,
                    size,
                    qp_values,
                    representation: representation.clone(),
                })?;
                dts += frame_duration;
            }
        }
        window.stream_finished()?;
    }

    Ok((o22, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(codec: &str, bitrate: f64, fps: f64, resolution: &str, duration: f64) -> VideoSegment {
        VideoSegment {
            codec: codec.into(),
            start: 0.0,
            duration,
            bitrate,
            fps,
            resolution: resolution.into(),
            representation: None,
            frames: None,
        }
    }

    #[test]
    fn mode0_determined_when_no_frames() {
        let segs = vec![segment("h264", 4000.0, 24.0, "1920x1080", 15.0)];
        assert_eq!(determine_mode(&segs).unwrap(), 0);
    }

    #[test]
    fn higher_bitrate_improves_mode0_score() {
        let low = mode0_score(1920.0 * 1080.0, 1920.0 * 1080.0, 200.0, 24.0);
        let high = mode0_score(1920.0 * 1080.0, 1920.0 * 1080.0, 8000.0, 24.0);
        assert!(high > low);
    }

    #[test]
    fn no_upscaling_has_zero_degradation() {
        assert_eq!(deg_scal(1920.0 * 1080.0, 1920.0 * 1080.0), 0.0);
    }

    #[test]
    fn high_framerate_has_zero_frame_rate_degradation() {
        assert_eq!(deg_fr(10.0, 0.0, 30.0), 0.0);
    }

    #[test]
    fn unsupported_codec_rejected() {
        let segs = vec![segment("mpeg2", 4000.0, 24.0, "1920x1080", 15.0)];
        assert!(calculate(&segs, "1920x1080").is_err());
    }

    #[test]
    fn constant_high_quality_scores_high() {
        let segs = vec![segment("h264", 8000.0, 24.0, "1920x1080", 30.0)];
        let (o22, mode) = calculate(&segs, "1920x1080").unwrap();
        assert_eq!(mode, 0);
        assert_eq!(o22.len(), 30);
        assert!(o22.iter().all(|v| *v > 4.0), "{:?}", o22);
    }

    #[test]
    fn constant_low_quality_scores_low() {
        let segs = vec![segment("h264", 100.0, 24.0, "240x135", 30.0)];
        let (o22, _) = calculate(&segs, "1920x1080").unwrap();
        assert!(o22.iter().all(|v| *v < 2.0), "{:?}", o22);
    }
}
