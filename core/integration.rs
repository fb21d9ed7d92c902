//! Integration module Pq: aggregates the audio and video short-term scores
//! plus the stalling event list into the session-level outputs
//! `O23`, `O34`, `O35`, `O46`.

use base::{bail_t, Error};

use crate::forest::RandomForest;
use crate::model::Config;
use crate::numeric::{constrain, exp_helper, moving_average, percentile};

pub struct IntegrationResult {
    pub o23: f64,
    pub o34: Vec<f64>,
    pub o35: f64,
    pub o46: f64,
}

/// A single (already range- and zero-duration-filtered) stalling event.
pub type StallEvent = (f64, f64);

/// Drops stalling events outside `[0, duration]` or with non-positive
/// duration, logging a warning for each.
pub fn filter_stalling(stalling: &[(f64, f64)], duration: f64) -> Vec<StallEvent> {
    stalling
        .iter()
        .copied()
        .filter(|&(p, l)| {
            if !(0.0..=duration).contains(&p) {
                tracing::warn!("excluding stalling event at position {p}, outside of media range (0, {duration})");
                false
            } else if l <= 0.0 {
                tracing::warn!("excluding stalling event at position {p}, zero duration");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Computes `(O23, O34, O35, O46)` from the two per-second MOS sequences and
/// the (already filtered) stalling events. `o21` defaults to a constant
/// `5.0` (logged) when absent; `o22` is mandatory.
pub fn calculate(
    o21: Option<&[f64]>,
    o22: &[f64],
    events: &[StallEvent],
    config: &Config,
    forest: &RandomForest,
) -> Result<IntegrationResult, Error> {
    if o22.is_empty() {
        bail_t!(SchemaError, "O22 has no scores; Pq is not valid without video");
    }

    let duration = match o21 {
        Some(v) => v.len().min(o22.len()),
        None => o22.len(),
    };
    let o21_owned;
    let o21: &[f64] = match o21 {
        Some(v) => &v[..duration],
        None => {
            tracing::warn!("O21 has no scores, will assume constant high quality audio");
            o21_owned = vec![5.0; duration];
            &o21_owned
        }
    };
    let o22 = &o22[..duration];
    let duration_f = duration as f64;

    let (total_stall_len, num_stalls, avg_stall_interval) = stalling_features(events, duration_f);

    let vid_qual_spread = o22.iter().cloned().fold(f64::MIN, f64::max)
        - o22.iter().cloned().fold(f64::MAX, f64::min);
    let vid_qual_change_rate = video_quality_change_rate(o22);
    let (q_dir_changes_longest, q_dir_changes_tot) = calc_qdir(o22);

    let (o34, o35_baseline) = calc_o34_o35_baseline(o21, o22, config);

    let o35 = if config.amendment_1_app_2 {
        o35_baseline
    } else {
        let mut o34_diff = vec![0.0; duration];
        for i in 0..duration {
            let w_diff = exp_helper(1.0, 1.87403625, 0.0, 7.85416481, (duration - i - 1) as f64);
            o34_diff[i] = (o34[i] - o35_baseline) * w_diff;
        }
        let neg_perc = percentile(&o34_diff, 10.0);
        let negative_bias = (-neg_perc).max(0.0) * 0.01853820;

        let osc_comp = calc_osc(duration_f, q_dir_changes_longest, q_dir_changes_tot, vid_qual_spread);

        let adapt_comp = if (q_dir_changes_longest / duration_f) < 0.25 {
            constrain(0.17332553 * vid_qual_spread * vid_qual_change_rate - 0.01035647, 0.0, 0.5)
        } else {
            0.0
        };

        o35_baseline - negative_bias - osc_comp - adapt_comp
    };

    let stall_impact = stalling_impact(num_stalls, total_stall_len, duration_f, avg_stall_interval);
    let o23 = 1.0 + 4.0 * stall_impact;
    let mos = 1.0 + (o35 - 1.0) * stall_impact;

    let features = rf_features(o21, o22, events, duration_f);
    let rf_score = forest.score(&features);
    let mut o46 = 0.75 * constrain(mos, 1.0, 5.0) + 0.25 * rf_score;

    if config.amendment_1_stalling {
        let q = constrain(-0.066667 * total_stall_len + 2.0, 0.0, 1.0);
        o46 = 1.0 + (o46 - 1.0) * q;
    }

    o46 = 0.02833052 + 0.98117059 * o46;

    Ok(IntegrationResult { o23, o34, o35, o46 })
}

fn stalling_features(events: &[StallEvent], duration: f64) -> (f64, usize, f64) {
    let total_stall_len: f64 = events
        .iter()
        .map(|&(p, l)| l * exp_helper(1.0, 0.48412879, 0.0, 10.0, duration - p))
        .sum();
    let num_stalls = events.len();
    let avg_stall_interval = if num_stalls > 1 {
        let diffs: f64 = events.windows(2).map(|w| w[1].0 - w[0].0).sum();
        diffs / (num_stalls - 1) as f64
    } else {
        0.0
    };
    (total_stall_len, num_stalls, avg_stall_interval)
}

fn stalling_impact(num_stalls: usize, total_stall_len: f64, duration: f64, avg_stall_interval: f64) -> f64 {
    (-(num_stalls as f64) / 9.35158684).exp()
        * (-(total_stall_len / duration) / 0.91890815).exp()
        * (-(avg_stall_interval / duration) / 11.0567558).exp()
}

fn video_quality_change_rate(o22: &[f64]) -> f64 {
    if o22.len() < 2 {
        return 0.0;
    }
    let count = o22.windows(2).filter(|w| (w[1] - w[0]).abs() > 0.2).count();
    count as f64 / o22.len() as f64
}

fn calc_o34_o35_baseline(o21: &[f64], o22: &[f64], config: &Config) -> (Vec<f64>, f64) {
    let duration = o21.len();
    let mut o34 = vec![0.0; duration];
    let mut num = 0.0;
    let mut den = 0.0;
    for t in 0..duration {
        let mut v = constrain(
            -0.00069084 + 0.15374283 * o21[t] + 0.97153861 * o22[t] + 0.02461776 * o21[t] * o22[t],
            1.0,
            5.0,
        );
        if config.amendment_1_audiovisual {
            v = (1.0 - (2.0 - o21[t]).max(0.0)) * (v - 1.0) + 1.0;
        }
        o34[t] = v;

        let w1 = 0.00666620027943848 + 0.0000404018840273729 * ((t as f64 / duration as f64) / 0.156497800436237).exp();
        let w2 = 0.143179744942738 - 0.0238641564518876 * v;
        num += w1 * w2 * v;
        den += w1 * w2;
    }
    (o34, num / den)
}

/// Smooths `o22` with a length-5 symmetric moving average, classifies
/// stride-3 steps as rise/fall/flat, and returns
/// `(q_dir_changes_longest, q_dir_changes_tot)`.
fn calc_qdir(o22: &[f64]) -> (f64, i64) {
    let ma = moving_average(o22, 5);
    let step = 3usize;

    let mut qc = Vec::new();
    let mut i = 0;
    while i + step < ma.len() {
        let diff = ma[i + step] - ma[i];
        qc.push(if diff > 0.2 {
            1i32
        } else if diff > -0.2 && diff < 0.2 {
            0
        } else {
            -1
        });
        i += step;
    }

    let mut lens: Vec<(usize, i32)> = Vec::new();
    for (index, &val) in qc.iter().enumerate() {
        if val != 0 {
            match lens.last() {
                Some(&(_, last_val)) if last_val != val => lens.push((index, val)),
                Some(_) => {}
                None => lens.push((index, val)),
            }
        }
    }

    let longest_period = if !lens.is_empty() {
        let mut full = vec![(0usize, 0i32)];
        full.extend(lens.iter().copied());
        full.push((qc.len(), 0));
        let max_dist = full.windows(2).map(|w| w[1].0 - w[0].0).max().unwrap();
        (max_dist * step) as f64
    } else {
        (qc.len() * step) as f64
    };

    let mut tot = 0i64;
    let mut prev = 0i32;
    for &v in qc.iter().filter(|&&v| v != 0) {
        if v != prev {
            tot += 1;
        }
        prev = v;
    }

    (longest_period, tot)
}

fn calc_osc(duration: f64, q_dir_changes_longest: f64, q_dir_changes_tot: i64, vid_qual_spread: f64) -> f64 {
    if (q_dir_changes_longest / duration) < 0.25 && q_dir_changes_longest < 30.0 {
        let q_diff = (1.0 + (vid_qual_spread + 0.001).log10()).max(0.0);
        constrain(q_diff * (0.67756080 * q_dir_changes_tot as f64 - 8.05533303).exp(), 0.0, 1.5)
    } else {
        0.0
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// `n` time-weighted means over `n` equal-width bins covering `seq.len()`
/// seconds; replicates the last value if the integer samples exhaust before
/// `n` bins are filled.
fn scale_moses(seq: &[f64], num_splits: usize) -> Vec<f64> {
    let total_duration = seq.len() as f64;
    let split_duration = total_duration / num_splits as f64;
    let mut mos_samples = Vec::new();
    let mut previous_mos = 0.0;
    let mut previous_time = 0.0;
    for &s in seq {
        if previous_time + 1.0 >= split_duration {
            let mos = (previous_time * previous_mos + (split_duration - previous_time) * s) / split_duration;
            mos_samples.push(mos);
            previous_mos = s;
            previous_time = previous_time + 1.0 - split_duration;
        } else {
            previous_mos = (previous_mos * previous_time + s) / (previous_time + 1.0);
            previous_time += 1.0;
        }
    }
    while mos_samples.len() < num_splits {
        mos_samples.push(previous_mos);
    }
    mos_samples
}

fn rebuf_stats(events: &[StallEvent], duration: f64) -> [f64; 5] {
    if events.is_empty() || (events.len() == 1 && events[0].0 == 0.0) {
        return [0.0, 0.0, 0.0, 0.0, duration];
    }
    let filtered: Vec<StallEvent> = events.iter().copied().filter(|&(p, _)| p != 0.0).collect();
    let num_rebuf = filtered.len() as f64;
    let len_rebuf: f64 = filtered.iter().map(|&(_, l)| l).sum();
    let time_of_last_rebuf = duration - filtered.last().map(|&(p, _)| p).unwrap_or(0.0);
    [
        num_rebuf,
        len_rebuf,
        num_rebuf / duration,
        len_rebuf / duration,
        time_of_last_rebuf,
    ]
}

/// Builds the fixed 14-feature vector consumed by the random-forest blend.
fn rf_features(o21: &[f64], o22: &[f64], events: &[StallEvent], duration: f64) -> Vec<f64> {
    let initial_buffering_length = events.first().filter(|&&(p, _)| p == 0.0).map(|&(_, l)| l).unwrap_or(0.0);
    let mut stats = rebuf_stats(events, duration);
    stats[1] += initial_buffering_length / 3.0;
    stats[3] += initial_buffering_length / duration / 3.0;

    let o21_rounded: Vec<f64> = o21.iter().map(|v| round3(*v)).collect();
    let o22_rounded: Vec<f64> = o22.iter().map(|v| round3(*v)).collect();
    let video_scaled = scale_moses(&o22_rounded, 3);
    let audio_scaled = scale_moses(&o21_rounded, 2);
    let percentiles = [
        percentile(&o22_rounded, 1.0),
        percentile(&o22_rounded, 5.0),
        percentile(&o22_rounded, 10.0),
    ];

    let mut features = Vec::with_capacity(14);
    features.extend_from_slice(&stats);
    features.extend_from_slice(&video_scaled);
    features.extend_from_slice(&percentiles);
    features.extend_from_slice(&audio_scaled);
    features.push(duration);
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_stalling_yields_full_o23() {
        let o21 = vec![5.0; 15];
        let o22 = vec![5.0; 15];
        let config = Config::default();
        let forest = RandomForest::empty();
        let result = calculate(Some(&o21), &o22, &[], &config, &forest).unwrap();
        assert!((result.o23 - 5.0).abs() < 1e-6);
    }

    #[test]
    fn missing_o21_defaults_to_constant_high_quality() {
        let o22 = vec![3.0; 15];
        let config = Config::default();
        let forest = RandomForest::empty();
        let result = calculate(None, &o22, &[], &config, &forest).unwrap();
        assert_eq!(result.o34.len(), 15);
    }

    #[test]
    fn empty_video_scores_fail() {
        let config = Config::default();
        let forest = RandomForest::empty();
        assert!(calculate(None, &[], &[], &config, &forest).is_err());
    }

    #[test]
    fn adding_a_stall_weakly_decreases_o46() {
        let o21 = vec![5.0; 30];
        let o22 = vec![5.0; 30];
        let config = Config::default();
        let forest = RandomForest::empty();
        let baseline = calculate(Some(&o21), &o22, &[], &config, &forest).unwrap();
        let with_stall = calculate(Some(&o21), &o22, &[(15.0, 5.0)], &config, &forest).unwrap();
        assert!(with_stall.o46 <= baseline.o46);
    }

    #[test]
    fn filter_stalling_drops_out_of_range_and_zero_duration() {
        let events = vec![(-1.0, 2.0), (5.0, 0.0), (5.0, 2.0), (100.0, 2.0)];
        let kept = filter_stalling(&events, 30.0);
        assert_eq!(kept, vec![(5.0, 2.0)]);
    }

    #[test]
    fn scale_moses_replicates_last_value_when_short() {
        let seq = vec![4.0];
        let scaled = scale_moses(&seq, 3);
        assert_eq!(scaled.len(), 3);
        assert!((scaled[2] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn constant_video_has_no_oscillation() {
        let o22 = vec![4.9; 30];
        let (longest, tot) = calc_qdir(&o22);
        assert_eq!(tot, 0);
        let osc = calc_osc(30.0, longest, tot, 0.0);
        assert_eq!(osc, 0.0);
    }
}
