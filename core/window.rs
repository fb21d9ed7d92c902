//! The sliding measurement window shared by the audio and video short-term
//! models: a 20-second-wide FIFO of synthetic frames that emits one score
//! per presentation second through a caller-supplied sink.

use std::collections::VecDeque;

use base::{bail_t, Error};

use crate::model::SynthFrame;

const WINDOW_SPAN_SECS: f64 = 20.0;
const TRAILING_HISTORY_SECS: f64 = 10.0;
const WARMUP_SECS: f64 = 11.0;

/// Whether a chunk is being identified for the audio or video model; only
/// affects which fields participate in the representation hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Audio,
    Video,
}

/// A sliding window of [`SynthFrame`]s, bounded to 20 seconds of accumulated
/// frame duration, that calls back once per emitted second.
///
/// The callback is a plain `FnMut`, matching the "function value supplied at
/// construction" shape: no global state, no implicit captures beyond what
/// the caller closes over explicitly.
pub struct MeasurementWindow<'a> {
    frames: VecDeque<SynthFrame>,
    window_duration: f64,
    pvs_duration: f64,
    last_emitted: i64,
    finished: bool,
    sink: Box<dyn FnMut(u64, &[SynthFrame]) -> Result<(), Error> + 'a>,
}

impl<'a> MeasurementWindow<'a> {
    pub fn new(sink: impl FnMut(u64, &[SynthFrame]) -> Result<(), Error> + 'a) -> Self {
        MeasurementWindow {
            frames: VecDeque::new(),
            window_duration: 0.0,
            pvs_duration: 0.0,
            last_emitted: 0,
            finished: false,
            sink: Box::new(sink),
        }
    }

    /// Appends a synthetic frame, evicting the oldest frames (FIFO) until
    /// the window fits within 20 seconds, then runs the emission check.
    pub fn add_frame(&mut self, frame: SynthFrame) -> Result<(), Error> {
        if self.finished {
            bail_t!(UsageError, "add_frame called after stream_finished");
        }
        if !(frame.duration > 0.0) {
            bail_t!(SchemaError, "synthetic frame has missing/non-positive duration");
        }

        while !self.frames.is_empty() && self.window_duration + frame.duration > WINDOW_SPAN_SECS {
            let evicted = self.frames.pop_front().unwrap();
            self.window_duration -= evicted.duration;
        }

        self.window_duration += frame.duration;
        self.pvs_duration += frame.duration;
        self.frames.push_back(frame);

        self.emit_ready()
    }

    fn emit_ready(&mut self) -> Result<(), Error> {
        if self.pvs_duration < WARMUP_SECS {
            return Ok(());
        }
        while self.pvs_duration - TRAILING_HISTORY_SECS >= (self.last_emitted + 1) as f64 {
            let t = (self.last_emitted + 1) as u64;
            let frames: Vec<SynthFrame> = self.frames.iter().cloned().collect();
            (self.sink)(t, &frames)?;
            self.last_emitted += 1;
        }
        Ok(())
    }

    /// Flushes the remaining output seconds, evicting trailing-history
    /// frames as it goes. No more frames may be added afterward.
    pub fn stream_finished(&mut self) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let integral = self.pvs_duration.floor();
        let frac = self.pvs_duration - integral;
        let final_t = if frac > 0.99 {
            self.pvs_duration.ceil() as i64
        } else {
            integral as i64
        };

        let mut t = self.last_emitted + 1;
        while t <= final_t {
            while let Some(front) = self.frames.front() {
                if front.dts < (t as f64) - TRAILING_HISTORY_SECS {
                    self.frames.pop_front();
                } else {
                    break;
                }
            }
            let frames: Vec<SynthFrame> = self.frames.iter().cloned().collect();
            (self.sink)(t as u64, &frames)?;
            t += 1;
        }
        self.last_emitted = final_t;
        Ok(())
    }

    pub fn pvs_duration(&self) -> f64 {
        self.pvs_duration
    }
}

/// Chunk-identity hash for a synthetic frame: its own `representation` if
/// non-empty, else computed from codec/bitrate/fps(/displaySize).
pub fn representation_of(frame: &SynthFrame, kind: ChunkKind) -> String {
    if !frame.representation.is_empty() {
        return frame.representation.clone();
    }
    match kind {
        ChunkKind::Video => crate::numeric::chunk_hash_video(
            frame.bitrate,
            &frame.codec,
            frame.fps.unwrap_or(0.0),
            frame.resolution.as_deref(),
        ),
        ChunkKind::Audio => crate::numeric::chunk_hash_audio(frame.bitrate, &frame.codec),
    }
}

/// Returns the maximal run of frames around `index` that share `frames[index]`'s
/// representation hash (or just `frames[index..=index]` if `onlyfirst`).
pub fn chunk_at(frames: &[SynthFrame], index: usize, kind: ChunkKind, onlyfirst: bool) -> &[SynthFrame] {
    if onlyfirst {
        return &frames[index..=index];
    }
    let target = representation_of(&frames[index], kind);

    let mut start = index;
    while start > 0 && representation_of(&frames[start - 1], kind) == target {
        start -= 1;
    }
    let mut end = index;
    while end + 1 < frames.len() && representation_of(&frames[end + 1], kind) == target {
        end += 1;
    }
    &frames[start..=end]
}

/// Index of the most recent frame with `dts < t`, or `None` if there is none.
pub fn last_frame_before(frames: &[SynthFrame], t: f64) -> Option<usize> {
    frames.iter().rposition(|f| f.dts < t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(dts: f64, duration: f64) -> SynthFrame {
        SynthFrame {
            duration,
            dts,
            bitrate: 1000.0,
            codec: "h264".into(),
            fps: Some(24.0),
            resolution: None,
            frame_type: None,
            size: None,
            qp_values: None,
            representation: String::new(),
        }
    }

    #[test]
    fn no_emission_before_warmup() {
        let emitted = std::cell::RefCell::new(Vec::new());
        let mut window = MeasurementWindow::new(|t, _f| {
            emitted.borrow_mut().push(t);
            Ok(())
        });
        for i in 0..10 {
            window.add_frame(frame(i as f64, 1.0)).unwrap();
        }
        assert!(emitted.borrow().is_empty());
    }

    #[test]
    fn steady_state_emits_one_per_second() {
        let emitted = std::cell::RefCell::new(Vec::new());
        let mut window = MeasurementWindow::new(|t, _f| {
            emitted.borrow_mut().push(t);
            Ok(())
        });
        for i in 0..30 {
            window.add_frame(frame(i as f64, 1.0)).unwrap();
        }
        window.stream_finished().unwrap();
        drop(window);
        let got = emitted.into_inner();
        assert_eq!(got, (1..=30).collect::<Vec<_>>());
    }

    #[test]
    fn window_evicts_frames_past_twenty_seconds() {
        let mut window = MeasurementWindow::new(|_t, _f| Ok(()));
        for i in 0..50 {
            window.add_frame(frame(i as f64, 1.0)).unwrap();
        }
        assert!(window.window_duration <= WINDOW_SPAN_SECS + 1e-9);
    }

    #[test]
    fn chunk_at_groups_matching_representation() {
        let mut frames = vec![frame(0.0, 1.0), frame(1.0, 1.0), frame(2.0, 1.0)];
        frames[0].representation = "a".into();
        frames[1].representation = "a".into();
        frames[2].representation = "b".into();
        let chunk = chunk_at(&frames, 1, ChunkKind::Video, false);
        assert_eq!(chunk.len(), 2);
    }

    #[test]
    fn short_session_never_emits() {
        let emitted = std::cell::RefCell::new(Vec::new());
        let mut window = MeasurementWindow::new(|t, _f| {
            emitted.borrow_mut().push(t);
            Ok(())
        });
        for i in 0..5 {
            window.add_frame(frame(i as f64, 1.0)).unwrap();
        }
        window.stream_finished().unwrap();
        assert!(emitted.borrow().is_empty());
    }
}
