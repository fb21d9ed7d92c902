//! Pipeline orchestrator: owns one session's Pa/Pv/Pq instances, dispatches
//! them in order, and assembles the final [`SessionResult`].

use base::{bail_t, Error};

use crate::forest::RandomForest;
use crate::integration::{self, IntegrationResult, StallEvent};
use crate::model::{AudioSegment, Config, InputReport, SessionResult, VideoSegment};
use crate::{audio, video};

/// Computes `O21[t]` for a stream's audio segments. Substitutable so a
/// caller can plug in an alternative audio model.
pub trait AudioModel {
    fn calculate_audio(&self, segments: &[AudioSegment], config: &Config) -> Result<Vec<f64>, Error>;
}

/// Computes `(O22[t], mode)` for a stream's video segments.
pub trait VideoModel {
    fn calculate_video(&self, segments: &[VideoSegment], display_res: &str) -> Result<(Vec<f64>, i32), Error>;
}

/// Aggregates `O21`/`O22`/stalling into the session-level outputs.
pub trait IntegrationModel {
    fn integrate(
        &self,
        o21: Option<&[f64]>,
        o22: &[f64],
        events: &[StallEvent],
        config: &Config,
    ) -> Result<IntegrationResult, Error>;
}

pub struct DefaultAudioModel;

impl AudioModel for DefaultAudioModel {
    fn calculate_audio(&self, segments: &[AudioSegment], config: &Config) -> Result<Vec<f64>, Error> {
        if config.fast_mode {
            audio::calculate_fast_mode(segments)
        } else {
            audio::calculate(segments)
        }
    }
}

pub struct DefaultVideoModel;

impl VideoModel for DefaultVideoModel {
    fn calculate_video(&self, segments: &[VideoSegment], display_res: &str) -> Result<(Vec<f64>, i32), Error> {
        video::calculate(segments, display_res)
    }
}

pub struct DefaultIntegrationModel {
    forest: RandomForest,
}

impl DefaultIntegrationModel {
    pub fn new(forest: RandomForest) -> Self {
        DefaultIntegrationModel { forest }
    }
}

impl IntegrationModel for DefaultIntegrationModel {
    fn integrate(
        &self,
        o21: Option<&[f64]>,
        o22: &[f64],
        events: &[StallEvent],
        config: &Config,
    ) -> Result<IntegrationResult, Error> {
        integration::calculate(o21, o22, events, config, &self.forest)
    }
}

/// One session's worth of state: the validated input, the three pluggable
/// model slots, and the outputs each dispatch step populates.
pub struct Session {
    report: InputReport,
    config: Config,
    audio_model: Box<dyn AudioModel>,
    video_model: Box<dyn VideoModel>,
    integration_model: Box<dyn IntegrationModel>,

    o21: Option<Vec<f64>>,
    o22: Option<Vec<f64>>,
    mode: i32,
    pa_done: bool,
    pv_done: bool,
}

impl Session {
    /// A session using the standard Pa/Pv model implementations and an
    /// empty (no-op) random-forest ensemble; use [`Session::with_forest`]
    /// to supply real tree coefficients for the `O46` blend.
    pub fn new(report: InputReport, config: Config) -> Self {
        Self::with_modules(
            report,
            config,
            Box::new(DefaultAudioModel),
            Box::new(DefaultVideoModel),
            Box::new(DefaultIntegrationModel::new(RandomForest::empty())),
        )
    }

    pub fn with_forest(report: InputReport, config: Config, forest: RandomForest) -> Self {
        Self::with_modules(
            report,
            config,
            Box::new(DefaultAudioModel),
            Box::new(DefaultVideoModel),
            Box::new(DefaultIntegrationModel::new(forest)),
        )
    }

    pub fn with_modules(
        report: InputReport,
        config: Config,
        audio_model: Box<dyn AudioModel>,
        video_model: Box<dyn VideoModel>,
        integration_model: Box<dyn IntegrationModel>,
    ) -> Self {
        Session {
            report,
            config,
            audio_model,
            video_model,
            integration_model,
            o21: None,
            o22: None,
            mode: -1,
            pa_done: false,
            pv_done: false,
        }
    }

    fn stream_id(&self) -> i64 {
        self.report
            .i13
            .as_ref()
            .and_then(|i| i.stream_id)
            .or_else(|| self.report.i11.as_ref().and_then(|i| i.stream_id))
            .unwrap_or(-1)
    }

    fn display_res(&self) -> String {
        self.config
            .display_res
            .clone()
            .or_else(|| self.report.i_gen.display_size.clone())
            .unwrap_or_else(|| {
                tracing::warn!("missing displaySize, assuming 1920x1080");
                "1920x1080".to_string()
            })
    }

    /// Populates the `O21` slot: the pre-computed value if present on the
    /// report, else a fresh run of the audio model (or `None` if there is
    /// no audio track at all).
    pub fn calculate_pa(&mut self) -> Result<(), Error> {
        self.o21 = if let Some(precomputed) = &self.report.o21 {
            Some(precomputed.clone())
        } else if let Some(i11) = &self.report.i11 {
            Some(self.audio_model.calculate_audio(&i11.segments, &self.config)?)
        } else {
            None
        };
        self.pa_done = true;
        Ok(())
    }

    /// Populates the `O22` slot and the detected mode. Fails with
    /// `SchemaError` if neither a pre-computed `O22` nor `I13` segments are
    /// available: there is no video to score.
    pub fn calculate_pv(&mut self) -> Result<(), Error> {
        if let Some(precomputed) = &self.report.o22 {
            self.o22 = Some(precomputed.clone());
            self.mode = -1;
        } else if let Some(i13) = &self.report.i13 {
            let display_res = self.display_res();
            let (o22, mode) = self.video_model.calculate_video(&i13.segments, &display_res)?;
            self.o22 = Some(o22);
            self.mode = mode;
        } else {
            bail_t!(SchemaError, "missing I13/O22; no video to score");
        }
        self.pv_done = true;
        Ok(())
    }

    /// Aggregates the populated `O21`/`O22` slots and the stalling list into
    /// the session-level outputs. Fails with `UsageError` if called before
    /// [`Session::calculate_pa`]/[`Session::calculate_pv`].
    pub fn calculate_integration(&mut self) -> Result<IntegrationResult, Error> {
        if !self.pa_done || !self.pv_done {
            bail_t!(UsageError, "calculate_integration called before calculate_pa/calculate_pv");
        }
        let o22 = self.o22.as_deref().ok_or_else(|| base::format_err_t!(SchemaError, "O22 has no scores"))?;

        let mut stalling = self
            .report
            .i23
            .as_ref()
            .map(|i23| i23.stalling.clone())
            .unwrap_or_default();
        let offset = stalling.first().map(|e| e.0).unwrap_or(0.0);
        if offset != 0.0 {
            tracing::warn!("rebasing stalling events by {} so the first starts at 0", offset);
            for event in &mut stalling {
                event.0 -= offset;
            }
        }
        let duration = match &self.o21 {
            Some(v) => v.len().min(o22.len()),
            None => o22.len(),
        };
        let events = integration::filter_stalling(&stalling, duration as f64);

        self.integration_model.integrate(self.o21.as_deref(), o22, &events, &self.config)
    }

    /// Runs the three dispatch steps in order and assembles the result.
    pub fn run(mut self) -> Result<SessionResult, Error> {
        self.calculate_pa()?;
        self.calculate_pv()?;
        let stream_id = self.stream_id();
        let mode = self.mode;
        let result = self.calculate_integration()?;

        Ok(SessionResult {
            stream_id,
            mode,
            o23: result.o23,
            o34: result.o34,
            o35: result.o35,
            o46: result.o46,
            date: jiff::Timestamp::now().to_string(),
            o21: self.o21,
            o22: self.o22,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_report() -> InputReport {
        InputReport {
            i11: Some(crate::model::I11 {
                stream_id: Some(1),
                segments: vec![AudioSegment {
                    codec: "aaclc".into(),
                    start: 0.0,
                    duration: 30.0,
                    bitrate: 192.0,
                    representation: None,
                }],
            }),
            i13: Some(crate::model::I13 {
                stream_id: Some(1),
                segments: vec![VideoSegment {
                    codec: "h264".into(),
                    start: 0.0,
                    duration: 30.0,
                    bitrate: 8000.0,
                    fps: 24.0,
                    resolution: "1920x1080".into(),
                    representation: None,
                    frames: None,
                }],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn calculate_integration_before_pa_pv_fails() {
        let mut session = Session::new(constant_report(), Config::default());
        assert!(session.calculate_integration().is_err());
    }

    #[test]
    fn end_to_end_constant_high_quality() {
        let session = Session::new(constant_report(), Config::default());
        let result = session.run().unwrap();
        assert_eq!(result.stream_id, 1);
        assert_eq!(result.mode, 0);
        assert_eq!(result.o34.len(), 30);
        assert!(result.o46 > 4.0, "O46={}", result.o46);
        assert!((result.o23 - 5.0).abs() < 1e-6);
    }

    #[test]
    fn missing_video_fails_with_schema_error() {
        let mut report = constant_report();
        report.i13 = None;
        let session = Session::new(report, Config::default());
        let err = session.run().unwrap_err();
        assert_eq!(err.kind(), base::ErrorKind::SchemaError);
    }
}
