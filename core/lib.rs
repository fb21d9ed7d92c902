//! Core quality-estimation pipeline for HTTP Adaptive Streaming sessions,
//! conforming to ITU-T Rec. P.1203 and its Amendment 1.
//!
//! The pipeline is strictly single-threaded and synchronous: given a
//! validated [`model::InputReport`], [`pipeline::Session`] runs the audio
//! model ([`audio`]), the video model ([`video`]), and the integration
//! module ([`integration`]) in order and assembles a [`model::SessionResult`].
//! Callers wanting multiple sessions in flight at once run one `Session` per
//! OS thread or task; nothing here is shared across sessions.

pub mod audio;
pub mod forest;
pub mod integration;
pub mod model;
pub mod numeric;
pub mod pipeline;
mod tables;
pub mod video;
pub mod window;

pub use base::{Error, ErrorKind};
pub use model::{Config, InputReport, SessionResult};
pub use pipeline::Session;
