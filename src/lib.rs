//! whip-mpegts - publish an MPEG-TS stream to a WHIP endpoint
//!
//! Takes a transport stream from UDP, SRT or a file, demultiplexes it,
//! transcodes (or forwards) the elementary streams and publishes them over
//! WebRTC, negotiated with a WHIP server.
//!
//! Features:
//! - UDP, SRT (caller/listener) and file sources
//! - Optional pass-through restream of the raw multiplex
//! - H.264 / H.265 / MPEG-2 video and AAC / PCM audio, encoded to VP8 / Opus
//! - H.264 and Opus bypass without transcoding
//! - Trickle ICE with WHIP PATCH, session teardown with DELETE
//!
//! The media work itself is done by a [`MediaEngine`]; the GStreamer one
//! lives behind the `gstreamer` feature.

pub mod cli;
pub mod config;
pub mod controller;
pub mod engine;
pub mod monitor;
pub mod negotiation;
pub mod signaling;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, ConfigError, RestreamTarget, SourceTransport, SrtMode};
pub use controller::{Controller, ControllerError};
pub use engine::{
    event_channel, ControllerEvent, EngineError, EngineEvent, MediaEngine, NodeKind, PipelineState,
};
pub use monitor::{Health, MonitorError, RuntimeMonitor};
pub use negotiation::{NegotiationCoordinator, NegotiationError, NegotiationState};
pub use signaling::{HttpTransport, HyperTransport, WhipClient, WhipError};
pub use topology::{BuildError, DispatchError, PadDispatcher, ProcessingGraph, TopologyBuilder};

#[cfg(feature = "gstreamer")]
pub use engine::gst::GstEngine;
