//! Media engine seam.
//!
//! The engine owns the actual codec and transport work. The core only ever
//! talks to it through [`MediaEngine`]: create nodes, link them, drive the
//! WebRTC sink. Everything the engine reports back arrives as an owned
//! [`EngineEvent`] on the controller channel, never as a borrowed callback
//! argument.

use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(feature = "gstreamer")]
pub mod gst;

/// Errors reported by a media engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Node factory {0} is not available")]
    FactoryUnavailable(String),

    #[error("Node {node} has no property {property}")]
    UnknownProperty { node: String, property: String },

    #[error("Node {node} rejects {property}={value}")]
    InvalidProperty { node: String, property: String, value: String },

    #[error("Link failed: {0}")]
    Link(String),

    #[error("WebRTC sink is not part of the graph")]
    NoWebRtcSink,

    #[error("Transceiver {0} does not exist")]
    NoTransceiver(usize),

    #[error("Session description error: {0}")]
    Description(String),

    #[error("State change to {0:?} failed")]
    StateChange(PipelineState),

    #[error("Engine initialization failed: {0}")]
    Init(String),
}

/// Every node the topology may contain.
///
/// The set is closed: the graph registry is indexed by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    UdpSource,
    SrtSource,
    FileSource,
    SourceQueue,
    Demux,
    Tee,
    RestreamQueue,
    UdpSink,
    SrtSink,

    H264Parse,
    H264Decode,
    H265Parse,
    H265Decode,
    Mpeg2Parse,
    Mpeg2Decode,
    ClockOverlay,
    VideoConvert,
    VideoEncode,
    VideoPayload,
    VideoPayloadQueue,

    AacParse,
    AacDecode,
    PcmParse,
    OpusParse,
    AudioConvert,
    AudioResample,
    AudioEncode,
    AudioPayload,
    AudioPayloadQueue,

    WebRtcSink,
}

impl NodeKind {
    pub const ALL: [NodeKind; 30] = [
        NodeKind::UdpSource,
        NodeKind::SrtSource,
        NodeKind::FileSource,
        NodeKind::SourceQueue,
        NodeKind::Demux,
        NodeKind::Tee,
        NodeKind::RestreamQueue,
        NodeKind::UdpSink,
        NodeKind::SrtSink,
        NodeKind::H264Parse,
        NodeKind::H264Decode,
        NodeKind::H265Parse,
        NodeKind::H265Decode,
        NodeKind::Mpeg2Parse,
        NodeKind::Mpeg2Decode,
        NodeKind::ClockOverlay,
        NodeKind::VideoConvert,
        NodeKind::VideoEncode,
        NodeKind::VideoPayload,
        NodeKind::VideoPayloadQueue,
        NodeKind::AacParse,
        NodeKind::AacDecode,
        NodeKind::PcmParse,
        NodeKind::OpusParse,
        NodeKind::AudioConvert,
        NodeKind::AudioResample,
        NodeKind::AudioEncode,
        NodeKind::AudioPayload,
        NodeKind::AudioPayloadQueue,
        NodeKind::WebRtcSink,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Position in [`NodeKind::ALL`], used as registry slot.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single node property value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    /// Enum or flags value given by its nick (e.g. "max-bundle")
    Nick(&'static str),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::UInt(v) => write!(f, "{}", v),
            PropertyValue::Str(v) => f.write_str(v),
            PropertyValue::Nick(v) => f.write_str(v),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(i64::from(v))
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::UInt(u64::from(v))
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::UInt(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

/// Ordered property settings applied right after a node is created
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeSettings {
    entries: Vec<(&'static str, PropertyValue)>,
}

impl NodeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<PropertyValue>) -> Self {
        self.entries.push((name, value.into()));
        self
    }

    pub fn nick(self, name: &'static str, nick: &'static str) -> Self {
        self.with(name, PropertyValue::Nick(nick))
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, PropertyValue)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Capability filter placed between a payload queue and the WebRTC sink
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtpCaps {
    pub media: &'static str,
    pub payload_type: u8,
    pub encoding_name: &'static str,
}

impl RtpCaps {
    pub const VP8: RtpCaps = RtpCaps { media: "video", payload_type: 96, encoding_name: "VP8" };
    pub const H264: RtpCaps = RtpCaps { media: "video", payload_type: 96, encoding_name: "H264" };
    pub const OPUS: RtpCaps = RtpCaps { media: "audio", payload_type: 111, encoding_name: "OPUS" };
}

/// Settings applied to an outgoing transceiver before the offer is created
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransceiverSettings {
    pub send_only: bool,
    pub fec: bool,
    pub nack: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Null,
    Ready,
    Paused,
    Playing,
}

/// Locally gathered ICE candidate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IceCandidate {
    pub mline_index: u32,
    pub candidate: String,
}

/// Notifications from the engine, delivered on the controller channel.
///
/// `P` is the engine's pad handle, `D` its session description type.
#[derive(Debug)]
pub enum EngineEvent<P, D> {
    /// The demultiplexer exposed a new elementary stream
    StreamDiscovered { caps: String, pad: P },
    NoMoreStreams,
    NegotiationNeeded,
    OfferReady(D),
    OfferFailed(String),
    IceCandidate(IceCandidate),
    StateChanged { old: PipelineState, new: PipelineState },
    EndOfStream,
    Error { node: String, message: String, debug: Option<String> },
    ClockLost,
    NewClock,
}

/// Everything the controller loop reacts to
#[derive(Debug)]
pub enum ControllerEvent<P, D> {
    Engine(EngineEvent<P, D>),
    /// Graceful shutdown request (interrupt signal)
    Shutdown,
}

impl<P, D> From<EngineEvent<P, D>> for ControllerEvent<P, D> {
    fn from(event: EngineEvent<P, D>) -> Self {
        ControllerEvent::Engine(event)
    }
}

/// Controller event type for a given engine
pub type EventOf<E> = ControllerEvent<<E as MediaEngine>::Pad, <E as MediaEngine>::Description>;
pub type EventSender<E> = mpsc::UnboundedSender<EventOf<E>>;
pub type EventReceiver<E> = mpsc::UnboundedReceiver<EventOf<E>>;

/// Create the channel that feeds the controller loop.
pub fn event_channel<E: MediaEngine>() -> (EventSender<E>, EventReceiver<E>) {
    mpsc::unbounded_channel()
}

/// Capabilities the core needs from the media engine.
pub trait MediaEngine {
    /// Handle to a processing node
    type Node: Clone + fmt::Debug;
    /// Handle to a runtime-discovered stream output
    type Pad: fmt::Debug;
    /// Engine-native session description
    type Description: fmt::Debug;

    /// Create a node from `factory`, apply `settings` and add it to the pipeline.
    fn make_node(
        &mut self,
        kind: NodeKind,
        factory: &str,
        settings: &NodeSettings,
    ) -> Result<Self::Node, EngineError>;

    fn link(&mut self, src: &Self::Node, sink: &Self::Node) -> Result<(), EngineError>;

    fn link_filtered(
        &mut self,
        src: &Self::Node,
        sink: &Self::Node,
        caps: &RtpCaps,
    ) -> Result<(), EngineError>;

    /// Undo a [`MediaEngine::link`]; a no-op if the nodes are not linked.
    fn unlink(&mut self, src: &Self::Node, sink: &Self::Node);

    /// Link a discovered stream to the static sink input of `sink`.
    fn link_pad(&mut self, pad: &Self::Pad, sink: &Self::Node) -> Result<(), EngineError>;

    /// Whether the static sink input of `node` already has an upstream.
    fn is_sink_linked(&self, node: &Self::Node) -> bool;

    fn transceiver_count(&self) -> usize;

    fn configure_transceiver(
        &mut self,
        index: usize,
        settings: &TransceiverSettings,
    ) -> Result<(), EngineError>;

    /// Ask the WebRTC sink for an offer; the result arrives as
    /// [`EngineEvent::OfferReady`] or [`EngineEvent::OfferFailed`].
    fn request_offer(&mut self) -> Result<(), EngineError>;

    fn description_to_text(&self, description: &Self::Description) -> Result<String, EngineError>;

    fn parse_answer(&self, sdp: &str) -> Result<Self::Description, EngineError>;

    fn set_local_description(&mut self, description: &Self::Description) -> Result<(), EngineError>;

    fn set_remote_description(&mut self, description: &Self::Description) -> Result<(), EngineError>;

    fn set_state(&mut self, state: PipelineState) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_indices_are_dense() {
        for (i, kind) in NodeKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        assert_eq!(NodeKind::COUNT, 30);
    }

    #[test]
    fn test_settings_render_as_strings() {
        let settings = NodeSettings::new()
            .with("port", 5000u32)
            .with("auto-multicast", true)
            .with("min-threshold-time", 250_000_000u64)
            .nick("bundle-policy", "max-bundle");
        let rendered: Vec<String> =
            settings.iter().map(|(name, value)| format!("{}={}", name, value)).collect();
        assert_eq!(
            rendered,
            vec![
                "port=5000",
                "auto-multicast=true",
                "min-threshold-time=250000000",
                "bundle-policy=max-bundle"
            ]
        );
        assert_eq!(settings.get("port"), Some(&PropertyValue::UInt(5000)));
        assert_eq!(settings.get("missing"), None);
    }
}
