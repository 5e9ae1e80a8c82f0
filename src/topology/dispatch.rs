//! Routing of runtime-discovered elementary streams.
//!
//! Each stream the demultiplexer announces is classified by its caps name and
//! linked into the matching head chain, which in turn feeds the shared video
//! or audio tail built by the topology builder.

use log::{debug, info};
use thiserror::Error;

use super::graph::{MissingNode, ProcessingGraph};
use crate::engine::{EngineError, MediaEngine, NodeKind};

/// Content type of one elementary stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentType {
    H264,
    H265,
    Mpeg2Video,
    Aac,
    Pcm,
    Opus,
    Unknown(String),
}

/// Caps-name prefix table, checked in order.
const CAPS_PREFIXES: [(&str, ContentType); 6] = [
    ("video/x-h264", ContentType::H264),
    ("video/x-h265", ContentType::H265),
    ("video/mpeg", ContentType::Mpeg2Video),
    ("audio/mpeg", ContentType::Aac),
    ("audio/x-raw", ContentType::Pcm),
    ("audio/x-opus", ContentType::Opus),
];

impl ContentType {
    /// Every type that can have a route.
    pub const ROUTABLE: [ContentType; 6] = [
        ContentType::H264,
        ContentType::H265,
        ContentType::Mpeg2Video,
        ContentType::Aac,
        ContentType::Pcm,
        ContentType::Opus,
    ];

    pub fn from_caps(caps_name: &str) -> Self {
        CAPS_PREFIXES
            .iter()
            .find(|(prefix, _)| caps_name.starts_with(prefix))
            .map(|(_, content)| content.clone())
            .unwrap_or_else(|| ContentType::Unknown(caps_name.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Head chain for one content type and where it joins the shared tail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub media: MediaKind,
    pub head: &'static [NodeKind],
}

impl Route {
    /// Tail entry candidates; the first one present in the graph is used.
    pub fn tail_entries(&self) -> &'static [NodeKind] {
        match self.media {
            MediaKind::Video => &[NodeKind::ClockOverlay, NodeKind::VideoConvert, NodeKind::VideoPayload],
            MediaKind::Audio => &[NodeKind::AudioConvert, NodeKind::AudioPayload],
        }
    }
}

/// Which media are forwarded without transcoding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bypass {
    pub audio: bool,
    pub video: bool,
}

impl Bypass {
    /// Route for `content`, or `None` if it cannot be published in this mode.
    pub fn route(&self, content: &ContentType) -> Option<Route> {
        use NodeKind::*;

        fn video(head: &'static [NodeKind]) -> Option<Route> {
            Some(Route { media: MediaKind::Video, head })
        }
        fn audio(head: &'static [NodeKind]) -> Option<Route> {
            Some(Route { media: MediaKind::Audio, head })
        }

        match (content, self.video, self.audio) {
            (ContentType::H264, true, _) => video(&[H264Parse]),
            (ContentType::H264, false, _) => video(&[H264Parse, H264Decode]),
            (ContentType::H265, false, _) => video(&[H265Parse, H265Decode]),
            (ContentType::Mpeg2Video, false, _) => video(&[Mpeg2Parse, Mpeg2Decode]),
            (ContentType::Aac, _, false) => audio(&[AacParse, AacDecode]),
            (ContentType::Pcm, _, false) => audio(&[PcmParse]),
            (ContentType::Opus, _, true) => audio(&[OpusParse]),
            _ => None,
        }
    }
}

/// One discovered stream, consumed by the dispatcher
#[derive(Debug)]
pub struct StreamDescriptor<P> {
    pub content: ContentType,
    pub pad: P,
}

impl<P> StreamDescriptor<P> {
    pub fn new(caps_name: &str, pad: P) -> Self {
        Self { content: ContentType::from_caps(caps_name), pad }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// No route for this type (in the current bypass mode)
    Unsupported,
    /// The media kind is disabled, its head chain was never built
    Disabled,
}

/// Terminal state of one discovered stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Linked { content: ContentType, media: MediaKind },
    /// The head sink was already fed by an earlier stream; nothing done
    AlreadyLinked(ContentType),
    Rejected { content: ContentType, reason: RejectReason },
}

/// Activation of a single stream failed
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Missing(#[from] MissingNode),

    #[error("Linking {from} -> {to} failed: {source}")]
    Link {
        from: String,
        to: NodeKind,
        #[source]
        source: EngineError,
    },
}

/// Links discovered streams into the topology.
#[derive(Clone, Copy, Debug, Default)]
pub struct PadDispatcher {
    bypass: Bypass,
}

impl PadDispatcher {
    pub fn new(bypass: Bypass) -> Self {
        Self { bypass }
    }

    pub fn on_stream_discovered<E: MediaEngine>(
        &self,
        engine: &mut E,
        graph: &ProcessingGraph<E::Node>,
        descriptor: StreamDescriptor<E::Pad>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let StreamDescriptor { content, pad } = descriptor;

        let Some(route) = self.bypass.route(&content) else {
            info!("Unsupported stream type {:?}, not linking", content);
            return Ok(DispatchOutcome::Rejected { content, reason: RejectReason::Unsupported });
        };

        let head_kind = route.head[0];
        let Some(head) = graph.get(head_kind) else {
            info!("{:?} stream ignored, {:?} is disabled", content, route.media);
            return Ok(DispatchOutcome::Rejected { content, reason: RejectReason::Disabled });
        };

        if engine.is_sink_linked(head) {
            debug!("{} already linked, ignoring duplicate {:?} stream", head_kind, content);
            return Ok(DispatchOutcome::AlreadyLinked(content));
        }

        let mut linked = Vec::with_capacity(route.head.len());
        match link_route(engine, graph, &route, &pad, &mut linked) {
            Ok(tail_entry) => {
                info!("Linked {:?} stream via {:?} into {}", content, route.head, tail_entry);
                Ok(DispatchOutcome::Linked { content, media: route.media })
            }
            Err(e) => {
                // Leave the head chain free for a later stream
                for (from, to) in linked.into_iter().rev() {
                    if let (Some(src), Some(sink)) = (graph.get(from), graph.get(to)) {
                        engine.unlink(src, sink);
                    }
                }
                Err(e)
            }
        }
    }
}

/// Links the head chain, its tail entry and finally the stream itself.
/// Node links made are recorded in `linked`.
fn link_route<E: MediaEngine>(
    engine: &mut E,
    graph: &ProcessingGraph<E::Node>,
    route: &Route,
    pad: &E::Pad,
    linked: &mut Vec<(NodeKind, NodeKind)>,
) -> Result<NodeKind, DispatchError> {
    for pair in route.head.windows(2) {
        link(engine, graph, pair[0], pair[1])?;
        linked.push((pair[0], pair[1]));
    }

    let tail_entry = graph
        .first_present(route.tail_entries())
        .ok_or(MissingNode(route.tail_entries()[0]))?;
    let head_last = route.head[route.head.len() - 1];
    link(engine, graph, head_last, tail_entry)?;
    linked.push((head_last, tail_entry));

    let head_kind = route.head[0];
    let head = graph.require(head_kind)?;
    engine.link_pad(pad, head).map_err(|source| DispatchError::Link {
        from: "discovered stream".to_string(),
        to: head_kind,
        source,
    })?;
    Ok(tail_entry)
}

fn link<E: MediaEngine>(
    engine: &mut E,
    graph: &ProcessingGraph<E::Node>,
    from: NodeKind,
    to: NodeKind,
) -> Result<(), DispatchError> {
    let src = graph.require(from)?;
    let sink = graph.require(to)?;
    engine
        .link(src, sink)
        .map_err(|source| DispatchError::Link { from: from.to_string(), to, source })
}
