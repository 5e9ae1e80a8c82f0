//! Processing topology: node registry, static skeleton and stream dispatch.
//!
//! The skeleton is built once at startup:
//! - source -> queue -> demux, with an optional tee splitting the raw
//!   multiplex off to a pass-through restream sink
//! - one head chain per supported content type (parser, decoder)
//! - a shared video tail and a shared audio tail ending in the WebRTC sink
//!
//! Head chains are joined to the tails later, by [`PadDispatcher`], once the
//! demultiplexer tells us what the stream actually contains.

pub mod dispatch;
pub mod graph;

pub use dispatch::*;
pub use graph::*;

use log::info;
use thiserror::Error;

use crate::config::{Config, SourceTransport, SrtMode};
use crate::engine::{EngineError, MediaEngine, NodeKind, NodeSettings, RtpCaps};

/// Socket receive buffer for the UDP source (bytes)
const UDP_SOURCE_BUFFER_SIZE: i32 = 825_984;

/// Fatal topology construction errors
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Node {kind} unavailable (factory {factory}): {source}")]
    NodeUnavailable {
        kind: NodeKind,
        factory: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("Static link {from} -> {to} failed: {source}")]
    LinkFailed {
        from: NodeKind,
        to: NodeKind,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Missing(#[from] MissingNode),
}

/// One node to create
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub factory: &'static str,
    pub settings: NodeSettings,
}

impl NodeSpec {
    fn new(kind: NodeKind, factory: &'static str) -> Self {
        Self { kind, factory, settings: NodeSettings::new() }
    }

    fn with_settings(mut self, settings: NodeSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Queues never drop and never block on size; only thresholds gate them.
fn unbounded_queue() -> NodeSettings {
    NodeSettings::new()
        .with("max-size-buffers", 0u32)
        .with("max-size-bytes", 0u32)
        .with("max-size-time", 0u64)
}

fn srt_uri(address: &str, port: u16) -> String {
    format!("srt://{}:{}", address, port)
}

/// Builds the static skeleton for one configuration.
pub struct TopologyBuilder<'a> {
    config: &'a Config,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    fn bypass(&self) -> Bypass {
        Bypass { audio: self.config.bypass_audio, video: self.config.bypass_video }
    }

    fn source_kind(&self) -> NodeKind {
        match self.config.source_transport {
            SourceTransport::Udp => NodeKind::UdpSource,
            SourceTransport::Srt(_) => NodeKind::SrtSource,
            SourceTransport::File(_) => NodeKind::FileSource,
        }
    }

    fn restream_sink_kind(&self) -> NodeKind {
        match self.config.source_transport {
            SourceTransport::Srt(_) => NodeKind::SrtSink,
            _ => NodeKind::UdpSink,
        }
    }

    fn video_caps(&self) -> RtpCaps {
        if self.config.bypass_video {
            RtpCaps::H264
        } else {
            RtpCaps::VP8
        }
    }

    fn source_spec(&self) -> NodeSpec {
        let config = self.config;
        match &config.source_transport {
            SourceTransport::Udp => NodeSpec::new(NodeKind::UdpSource, "udpsrc").with_settings(
                NodeSettings::new()
                    .with("address", config.source_address.as_str())
                    .with("port", u32::from(config.source_port))
                    .with("auto-multicast", true)
                    .with("buffer-size", UDP_SOURCE_BUFFER_SIZE),
            ),
            SourceTransport::Srt(SrtMode::Listener) => NodeSpec::new(NodeKind::SrtSource, "srtsrc")
                .with_settings(
                    NodeSettings::new()
                        .with("localaddress", config.source_address.as_str())
                        .with("localport", u32::from(config.source_port))
                        .nick("mode", SrtMode::Listener.nick())
                        .with("wait-for-connection", true)
                        .with("latency", config.srt_latency_ms),
                ),
            SourceTransport::Srt(SrtMode::Caller) => NodeSpec::new(NodeKind::SrtSource, "srtsrc")
                .with_settings(
                    NodeSettings::new()
                        .with("uri", srt_uri(&config.source_address, config.source_port))
                        .nick("mode", SrtMode::Caller.nick())
                        .with("latency", config.srt_latency_ms),
                ),
            SourceTransport::File(path) => NodeSpec::new(NodeKind::FileSource, "filesrc")
                .with_settings(NodeSettings::new().with("location", path.to_string_lossy().into_owned())),
        }
    }

    fn restream_specs(&self) -> Vec<NodeSpec> {
        let Some(target) = &self.config.restream else {
            return Vec::new();
        };

        let sink = match self.restream_sink_kind() {
            NodeKind::SrtSink => NodeSpec::new(NodeKind::SrtSink, "srtsink").with_settings(
                NodeSettings::new()
                    .with("uri", srt_uri(&target.address, target.port))
                    .nick("mode", SrtMode::Caller.nick())
                    .with("wait-for-connection", false)
                    .with("latency", self.config.srt_latency_ms),
            ),
            _ => NodeSpec::new(NodeKind::UdpSink, "udpsink").with_settings(
                NodeSettings::new()
                    .with("host", target.address.as_str())
                    .with("port", u32::from(target.port)),
            ),
        };

        vec![
            NodeSpec::new(NodeKind::Tee, "tee"),
            NodeSpec::new(NodeKind::RestreamQueue, "queue").with_settings(unbounded_queue()),
            sink,
        ]
    }

    /// Parser/decoder nodes for every content type routable in this mode.
    fn head_specs(&self) -> Vec<NodeSpec> {
        let bypass = self.bypass();
        let mut kinds: Vec<NodeKind> = Vec::new();
        for content in ContentType::ROUTABLE.iter() {
            let Some(route) = bypass.route(content) else {
                continue;
            };
            let enabled = match route.media {
                MediaKind::Video => self.config.video,
                MediaKind::Audio => self.config.audio,
            };
            if !enabled {
                continue;
            }
            for kind in route.head {
                if !kinds.contains(kind) {
                    kinds.push(*kind);
                }
            }
        }

        kinds
            .into_iter()
            .filter_map(|kind| {
                let spec = NodeSpec::new(kind, head_factory(kind)?);
                Some(if kind == NodeKind::H264Parse {
                    spec.with_settings(NodeSettings::new().with("disable-passthrough", true))
                } else {
                    spec
                })
            })
            .collect()
    }

    fn video_tail_specs(&self) -> Vec<NodeSpec> {
        let payload_queue = NodeSpec::new(NodeKind::VideoPayloadQueue, "queue").with_settings(unbounded_queue());
        if self.config.bypass_video {
            return vec![
                NodeSpec::new(NodeKind::VideoPayload, "rtph264pay")
                    .with_settings(NodeSettings::new().with("config-interval", -1i32)),
                payload_queue,
            ];
        }

        let mut specs = Vec::new();
        if self.config.show_timer {
            specs.push(NodeSpec::new(NodeKind::ClockOverlay, "clockoverlay"));
        }
        specs.push(NodeSpec::new(NodeKind::VideoConvert, "videoconvert"));
        specs.push(NodeSpec::new(NodeKind::VideoEncode, "vp8enc").with_settings(
            NodeSettings::new()
                .with("threads", 2i32)
                .with("target-bitrate", self.config.video_bitrate_kbps.saturating_mul(1000))
                .nick("error-resilient", "default")
                .nick("end-usage", "vbr")
                .with("deadline", 1i32),
        ));
        specs.push(NodeSpec::new(NodeKind::VideoPayload, "rtpvp8pay"));
        specs.push(payload_queue);
        specs
    }

    fn audio_tail_specs(&self) -> Vec<NodeSpec> {
        let payload_queue = NodeSpec::new(NodeKind::AudioPayloadQueue, "queue").with_settings(unbounded_queue());
        if self.config.bypass_audio {
            return vec![NodeSpec::new(NodeKind::AudioPayload, "rtpopuspay"), payload_queue];
        }

        vec![
            NodeSpec::new(NodeKind::AudioConvert, "audioconvert"),
            NodeSpec::new(NodeKind::AudioResample, "audioresample"),
            NodeSpec::new(NodeKind::AudioEncode, "opusenc"),
            NodeSpec::new(NodeKind::AudioPayload, "rtpopuspay"),
            payload_queue,
        ]
    }

    fn webrtc_spec(&self) -> NodeSpec {
        NodeSpec::new(NodeKind::WebRtcSink, "webrtcbin").with_settings(
            NodeSettings::new()
                .with("name", "send")
                .with("stun-server", self.config.stun_server.as_str())
                .nick("bundle-policy", "max-bundle")
                .with("latency", self.config.jitter_buffer_latency_ms),
        )
    }

    /// Every node this configuration needs, in creation order.
    pub fn plan(&self) -> Vec<NodeSpec> {
        let min_time_ns = u64::try_from(self.config.source_queue_min_time.as_nanos()).unwrap_or(u64::MAX);

        let mut specs = vec![self.source_spec()];
        specs.extend(self.restream_specs());
        specs.push(
            NodeSpec::new(NodeKind::SourceQueue, "queue")
                .with_settings(unbounded_queue().with("min-threshold-time", min_time_ns)),
        );
        specs.push(
            NodeSpec::new(NodeKind::Demux, "tsdemux")
                .with_settings(NodeSettings::new().with("latency", self.config.ts_demux_latency_ms)),
        );
        specs.extend(self.head_specs());
        if self.config.video {
            specs.extend(self.video_tail_specs());
        }
        if self.config.audio {
            specs.extend(self.audio_tail_specs());
        }
        specs.push(self.webrtc_spec());
        specs
    }

    /// Create every node, then establish the links that do not depend on
    /// the discovered stream types. Any failure aborts the whole build.
    pub fn build<E: MediaEngine>(&self, engine: &mut E) -> Result<ProcessingGraph<E::Node>, BuildError> {
        let mut graph = ProcessingGraph::new();

        for spec in self.plan() {
            let node = engine
                .make_node(spec.kind, spec.factory, &spec.settings)
                .map_err(|source| BuildError::NodeUnavailable { kind: spec.kind, factory: spec.factory, source })?;
            graph.insert(spec.kind, node);
        }

        self.link_source(engine, &graph)?;

        if self.config.video {
            let tail: Vec<NodeKind> = [
                NodeKind::ClockOverlay,
                NodeKind::VideoConvert,
                NodeKind::VideoEncode,
                NodeKind::VideoPayload,
                NodeKind::VideoPayloadQueue,
            ]
            .into_iter()
            .filter(|kind| graph.contains(*kind))
            .collect();
            link_chain(engine, &graph, &tail)?;
            link_filtered(engine, &graph, NodeKind::VideoPayloadQueue, &self.video_caps())?;
        }

        if self.config.audio {
            let tail: Vec<NodeKind> = [
                NodeKind::AudioConvert,
                NodeKind::AudioResample,
                NodeKind::AudioEncode,
                NodeKind::AudioPayload,
                NodeKind::AudioPayloadQueue,
            ]
            .into_iter()
            .filter(|kind| graph.contains(*kind))
            .collect();
            link_chain(engine, &graph, &tail)?;
            link_filtered(engine, &graph, NodeKind::AudioPayloadQueue, &RtpCaps::OPUS)?;
        }

        info!("Topology built with {} nodes", graph.len());
        Ok(graph)
    }

    fn link_source<E: MediaEngine>(&self, engine: &mut E, graph: &ProcessingGraph<E::Node>) -> Result<(), BuildError> {
        let source = self.source_kind();

        if let Some(target) = &self.config.restream {
            info!("Restreaming (pass-through) to {}:{}", target.address, target.port);
            link_chain(engine, graph, &[source, NodeKind::Tee])?;
            link_chain(engine, graph, &[NodeKind::Tee, NodeKind::RestreamQueue, self.restream_sink_kind()])?;
            link_chain(engine, graph, &[NodeKind::Tee, NodeKind::SourceQueue, NodeKind::Demux])
        } else {
            link_chain(engine, graph, &[source, NodeKind::SourceQueue, NodeKind::Demux])
        }
    }
}

fn head_factory(kind: NodeKind) -> Option<&'static str> {
    let factory = match kind {
        NodeKind::H264Parse => "h264parse",
        NodeKind::H264Decode => "avdec_h264",
        NodeKind::H265Parse => "h265parse",
        NodeKind::H265Decode => "avdec_h265",
        NodeKind::Mpeg2Parse => "mpegvideoparse",
        NodeKind::Mpeg2Decode => "avdec_mpeg2video",
        NodeKind::AacParse => "aacparse",
        NodeKind::AacDecode => "avdec_aac",
        NodeKind::PcmParse => "rawaudioparse",
        NodeKind::OpusParse => "opusparse",
        _ => return None,
    };
    Some(factory)
}

fn link_chain<E: MediaEngine>(
    engine: &mut E,
    graph: &ProcessingGraph<E::Node>,
    kinds: &[NodeKind],
) -> Result<(), BuildError> {
    for pair in kinds.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        engine
            .link(graph.require(from)?, graph.require(to)?)
            .map_err(|source| BuildError::LinkFailed { from, to, source })?;
    }
    Ok(())
}

fn link_filtered<E: MediaEngine>(
    engine: &mut E,
    graph: &ProcessingGraph<E::Node>,
    from: NodeKind,
    caps: &RtpCaps,
) -> Result<(), BuildError> {
    let to = NodeKind::WebRtcSink;
    engine
        .link_filtered(graph.require(from)?, graph.require(to)?, caps)
        .map_err(|source| BuildError::LinkFailed { from, to, source })
}
