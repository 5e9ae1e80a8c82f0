//! GStreamer media engine.
//!
//! Nodes are plain elements in one pipeline. Demuxer pads, webrtcbin
//! signals, offer promises and bus messages are turned into owned
//! [`EngineEvent`]s and pushed onto the controller channel from whatever
//! thread GStreamer calls us on. Bus messages come from a sync handler, so
//! no GLib main loop is needed.

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_sdp as gst_sdp;
use gstreamer_webrtc as gst_webrtc;
use log::{debug, warn};
use tokio::sync::mpsc;

use super::{
    ControllerEvent, EngineError, EngineEvent, IceCandidate, MediaEngine, NodeKind, NodeSettings, PipelineState,
    PropertyValue, RtpCaps, TransceiverSettings,
};

/// Same type as `EventSender<GstEngine>`
type Events = mpsc::UnboundedSender<ControllerEvent<gst::Pad, gst_webrtc::WebRTCSessionDescription>>;

const PIPELINE_NAME: &str = "mpeg-ts-pipeline";

/// Upper bound when probing webrtcbin for transceivers
const MAX_TRANSCEIVERS: usize = 16;

pub struct GstEngine {
    pipeline: gst::Pipeline,
    webrtc: Option<gst::Element>,
    events: Events,
}

impl GstEngine {
    pub fn new(events: Events) -> Result<Self, EngineError> {
        gst::init().map_err(|e| EngineError::Init(e.to_string()))?;

        let pipeline = gst::Pipeline::with_name(PIPELINE_NAME);
        let bus = pipeline
            .bus()
            .ok_or_else(|| EngineError::Init("pipeline has no bus".to_string()))?;

        let sender = events.clone();
        bus.set_sync_handler(move |_, message| {
            forward_bus_message(&sender, message);
            gst::BusSyncReply::Drop
        });

        Ok(Self { pipeline, webrtc: None, events })
    }

    fn webrtc(&self) -> Result<&gst::Element, EngineError> {
        self.webrtc.as_ref().ok_or(EngineError::NoWebRtcSink)
    }

    fn transceiver(&self, index: usize) -> Option<gst_webrtc::WebRTCRTPTransceiver> {
        let webrtc = self.webrtc.as_ref()?;
        let index = i32::try_from(index).ok()?;
        webrtc.emit_by_name::<Option<gst_webrtc::WebRTCRTPTransceiver>>("get-transceiver", &[&index])
    }

    fn watch_demux(&self, demux: &gst::Element) {
        let sender = self.events.clone();
        demux.connect_pad_added(move |_, pad| {
            let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
            let Some(name) = caps.structure(0).map(|s| s.name().to_string()) else {
                warn!("Pad {} has no caps, ignoring", pad.name());
                return;
            };
            let _ = sender.send(EngineEvent::StreamDiscovered { caps: name, pad: pad.clone() }.into());
        });

        let sender = self.events.clone();
        let pipeline = self.pipeline.downgrade();
        demux.connect_no_more_pads(move |_| {
            if let Some(pipeline) = pipeline.upgrade() {
                dump_graph(&pipeline);
            }
            let _ = sender.send(EngineEvent::NoMoreStreams.into());
        });
    }

    fn watch_webrtc(&self, webrtc: &gst::Element) {
        let sender = self.events.clone();
        webrtc.connect("on-negotiation-needed", false, move |_| {
            let _ = sender.send(EngineEvent::NegotiationNeeded.into());
            None
        });

        let sender = self.events.clone();
        webrtc.connect("on-ice-candidate", false, move |values| {
            let mline_index = values.get(1).and_then(|v| v.get::<u32>().ok());
            let candidate = values.get(2).and_then(|v| v.get::<String>().ok());
            match (mline_index, candidate) {
                (Some(mline_index), Some(candidate)) => {
                    let candidate = IceCandidate { mline_index, candidate };
                    let _ = sender.send(EngineEvent::IceCandidate(candidate).into());
                }
                _ => warn!("Malformed on-ice-candidate arguments"),
            }
            None
        });
    }

    fn emit_description(&self, signal: &str, description: &gst_webrtc::WebRTCSessionDescription) -> Result<(), EngineError> {
        self.webrtc()?
            .emit_by_name::<()>(signal, &[description, &None::<gst::Promise>]);
        Ok(())
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
    }
}

fn gst_state(state: PipelineState) -> gst::State {
    match state {
        PipelineState::Null => gst::State::Null,
        PipelineState::Ready => gst::State::Ready,
        PipelineState::Paused => gst::State::Paused,
        PipelineState::Playing => gst::State::Playing,
    }
}

fn pipeline_state(state: gst::State) -> Option<PipelineState> {
    match state {
        gst::State::Null => Some(PipelineState::Null),
        gst::State::Ready => Some(PipelineState::Ready),
        gst::State::Paused => Some(PipelineState::Paused),
        gst::State::Playing => Some(PipelineState::Playing),
        _ => None,
    }
}

/// Writes `mpeg-ts-pipeline.dot` when GST_DEBUG_DUMP_DOT_DIR is set.
fn dump_graph(pipeline: &gst::Pipeline) {
    gst::debug_bin_to_dot_file(pipeline, gst::DebugGraphDetails::all(), PIPELINE_NAME);
}

/// Range check for numeric values; string parsing panics on overflow.
fn fits_pspec(pspec: &glib::ParamSpec, value: &PropertyValue) -> bool {
    let number = match value {
        PropertyValue::Int(v) => i128::from(*v),
        PropertyValue::UInt(v) => i128::from(*v),
        _ => return true,
    };
    let range = if let Some(p) = pspec.downcast_ref::<glib::ParamSpecInt>() {
        (i128::from(p.minimum()), i128::from(p.maximum()))
    } else if let Some(p) = pspec.downcast_ref::<glib::ParamSpecUInt>() {
        (i128::from(p.minimum()), i128::from(p.maximum()))
    } else if let Some(p) = pspec.downcast_ref::<glib::ParamSpecInt64>() {
        (i128::from(p.minimum()), i128::from(p.maximum()))
    } else if let Some(p) = pspec.downcast_ref::<glib::ParamSpecUInt64>() {
        (i128::from(p.minimum()), i128::from(p.maximum()))
    } else {
        return true;
    };
    range.0 <= number && number <= range.1
}

fn forward_bus_message(sender: &Events, message: &gst::Message) {
    use gst::MessageView;

    let event = match message.view() {
        MessageView::StateChanged(change) => {
            // Only the pipeline's own transitions, not every element's
            if message.src().map(|src| src.name().as_str() != PIPELINE_NAME).unwrap_or(true) {
                return;
            }
            match (pipeline_state(change.old()), pipeline_state(change.current())) {
                (Some(old), Some(new)) => EngineEvent::StateChanged { old, new },
                _ => return,
            }
        }
        MessageView::Error(err) => EngineEvent::Error {
            node: message
                .src()
                .map(|src| src.path_string().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        },
        MessageView::Eos(_) => EngineEvent::EndOfStream,
        MessageView::ClockLost(_) => EngineEvent::ClockLost,
        MessageView::NewClock(_) => EngineEvent::NewClock,
        _ => return,
    };

    let _ = sender.send(event.into());
}

impl MediaEngine for GstEngine {
    type Node = gst::Element;
    type Pad = gst::Pad;
    type Description = gst_webrtc::WebRTCSessionDescription;

    fn make_node(&mut self, kind: NodeKind, factory: &str, settings: &NodeSettings) -> Result<gst::Element, EngineError> {
        let element = gst::ElementFactory::make(factory)
            .build()
            .map_err(|_| EngineError::FactoryUnavailable(factory.to_string()))?;

        for (name, value) in settings.iter() {
            let Some(pspec) = element.find_property(name) else {
                return Err(EngineError::UnknownProperty { node: factory.to_string(), property: name.to_string() });
            };
            if !fits_pspec(&pspec, value) {
                return Err(EngineError::InvalidProperty {
                    node: factory.to_string(),
                    property: name.to_string(),
                    value: value.to_string(),
                });
            }
            element.set_property_from_str(name, &value.to_string());
        }

        self.pipeline
            .add(&element)
            .map_err(|e| EngineError::Init(format!("Failed to add {} to pipeline: {}", factory, e)))?;

        match kind {
            NodeKind::Demux => self.watch_demux(&element),
            NodeKind::WebRtcSink => {
                self.watch_webrtc(&element);
                self.webrtc = Some(element.clone());
            }
            _ => {}
        }

        debug!("Created {} ({})", kind, factory);
        Ok(element)
    }

    fn link(&mut self, src: &gst::Element, sink: &gst::Element) -> Result<(), EngineError> {
        src.link(sink)
            .map_err(|e| EngineError::Link(format!("{} -> {}: {}", src.name(), sink.name(), e)))
    }

    fn link_filtered(&mut self, src: &gst::Element, sink: &gst::Element, caps: &RtpCaps) -> Result<(), EngineError> {
        let filter = gst::Caps::builder("application/x-rtp")
            .field("media", caps.media)
            .field("payload", i32::from(caps.payload_type))
            .field("encoding-name", caps.encoding_name)
            .build();
        src.link_filtered(sink, &filter)
            .map_err(|e| EngineError::Link(format!("{} -> {} ({}): {}", src.name(), sink.name(), filter, e)))
    }

    fn unlink(&mut self, src: &gst::Element, sink: &gst::Element) {
        src.unlink(sink);
    }

    fn link_pad(&mut self, pad: &gst::Pad, sink: &gst::Element) -> Result<(), EngineError> {
        let sink_pad = sink
            .static_pad("sink")
            .ok_or_else(|| EngineError::Link(format!("{} has no sink pad", sink.name())))?;
        pad.link(&sink_pad)
            .map(|_| ())
            .map_err(|e| EngineError::Link(format!("{} -> {}: {:?}", pad.name(), sink.name(), e)))
    }

    fn is_sink_linked(&self, node: &gst::Element) -> bool {
        node.static_pad("sink").map(|pad| pad.is_linked()).unwrap_or(false)
    }

    fn transceiver_count(&self) -> usize {
        (0..MAX_TRANSCEIVERS).take_while(|index| self.transceiver(*index).is_some()).count()
    }

    fn configure_transceiver(&mut self, index: usize, settings: &TransceiverSettings) -> Result<(), EngineError> {
        let transceiver = self.transceiver(index).ok_or(EngineError::NoTransceiver(index))?;

        if settings.send_only {
            transceiver.set_property("direction", gst_webrtc::WebRTCRTPTransceiverDirection::Sendonly);
        }
        let fec = if settings.fec { gst_webrtc::WebRTCFECType::UlpRed } else { gst_webrtc::WebRTCFECType::None };
        transceiver.set_property("fec-type", fec);
        transceiver.set_property("do-nack", settings.nack);
        Ok(())
    }

    fn request_offer(&mut self) -> Result<(), EngineError> {
        let sender = self.events.clone();
        let promise = gst::Promise::with_change_func(move |reply| {
            let event = match reply {
                Ok(Some(reply)) => match reply.get::<gst_webrtc::WebRTCSessionDescription>("offer") {
                    Ok(offer) => EngineEvent::OfferReady(offer),
                    Err(e) => EngineEvent::OfferFailed(e.to_string()),
                },
                Ok(None) => EngineEvent::OfferFailed("empty offer reply".to_string()),
                Err(e) => EngineEvent::OfferFailed(format!("{:?}", e)),
            };
            let _ = sender.send(event.into());
        });

        self.webrtc()?
            .emit_by_name::<()>("create-offer", &[&None::<gst::Structure>, &promise]);
        Ok(())
    }

    fn description_to_text(&self, description: &gst_webrtc::WebRTCSessionDescription) -> Result<String, EngineError> {
        description
            .sdp()
            .as_text()
            .map_err(|e| EngineError::Description(e.to_string()))
    }

    fn parse_answer(&self, sdp: &str) -> Result<gst_webrtc::WebRTCSessionDescription, EngineError> {
        let message = gst_sdp::SDPMessage::parse_buffer(sdp.as_bytes())
            .map_err(|e| EngineError::Description(format!("Failed to parse SDP answer: {}", e)))?;
        Ok(gst_webrtc::WebRTCSessionDescription::new(gst_webrtc::WebRTCSDPType::Answer, message))
    }

    fn set_local_description(&mut self, description: &gst_webrtc::WebRTCSessionDescription) -> Result<(), EngineError> {
        self.emit_description("set-local-description", description)
    }

    fn set_remote_description(&mut self, description: &gst_webrtc::WebRTCSessionDescription) -> Result<(), EngineError> {
        self.emit_description("set-remote-description", description)
    }

    fn set_state(&mut self, state: PipelineState) -> Result<(), EngineError> {
        self.pipeline
            .set_state(gst_state(state))
            .map(|_| ())
            .map_err(|_| EngineError::StateChange(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(factory: &str) -> gst::Element {
        gst::init().unwrap();
        gst::ElementFactory::make(factory).build().unwrap()
    }

    #[test]
    fn test_int_property_range_is_checked() {
        let queue = element("queue");
        let pspec = queue.find_property("max-size-buffers").unwrap();
        assert!(fits_pspec(&pspec, &PropertyValue::UInt(0)));
        assert!(fits_pspec(&pspec, &PropertyValue::UInt(u64::from(u32::MAX))));
        assert!(!fits_pspec(&pspec, &PropertyValue::UInt(u64::from(u32::MAX) + 1)));
        assert!(!fits_pspec(&pspec, &PropertyValue::Int(-1)));
    }

    #[test]
    fn test_out_of_range_setting_is_an_error() {
        let (events, _receiver) = mpsc::unbounded_channel();
        let mut engine = GstEngine::new(events).unwrap();
        let settings = NodeSettings::new().with("max-size-buffers", u64::from(u32::MAX) + 1);
        let err = engine.make_node(NodeKind::SourceQueue, "queue", &settings).unwrap_err();
        assert!(matches!(err, EngineError::InvalidProperty { .. }));
    }

    #[test]
    fn test_graph_dump_without_dump_dir_is_harmless() {
        gst::init().unwrap();
        dump_graph(&gst::Pipeline::with_name(PIPELINE_NAME));
    }

    #[test]
    fn test_state_mapping() {
        for state in [PipelineState::Null, PipelineState::Ready, PipelineState::Paused, PipelineState::Playing] {
            assert_eq!(pipeline_state(gst_state(state)), Some(state));
        }
        assert_eq!(pipeline_state(gst::State::VoidPending), None);
    }
}
