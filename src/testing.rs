//! Test doubles: a recording media engine and a scripted HTTP transport.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, StatusCode};
use parking_lot::Mutex;

use crate::config::Config;
use crate::engine::{
    EngineError, MediaEngine, NodeKind, NodeSettings, PipelineState, RtpCaps, TransceiverSettings,
};
use crate::signaling::{HttpTransport, WhipError, WhipRequest, WhipResponse};

pub const TEST_ENDPOINT: &str = "http://whip.example:8889/live/whip";

/// Valid configuration publishing audio and video from UDP.
pub fn test_config() -> Config {
    Config {
        whip_endpoint_url: TEST_ENDPOINT.to_string(),
        source_port: 5000,
        ..Config::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockNode {
    pub id: usize,
    pub kind: NodeKind,
}

#[derive(Debug)]
pub struct MockPad {
    pub caps: String,
}

struct CreatedNode {
    node: MockNode,
    factory: String,
    settings: NodeSettings,
}

struct EngineState {
    next_id: usize,
    nodes: Vec<CreatedNode>,
    missing_factories: HashSet<String>,
    failing_links: Vec<(NodeKind, NodeKind)>,
    failing_states: Vec<PipelineState>,
    fail_answer_parse: bool,
    fail_local_description: bool,
    links: Vec<(NodeKind, NodeKind)>,
    filtered_links: Vec<(NodeKind, NodeKind, RtpCaps)>,
    pad_links: Vec<(String, NodeKind)>,
    transceiver_count: usize,
    transceivers: Vec<(usize, TransceiverSettings)>,
    offer_requests: usize,
    descriptions: Vec<(&'static str, String)>,
    states: Vec<PipelineState>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            next_id: 0,
            nodes: Vec::new(),
            missing_factories: HashSet::new(),
            failing_links: Vec::new(),
            failing_states: Vec::new(),
            fail_answer_parse: false,
            fail_local_description: false,
            links: Vec::new(),
            filtered_links: Vec::new(),
            pad_links: Vec::new(),
            transceiver_count: 2,
            transceivers: Vec::new(),
            offer_requests: 0,
            descriptions: Vec::new(),
            states: Vec::new(),
        }
    }
}

impl EngineState {
    fn has_upstream(&self, kind: NodeKind) -> bool {
        self.links.iter().any(|(_, to)| *to == kind)
            || self.filtered_links.iter().any(|(_, to, _)| *to == kind)
            || self.pad_links.iter().any(|(_, to)| *to == kind)
    }

    fn has_downstream(&self, kind: NodeKind) -> bool {
        self.links.iter().any(|(from, _)| *from == kind)
            || self.filtered_links.iter().any(|(from, _, _)| *from == kind)
    }

    /// Single-input, single-output rules; tee fans out and webrtcbin fans in.
    fn check_link(&self, from: NodeKind, to: NodeKind) -> Result<(), EngineError> {
        if self.failing_links.contains(&(from, to)) {
            return Err(EngineError::Link(format!("{} -> {} refused", from, to)));
        }
        if from != NodeKind::Tee && self.has_downstream(from) {
            return Err(EngineError::Link(format!("{} output already linked", from)));
        }
        if to != NodeKind::WebRtcSink && self.has_upstream(to) {
            return Err(EngineError::Link(format!("{} input already linked", to)));
        }
        Ok(())
    }
}

/// Records every call; shares its state between clones so a test can keep
/// a handle after giving the engine away.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_factory(self, factory: &str) -> Self {
        self.state.lock().missing_factories.insert(factory.to_string());
        self
    }

    pub fn failing_link(self, from: NodeKind, to: NodeKind) -> Self {
        self.state.lock().failing_links.push((from, to));
        self
    }

    pub fn failing_state(self, state: PipelineState) -> Self {
        self.state.lock().failing_states.push(state);
        self
    }

    pub fn failing_answer_parse(self) -> Self {
        self.state.lock().fail_answer_parse = true;
        self
    }

    pub fn failing_local_description(self) -> Self {
        self.state.lock().fail_local_description = true;
        self
    }

    pub fn with_transceivers(self, count: usize) -> Self {
        self.state.lock().transceiver_count = count;
        self
    }

    pub fn new_pad(&self, caps: &str) -> MockPad {
        MockPad { caps: caps.to_string() }
    }

    pub fn has_link(&self, from: NodeKind, to: NodeKind) -> bool {
        let state = self.state.lock();
        state.links.contains(&(from, to)) || state.filtered_links.iter().any(|(f, t, _)| *f == from && *t == to)
    }

    pub fn links(&self) -> Vec<(NodeKind, NodeKind)> {
        self.state.lock().links.clone()
    }

    pub fn filtered_links(&self) -> Vec<(NodeKind, NodeKind, RtpCaps)> {
        self.state.lock().filtered_links.clone()
    }

    pub fn pad_links(&self) -> Vec<(String, NodeKind)> {
        self.state.lock().pad_links.clone()
    }

    pub fn downstream_of(&self, kind: NodeKind) -> Vec<NodeKind> {
        self.state.lock().links.iter().filter(|(from, _)| *from == kind).map(|(_, to)| *to).collect()
    }

    pub fn settings_of(&self, kind: NodeKind) -> Option<NodeSettings> {
        let state = self.state.lock();
        state.nodes.iter().find(|n| n.node.kind == kind).map(|n| n.settings.clone())
    }

    pub fn factory_of(&self, kind: NodeKind) -> Option<String> {
        let state = self.state.lock();
        state.nodes.iter().find(|n| n.node.kind == kind).map(|n| n.factory.clone())
    }

    pub fn transceivers(&self) -> Vec<(usize, TransceiverSettings)> {
        self.state.lock().transceivers.clone()
    }

    pub fn offer_requests(&self) -> usize {
        self.state.lock().offer_requests
    }

    /// Committed descriptions in order, tagged "local" or "remote".
    pub fn descriptions(&self) -> Vec<(&'static str, String)> {
        self.state.lock().descriptions.clone()
    }

    /// Every state change attempted, including failed ones.
    pub fn states(&self) -> Vec<PipelineState> {
        self.state.lock().states.clone()
    }
}

impl MediaEngine for MockEngine {
    type Node = MockNode;
    type Pad = MockPad;
    type Description = String;

    fn make_node(&mut self, kind: NodeKind, factory: &str, settings: &NodeSettings) -> Result<MockNode, EngineError> {
        let mut state = self.state.lock();
        if state.missing_factories.contains(factory) {
            return Err(EngineError::FactoryUnavailable(factory.to_string()));
        }
        state.next_id += 1;
        let node = MockNode { id: state.next_id, kind };
        state.nodes.push(CreatedNode { node: node.clone(), factory: factory.to_string(), settings: settings.clone() });
        Ok(node)
    }

    fn link(&mut self, src: &MockNode, sink: &MockNode) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check_link(src.kind, sink.kind)?;
        state.links.push((src.kind, sink.kind));
        Ok(())
    }

    fn link_filtered(&mut self, src: &MockNode, sink: &MockNode, caps: &RtpCaps) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check_link(src.kind, sink.kind)?;
        state.filtered_links.push((src.kind, sink.kind, caps.clone()));
        Ok(())
    }

    fn unlink(&mut self, src: &MockNode, sink: &MockNode) {
        self.state.lock().links.retain(|link| *link != (src.kind, sink.kind));
    }

    fn link_pad(&mut self, pad: &MockPad, sink: &MockNode) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.has_upstream(sink.kind) {
            return Err(EngineError::Link(format!("{} input already linked", sink.kind)));
        }
        state.pad_links.push((pad.caps.clone(), sink.kind));
        Ok(())
    }

    fn is_sink_linked(&self, node: &MockNode) -> bool {
        self.state.lock().has_upstream(node.kind)
    }

    fn transceiver_count(&self) -> usize {
        self.state.lock().transceiver_count
    }

    fn configure_transceiver(&mut self, index: usize, settings: &TransceiverSettings) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if index >= state.transceiver_count {
            return Err(EngineError::NoTransceiver(index));
        }
        state.transceivers.push((index, *settings));
        Ok(())
    }

    fn request_offer(&mut self) -> Result<(), EngineError> {
        self.state.lock().offer_requests += 1;
        Ok(())
    }

    fn description_to_text(&self, description: &String) -> Result<String, EngineError> {
        Ok(description.clone())
    }

    fn parse_answer(&self, sdp: &str) -> Result<String, EngineError> {
        if self.state.lock().fail_answer_parse {
            return Err(EngineError::Description("unparsable answer".to_string()));
        }
        Ok(sdp.to_string())
    }

    fn set_local_description(&mut self, description: &String) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.fail_local_description {
            return Err(EngineError::Description("offer rejected".to_string()));
        }
        state.descriptions.push(("local", description.clone()));
        Ok(())
    }

    fn set_remote_description(&mut self, description: &String) -> Result<(), EngineError> {
        self.state.lock().descriptions.push(("remote", description.clone()));
        Ok(())
    }

    fn set_state(&mut self, target: PipelineState) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.states.push(target);
        if state.failing_states.contains(&target) {
            return Err(EngineError::StateChange(target));
        }
        Ok(())
    }
}

#[derive(Default)]
struct TransportState {
    requests: Vec<WhipRequest>,
    responses: VecDeque<Result<WhipResponse, WhipError>>,
}

/// Replays scripted responses in order and records every request.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: StatusCode, headers: &[(&str, &str)], body: &str) {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        let response = WhipResponse { status, headers: map, body: Bytes::from(body.to_string()) };
        self.state.lock().responses.push_back(Ok(response));
    }

    pub fn fail(&self, error: WhipError) {
        self.state.lock().responses.push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<WhipRequest> {
        self.state.lock().requests.clone()
    }
}

impl HttpTransport for MockTransport {
    async fn execute(&self, request: WhipRequest) -> Result<WhipResponse, WhipError> {
        let mut state = self.state.lock();
        state.requests.push(request);
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| Err(WhipError::Transport("no scripted response".to_string())))
    }
}
