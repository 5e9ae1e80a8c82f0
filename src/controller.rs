//! Controller loop.
//!
//! One task owns the engine, the graph and the negotiation state and handles
//! events strictly one at a time. Shutdown order: stop the media flow, delete
//! the remote session, then leave the loop.

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::config::Config;
use crate::engine::{ControllerEvent, EngineError, EngineEvent, EventReceiver, MediaEngine, PipelineState};
use crate::monitor::{MonitorError, RuntimeMonitor};
use crate::negotiation::NegotiationCoordinator;
use crate::signaling::{HttpTransport, WhipClient};
use crate::topology::{Bypass, BuildError, DispatchOutcome, PadDispatcher, ProcessingGraph, StreamDescriptor, TopologyBuilder};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Failed to build topology: {0}")]
    Build(#[from] BuildError),

    #[error("Failed to start pipeline: {0}")]
    Start(#[source] EngineError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

pub struct Controller<E: MediaEngine, T> {
    engine: E,
    graph: ProcessingGraph<E::Node>,
    dispatcher: PadDispatcher,
    negotiation: NegotiationCoordinator<T>,
    monitor: RuntimeMonitor,
    events: EventReceiver<E>,
}

impl<E: MediaEngine, T: HttpTransport> Controller<E, T> {
    /// Build the topology. Fails without running anything if any node or
    /// static link is unavailable.
    pub fn new(config: &Config, mut engine: E, transport: T, events: EventReceiver<E>) -> Result<Self, ControllerError> {
        let graph = TopologyBuilder::new(config).build(&mut engine)?;
        let client = WhipClient::new(config.whip_endpoint_url.clone(), config.whip_auth_key.clone(), transport);

        Ok(Self {
            engine,
            graph,
            dispatcher: PadDispatcher::new(Bypass { audio: config.bypass_audio, video: config.bypass_video }),
            negotiation: NegotiationCoordinator::new(client, config.media_count()),
            monitor: RuntimeMonitor::new(),
            events,
        })
    }

    /// Start playback and process events until shutdown is requested or the
    /// channel closes. Always runs the shutdown sequence before returning.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Starting pipeline");
        if let Err(e) = self.engine.set_state(PipelineState::Playing) {
            error!("Failed to start pipeline: {}", e);
            self.shutdown().await;
            return Err(ControllerError::Start(e));
        }

        let result = loop {
            match self.events.recv().await {
                Some(ControllerEvent::Engine(event)) => {
                    if let Err(e) = self.handle(event).await {
                        error!("{}", e);
                        break Err(e);
                    }
                }
                Some(ControllerEvent::Shutdown) => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                None => {
                    info!("Event channel closed");
                    break Ok(());
                }
            }
        };

        self.shutdown().await;
        result
    }

    async fn handle(&mut self, event: EngineEvent<E::Pad, E::Description>) -> Result<(), ControllerError> {
        match event {
            EngineEvent::StreamDiscovered { caps, pad } => {
                let descriptor = StreamDescriptor::new(&caps, pad);
                match self.dispatcher.on_stream_discovered(&mut self.engine, &self.graph, descriptor) {
                    Ok(DispatchOutcome::Linked { .. }) | Ok(DispatchOutcome::AlreadyLinked(_)) => {}
                    Ok(DispatchOutcome::Rejected { content, reason }) => {
                        debug!("Stream {:?} rejected: {:?}", content, reason);
                    }
                    Err(e) => warn!("Failed to activate {} stream: {}", caps, e),
                }
            }
            EngineEvent::NoMoreStreams => info!("All streams announced"),
            EngineEvent::NegotiationNeeded => {
                if let Err(e) = self.negotiation.on_negotiation_needed(&mut self.engine) {
                    warn!("Negotiation could not start: {}", e);
                }
            }
            EngineEvent::OfferReady(offer) => {
                if let Err(e) = self.negotiation.on_offer_ready(&mut self.engine, offer).await {
                    warn!("Negotiation failed: {}", e);
                }
            }
            EngineEvent::OfferFailed(reason) => self.negotiation.on_offer_failed(&reason),
            EngineEvent::IceCandidate(candidate) => {
                if let Err(e) = self.negotiation.on_local_ice_candidate(&candidate).await {
                    warn!("Failed to send ICE candidate: {}", e);
                }
            }
            EngineEvent::StateChanged { old, new } => self.monitor.on_state_changed(old, new),
            EngineEvent::EndOfStream => self.monitor.on_end_of_stream(),
            EngineEvent::Error { node, message, debug } => {
                self.monitor.on_error(&node, &message, debug.as_deref())
            }
            EngineEvent::ClockLost => self.monitor.on_clock_lost(&mut self.engine)?,
            EngineEvent::NewClock => self.monitor.on_new_clock(),
        }
        Ok(())
    }

    async fn shutdown(mut self) {
        info!("Stopping pipeline");
        if let Err(e) = self.engine.set_state(PipelineState::Null) {
            warn!("Failed to stop pipeline: {}", e);
        }

        match self.negotiation.teardown().await {
            Ok(true) => info!("WHIP session closed"),
            Ok(false) => debug!("No WHIP session to close"),
            Err(e) => warn!("Failed to close WHIP session: {}", e),
        }
    }
}
