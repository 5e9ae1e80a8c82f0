//! Offer/answer negotiation with the WHIP endpoint.
//!
//! State machine: `Idle -> OfferRequested -> OfferReady -> AwaitingAnswer
//! -> Negotiated`. Trickled local candidates are forwarded only once a
//! session resource exists and the offer is committed locally; earlier ones
//! are dropped. If the offer cannot be committed the fresh resource is
//! deleted again and the coordinator returns to `Idle`.
//!
//! The local description is committed only after the endpoint accepted the
//! offer, and the remote description only after the local one.

use log::{debug, info, warn};
use thiserror::Error;

use crate::engine::{EngineError, IceCandidate, MediaEngine, TransceiverSettings};
use crate::signaling::{HttpTransport, WhipClient, WhipError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferRequested,
    OfferReady,
    AwaitingAnswer,
    Negotiated,
}

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] WhipError),
}

/// Session resource on the endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionResource {
    pub resource_id: String,
    pub concurrency_token: Option<String>,
}

/// Single-candidate trickle ICE fragment.
pub fn trickle_fragment(candidate: &IceCandidate) -> String {
    format!("m=audio 9 RTP/AVP 0\r\na=mid:{}\r\na={}\r\n", candidate.mline_index, candidate.candidate)
}

pub struct NegotiationCoordinator<T> {
    client: WhipClient<T>,
    state: NegotiationState,
    session: Option<SessionResource>,
    /// Published media kinds; that many transceivers get NACK
    media_count: usize,
}

impl<T: HttpTransport> NegotiationCoordinator<T> {
    pub fn new(client: WhipClient<T>, media_count: usize) -> Self {
        Self { client, state: NegotiationState::Idle, session: None, media_count }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionResource> {
        self.session.as_ref()
    }

    /// Configure transceivers and ask the engine for an offer.
    ///
    /// Only acts from `Idle` with no session; renegotiation of an existing
    /// session is not supported and is ignored.
    pub fn on_negotiation_needed<E: MediaEngine>(&mut self, engine: &mut E) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::Idle || self.session.is_some() {
            debug!("Negotiation needed in state {:?}, ignoring", self.state);
            return Ok(());
        }

        let count = engine.transceiver_count();
        for index in 0..count {
            let settings = TransceiverSettings { send_only: true, fec: false, nack: index < self.media_count };
            engine.configure_transceiver(index, &settings)?;
        }
        info!("Configured {} transceivers (send-only, NACK on {})", count, self.media_count.min(count));

        engine.request_offer()?;
        self.state = NegotiationState::OfferRequested;
        Ok(())
    }

    /// Publish the offer, then commit local and remote descriptions.
    pub async fn on_offer_ready<E: MediaEngine>(
        &mut self,
        engine: &mut E,
        offer: E::Description,
    ) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::OfferRequested {
            warn!("Unexpected offer in state {:?}, ignoring", self.state);
            return Ok(());
        }
        self.state = NegotiationState::OfferReady;

        let offer_sdp = match engine.description_to_text(&offer) {
            Ok(sdp) => sdp,
            Err(e) => {
                self.state = NegotiationState::Idle;
                return Err(e.into());
            }
        };

        let created = match self.client.create_session(&offer_sdp).await {
            Ok(created) => created,
            Err(e) => {
                self.state = NegotiationState::Idle;
                return Err(e.into());
            }
        };

        if let Err(e) = engine.set_local_description(&offer) {
            // Nothing can use the resource now
            self.state = NegotiationState::Idle;
            if let Err(delete) = self.client.delete_session(&created.resource_id).await {
                warn!("Failed to delete session {}: {}", created.resource_id, delete);
            }
            return Err(e.into());
        }
        self.session = Some(SessionResource {
            resource_id: created.resource_id,
            concurrency_token: created.concurrency_token,
        });
        self.state = NegotiationState::AwaitingAnswer;

        let answer = engine.parse_answer(&created.answer_sdp)?;
        engine.set_remote_description(&answer)?;
        self.state = NegotiationState::Negotiated;

        info!("Negotiated with {}", self.client.endpoint_url());
        Ok(())
    }

    pub fn on_offer_failed(&mut self, reason: &str) {
        warn!("Offer creation failed: {}", reason);
        if self.state == NegotiationState::OfferRequested {
            self.state = NegotiationState::Idle;
        }
    }

    /// Forward one local candidate. Returns whether it was sent.
    pub async fn on_local_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<bool, NegotiationError> {
        let committed = matches!(self.state, NegotiationState::AwaitingAnswer | NegotiationState::Negotiated);
        let (Some(session), true) = (&self.session, committed) else {
            debug!("No session yet, dropping candidate {}", candidate.candidate);
            return Ok(false);
        };

        self.client
            .update_ice(
                &session.resource_id,
                session.concurrency_token.as_deref(),
                trickle_fragment(candidate),
            )
            .await?;
        Ok(true)
    }

    /// Delete the session resource, if one was created. At most once.
    pub async fn teardown(&mut self) -> Result<bool, WhipError> {
        let Some(session) = self.session.take() else {
            return Ok(false);
        };
        self.state = NegotiationState::Idle;
        self.client.delete_session(&session.resource_id).await?;
        Ok(true)
    }
}
