//! Pipeline health: state changes, end of stream, element errors and clock loss.

use log::{error, info, warn};
use thiserror::Error;

use crate::engine::{EngineError, MediaEngine, PipelineState};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Clock loss recovery failed: {0}")]
    RecoveryFailed(#[source] EngineError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Health {
    #[default]
    Running,
    /// An element reported an error; the rest keeps running
    Degraded,
}

#[derive(Debug, Default)]
pub struct RuntimeMonitor {
    health: Health,
    errors: usize,
    clock_recoveries: usize,
}

impl RuntimeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> Health {
        self.health
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn clock_recoveries(&self) -> usize {
        self.clock_recoveries
    }

    pub fn on_state_changed(&self, old: PipelineState, new: PipelineState) {
        info!("Pipeline state changed from {:?} to {:?}", old, new);
    }

    /// End of stream is reported only; the pipeline is not restarted.
    pub fn on_end_of_stream(&self) {
        info!("End of stream");
    }

    pub fn on_error(&mut self, node: &str, message: &str, debug: Option<&str>) {
        error!("Error from {}: {} ({})", node, message, debug.unwrap_or("no debug info"));
        self.errors += 1;
        if self.health != Health::Degraded {
            warn!("Pipeline degraded");
            self.health = Health::Degraded;
        }
    }

    /// One recovery attempt: cycle through Paused back to Playing.
    pub fn on_clock_lost<E: MediaEngine>(&mut self, engine: &mut E) -> Result<(), MonitorError> {
        warn!("Clock lost, restarting pipeline clock");
        engine.set_state(PipelineState::Paused).map_err(MonitorError::RecoveryFailed)?;
        engine.set_state(PipelineState::Playing).map_err(MonitorError::RecoveryFailed)?;
        self.clock_recoveries += 1;
        Ok(())
    }

    pub fn on_new_clock(&self) {
        info!("New pipeline clock selected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;

    #[test]
    fn test_error_degrades() {
        let mut monitor = RuntimeMonitor::new();
        assert_eq!(monitor.health(), Health::Running);

        monitor.on_error("avdec_h264", "decoding failed", None);
        monitor.on_error("vp8enc", "encoder stalled", Some("timeout"));
        assert_eq!(monitor.health(), Health::Degraded);
        assert_eq!(monitor.error_count(), 2);
    }

    #[test]
    fn test_end_of_stream_does_not_touch_pipeline() {
        let engine = MockEngine::new();
        let monitor = RuntimeMonitor::new();
        monitor.on_end_of_stream();
        assert!(engine.states().is_empty());
        assert_eq!(monitor.health(), Health::Running);
    }

    #[test]
    fn test_clock_loss_cycles_through_paused() {
        let mut engine = MockEngine::new();
        let mut monitor = RuntimeMonitor::new();
        monitor.on_clock_lost(&mut engine).unwrap();
        assert_eq!(engine.states(), vec![PipelineState::Paused, PipelineState::Playing]);
        assert_eq!(monitor.clock_recoveries(), 1);
    }

    #[test]
    fn test_clock_recovery_failure_is_reported() {
        let mut engine = MockEngine::new().failing_state(PipelineState::Playing);
        let mut monitor = RuntimeMonitor::new();
        let err = monitor.on_clock_lost(&mut engine).unwrap_err();
        assert!(matches!(err, MonitorError::RecoveryFailed(EngineError::StateChange(PipelineState::Playing))));
        assert_eq!(monitor.clock_recoveries(), 0);
    }
}
