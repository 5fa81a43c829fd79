//! Progress events emitted while a pipeline run executes.
//!
//! The orchestrator is headless; user interfaces subscribe to a channel of
//! [`PipelineEvent`]s and render them however they like. Senders are cheap
//! to clone and a dropped receiver silently disables reporting, so progress
//! reporting can never fail the pipeline.

use magpie_shared::Phase;
use tokio::sync::mpsc;

/// A single progress notification from the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A run has started over the given number of items.
    RunStarted { run_id: String, items: usize },
    /// An item has entered a phase.
    PhaseStarted { id: String, phase: Phase },
    /// An item finished a phase successfully.
    PhaseCompleted { id: String, phase: Phase },
    /// A phase attempt failed; the item keeps its progress so far.
    PhaseFailed {
        id: String,
        phase: Phase,
        message: String,
    },
}

/// Handle the orchestrator uses to publish [`PipelineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSender {
    /// Creates a connected sender/receiver pair.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sender that drops every event, for callers without a UI.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publishes an event. Send errors (closed receiver) are ignored.
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_round_trip_through_the_channel() {
        let (sender, mut rx) = EventSender::new();
        sender.emit(PipelineEvent::RunStarted {
            run_id: "run-1".into(),
            items: 3,
        });
        sender.emit(PipelineEvent::PhaseCompleted {
            id: "a".into(),
            phase: Phase::Cache,
        });
        drop(sender);

        assert_eq!(
            rx.recv().await,
            Some(PipelineEvent::RunStarted {
                run_id: "run-1".into(),
                items: 3
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(PipelineEvent::PhaseCompleted {
                id: "a".into(),
                phase: Phase::Cache
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn disabled_sender_swallows_events() {
        let sender = EventSender::disabled();
        sender.emit(PipelineEvent::PhaseStarted {
            id: "a".into(),
            phase: Phase::Embed,
        });
    }

    #[test]
    fn closed_receiver_does_not_panic() {
        let (sender, rx) = EventSender::new();
        drop(rx);
        sender.emit(PipelineEvent::PhaseFailed {
            id: "a".into(),
            phase: Phase::Sync,
            message: "remote unreachable".into(),
        });
    }
}
