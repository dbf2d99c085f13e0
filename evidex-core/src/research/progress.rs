//! Progress events streamed while a research run is in flight.

use crate::types::{SourceKind, StrategyTier};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One pipeline milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Plan {
        strategies: usize,
        fallback: bool,
    },
    StrategyStart {
        index: usize,
        source_kind: SourceKind,
        query: String,
        tier: StrategyTier,
    },
    StrategyEnd {
        index: usize,
        source_kind: SourceKind,
        result_count: usize,
        error: Option<String>,
    },
    DedupDone {
        original_count: usize,
        deduplicated_count: usize,
    },
    SynthesisStart {
        curated: usize,
    },
    SynthesisDone {
        ok: bool,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Plan { .. } => "plan",
            ProgressEvent::StrategyStart { .. } => "strategy_start",
            ProgressEvent::StrategyEnd { .. } => "strategy_end",
            ProgressEvent::DedupDone { .. } => "dedup_done",
            ProgressEvent::SynthesisStart { .. } => "synthesis_start",
            ProgressEvent::SynthesisDone { .. } => "synthesis_done",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("progress channel is full")]
    Full,
    #[error("progress channel is closed")]
    Closed,
}

/// Receives progress events. Errors are ignored by the pipeline.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent) -> Result<(), ProgressError>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn emit(&self, _event: &ProgressEvent) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// Forwards events over a bounded channel without ever blocking the run.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving half of a channel holding `capacity` events.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: &ProgressEvent) -> Result<(), ProgressError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProgressError::Full,
            mpsc::error::TrySendError::Closed(_) => ProgressError::Closed,
        })
    }
}

/// Emit to an optional sink, logging and dropping failures.
pub(crate) fn emit(sink: Option<&dyn ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = sink
        && let Err(e) = sink.emit(&event)
    {
        tracing::debug!(event = event.name(), error = %e, "Dropped progress event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(ProgressEvent::DedupDone {
            original_count: 4,
            deduplicated_count: 3,
        })
        .unwrap();
        assert_eq!(json["event"], "dedup_done");
        assert_eq!(json["deduplicated_count"], 3);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelProgressSink::channel(4);
        sink.emit(&ProgressEvent::SynthesisStart { curated: 2 })
            .unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::SynthesisStart { curated: 2 })
        );
    }

    #[test]
    fn test_full_and_closed_channels_error() {
        let (sink, rx) = ChannelProgressSink::channel(1);
        sink.emit(&ProgressEvent::SynthesisDone { ok: true }).unwrap();
        assert!(matches!(
            sink.emit(&ProgressEvent::SynthesisDone { ok: true }),
            Err(ProgressError::Full)
        ));
        drop(rx);
        assert!(matches!(
            sink.emit(&ProgressEvent::SynthesisDone { ok: true }),
            Err(ProgressError::Closed)
        ));
    }

    #[test]
    fn test_emit_swallows_errors() {
        let (sink, rx) = ChannelProgressSink::channel(1);
        drop(rx);
        emit(Some(&sink), ProgressEvent::SynthesisDone { ok: false });
        emit(None, ProgressEvent::SynthesisDone { ok: false });
    }
}
