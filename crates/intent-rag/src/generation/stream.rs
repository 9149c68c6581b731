//! Snapshot diffing and the bounded streaming channel

use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::dashscope::SnapshotStream;

/// Event delivered to a streaming consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text appended since the previous event
    Delta(String),
    /// Upstream failure; terminal
    Error(String),
    /// End of answer; terminal
    Finished,
}

/// Turns cumulative snapshots into increments
///
/// Positions are counted in characters, so multi-byte text never splits.
#[derive(Debug, Default)]
pub struct SnapshotDiff {
    seen_chars: usize,
}

impl SnapshotDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suffix of `current` beyond the previous snapshot, `None` when empty
    pub fn push(&mut self, current: &str) -> Option<String> {
        let total = current.chars().count();
        let delta: String = current.chars().skip(self.seen_chars).collect();
        self.seen_chars = total;
        (!delta.is_empty()).then_some(delta)
    }
}

/// Spawn a producer that diffs `snapshots` into a bounded channel
///
/// While waiting on upstream the producer also watches the channel; once
/// the receiver is dropped it returns, dropping the snapshot stream and with
/// it the upstream response.
pub fn spawn_diff_stream(snapshots: SnapshotStream, buffer: usize) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::spawn(async move {
        let mut snapshots = snapshots;
        let mut diff = SnapshotDiff::new();
        let mut sent = 0usize;

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!("Stream consumer went away after {} deltas", sent);
                    return;
                }
                next = snapshots.next() => next,
            };

            match next {
                Some(Ok(text)) => {
                    let Some(delta) = diff.push(&text) else {
                        continue;
                    };
                    if tx.send(StreamEvent::Delta(delta)).await.is_err() {
                        tracing::debug!("Stream consumer went away after {} deltas", sent);
                        return;
                    }
                    sent += 1;
                }
                Some(Err(e)) => {
                    tracing::error!("Generation stream failed: {}", e);
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
                None => break,
            }
        }

        let _ = tx.send(StreamEvent::Finished).await;
        tracing::debug!("Stream finished after {} deltas", sent);
    });

    rx
}
