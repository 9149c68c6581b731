//! Answer generation through a remote completion service

pub mod client;
pub mod dashscope;
pub mod prompt;
pub mod stream;

pub use client::GenerationClient;
pub use dashscope::{CompletionBackend, DashScopeClient, SnapshotStream};
pub use prompt::PromptBuilder;
pub use stream::{spawn_diff_stream, SnapshotDiff, StreamEvent};
