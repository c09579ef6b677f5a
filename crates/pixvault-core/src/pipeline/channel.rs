//! Bounded channels for backpressure between source adapters and jobs.

use tokio::sync::mpsc;

use crate::config::PipelineConfig;

/// Create a bounded channel pair with the configured buffer size.
///
/// When the buffer is full the producer waits, so an adapter never runs
/// more than `buffer_size` items ahead of the job consuming it.
pub fn bounded_channel<T>(config: &PipelineConfig) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    mpsc::channel(config.buffer_size)
}
