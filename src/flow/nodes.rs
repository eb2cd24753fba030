//! Producer, consumer and sink adapters for the offload pipeline

use super::port::{Consume, EventSink, EventSource, Produce};
use super::region::RegionNode;
use anyhow::Result;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events crossing the pipeline ends, shared across regions.
#[derive(Debug, Default)]
pub struct PipelineProgress {
    produced: AtomicU64,
    consumed: AtomicU64,
}

impl PipelineProgress {
    /// Counters ready to hand to both ends of a pipeline.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::AcqRel);
    }

    fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Test producer: on each tick fires an array filled with the tick counter,
/// starting at 1.
pub struct ArtificialInput {
    out_data: EventSource<Vec<f64>>,
    counter: u64,
    array_len: usize,
    limit: Option<u64>,
    progress: Arc<PipelineProgress>,
}

impl ArtificialInput {
    pub fn new(array_len: usize) -> Self {
        Self {
            out_data: EventSource::new(),
            counter: 0,
            array_len,
            limit: None,
            progress: PipelineProgress::shared(),
        }
    }

    /// Stop producing after `limit` arrays.
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_progress(mut self, progress: Arc<PipelineProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Arrays produced so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.counter >= limit)
    }

    /// Produce one array unless the limit was reached. Returns whether it fired.
    pub fn work(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }

        self.counter += 1;
        log::info!("Sending array for counter {}", self.counter);
        self.out_data.fire(vec![self.counter as f64; self.array_len]);
        self.progress.record_produced();
        true
    }
}

impl Produce<Vec<f64>> for ArtificialInput {
    fn out_port(&mut self) -> &mut EventSource<Vec<f64>> {
        &mut self.out_data
    }
}

impl RegionNode for ArtificialInput {
    fn name(&self) -> &str {
        "artificial-input"
    }

    fn tick(&mut self) -> Result<()> {
        self.work();
        Ok(())
    }
}

/// Terminal consumer: logs each result array.
pub struct ResultConsumer {
    received: u64,
    last: Option<Vec<f64>>,
    progress: Arc<PipelineProgress>,
}

impl ResultConsumer {
    pub fn new() -> Self {
        Self {
            received: 0,
            last: None,
            progress: PipelineProgress::shared(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<PipelineProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn last(&self) -> Option<&[f64]> {
        self.last.as_deref()
    }
}

impl Default for ResultConsumer {
    fn default() -> Self {
        Self::new()
    }
}

fn format_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Consume<Vec<f64>> for ResultConsumer {
    type Error = Infallible;

    fn consume(&mut self, input: Vec<f64>) -> std::result::Result<(), Infallible> {
        log::info!("Got result of size {}: {}", input.len(), format_values(&input));
        self.received += 1;
        self.last = Some(input);
        self.progress.record_consumed();
        Ok(())
    }
}

/// Region node that owns an input sink and hands every queued event to a
/// consumer.
///
/// Events are drained in arrival order. The first failing event is reported
/// as the tick's error; anything queued behind it waits for the next tick.
pub struct SinkNode<T, C> {
    name: String,
    in_data: EventSink<T>,
    consumer: C,
}

impl<T, C> SinkNode<T, C> {
    pub fn new(name: impl Into<String>, consumer: C) -> Self {
        Self {
            name: name.into(),
            in_data: EventSink::new(),
            consumer,
        }
    }

    pub fn sink(&self) -> &EventSink<T> {
        &self.in_data
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }
}

impl<T, C> SinkNode<T, C>
where
    C: Consume<T>,
{
    /// Handle every queued event, stopping at the first failure.
    pub fn drain(&mut self) -> std::result::Result<usize, C::Error> {
        let mut handled = 0;
        while let Some(event) = self.in_data.try_recv() {
            self.consumer.consume(event)?;
            handled += 1;
        }
        Ok(handled)
    }
}

impl<T, U, C> Produce<U> for SinkNode<T, C>
where
    C: Produce<U>,
{
    fn out_port(&mut self) -> &mut EventSource<U> {
        self.consumer.out_port()
    }
}

impl<T, C> RegionNode for SinkNode<T, C>
where
    T: Send,
    C: Consume<T> + Send,
    C::Error: std::error::Error + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) -> Result<()> {
        self.drain()?;
        Ok(())
    }
}
