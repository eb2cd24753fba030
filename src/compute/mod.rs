/// Compute Offload Stage
///
/// A dataflow node that takes an input array, runs an elementwise kernel on
/// it and publishes the result array downstream. Every invocation is
/// synchronous: the stage returns only after the result is back in host
/// memory, so results leave in the order inputs arrived.
///
/// The kernel behind the stage is pluggable:
/// - [`DeviceKernel`] dispatches to the discovered compute device
/// - [`HostKernel`] evaluates the same operation on the CPU

pub mod device;
pub mod host;

pub use device::DeviceKernel;
pub use host::HostKernel;

use crate::error::{ComputeError, ErrorCode};
use crate::flow::{Consume, EventSource, Produce};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Invocations per workgroup; must match `@workgroup_size` in the kernel source.
pub const WORKGROUP_SIZE: u32 = 64;

/// Bytes per element on host and device.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f64>();

/// An elementwise binary operation `c[i] = f(a[i], b[i])`.
pub trait ElementwiseKernel: Send {
    fn name(&self) -> &str;

    /// Run the operation over two equal-length operands and return a result
    /// of the same length. Blocks until the result is available.
    fn launch(&mut self, a: &[f64], b: &[f64]) -> Result<Vec<f64>, ComputeError>;
}

impl<K: ElementwiseKernel + ?Sized> ElementwiseKernel for Box<K> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn launch(&mut self, a: &[f64], b: &[f64]) -> Result<Vec<f64>, ComputeError> {
        (**self).launch(a, b)
    }
}

/// Common element count of two operands.
pub fn operand_len(a: &[f64], b: &[f64]) -> Result<usize, ComputeError> {
    if a.len() != b.len() {
        return Err(ComputeError::new(
            ErrorCode::InvalidBufferSize,
            format!("operand lengths differ: {} vs {}", a.len(), b.len()),
        ));
    }
    Ok(a.len())
}

/// Workgroup grid covering `len` elements.
///
/// Stays one-dimensional while the group count fits `max_per_dimension`,
/// otherwise folds into rows of `max_per_dimension` groups. `None` when even
/// the folded grid exceeds the limit.
pub fn workgroup_grid(len: usize, max_per_dimension: u32) -> Option<(u32, u32)> {
    if max_per_dimension == 0 {
        return None;
    }

    let groups = len.div_ceil(WORKGROUP_SIZE as usize);
    let max = max_per_dimension as usize;

    if groups <= max {
        return Some((groups as u32, 1));
    }

    let rows = groups.div_ceil(max);
    if rows > max {
        return None;
    }
    Some((max_per_dimension, rows as u32))
}

/// Stage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageStats {
    pub invocations: u64,
    pub failures: u64,
    pub elements: u64,
    pub last_dispatch_us: u64,
}

/// The compute offload node.
pub struct ComputeStage<K: ElementwiseKernel> {
    kernel: K,
    out_data: EventSource<Vec<f64>>,
    stats: Arc<Mutex<StageStats>>,
}

impl<K: ElementwiseKernel> ComputeStage<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            out_data: EventSource::new(),
            stats: Arc::new(Mutex::new(StageStats::default())),
        }
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Run the kernel with `input` as both operands and publish the result.
    pub fn process(&mut self, input: Vec<f64>) -> Result<(), ComputeError> {
        let result = self.compute(&input, &input)?;
        self.out_data.fire(result);
        Ok(())
    }

    /// Two-operand form of [`process`](Self::process).
    pub fn process_pair(&mut self, a: Vec<f64>, b: Vec<f64>) -> Result<(), ComputeError> {
        let result = self.compute(&a, &b)?;
        self.out_data.fire(result);
        Ok(())
    }

    /// Run the kernel without publishing. Statistics are updated either way.
    pub fn compute(&mut self, a: &[f64], b: &[f64]) -> Result<Vec<f64>, ComputeError> {
        let start = Instant::now();

        let result = operand_len(a, b).and_then(|len| {
            if len == 0 {
                Ok(Vec::new())
            } else {
                self.kernel.launch(a, b)
            }
        });

        let mut stats = self.stats.lock();
        stats.invocations += 1;
        match &result {
            Ok(out) => {
                stats.elements += out.len() as u64;
                stats.last_dispatch_us = start.elapsed().as_micros() as u64;
                log::trace!(
                    "Kernel '{}': {} element(s) in {}µs",
                    self.kernel.name(),
                    out.len(),
                    stats.last_dispatch_us
                );
            }
            Err(_) => stats.failures += 1,
        }

        result
    }

    pub fn stats(&self) -> StageStats {
        self.stats.lock().clone()
    }

    /// Shared handle to the statistics, readable after the stage has moved
    /// into a region.
    pub fn stats_handle(&self) -> Arc<Mutex<StageStats>> {
        Arc::clone(&self.stats)
    }
}

impl<K: ElementwiseKernel> Consume<Vec<f64>> for ComputeStage<K> {
    type Error = ComputeError;

    fn consume(&mut self, input: Vec<f64>) -> Result<(), ComputeError> {
        self.process(input)
    }
}

impl<K: ElementwiseKernel> Consume<(Vec<f64>, Vec<f64>)> for ComputeStage<K> {
    type Error = ComputeError;

    fn consume(&mut self, (a, b): (Vec<f64>, Vec<f64>)) -> Result<(), ComputeError> {
        self.process_pair(a, b)
    }
}

impl<K: ElementwiseKernel> Produce<Vec<f64>> for ComputeStage<K> {
    fn out_port(&mut self) -> &mut EventSource<Vec<f64>> {
        &mut self.out_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::EventSink;

    /// Kernel that always fails with the given code.
    struct Failing(ErrorCode);

    impl ElementwiseKernel for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn launch(&mut self, _a: &[f64], _b: &[f64]) -> Result<Vec<f64>, ComputeError> {
            Err(ComputeError::new(self.0, "injected"))
        }
    }

    fn wired<K: ElementwiseKernel>(kernel: K) -> (ComputeStage<K>, EventSink<Vec<f64>>) {
        let mut stage = ComputeStage::new(kernel);
        let sink = EventSink::new();
        stage.out_port().connect(&sink).unwrap();
        (stage, sink)
    }

    #[test]
    fn test_process_doubles_input() {
        let (mut stage, sink) = wired(HostKernel::add());

        stage.process(vec![1.0; 10]).unwrap();
        assert_eq!(sink.try_recv(), Some(vec![2.0; 10]));

        stage.process(vec![2.0; 10]).unwrap();
        assert_eq!(sink.try_recv(), Some(vec![4.0; 10]));
        assert_eq!(sink.try_recv(), None);
    }

    #[test]
    fn test_process_pair() {
        let (mut stage, sink) = wired(HostKernel::add());
        stage.process_pair(vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]).unwrap();
        assert_eq!(sink.try_recv(), Some(vec![11.0, 22.0, 33.0]));
    }

    #[test]
    fn test_zero_length_publishes_empty() {
        let (mut stage, sink) = wired(Failing(ErrorCode::OutOfMemory));
        stage.process(Vec::new()).unwrap();
        assert_eq!(sink.try_recv(), Some(Vec::new()));
    }

    #[test]
    fn test_mismatched_operands_rejected() {
        let (mut stage, sink) = wired(HostKernel::add());
        let err = stage.process_pair(vec![1.0; 3], vec![1.0; 4]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidBufferSize);
        assert_eq!(sink.try_recv(), None);
    }

    #[test]
    fn test_error_publishes_nothing() {
        let (mut stage, sink) = wired(Failing(ErrorCode::MapFailed));
        let err = stage.process(vec![1.0; 4]).unwrap_err();
        assert_eq!(err.code, ErrorCode::MapFailed);
        assert_eq!(sink.pending(), 0);

        let stats = stage.stats();
        assert_eq!(stats.invocations, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.elements, 0);
    }

    #[test]
    fn test_stats_accumulate() {
        let (mut stage, _sink) = wired(HostKernel::add());
        let handle = stage.stats_handle();
        stage.process(vec![1.0; 8]).unwrap();
        stage.process(vec![1.0; 2]).unwrap();

        let stats = handle.lock().clone();
        assert_eq!(stats.invocations, 2);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.elements, 10);
    }

    #[test]
    fn test_unconnected_output_is_not_an_error() {
        let mut stage = ComputeStage::new(HostKernel::add());
        assert!(stage.process(vec![1.0]).is_ok());
    }

    #[test]
    fn test_workgroup_grid() {
        assert_eq!(workgroup_grid(0, 65535), Some((0, 1)));
        assert_eq!(workgroup_grid(1, 65535), Some((1, 1)));
        assert_eq!(workgroup_grid(64, 65535), Some((1, 1)));
        assert_eq!(workgroup_grid(65, 65535), Some((2, 1)));

        // 10 groups with at most 4 per row -> 3 rows
        assert_eq!(workgroup_grid(64 * 10, 4), Some((4, 3)));
        // 17 groups with at most 4 per row -> 5 rows, over the limit
        assert_eq!(workgroup_grid(64 * 17, 4), None);
        assert_eq!(workgroup_grid(1, 0), None);
    }
}
