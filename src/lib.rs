/// RayOS Offload Library
///
/// A push-based dataflow pipeline with a synchronous compute offload stage:
/// a producer generates f64 arrays, the compute stage runs an elementwise
/// kernel on the selected device, and a consumer receives each result.
///
/// Graph layout:
///
/// ```text
///   region-cpu                region-cl                 region-cpu
///   ArtificialInput  ──────▶  ComputeStage  ──────────▶  ResultConsumer
/// ```

pub mod compute;
pub mod config;
pub mod error;
pub mod flow;
pub mod hal;

pub use compute::{ComputeStage, DeviceKernel, ElementwiseKernel, HostKernel, StageStats};
pub use config::{Backend, DeviceClass, PipelineConfig};
pub use error::{BuildError, BuildStage, ComputeError, DiscoveryError, Error, ErrorCode, Result};

use flow::{ArtificialInput, PipelineProgress, Produce, Region, RegionHandle, ResultConsumer, SinkNode};
use hal::{BuildOptions, SelectionCriteria};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Name of the region running the producer and the consumer.
pub const CPU_REGION: &str = "region-cpu";
/// Name of the region running the compute stage.
pub const COMPUTE_REGION: &str = "region-cl";

type StageNode = SinkNode<Vec<f64>, ComputeStage<Box<dyn ElementwiseKernel>>>;

/// Open the configured backend and return its kernel.
///
/// For [`Backend::Device`] this runs discovery, loads the kernel source and
/// builds the program; any failure aborts before a graph exists.
pub fn open_kernel(config: &PipelineConfig) -> Result<Box<dyn ElementwiseKernel>> {
    match config.backend {
        Backend::Device => {
            let criteria =
                SelectionCriteria::new(config.device_class, config.required_extensions.clone());
            let discovery = hal::discover(&criteria)?;
            let source = hal::load_kernel_source(&config.kernel_path())?;
            let kernel =
                DeviceKernel::build(discovery, &source, &BuildOptions::new(&config.entry_point))?;
            Ok(Box::new(kernel))
        }
        Backend::Host => {
            let kernel = HostKernel::for_entry_point(&config.entry_point).ok_or_else(|| {
                BuildError::new(
                    BuildStage::Link,
                    format!("host backend has no entry point '{}'", config.entry_point),
                )
            })?;
            log::info!("Using host kernel '{}'", kernel.name());
            Ok(Box::new(kernel))
        }
    }
}

/// Builder for [`OffloadPipeline`]
pub struct OffloadPipelineBuilder {
    config: PipelineConfig,
}

impl OffloadPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.config.device_class = class;
        self
    }

    pub fn with_array_len(mut self, len: usize) -> Self {
        self.config.array_len = len;
        self
    }

    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.config.max_ticks = ticks;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Open the configured backend and assemble the graph.
    pub fn build(self) -> Result<OffloadPipeline> {
        let kernel = open_kernel(&self.config)?;
        self.build_with_kernel(kernel)
    }

    /// Assemble the graph around an already opened kernel.
    pub fn build_with_kernel(self, kernel: Box<dyn ElementwiseKernel>) -> Result<OffloadPipeline> {
        OffloadPipeline::assemble(self.config, kernel)
    }
}

impl Default for OffloadPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wired, not yet running pipeline
pub struct OffloadPipeline {
    cpu: Region,
    compute: Region,
    progress: Arc<PipelineProgress>,
    stage_stats: Arc<Mutex<StageStats>>,
    tick_limit: Option<u64>,
}

impl OffloadPipeline {
    fn assemble(config: PipelineConfig, kernel: Box<dyn ElementwiseKernel>) -> Result<Self> {
        log::info!(
            "Assembling pipeline: {} element(s) per array, kernel '{}'",
            config.array_len,
            kernel.name()
        );

        let progress = PipelineProgress::shared();
        let tick_limit = config.tick_limit();

        let mut input = ArtificialInput::new(config.array_len)
            .with_limit(tick_limit)
            .with_progress(Arc::clone(&progress));
        let mut stage: StageNode = SinkNode::new("compute-stage", ComputeStage::new(kernel));
        let consumer = SinkNode::new(
            "result-consumer",
            ResultConsumer::new().with_progress(Arc::clone(&progress)),
        );

        // producer >> stage >> consumer
        input.out_port().connect(stage.sink())?;
        stage.out_port().connect(consumer.sink())?;

        let stage_stats = stage.consumer().stats_handle();

        let mut cpu = Region::new(CPU_REGION, config.tick_interval());
        cpu.add_node(input);
        cpu.add_node(consumer);

        let mut compute = Region::new(COMPUTE_REGION, config.tick_interval());
        compute.add_node(stage);

        Ok(Self {
            cpu,
            compute,
            progress,
            stage_stats,
            tick_limit,
        })
    }

    /// Tick both regions once on the calling thread.
    pub fn tick_once(&mut self) -> u64 {
        self.cpu.tick_once() + self.compute.tick_once()
    }

    pub fn progress(&self) -> &PipelineProgress {
        &self.progress
    }

    pub fn stage_stats(&self) -> StageStats {
        self.stage_stats.lock().clone()
    }

    pub fn is_complete(&self) -> bool {
        is_complete(self.tick_limit, &self.progress, &self.stage_stats)
    }

    /// Start every region on its own thread.
    pub fn start(self) -> anyhow::Result<RunningPipeline> {
        let cpu = self.cpu.start()?;
        let compute = self.compute.start()?;

        Ok(RunningPipeline {
            handles: vec![cpu, compute],
            progress: self.progress,
            stage_stats: self.stage_stats,
            tick_limit: self.tick_limit,
        })
    }
}

fn is_complete(
    tick_limit: Option<u64>,
    progress: &PipelineProgress,
    stage_stats: &Mutex<StageStats>,
) -> bool {
    match tick_limit {
        Some(limit) => progress.consumed() + stage_stats.lock().failures >= limit,
        None => false,
    }
}

/// Summary returned by [`RunningPipeline::shutdown`]
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub produced: u64,
    pub consumed: u64,
    pub stage: StageStats,
    pub node_errors: u64,
}

/// Handle to a started pipeline
pub struct RunningPipeline {
    handles: Vec<RegionHandle>,
    progress: Arc<PipelineProgress>,
    stage_stats: Arc<Mutex<StageStats>>,
    tick_limit: Option<u64>,
}

impl RunningPipeline {
    pub fn progress(&self) -> &PipelineProgress {
        &self.progress
    }

    pub fn stage_stats(&self) -> StageStats {
        self.stage_stats.lock().clone()
    }

    /// Every produced array has come out the other end, as a result or a
    /// stage failure. Never true for an unbounded run.
    pub fn is_complete(&self) -> bool {
        is_complete(self.tick_limit, &self.progress, &self.stage_stats)
    }

    /// Wait until [`is_complete`](Self::is_complete), polling at `interval`.
    pub async fn wait_complete(&self, interval: Duration) {
        while !self.is_complete() {
            tokio::time::sleep(interval).await;
        }
    }

    /// Stop every region and wait for its thread.
    pub fn shutdown(self) -> anyhow::Result<PipelineReport> {
        log::info!("Shutting down pipeline...");

        for handle in &self.handles {
            handle.request_stop();
        }

        let mut node_errors = 0;
        for handle in self.handles {
            node_errors += handle.stop()?.node_errors;
        }

        let report = PipelineReport {
            produced: self.progress.produced(),
            consumed: self.progress.consumed(),
            stage: self.stage_stats.lock().clone(),
            node_errors,
        };
        log::info!(
            "Pipeline stopped: {} produced, {} consumed, {} stage failure(s)",
            report.produced,
            report.consumed,
            report.stage.failures
        );
        Ok(report)
    }
}
