/// Dataflow graph primitives
///
/// Nodes expose typed ports, ports are wired before the graph starts, and
/// each region ticks its nodes on a dedicated thread. Events pushed across
/// regions are queued at the receiving sink.

pub mod nodes;
pub mod port;
pub mod region;

pub use nodes::{ArtificialInput, PipelineProgress, ResultConsumer, SinkNode};
pub use port::{connect, Consume, EventSink, EventSource, Produce};
pub use region::{Region, RegionHandle, RegionNode, RegionReport, FAST_TICK};
