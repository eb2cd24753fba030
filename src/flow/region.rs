//! Cooperative execution regions
//!
//! Each region owns a set of nodes and ticks them in insertion order on its
//! own thread at a fixed interval. A failing node is logged and the region
//! keeps running.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default interval for a fast-ticking region.
pub const FAST_TICK: Duration = Duration::from_millis(10);

/// A node scheduled by a region.
pub trait RegionNode: Send {
    fn name(&self) -> &str;

    /// Called once per region tick.
    fn tick(&mut self) -> Result<()>;
}

/// Counters returned when a region stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionReport {
    pub ticks: u64,
    pub node_errors: u64,
}

/// A named scheduling domain
pub struct Region {
    name: String,
    interval: Duration,
    nodes: Vec<Box<dyn RegionNode>>,
}

impl Region {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            nodes: Vec::new(),
        }
    }

    pub fn fast_tick(name: impl Into<String>) -> Self {
        Self::new(name, FAST_TICK)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, node: impl RegionNode + 'static) {
        self.nodes.push(Box::new(node));
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Tick every node once; returns how many failed.
    pub fn tick_once(&mut self) -> u64 {
        let mut errors = 0;
        for node in self.nodes.iter_mut() {
            if let Err(e) = node.tick() {
                log::error!("[{}] node '{}' failed: {:#}", self.name, node.name(), e);
                errors += 1;
            }
        }
        errors
    }

    /// Move the region onto its own thread and start ticking.
    pub fn start(self) -> std::io::Result<RegionHandle> {
        let name = self.name.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(&stop_flag))?;

        Ok(RegionHandle {
            name,
            stop,
            thread: Some(thread),
        })
    }

    fn run(mut self, stop: &AtomicBool) -> RegionReport {
        log::info!(
            "Region '{}' started ({} node(s), tick {:?})",
            self.name,
            self.nodes.len(),
            self.interval
        );

        let mut report = RegionReport::default();

        while !stop.load(Ordering::Acquire) {
            let frame_start = Instant::now();

            report.node_errors += self.tick_once();
            report.ticks += 1;

            // Maintain tick rate
            let frame_time = frame_start.elapsed();
            if frame_time < self.interval {
                std::thread::sleep(self.interval - frame_time);
            }
        }

        log::info!(
            "Region '{}' stopped after {} tick(s), {} node error(s)",
            self.name,
            report.ticks,
            report.node_errors
        );
        report
    }
}

/// Handle to a running region
pub struct RegionHandle {
    name: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<RegionReport>>,
}

impl RegionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the region to stop after its current tick.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the region and wait for its thread.
    pub fn stop(mut self) -> Result<RegionReport> {
        self.request_stop();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow::anyhow!("region '{}' panicked", self.name)),
            None => Ok(RegionReport::default()),
        }
    }
}

impl Drop for RegionHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.request_stop();
            let _ = thread.join();
        }
    }
}
