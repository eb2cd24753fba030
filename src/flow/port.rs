//! Typed push ports
//!
//! A source fans each fired event out to every connected sink. Sinks queue
//! events until their owning region drains them, so delivery may cross
//! threads; order per source is preserved.

use crate::error::WiringError;
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receiving end of a connection
pub struct EventSink<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    connected: Arc<AtomicBool>,
}

impl<T> EventSink<T> {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Next queued event, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Number of events waiting to be handled.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl<T> Default for EventSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending end of zero or more connections
pub struct EventSource<T> {
    targets: Vec<Sender<T>>,
}

impl<T: Clone> EventSource<T> {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
        }
    }

    /// Link this source to `sink`. A sink accepts exactly one upstream source.
    pub fn connect(&mut self, sink: &EventSink<T>) -> Result<(), WiringError> {
        if sink.connected.swap(true, Ordering::AcqRel) {
            return Err(WiringError::SinkAlreadyConnected);
        }
        self.targets.push(sink.tx.clone());
        Ok(())
    }

    /// Push `event` to every connected sink and return how many received it.
    /// With no connections the event is dropped.
    pub fn fire(&self, event: T) -> usize {
        let Some((last, rest)) = self.targets.split_last() else {
            log::trace!("Event dropped: source has no connections");
            return 0;
        };

        let mut delivered = 0;
        for target in rest {
            if target.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        if last.send(event).is_ok() {
            delivered += 1;
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.targets.len()
    }
}

impl<T: Clone> Default for EventSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `source >> sink`
pub fn connect<T: Clone>(source: &mut EventSource<T>, sink: &EventSink<T>) -> Result<(), WiringError> {
    source.connect(sink)
}

/// Input-handling capability of a node.
pub trait Consume<T> {
    type Error;

    fn consume(&mut self, input: T) -> Result<(), Self::Error>;
}

/// Output-emission capability of a node.
pub trait Produce<U> {
    fn out_port(&mut self) -> &mut EventSource<U>;
}
