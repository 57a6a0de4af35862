use std::collections::VecDeque;
use std::sync::Mutex;

use log::debug;

use crate::wire::Frame;

/// A frame waiting in a queue, together with the number of times the sender
/// has already tried to deliver it.
#[derive(Clone, Debug)]
pub struct QueuedFrame {
    pub frame: Frame,
    pub attempts: u32,
}

impl QueuedFrame {
    pub fn new(frame: Frame) -> Self {
        Self { frame, attempts: 0 }
    }
}

/// Unbounded FIFO buffer between protocol producers and the network loops.
/// Two instances exist per process, "Outbound" and "Inbound". The queue
/// never drops or blocks; backpressure is not applied by design.
pub struct MessageQueue {
    name: &'static str,
    frames: Mutex<VecDeque<QueuedFrame>>,
}

impl MessageQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            frames: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn enqueue(&self, frame: QueuedFrame) {
        debug!("Adding message to the {} queue", self.name);
        self.frames.lock().unwrap().push_back(frame);
    }

    pub fn dequeue(&self) -> Option<QueuedFrame> {
        let frame = self.frames.lock().unwrap().pop_front();
        if frame.is_some() {
            debug!("Removing message from the {} queue", self.name);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().unwrap().is_empty()
    }

    /// Copy of the queue contents, head first, for operator listing.
    pub fn snapshot(&self) -> Vec<QueuedFrame> {
        self.frames.lock().unwrap().iter().cloned().collect()
    }
}
