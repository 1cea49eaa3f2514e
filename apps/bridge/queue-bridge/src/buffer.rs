//! Bounded FIFO between broker deliveries and the streaming loop.

use crate::models::CollectedMessage;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Which message gives way when a full buffer receives another one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest buffered message to make room
    #[default]
    DropOldest,
    /// Discard the incoming message
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            other => Err(format!(
                "unknown overflow policy '{}', expected 'drop_oldest' or 'drop_newest'",
                other
            )),
        }
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropOldest => write!(f, "drop_oldest"),
            OverflowPolicy::DropNewest => write!(f, "drop_newest"),
        }
    }
}

/// Mutex-guarded message queue. Append and drain are the only mutations.
#[derive(Debug)]
pub struct MessageBuffer {
    messages: Mutex<VecDeque<CollectedMessage>>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl MessageBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Append a message, returning the one dropped to stay within capacity.
    pub fn push(&self, message: CollectedMessage) -> Option<CollectedMessage> {
        let mut messages = self.lock();
        if messages.len() < self.capacity {
            messages.push_back(message);
            return None;
        }
        match self.policy {
            OverflowPolicy::DropOldest => {
                let evicted = messages.pop_front();
                messages.push_back(message);
                evicted
            }
            OverflowPolicy::DropNewest => Some(message),
        }
    }

    /// Take everything buffered, oldest first, leaving the buffer empty.
    pub fn drain(&self) -> Vec<CollectedMessage> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CollectedMessage>> {
        // Critical sections never panic midway, so a poisoned queue is still consistent.
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, OverflowPolicy::default())
    }
}
