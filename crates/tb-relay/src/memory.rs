//! In-memory publisher with scripted failures, for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tb_core::Frame;

use crate::publisher::{Ack, Publisher, PublishError};

/// What the next publish call does instead of succeeding.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Reject,
    Unreachable,
    /// Never answers; the pump's timeout has to fire.
    Hang,
}

#[derive(Default)]
struct Inner {
    published: Vec<Frame>,
    faults: VecDeque<Fault>,
    calls: usize,
}

/// Records every successful publish. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with `fault`, after any faults already queued.
    pub fn fail_next(&self, n: usize, fault: Fault) {
        let mut inner = self.inner.lock().unwrap();
        inner.faults.extend(std::iter::repeat_n(fault, n));
    }

    pub fn published(&self) -> Vec<Frame> {
        self.inner.lock().unwrap().published.clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.published()
            .iter()
            .map(|f| String::from_utf8_lossy(&f.payload).into_owned())
            .collect()
    }

    pub fn seqs(&self) -> Vec<u64> {
        self.published().iter().map(|f| f.seq).collect()
    }

    /// Total publish calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.inner.lock().unwrap().calls
    }

    /// Wait until at least `n` frames were published. Returns false on timeout.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.published().len() < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&mut self, frame: &Frame) -> Result<Ack, PublishError> {
        let fault = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls += 1;
            inner.faults.pop_front()
        };
        match fault {
            None => {
                self.inner.lock().unwrap().published.push(frame.clone());
                Ok(Ack { receivers: 1 })
            }
            Some(Fault::Reject) => Err(PublishError::Rejected("scripted".into())),
            Some(Fault::Unreachable) => Err(PublishError::Connect("scripted".into())),
            Some(Fault::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
