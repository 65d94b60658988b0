//! Waiting for telemetry.
//!
//! Sensor checks need "the next message of type X, if one arrives within T". Each wait
//! registers a one-shot waiter; the inbound handler completes every waiter whose
//! message ids match the frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::trace;

use crate::transport::{Frame, TransportAdapter};

struct Waiter {
    id: u64,
    msg_ids: Vec<u32>,
    reply: oneshot::Sender<Frame>,
}

#[derive(Clone)]
pub struct TelemetryWatch {
    waiters: Arc<Mutex<Vec<Waiter>>>,
    next_id: Arc<AtomicU64>,
}

impl TelemetryWatch {
    pub fn new(transport: &dyn TransportAdapter) -> Self {
        let waiters: Arc<Mutex<Vec<Waiter>>> = Arc::default();

        let inbound = Arc::clone(&waiters);
        transport.on_receive(Arc::new(move |frame: &Frame| {
            let mut waiters = inbound.lock().unwrap_or_else(PoisonError::into_inner);
            if waiters.is_empty() {
                return;
            }
            let mut index = 0;
            while index < waiters.len() {
                if waiters[index].msg_ids.contains(&frame.msg_id) {
                    let waiter = waiters.swap_remove(index);
                    let _ = waiter.reply.send(frame.clone());
                } else {
                    index += 1;
                }
            }
        }));

        Self {
            waiters,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Wait for the next frame with message id `msg_id`.
    pub async fn next(&self, msg_id: u32, timeout: Duration) -> Option<Frame> {
        self.next_of(&[msg_id], timeout).await
    }

    /// Wait for the next frame whose message id is any of `msg_ids`.
    pub async fn next_of(&self, msg_ids: &[u32], timeout: Duration) -> Option<Frame> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.lock().push(Waiter {
            id,
            msg_ids: msg_ids.to_vec(),
            reply: reply_tx,
        });

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(frame)) => Some(frame),
            _ => {
                self.lock().retain(|waiter| waiter.id != id);
                trace!("No message {:?} within {:?}", msg_ids, timeout);
                None
            }
        }
    }

    /// Wait for the next frame of `msg_id` that `decode` accepts.
    pub async fn next_decoded<T, E>(
        &self,
        msg_id: u32,
        timeout: Duration,
        decode: impl Fn(&[u8]) -> Result<T, E>,
    ) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let frame = self.next(msg_id, remaining).await?;
            if let Ok(value) = decode(&frame.payload) {
                return Some(value);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
