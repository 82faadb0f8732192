// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Background worker that folds filled record buffers into the take.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::{HeapCons, HeapProd};

use tracing::{debug, warn};

use super::{RecordBuffer, TakeHandle, Wakeup};

/// How long the worker parks between occupancy checks when no signal
/// arrives. A hand-off signal wakes it immediately.
const PARK_TIMEOUT: Duration = Duration::from_millis(25);

/// Owns the consolidator thread. Dropping the handle stops the thread.
pub struct Consolidator {
    running: Arc<AtomicBool>,
    wake: Arc<Wakeup>,
    handle: Option<JoinHandle<()>>,
}

impl Consolidator {
    pub(crate) fn spawn(
        mut full_rx: HeapCons<RecordBuffer>,
        mut empty_tx: HeapProd<RecordBuffer>,
        take: TakeHandle,
        wake: Arc<Wakeup>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = Arc::clone(&running);
        let park = Arc::clone(&wake);

        let handle = thread::spawn(move || {
            debug!("consolidator started");
            while running_flag.load(Ordering::Acquire) {
                if full_rx.is_empty() {
                    park.wait(PARK_TIMEOUT);
                }
                // Spurious wakeups land here with nothing to do; the
                // occupancy check below is the real gate.
                while let Some(mut buffer) = full_rx.try_pop() {
                    consolidate(&take, &mut buffer);
                    if empty_tx.try_push(buffer).is_err() {
                        warn!("drained buffer could not be returned for reuse");
                    }
                }
            }
            // Final pass so a hand-off racing the shutdown signal is
            // not lost.
            while let Some(mut buffer) = full_rx.try_pop() {
                consolidate(&take, &mut buffer);
                let _ = empty_tx.try_push(buffer);
            }
            debug!("consolidator stopped");
        });

        Self {
            running,
            wake,
            handle: Some(handle),
        }
    }

    /// Whether the worker thread is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop the worker. Wakes it out of its park so the join returns
    /// promptly; any buffer already handed off is still drained first
    /// by the loop's final pass.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wake.notify();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Consolidator {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

/// Append a drained buffer's events to the take, preserving order, and
/// clear the buffer for reuse.
fn consolidate(take: &TakeHandle, buffer: &mut RecordBuffer) {
    if buffer.is_empty() {
        return;
    }
    let current = take.snapshot();
    let mut next = Vec::with_capacity(current.len() + buffer.len());
    next.extend_from_slice(&current);
    next.extend_from_slice(buffer.as_slice());
    take.replace(next);
    debug!(events = buffer.len(), total = take.len(), "buffer consolidated");
    buffer.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{record_pipeline, TimedEvent};
    use std::time::Instant;

    fn wait_for_take(take: &TakeHandle, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while take.len() < len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_consolidate_appends_and_clears() {
        let take = TakeHandle::new();
        take.replace(vec![TimedEvent::new(0x90, 1, 100, 3, 0)]);

        let mut buffer = RecordBuffer::with_capacity(4);
        buffer.push(TimedEvent::new(0x80, 1, 100, 3, 5));
        consolidate(&take, &mut buffer);

        assert_eq!(take.len(), 2);
        assert!(buffer.is_empty());

        let snapshot = take.snapshot();
        assert_eq!(snapshot[0].status, 0x90);
        assert_eq!(snapshot[1].status, 0x80);
    }

    #[test]
    fn test_spurious_wakeup_is_harmless() {
        let take = TakeHandle::new();
        let (buffer, consolidator) = record_pipeline(8, take.clone());

        // Signal with nothing handed off; the worker re-parks.
        for _ in 0..3 {
            consolidator.wake.notify();
        }
        thread::sleep(Duration::from_millis(20));
        assert!(take.is_empty());
        assert!(consolidator.is_running());

        drop(buffer);
        consolidator.stop();
    }

    #[test]
    fn test_stop_wakes_parked_worker_promptly() {
        let take = TakeHandle::new();
        let (mut buffer, consolidator) = record_pipeline(8, take.clone());

        buffer.push(TimedEvent::new(0x90, 60, 100, 3, 0));
        buffer.flush();
        wait_for_take(&take, 1);

        let started = Instant::now();
        consolidator.stop();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(take.len(), 1);
    }
}
