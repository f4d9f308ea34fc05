//! Stress runs for the sync server.
//!
//! These exercise many devices syncing at once against one shared store,
//! and many workers racing on the same key.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use easync_server::TransportRequest;

use crate::fixtures::{email_payload, ResponseView, ServerFixture, SyncRequestBuilder};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total requests sent.
    pub total_ops: usize,
    /// Requests answered with a committed or replayed turn.
    pub successful_ops: usize,
    /// Requests answered with an error status.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Requests per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total requests: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} req/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Concurrent devices (one thread each) or racing workers.
    pub threads: usize,
    /// Collections each device syncs.
    pub collections: usize,
    /// Turns per collection, after the initial one.
    pub turns: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            collections: 3,
            turns: 20,
        }
    }
}

/// Every device walks every collection through `turns` incremental turns,
/// with a new server item appearing before each.
///
/// Devices never share a key, so every request must succeed.
pub fn stress_device_turns(fixture: &ServerFixture, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let server = Arc::clone(&fixture.server);
            let backend = Arc::clone(&fixture.backend);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                let device = format!("device-{t}");
                let mut keys = vec!["0".to_string(); config.collections];
                for turn in 0..=config.turns {
                    for (c, key) in keys.iter_mut().enumerate() {
                        let collection = format!("folder-{c}");
                        let item = format!("{device}-{turn}");
                        backend.add(&collection, &item, email_payload(&item, "body"));

                        let body = SyncRequestBuilder::new().collection(key, &collection).build();
                        let response =
                            server.handle(&TransportRequest::new(&device, body));
                        if response.status != 200 {
                            failed.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        let view = ResponseView::parse(&response.body);
                        match view.collections.first() {
                            Some(c) if c.status == 1 => {
                                *key = c.sync_key.clone();
                                successful.fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// `threads` workers present the same key at once, `turns` times, after
/// one initial turn.
///
/// Per round exactly one worker commits. The rest either see the turn in
/// progress (503) or arrive after the commit with what is now the previous
/// key and get the replay.
pub fn stress_racing_turns(fixture: &ServerFixture, config: &StressConfig) -> StressTestResult {
    const DEVICE: &str = "racer";
    const COLLECTION: &str = "contended";

    let mut successful = 0usize;
    let mut failed = 0usize;
    let start = Instant::now();
    let first = fixture.post(DEVICE, SyncRequestBuilder::new().collection("0", COLLECTION).build());
    if first.status != 200 {
        return StressTestResult::new(0, 1, start.elapsed());
    }
    let mut key = ResponseView::parse(&first.body).single().sync_key.clone();

    for round in 0..config.turns {
        fixture.backend.add(COLLECTION, &format!("r{round}"), email_payload("race", "body"));
        let barrier = Arc::new(Barrier::new(config.threads));
        let handles: Vec<_> = (0..config.threads)
            .map(|_| {
                let server = Arc::clone(&fixture.server);
                let barrier = Arc::clone(&barrier);
                let body = SyncRequestBuilder::new().collection(&key, COLLECTION).build();
                thread::spawn(move || {
                    barrier.wait();
                    server.handle(&TransportRequest::new(DEVICE, body))
                })
            })
            .collect();

        for handle in handles {
            let response = handle.join().expect("Thread panicked");
            if response.status == 200 {
                let view = ResponseView::parse(&response.body);
                if let Some(c) = view.collections.first() {
                    key = c.sync_key.clone();
                }
                successful += 1;
            } else {
                failed += 1;
            }
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use easync_state::StateStore;

    #[test]
    fn test_device_turns() {
        let fixture = ServerFixture::memory();
        let config = StressConfig {
            threads: 4,
            collections: 2,
            turns: 10,
        };
        let result = stress_device_turns(&fixture, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 4 * 2 * 11);

        let store = fixture.server.machine().store();
        let state = store.get("device-0", "folder-1").unwrap().unwrap();
        assert_eq!(state.version_counter, 11);
    }

    #[test]
    fn test_racing_turns() {
        let fixture = ServerFixture::file();
        let config = StressConfig {
            threads: 4,
            collections: 1,
            turns: 8,
        };
        let result = stress_racing_turns(&fixture, &config);
        assert_eq!(result.total_ops, 4 * 8);
        assert!(result.successful_ops >= 8);

        let store = fixture.server.machine().store();
        let state = store.get("racer", "contended").unwrap().unwrap();
        assert_eq!(state.version_counter, 9);
        assert!(!state.is_in_progress());
    }
}
