use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, FragmentFailure, Result};
use crate::hash::Hash;

/// shared worker state, behind one lock
struct State {
    queue: Vec<Hash>,
    bytes: u64,
    done: Vec<Hash>,
    failures: Vec<FragmentFailure>,
}

/// what a pool run achieved
#[derive(Debug, Default)]
pub struct PoolOutcome {
    pub total: usize,
    pub bytes: u64,
    pub done: Vec<Hash>,
    pub failures: Vec<FragmentFailure>,
}

impl PoolOutcome {
    /// the byte count, or an error unless every fragment went through
    pub fn into_result(self, operation: &'static str) -> Result<u64> {
        if self.done.len() == self.total {
            return Ok(self.bytes);
        }
        Err(Error::IncompleteTransfer {
            operation,
            completed: self.done.len(),
            total: self.total,
            failures: self.failures,
        })
    }
}

/// drain `hashes` with up to `workers` threads
///
/// each thread builds its own context with `init` (an http session) and then pops
/// fragments until the queue is empty. the queue is sorted descending and popped from
/// the end. `work` returns the bytes moved for a fragment; its failures are recorded
/// and do not stop the other workers.
pub fn run<C, I, W>(name: &str, workers: usize, mut hashes: Vec<Hash>, init: I, work: W) -> PoolOutcome
where
    I: Fn() -> Result<C> + Sync,
    W: Fn(&C, &Hash) -> Result<u64> + Sync,
{
    hashes.sort_unstable_by(|a, b| b.cmp(a));
    hashes.dedup();
    let total = hashes.len();
    if total == 0 {
        return PoolOutcome::default();
    }

    let state = Mutex::new(State {
        queue: hashes,
        bytes: 0,
        done: Vec::new(),
        failures: Vec::new(),
    });
    let width = workers.clamp(1, total);

    thread::scope(|scope| {
        for i in 0..width {
            let state = &state;
            let init = &init;
            let work = &work;
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn_scoped(scope, move || {
                    let ctx = match init() {
                        Ok(ctx) => ctx,
                        Err(e) => {
                            warn!(worker = i, error = %e, "worker could not start");
                            return;
                        }
                    };
                    loop {
                        let Some(hash) = state.lock().queue.pop() else {
                            break;
                        };
                        match work(&ctx, &hash) {
                            Ok(bytes) => {
                                let mut state = state.lock();
                                state.bytes += bytes;
                                state.done.push(hash);
                                debug!(
                                    fragment = %hash.short(),
                                    done = state.done.len(),
                                    total,
                                    bytes = state.bytes,
                                    "fragment complete"
                                );
                            }
                            Err(e) => {
                                warn!(fragment = %hash.short(), error = %e, "fragment failed");
                                state.lock().failures.push(FragmentFailure {
                                    hash,
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                });
            if let Err(e) = spawned {
                warn!(worker = i, error = %e, "could not spawn worker thread");
            }
        }
    });

    let State {
        queue,
        bytes,
        done,
        mut failures,
    } = state.into_inner();
    // left over when no worker could start
    failures.extend(queue.into_iter().map(|hash| FragmentFailure {
        hash,
        reason: "not attempted".to_string(),
    }));

    PoolOutcome {
        total,
        bytes,
        done,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_string;
    use std::collections::HashSet;

    fn hashes(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash_string(&i.to_string())).collect()
    }

    #[test]
    fn test_every_fragment_processed_once() {
        let input = hashes(50);
        let seen = Mutex::new(Vec::new());
        let outcome = run("test", 8, input.clone(), || Ok(()), |_, hash| {
            seen.lock().push(*hash);
            Ok(10)
        });

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 50);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 50);
        assert_eq!(outcome.bytes, 500);
        assert_eq!(outcome.into_result("download").unwrap(), 500);
    }

    #[test]
    fn test_failures_make_the_set_fail() {
        let input = hashes(10);
        let bad = input[3];
        let outcome = run("test", 4, input, || Ok(()), |_, hash| {
            if *hash == bad {
                Err(Error::Build("nope".into()))
            } else {
                Ok(1)
            }
        });

        assert_eq!(outcome.done.len(), 9);
        match outcome.into_result("upload").unwrap_err() {
            Error::IncompleteTransfer {
                operation,
                completed,
                total,
                failures,
            } => {
                assert_eq!(operation, "upload");
                assert_eq!((completed, total), (9, 10));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].hash, bad);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_single_worker_pops_ascending() {
        let input = hashes(5);
        let order = Mutex::new(Vec::new());
        run("test", 1, input.clone(), || Ok(()), |_, hash| {
            order.lock().push(*hash);
            Ok(0)
        });
        let mut sorted = input;
        sorted.sort();
        assert_eq!(order.into_inner(), sorted);
    }

    #[test]
    fn test_init_failure_reports_everything() {
        let outcome = run::<(), _, _>("test", 2, hashes(3), || Err(Error::Unauthorized), |_, _| Ok(0));
        let err = outcome.into_result("download").unwrap_err();
        assert!(err.to_string().contains("0 of 3"));
    }
}
