// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Single-flight execution guard around the engine.
//!
//! At most one run may be in progress. A request that arrives while another
//! is running fails immediately with [`InferenceError::Busy`]; it is never
//! queued or retried.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::Array4;

use crate::engine::InferenceEngine;
use crate::error::{InferenceError, Result};

/// Owns the engine and enforces `Idle -> Running -> Idle`.
#[derive(Debug)]
pub struct InferenceGuard<E> {
    engine: Mutex<E>,
    busy: AtomicBool,
    input_name: String,
    output_name: String,
}

/// Clears the busy flag when dropped, on success, error, or unwind.
struct BusyRelease<'a>(&'a AtomicBool);

impl Drop for BusyRelease<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<E: InferenceEngine> InferenceGuard<E> {
    /// Take ownership of a loaded engine.
    pub fn new(engine: E) -> Self {
        let input_name = engine.input_name().to_string();
        let output_name = engine.output_name().to_string();
        Self {
            engine: Mutex::new(engine),
            busy: AtomicBool::new(false),
            input_name,
            output_name,
        }
    }

    /// Run the engine if it is idle.
    ///
    /// # Errors
    ///
    /// * `Busy` if another run is in progress.
    /// * Whatever the engine returns.
    pub fn run(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(InferenceError::Busy);
        }
        let _release = BusyRelease(&self.busy);

        // Uncontended: the busy flag already grants exclusive access. A
        // poisoned lock only means an earlier run panicked mid-flight.
        let mut engine = self
            .engine
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        engine.run(input)
    }

    /// Whether a run is currently in progress.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Input slot name discovered from the model.
    #[must_use]
    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Output slot name discovered from the model.
    #[must_use]
    pub fn output_name(&self) -> &str {
        &self.output_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// Engine that blocks until released, then echoes the input length.
    struct GatedEngine {
        entered: Option<Arc<Barrier>>,
        release: Option<mpsc::Receiver<()>>,
        fail: bool,
    }

    impl InferenceEngine for GatedEngine {
        fn input_name(&self) -> &str {
            "images"
        }

        fn output_name(&self) -> &str {
            "output0"
        }

        #[allow(clippy::cast_precision_loss)]
        fn run(&mut self, input: &Array4<f32>) -> Result<Vec<f32>> {
            if let Some(entered) = &self.entered {
                entered.wait();
            }
            if let Some(release) = &self.release {
                release.recv().ok();
            }
            if self.fail {
                return Err(InferenceError::InferenceError("boom".to_string()));
            }
            Ok(vec![input.len() as f32])
        }
    }

    fn input() -> Array4<f32> {
        Array4::zeros((1, 3, 2, 2))
    }

    #[test]
    fn test_second_run_while_running_is_busy() {
        let entered = Arc::new(Barrier::new(2));
        let (release_tx, release_rx) = mpsc::channel();
        let guard = Arc::new(InferenceGuard::new(GatedEngine {
            entered: Some(entered.clone()),
            release: Some(release_rx),
            fail: false,
        }));

        let worker = {
            let guard = guard.clone();
            thread::spawn(move || guard.run(&input()))
        };

        entered.wait();
        assert!(guard.is_busy());
        assert!(matches!(guard.run(&input()), Err(InferenceError::Busy)));

        release_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap().unwrap(), vec![12.0]);
        assert!(!guard.is_busy());

        // Accepted again once the first run has finished. The worker run
        // consumed the barrier, so feed the next wait from this thread.
        let waiter = {
            let entered = entered.clone();
            thread::spawn(move || entered.wait())
        };
        release_tx.send(()).unwrap();
        assert!(guard.run(&input()).is_ok());
        waiter.join().unwrap();
    }

    #[test]
    fn test_failed_run_releases_guard() {
        let guard = InferenceGuard::new(GatedEngine {
            entered: None,
            release: None,
            fail: true,
        });

        assert!(matches!(
            guard.run(&input()),
            Err(InferenceError::InferenceError(_))
        ));
        assert!(!guard.is_busy());
        assert!(matches!(
            guard.run(&input()),
            Err(InferenceError::InferenceError(_))
        ));
    }

    #[test]
    fn test_names_are_captured() {
        let guard = InferenceGuard::new(GatedEngine {
            entered: None,
            release: None,
            fail: false,
        });
        assert_eq!(guard.input_name(), "images");
        assert_eq!(guard.output_name(), "output0");
    }
}
