//! Single-flight cell: a value computed at most once, shared by all callers.
//!
//! A [`Flight`] moves through `Pending → Computing → Ready | Failed`. The
//! first caller of [`Flight::run`] claims the computation; every other
//! caller blocks on a condition variable until it finishes and then sees
//! the same outcome. The state lock is only held across transitions, never
//! while the computation itself runs, so a slow computation blocks nobody
//! except waiters on this one cell.
//!
//! The claiming thread is recorded. Re-entering a cell from the thread that
//! is computing it would wait on itself forever; it returns
//! [`ImageError::CyclicDerivation`] instead.
//!
//! Outcomes are sticky: a failure is observed by every later caller for the
//! lifetime of the cell. A fresh session builds fresh cells and so retries.

use crate::error::{ImageError, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

enum Phase<T> {
    Pending,
    Computing(ThreadId),
    Ready(T),
    Failed(ImageError),
}

pub(crate) struct Flight<T> {
    /// Label used in cycle errors (fingerprint or target path).
    label: String,
    phase: Mutex<Phase<T>>,
    done: Condvar,
}

impl<T: Clone> Flight<T> {
    pub(crate) fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            phase: Mutex::new(Phase::Pending),
            done: Condvar::new(),
        }
    }

    /// Return the finished value, running `compute` first if nobody has.
    pub(crate) fn run(&self, compute: impl FnOnce() -> Result<T>) -> Result<T> {
        let me = thread::current().id();
        let mut phase = self.lock();
        loop {
            match &*phase {
                Phase::Ready(value) => return Ok(value.clone()),
                Phase::Failed(err) => return Err(err.clone()),
                Phase::Computing(owner) if *owner == me => {
                    return Err(ImageError::CyclicDerivation(self.label.clone()));
                }
                Phase::Computing(_) => {
                    phase = self
                        .done
                        .wait(phase)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Phase::Pending => {
                    *phase = Phase::Computing(me);
                    break;
                }
            }
        }
        drop(phase);

        let mut guard = CompletionGuard {
            flight: self,
            armed: true,
        };
        let outcome = compute();
        guard.armed = false;
        self.finish(match &outcome {
            Ok(value) => Phase::Ready(value.clone()),
            Err(err) => Phase::Failed(err.clone()),
        });
        outcome
    }

    /// The finished value, if the computation already succeeded.
    pub(crate) fn peek(&self) -> Option<T> {
        match &*self.lock() {
            Phase::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase<T>> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Flight<T> {
    fn finish(&self, phase: Phase<T>) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
        self.done.notify_all();
    }
}

/// Marks the cell failed if the computation unwinds, so waiters wake up.
struct CompletionGuard<'a, T> {
    flight: &'a Flight<T>,
    armed: bool,
}

impl<T> Drop for CompletionGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.flight.finish(Phase::Failed(ImageError::computation(
                &self.flight.label,
                "computation panicked",
            )));
        }
    }
}
