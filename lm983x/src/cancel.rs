// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
//! Cooperative cancellation and wall-clock deadlines.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A flag that can be raised from another thread (or a signal handler) to stop a running
/// calibration or scan.
///
/// Clones share the same flag. Every blocking loop in this crate polls the token, and returns
/// [`Error::Cancelled`][crate::Error::Cancelled] once it is raised. Registers already written are
/// left as they are.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request, so the token can be reused for the next scan.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `Err(Cancelled)` if cancellation has been requested.
    pub fn check<T: core::fmt::Debug>(&self) -> Result<(), crate::Error<T>> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A point in time a wait loop gives up at.
#[derive(Clone, Copy, Debug)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    /// A deadline for moving the carriage `inches` at `speed` inches per second, plus a margin of
    /// `margin`.
    pub fn for_travel(inches: f64, speed: f64, margin: Duration) -> Self {
        let travel = if speed > 0.0 {
            Duration::from_secs_f64((inches / speed).max(0.0))
        } else {
            Duration::ZERO
        };
        Self::after(travel + margin)
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }
}
