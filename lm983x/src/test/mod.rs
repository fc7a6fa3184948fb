// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers
mod scanner_mock;

pub(crate) use scanner_mock::{MockDelay, MockError, MockScanner, ScannerOperation};

/// Send log output to the test harness, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs the subscriber.
pub(crate) fn init_logging() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
