// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter directive for a verbosity level (number of `-v` flags)
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "podcore=info,warn",
        1 => "podcore=debug,info",
        _ => "podcore=trace,debug",
    }
}

/// Install the global tracing subscriber, writing diagnostics to stderr
///
/// `RUST_LOG` takes precedence over `verbosity`. Calling this twice is harmless;
/// the second subscriber is not installed.
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0);

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
    {
        tracing::debug!(error = %e, "logging already initialized");
    }
}
