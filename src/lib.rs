//! Parallel bulk loader for recipe, review and user exports.
//!
//! Rows flow through the pipeline in one direction:
//!
//! ```text
//! source ─▶ shaper ─▶ partition ─▶ batch_loader (× workers) ─▶ store
//!                                        │
//!                                        └─▶ stats ─▶ report
//! ```
//!
//! [`normalize`] turns raw cells into typed values and never fails,
//! [`import::batch_loader`] contains failures to the smallest unit it can
//! (row, batch, partition) and [`import::coordinator`] sums the results.

pub mod config;
pub mod error;
pub mod import;
pub mod normalize;
pub mod shaper;
pub mod source;
pub mod store;

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support;

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initialise `env_logger` once per process. `RUST_LOG` overrides the
/// default filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();
    });
}
