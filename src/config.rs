//! Configuration for the reservation core.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Core configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// How many days of upcoming train runs the catalog loads
    pub catalog_window_days: u32,
    /// Bound on concurrent per-train metadata loads (the backing store's
    /// connection ceiling governs this; MySQL defaults to 151)
    pub catalog_load_parallelism: usize,
    /// How long an unpaid order holds its reservation
    pub unpaid_ttl: Duration,
    /// Maximum order cancellations per user per day
    pub daily_cancel_limit: u32,
    /// Ids fetched per pool refill
    pub id_pool_capacity: u64,
    /// How often the expiry sweeper runs
    pub expiry_sweep_interval: Duration,
    /// Whether issued tickets may still be refunded (policy under review)
    pub allow_refund_after_issue: bool,
}

impl CoreConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            catalog_window_days: env::var("RAILBOOK_CATALOG_WINDOW_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            catalog_load_parallelism: env::var("RAILBOOK_CATALOG_LOAD_PARALLELISM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),
            unpaid_ttl: Duration::from_secs(
                env::var("RAILBOOK_UNPAID_TTL_MINUTES")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(30)
                    * 60,
            ),
            daily_cancel_limit: env::var("RAILBOOK_DAILY_CANCEL_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            id_pool_capacity: env::var("RAILBOOK_ID_POOL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
            expiry_sweep_interval: Duration::from_secs(
                env::var("RAILBOOK_EXPIRY_SWEEP_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            allow_refund_after_issue: env::var("RAILBOOK_ALLOW_REFUND_AFTER_ISSUE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            catalog_window_days: 30,
            catalog_load_parallelism: 120,
            unpaid_ttl: Duration::from_secs(30 * 60),
            daily_cancel_limit: 3,
            id_pool_capacity: 10_000,
            expiry_sweep_interval: Duration::from_secs(60),
            allow_refund_after_issue: true,
        }
    }
}
