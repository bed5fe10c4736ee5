//! Prometheus metrics for the localdeals core.
//!
//! This module provides:
//! - Cache metrics (hits, misses, tombstones, rebuilds)
//! - Lock metrics (acquired, contended)
//! - Flash-sale outcomes and issued IDs

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_TOMBSTONES_TOTAL: &str = "cache_tombstones_total";
    pub const CACHE_REBUILDS_TOTAL: &str = "cache_rebuilds_total";
    pub const CACHE_REBUILDS_ACTIVE: &str = "cache_rebuilds_active";

    // Lock metrics
    pub const LOCK_ACQUIRED_TOTAL: &str = "lock_acquired_total";
    pub const LOCK_CONTENDED_TOTAL: &str = "lock_contended_total";

    // Flash-sale metrics
    pub const SECKILL_ORDERS_TOTAL: &str = "seckill_orders_total";
    pub const IDS_ISSUED_TOTAL: &str = "ids_issued_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Record a cache hit. `strategy` is one of the cache query strategies.
pub fn record_cache_hit(strategy: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "strategy" => strategy).increment(1);
}

pub fn record_cache_miss(strategy: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "strategy" => strategy).increment(1);
}

/// Record a read answered by a tombstone.
pub fn record_tombstone_hit() {
    counter!(names::CACHE_TOMBSTONES_TOTAL).increment(1);
}

/// Record a logical-expiry rebuild by outcome: `submitted`, `dropped`,
/// `completed` or `failed`.
pub fn record_rebuild(outcome: &'static str) {
    counter!(names::CACHE_REBUILDS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn set_active_rebuilds(count: usize) {
    gauge!(names::CACHE_REBUILDS_ACTIVE).set(count as f64);
}

// =============================================================================
// Lock Metrics
// =============================================================================

pub fn record_lock_acquired() {
    counter!(names::LOCK_ACQUIRED_TOTAL).increment(1);
}

pub fn record_lock_contended() {
    counter!(names::LOCK_CONTENDED_TOTAL).increment(1);
}

// =============================================================================
// Flash-sale Metrics
// =============================================================================

/// Record a purchase attempt by outcome (`placed` or a rejection reason).
pub fn record_seckill_outcome(outcome: &'static str) {
    counter!(names::SECKILL_ORDERS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_id_issued(prefix: &str) {
    counter!(names::IDS_ISSUED_TOTAL, "prefix" => prefix.to_string()).increment(1);
}
