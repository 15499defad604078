//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request handlers
//! and WebSocket sessions simultaneously.
//!
//! ## Key Rust Concepts (IMPORTANT for beginners):
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: Every request and every session needs access to the same state
//! - **Memory safety**: Automatically cleans up data when the last reference is dropped
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Why needed**: Many requests read config simultaneously, few update it
//!
//! ### Cancellation token
//! - The process-wide shutdown signal. Each WebSocket session receives a
//!   child token, so cancelling the root drains every live session without
//!   the sessions knowing about each other.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Thread Safety Pattern:
/// This struct uses Arc<RwLock<T>> for all mutable data, which means:
/// - Multiple HTTP requests can read the same data simultaneously
/// - Only one request can modify data at a time
/// - No data races or memory corruption possible
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (constantly being updated by requests and sessions)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,

    /// Root of the shutdown signal tree. Cancelled by the signal handlers;
    /// sessions run under child tokens of this one.
    shutdown: CancellationToken,
}

/// Performance metrics collected across all HTTP requests and sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of live WebSocket transcription sessions
    pub active_sessions: u32,

    /// Detailed metrics for each API endpoint (URL path)
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    /// AppConfig is designed to be cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration with validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// The root shutdown token. Sessions should run under `child_token()`s
    /// of this so a process shutdown drains them all.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Request the whole process to drain and stop.
    pub fn trigger_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Increment the live session gauge (called when a WebSocket session starts).
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    /// Decrement the live session gauge (called when a WebSocket session ends).
    ///
    /// ## Safety check:
    /// Includes a check to prevent underflow (going below zero).
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// ## Why a snapshot:
    /// Clones the data so we don't hold the lock while serializing the HTTP
    /// response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Calculate the error rate for this endpoint as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
