//! # Voice Gateway Backend - Main Application Entry Point
//!
//! This is the main entry point for the voice-gateway-backend server: a
//! real-time speech-to-text gateway. Clients stream WAV audio over a
//! WebSocket and receive transcripts as the shared recognition engine
//! produces them.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: The entire application is asynchronous for better performance
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Error handling using Rust's Result type
//! - **Arc & RwLock**: Thread-safe shared state management
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **state**: Manages shared application state, metrics, and the shutdown signal
//! - **health**: Provides system health monitoring endpoints
//! - **middleware**: Custom request processing logic (logging, metrics)
//! - **handlers**: HTTP request handlers for API endpoints
//! - **error**: Custom error types and HTTP error responses
//! - **websocket**: The `/transcribe` upgrade endpoint and channel adapters
//! - **session**: Per-connection state machine (ingress, reassembly, worker, egress)
//! - **transcription**: Recognition engine adapter and process-wide concurrency limiter

mod config; // Configuration management (config.rs)
mod error; // Error handling types (error.rs)
mod handlers; // HTTP request handlers (handlers/ directory)
mod health; // Health check endpoints (health.rs)
mod middleware; // Custom middleware (middleware/ directory)
mod session; // Per-connection transcription sessions (session/ directory)
mod state; // Application state management (state.rs)
mod transcription; // Engine adapter and concurrency limiter (transcription/ directory)
mod websocket; // WebSocket acceptor (websocket.rs)

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::{ConcurrencyLimiter, EngineAdapter, WhisperRecognizer};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Loads the recognition model** once, shared by all sessions
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown**, draining live sessions via the
///    process-wide cancellation token
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-gateway-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{}, engine slots: {}",
        config.server.host, config.server.port, config.performance.max_concurrent_transcriptions
    );

    // Load the whisper model up front. This is blocking native code and by
    // far the slowest part of startup, so it runs on the blocking pool.
    let model_path = config.engine.model_path.clone();
    let recognizer =
        tokio::task::spawn_blocking(move || WhisperRecognizer::load(&model_path)).await??;

    // One engine adapter and one limiter for the whole process; every
    // session shares them.
    let engine = Arc::new(EngineAdapter::new(
        Arc::new(recognizer),
        ConcurrencyLimiter::new(config.performance.max_concurrent_transcriptions),
    ));

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers(app_state.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new({
        let app_state = app_state.clone();
        let engine = engine.clone();
        move || {
            // Configure CORS to allow web clients from any origin
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .app_data(web::Data::new(app_state.clone()))
                .app_data(web::Data::from(engine.clone()))
                // Middleware executes in reverse order for responses
                .wrap(cors)
                .wrap(Logger::default())
                .wrap(middleware::MetricsMiddleware)
                .wrap(middleware::RequestLogging)
                // The WebSocket transcription endpoint
                .route("/transcribe", web::get().to(websocket::transcribe))
                // Management API under /api/v1
                .service(
                    web::scope("/api/v1")
                        .route("/health", web::get().to(health::health_check))
                        .route("/metrics", web::get().to(health::detailed_metrics))
                        .route("/config", web::get().to(handlers::get_config))
                        .route("/config", web::put().to(handlers::update_config)),
                )
                // Also provide health check at root level for convenience
                .route("/health", web::get().to(health::health_check))
        }
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);
    let shutdown = app_state.shutdown_token().clone();

    // Wait for either the server to finish OR the shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = shutdown.cancelled() => {
            info!("Shutdown signal received, draining sessions and stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "voice_gateway_backend=debug")
/// - If not set, defaults to "voice_gateway_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_gateway_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// ## What this does:
/// - Listens for SIGTERM (termination signal from system)
/// - Listens for SIGINT (interrupt signal, usually Ctrl+C)
/// - When either signal is received, cancels the process shutdown token;
///   every live session runs under a child of that token, so they all drain
fn setup_signal_handlers(state: AppState) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        state.trigger_shutdown();
    });
}
