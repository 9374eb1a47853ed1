//! # Sealbox Relay Server
//!
//! Relay for exactly-two-party end-to-end-encrypted messaging: identity,
//! prekey distribution, and message routing, with no access to plaintext
//! content.

use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use clap::Parser;
use sealbox_server::handlers::{
    auth_handler, health_handler, key_bundle_handler, partner_handler, prekey_count_handler,
    profile_handler, register_handler, rotate_signed_prekey_handler, upload_prekeys_handler,
    ws_handler,
};
use sealbox_server::state::{AppState, RelayConfig, SharedState};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server bind address
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Database file path
    #[arg(short = 'd', long, default_value = "sealbox.db")]
    database: String,

    /// Registration cap
    #[arg(long, default_value_t = 2)]
    max_users: u32,

    /// HMAC secret for session credentials; random per process when omitted
    #[arg(long)]
    credential_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new("sealbox_server=info,tower_http=info"),
        ))
        .init();

    let args = Args::parse();

    info!("Starting Sealbox Relay Server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Bind address: {}:{}", args.host, args.port);

    if args.credential_secret.is_none() {
        warn!("No credential secret configured - session credentials will not survive a restart");
    }

    // Initialize shared state with database
    info!("Initializing database: {}", args.database);
    let config = RelayConfig {
        max_users: args.max_users,
        credential_secret: args.credential_secret.clone(),
    };
    let app_state = AppState::new(&args.database, config).await?;
    let state: SharedState = Arc::new(app_state);

    // Build the router with all endpoints
    let app = Router::new()
        // REST endpoints
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/auth", post(auth_handler))
        .route("/profile", get(profile_handler))
        .route("/partner", get(partner_handler))
        // PreKey endpoints
        .route("/keys/:user_id", get(key_bundle_handler))
        .route("/keys/onetime", post(upload_prekeys_handler))
        .route("/keys/signed", put(rotate_signed_prekey_handler))
        .route("/keys/count", get(prekey_count_handler))
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        // Add shared state
        .with_state(state)
        // Add middleware
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    println!("🔐 Sealbox Relay Server starting...");
    println!("📡 Listening on {}:{}", args.host, args.port);
    println!("🔒 Zero-knowledge relay: ciphertext in, ciphertext out");
    println!("👥 Registration cap: {} users", args.max_users);
    println!();
    println!("Endpoints:");
    println!("  GET    /health        - Health check");
    println!("  POST   /register      - User registration");
    println!("  POST   /auth          - Session credential issuance");
    println!("  GET    /profile       - Own profile (Bearer)");
    println!("  GET    /partner       - Partner profile (Bearer)");
    println!("  GET    /keys/:user_id - Fetch key bundle, consumes a one-time prekey (Bearer)");
    println!("  POST   /keys/onetime  - Upload one-time prekeys (Bearer)");
    println!("  PUT    /keys/signed   - Rotate signed prekey (Bearer)");
    println!("  GET    /keys/count    - Remaining one-time prekey count (Bearer)");
    println!("  WS     /ws            - Live channel (authenticate handshake)");
    println!();

    // Create the server
    let listener = tokio::net::TcpListener::bind(&format!("{}:{}", args.host, args.port)).await?;

    info!("Server successfully bound to {}:{}", args.host, args.port);

    // Start the server
    axum::serve(listener, app).await?;

    info!("Shutting down server...");
    Ok(())
}
