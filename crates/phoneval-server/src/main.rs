//! phoneval HTTP Server
//!
//! Axum-based server for metered phone validation, API key issuance
//! through PayPal checkout or free signup, and SMS one-time passcodes.

mod app;
mod handlers;
mod state;
mod throttle;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use phoneval_billing::{
    CredentialIssuer, CredentialStore, DisabledNotifier, Fulfillment, MemoryCredentialStore, Notifier, PayPalClient,
    PlanCatalog, ResendNotifier,
};
use phoneval_otp::{E164Parser, MemoryAttemptStore, PhoneParser, RateLimitPolicy, TwilioVerifyClient, VerificationFlow};

use crate::state::AppState;
use crate::throttle::DemoRateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    let catalog = PlanCatalog::from_env()?;
    tracing::info!(default_paid_plan = %catalog.default_paid(), "Plan catalog loaded");

    // Welcome emails
    let notifier: Arc<dyn Notifier> = match ResendNotifier::from_env() {
        Ok(resend) => {
            tracing::info!("✓ Resend configured");
            Arc::new(resend)
        }
        Err(e) => {
            tracing::warn!("⚠ Resend not configured - welcome emails disabled");
            tracing::warn!("  Set RESEND_KEY in .env");
            Arc::new(DisabledNotifier::new(e.to_string()))
        }
    };

    let issuer = Arc::new(CredentialIssuer::new(credentials.clone(), catalog, notifier));

    // Payments
    let payments = match PayPalClient::from_env() {
        Ok(client) => {
            tracing::info!(mode = ?client.mode(), "✓ PayPal configured");
            Some(Arc::new(Fulfillment::new(issuer.clone(), Arc::new(client))))
        }
        Err(_) => {
            tracing::warn!("⚠ PayPal not configured - payments disabled");
            tracing::warn!("  Set PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET in .env");
            None
        }
    };

    // OTP
    let parser: Arc<dyn PhoneParser> = Arc::new(E164Parser::new());
    let otp = match TwilioVerifyClient::from_env() {
        Ok(client) => {
            tracing::info!("✓ Twilio Verify configured");
            Some(Arc::new(VerificationFlow::new(
                parser.clone(),
                Arc::new(client),
                Arc::new(MemoryAttemptStore::new()),
                RateLimitPolicy::default(),
            )))
        }
        Err(_) => {
            tracing::warn!("⚠ Twilio not configured - SMS verification disabled");
            tracing::warn!("  Set TWILIO_SID, TWILIO_AUTH_TOKEN and TWILIO_VERIFY_SERVICE in .env");
            None
        }
    };

    let state = AppState {
        credentials,
        issuer,
        payments,
        otp,
        parser,
        demo_limiter: DemoRateLimiter::default(),
    };

    let app = app::router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 phoneval server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                   - Health check");
    tracing::info!("  GET  /api/validate             - Validate a number (x-api-key)");
    tracing::info!("  GET  /api/test-validate        - Public demo validation");
    tracing::info!("  POST /api/generate-free-key    - Free tier signup");
    tracing::info!("  POST /api/create-paypal-order  - Start checkout");
    tracing::info!("  POST /api/capture-paypal-order - Capture approved order");
    tracing::info!("  POST /api/paypal-webhook       - Payment notification");
    tracing::info!("  POST /api/send-code            - Send OTP (x-api-key)");
    tracing::info!("  POST /api/check-code           - Check OTP (x-api-key)");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
