use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, router};
use care_core::{CareServices, CoreConfig, Settings};

/// Main entry point for the care service
///
/// Validates configuration once, wires the care services and serves the REST API until
/// interrupted.
///
/// # Environment Variables
/// - `FHIR_BASE_URL` or `FHIR_PROJECT`/`FHIR_LOCATION`/`FHIR_DATASET`/`FHIR_STORE`: clinical store
/// - `FHIR_ACCESS_TOKEN`: static bearer token (otherwise `gcloud` supplies one)
/// - `TERMINOLOGY_BASE_URL`, `TERMINOLOGY_TOKEN`: terminology catalog
/// - `OTP_BASE_URL`: passcode verification service
/// - `CARE_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `API_KEY`: when set, required in the `x-api-key` header of every non-health route
///
/// # Errors
/// Returns an error if configuration is invalid, a client cannot be built, or the server fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("care=info".parse()?)
                .add_directive("care_run=info".parse()?)
                .add_directive("care_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = CoreConfig::from_settings(Settings::from_env())?;
    let services = CareServices::from_config(&cfg)?;
    let addr = cfg.rest_addr();

    if cfg.api_key().is_none() {
        tracing::warn!("API_KEY not set; REST routes are unauthenticated");
    }
    tracing::info!("++ Starting care REST on {}", addr);

    let app = router(AppState::new(services, &cfg));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("-- Shutting down care REST");
        })
        .await?;

    Ok(())
}
