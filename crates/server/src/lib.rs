//! The server: explicit context, route table, and the serve entry point.
//!
//! There is no ambient application object; everything a request needs rides
//! in `ServerContext`, built once at boot from the configuration, the
//! connected storage service, and the model registry.

use std::sync::Arc;

use serde_json::Value;
use tracing_subscriber::{EnvFilter, prelude::*};

use db::permission::PermissionGate;
use db::schema::{ModelRegistry, Notifier, RuntimeEnv};
use db::service::DbService;
use db::store::Store;

pub mod config;
pub mod dispatch;
pub mod error;
pub mod introspect;
pub mod notify;
pub mod openapi;
pub mod routes;

pub use config::Config;
use introspect::Introspection;

#[derive(Clone)]
pub struct ServerContext {
    pub store: Store,
    pub registry: Arc<ModelRegistry>,
    pub introspection: Arc<Introspection>,
    pub env: Arc<RuntimeEnv>,
    pub gate: Arc<dyn PermissionGate>,
    pub config: Arc<Config>,
    pub openapi: Arc<Value>,
}

impl ServerContext {
    pub fn new(
        config: Config,
        db: &DbService,
        registry: Arc<ModelRegistry>,
        gate: Arc<dyn PermissionGate>,
        notifier: Arc<dyn Notifier>,
    ) -> ServerContext {
        let store = db.store(registry.clone());
        let introspection = Arc::new(introspect::introspect(&registry));
        let openapi = Arc::new(openapi::document(&config, &registry, &introspection));
        let env = Arc::new(RuntimeEnv {
            jwt_secret: config.jwt_secret.clone(),
            token_exp_minutes: utils::token::DEFAULT_EXP_MINUTES,
            debug: config.debug,
            notifier,
        });

        ServerContext {
            store,
            registry,
            introspection,
            env,
            gate,
            config: Arc::new(config),
            openapi,
        }
    }
}

pub fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},db={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).expect("Failed to create tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();
}

pub async fn serve(ctx: ServerContext, host: &str, port: u16) -> anyhow::Result<()> {
    let app = routes::router(ctx);

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    let actual_port = listener.local_addr()?.port();
    tracing::info!("Server running on http://{host}:{actual_port}");

    axum::serve(listener, app).await?;
    Ok(())
}
