use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use todo_auth::auth::AuthService;
use todo_auth::configuration::get_configuration;
use todo_auth::startup::run;
use todo_auth::store::PgIdentityStore;
use todo_auth::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    init_telemetry(&configuration.telemetry);
    tracing::info!("Configuration loaded successfully");

    let auth_settings = configuration
        .auth
        .clone()
        .validate(configuration.application.hardened)
        .map_err(|e| {
            tracing::error!(error = %e, "Refusing to start");
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
        })?;

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .acquire_timeout(auth_settings.store_timeout())
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create connection pool");
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Database connection error")
        })?;

    let store = PgIdentityStore::new(pool);
    store.migrate().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to migrate the database");
        std::io::Error::new(std::io::ErrorKind::Other, "Database migration error")
    })?;
    tracing::info!("Database ready");

    let auth = AuthService::new(Arc::new(store), &auth_settings).map_err(|e| {
        tracing::error!(error = %e, "Failed to build authentication service");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!(address = %address, "Server listening");

    run(listener, auth)?.await
}
