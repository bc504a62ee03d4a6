use std::net::SocketAddr;
use tokio::net::TcpListener;

use jungle_relay::config::{generate_config_template, Config};
use jungle_relay::hub::HubHandle;
use jungle_relay::routes;
use jungle_relay::state::AppState;

const DEFAULT_LOG_FILTER: &str = "jungle_relay=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);

    tracing::info!("Jungle relay v{} starting", env!("CARGO_PKG_VERSION"));

    let hub = HubHandle::spawn(config.direct_echo);
    let app_state = AppState {
        hub,
        keepalive: config.keepalive(),
    };

    let app = routes::build_router(app_state);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on: ws://{}", addr);
    tracing::info!("Access via:   ws://127.0.0.1:{} (Local)", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}
