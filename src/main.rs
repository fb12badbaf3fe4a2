use std::net::SocketAddr;
use std::sync::Arc;

use assessment_engine::{
    config::{get_config, init_config},
    database::{pool::create_pool, postgres::PgStore},
    router,
    utils::time::SystemClock,
    AppState,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("assessment_engine=info,tower_http=info")),
        )
        .init();
    init_config()?;
    let config = get_config()?;

    let pool = create_pool(config).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(SystemClock),
        &config.jwt_secret,
    );
    let app = router(state);

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
