use std::net::SocketAddr;
use std::sync::Arc;

use platform_common::env::{getenv, getenv_u32};
use platform_common::snowflake;

use trade_core::api::{router, ApiState};
use trade_core::contracts::commerce::v1::trade_service_client::TradeServiceClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = getenv("TRADE_API_ADDR", "0.0.0.0:8081").parse()?;
    let trade_rpc_addr = getenv("TRADE_RPC_ADDR", "http://localhost:50052");
    let jwt_secret = getenv("TRADE_JWT_SECRET", "dev-secret-change-me");
    let course_price_cents = getenv_u32("TRADE_COURSE_PRICE_CENTS", 10_000) as i32;

    let ids = Arc::new(snowflake::Config::from_env()?.build()?);
    let trade = TradeServiceClient::connect(trade_rpc_addr).await?;

    let app = router(ApiState {
        trade,
        ids,
        jwt_secret: Arc::new(jwt_secret),
        course_price_cents,
    });

    tracing::info!(%addr, "trade-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
