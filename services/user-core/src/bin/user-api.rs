use std::net::SocketAddr;

use platform_common::env::getenv;

use user_core::api::{router, ApiState};
use user_core::contracts::commerce::v1::user_service_client::UserServiceClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = getenv("USER_API_ADDR", "0.0.0.0:8080").parse()?;
    let user_rpc_addr = getenv("USER_RPC_ADDR", "http://localhost:50051");

    let users = UserServiceClient::connect(user_rpc_addr).await?;
    let app = router(ApiState { users });

    tracing::info!(%addr, "user-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
