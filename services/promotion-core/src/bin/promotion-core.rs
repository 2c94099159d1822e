use std::net::SocketAddr;

use tonic::{transport::Server, Request, Response, Status};

use platform_common::env::getenv;
use platform_common::inventory::RedisInventory;

use promotion_core::contracts::commerce::v1::promotion_service_server::{
    PromotionService, PromotionServiceServer,
};
use promotion_core::contracts::commerce::v1::{DecrStockRequest, DecrStockResponse};
use promotion_core::stock::DecrStockLogic;

struct PromotionGrpc {
    stock: DecrStockLogic<RedisInventory>,
}

#[tonic::async_trait]
impl PromotionService for PromotionGrpc {
    async fn decr_stock(
        &self,
        request: Request<DecrStockRequest>,
    ) -> Result<Response<DecrStockResponse>, Status> {
        let response = self.stock.decr_stock(&request.into_inner()).await?;
        Ok(Response::new(response))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = getenv("PROMOTION_GRPC_ADDR", "0.0.0.0:50053").parse()?;
    let redis_url = getenv("PROMOTION_REDIS_URL", "redis://127.0.0.1:6379");

    let inventory = RedisInventory::connect(&redis_url).await?;
    let service = PromotionGrpc {
        stock: DecrStockLogic::new(inventory),
    };

    tracing::info!(%addr, "promotion-core listening");
    Server::builder()
        .add_service(PromotionServiceServer::new(service))
        .serve(addr)
        .await?;
    Ok(())
}
