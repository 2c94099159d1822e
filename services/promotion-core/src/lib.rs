use serde::{Deserialize, Serialize};

pub mod consumer;
pub mod stock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreHealth {
    pub service: String,
    pub status: String,
}

pub fn health() -> CoreHealth {
    CoreHealth {
        service: "promotion-core".to_string(),
        status: "ok".to_string(),
    }
}

pub mod contracts {
    pub mod commerce {
        pub mod v1 {
            tonic::include_proto!("commerce.v1");
        }
    }
}
