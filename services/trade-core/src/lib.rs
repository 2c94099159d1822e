use serde::{Deserialize, Serialize};

pub mod api;
pub mod cancel;
pub mod error;
pub mod listener;
pub mod model;
pub mod place;
pub mod store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreHealth {
    pub service: String,
    pub status: String,
}

pub fn health() -> CoreHealth {
    CoreHealth {
        service: "trade-core".to_string(),
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

#[cfg(test)]
mod tests;
