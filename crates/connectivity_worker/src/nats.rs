mod broadcast_bus;
mod presence_consumer_service;

pub use broadcast_bus::*;
pub use presence_consumer_service::*;
