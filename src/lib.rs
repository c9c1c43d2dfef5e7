pub mod api;
pub mod engine;
pub mod errors;
pub mod market_data;
pub mod pipeline;
pub mod settings;
pub mod store;
pub mod telemetry;
