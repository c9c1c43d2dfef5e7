pub mod facade; // query/command surface over the store and config
pub mod http;   // axum routes

pub use facade::QueryFacade;
pub use http::router;
