pub mod enricher;
pub mod scorer;
pub mod types;
pub use types::*;
