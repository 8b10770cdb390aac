//! Services Layer
//!
//! Plain record maintenance used to seed and inspect the records that bulk
//! operations target. Callable from handlers or directly by embedders.

pub mod record_service;

// Re-export for convenience
pub use record_service::*;
