//! Database repository layer

pub mod audit_repo;
pub mod directory_repo;
pub mod movement_repo;

pub use audit_repo::*;
pub use directory_repo::*;
pub use movement_repo::*;
