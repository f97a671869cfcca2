//! Business logic services layer

pub mod audit_service;
pub mod debt_service;
pub mod legacy_sync;
pub mod movement_service;

pub use audit_service::{AuditAction, AuditService};
pub use legacy_sync::LegacySyncCoordinator;
pub use movement_service::MovementService;
