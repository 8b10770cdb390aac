//! Repository implementations using SeaORM

pub mod audit_repository;
pub mod record_repository;

pub use audit_repository::SeaOrmAuditSink;
pub use record_repository::SeaOrmRecordRepository;
