pub mod audit_log;
pub mod entry;
pub mod record;
