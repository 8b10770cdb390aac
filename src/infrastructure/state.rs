//! Application state containing the orchestrator and shared resources

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::infrastructure::config::Config;
use crate::infrastructure::{SeaOrmAuditSink, SeaOrmRecordRepository};
use crate::orchestrator::{AuditSink, Orchestrator};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    db: DatabaseConnection,
    /// Bulk operation orchestrator, created once at service start
    pub orchestrator: Orchestrator,
    /// Audit trail, read by the audit listing
    pub audit: Arc<dyn AuditSink>,
    pub config: Config,
}

impl AppState {
    /// Wire the SeaORM adapters into a fresh orchestrator
    pub fn new(db: DatabaseConnection, config: Config) -> Self {
        let mutator = Arc::new(SeaOrmRecordRepository::new(db.clone()));
        let audit: Arc<dyn AuditSink> = Arc::new(SeaOrmAuditSink::new(db.clone()));
        let orchestrator = Orchestrator::new(mutator, audit.clone(), config.orchestrator_settings());

        Self {
            db,
            orchestrator,
            audit,
            config,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

// Implement FromRef to allow extracting DatabaseConnection from AppState
impl axum::extract::FromRef<AppState> for DatabaseConnection {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
