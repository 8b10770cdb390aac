//! Operation kinds and their per-record mutation rules.
//!
//! A submitted `(kind, parameters)` pair is parsed once into a [`Directive`],
//! a closed enum with one typed variant per kind. Everything that varies by
//! kind (what gets written for each target, whether a snapshot is taken,
//! what goes into the audit entry) is an exhaustive match on it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use super::error::OrchestratorError;
use crate::domain::{Collection, FieldMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Transfer,
    StatusUpdate,
    AssignAdvisor,
    BulkImport,
    SendNotification,
    PrintBatch,
    ToggleAccounts,
    RecordAttendance,
    PromoteYear,
    ArchiveOrDelete,
    LinkActivity,
    CopyData,
}

impl OperationKind {
    pub const ALL: [OperationKind; 12] = [
        OperationKind::Transfer,
        OperationKind::StatusUpdate,
        OperationKind::AssignAdvisor,
        OperationKind::BulkImport,
        OperationKind::SendNotification,
        OperationKind::PrintBatch,
        OperationKind::ToggleAccounts,
        OperationKind::RecordAttendance,
        OperationKind::PromoteYear,
        OperationKind::ArchiveOrDelete,
        OperationKind::LinkActivity,
        OperationKind::CopyData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Transfer => "transfer",
            OperationKind::StatusUpdate => "statusUpdate",
            OperationKind::AssignAdvisor => "assignAdvisor",
            OperationKind::BulkImport => "bulkImport",
            OperationKind::SendNotification => "sendNotification",
            OperationKind::PrintBatch => "printBatch",
            OperationKind::ToggleAccounts => "toggleAccounts",
            OperationKind::RecordAttendance => "recordAttendance",
            OperationKind::PromoteYear => "promoteYear",
            OperationKind::ArchiveOrDelete => "archiveOrDelete",
            OperationKind::LinkActivity => "linkActivity",
            OperationKind::CopyData => "copyData",
        }
    }

    /// Display name used when the caller gives no label.
    pub fn title(&self) -> &'static str {
        match self {
            OperationKind::Transfer => "Transfer",
            OperationKind::StatusUpdate => "Status update",
            OperationKind::AssignAdvisor => "Advisor assignment",
            OperationKind::BulkImport => "Bulk import",
            OperationKind::SendNotification => "Notification broadcast",
            OperationKind::PrintBatch => "Print batch",
            OperationKind::ToggleAccounts => "Account toggle",
            OperationKind::RecordAttendance => "Attendance",
            OperationKind::PromoteYear => "Year promotion",
            OperationKind::ArchiveOrDelete => "Archive/delete",
            OperationKind::LinkActivity => "Activity linkage",
            OperationKind::CopyData => "Data copy",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| OrchestratorError::invalid(format!("unknown operation kind '{}'", s)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransferParams {
    pub class_id: String,
    #[serde(default)]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatusParams {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdvisorParams {
    /// Must be present; an explicit `null` clears the advisor.
    #[serde(deserialize_with = "nullable")]
    pub advisor_id: Option<String>,
}

// Unlike a bare `Option` field, a missing key is an error rather than `None`.
fn nullable<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportParams {
    pub rows: HashMap<String, FieldMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotificationParams {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrintParams {
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AccountParams {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttendanceParams {
    pub date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PromotionParams {
    pub stage: String,
    pub academic_year: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ArchiveMode {
    Archive,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArchiveParams {
    pub mode: ArchiveMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LinkAction {
    Link,
    Unlink,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkParams {
    pub activity_id: String,
    pub action: LinkAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CopyParams {
    #[serde(default)]
    pub destination: Option<String>,
}

/// A kind together with its validated parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Transfer(TransferParams),
    StatusUpdate(StatusParams),
    AssignAdvisor(AdvisorParams),
    BulkImport(ImportParams),
    SendNotification(NotificationParams),
    PrintBatch(PrintParams),
    ToggleAccounts(AccountParams),
    RecordAttendance(AttendanceParams),
    PromoteYear(PromotionParams),
    ArchiveOrDelete {
        params: ArchiveParams,
        /// Submission time, written as the archive timestamp on every target.
        stamped_at: DateTime<Utc>,
    },
    LinkActivity(LinkParams),
    CopyData(CopyParams),
}

/// What the executor asks the record store to do for one target.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRequest {
    /// Merge `fields` into an existing record.
    Update { id: String, fields: FieldMap },
    Insert {
        collection: Collection,
        fields: FieldMap,
    },
    Delete { collection: Collection, id: String },
    /// Counts as processed without touching storage.
    Noop,
}

impl Directive {
    /// Parse and validate the parameters for `kind`.
    ///
    /// `target_ids` is needed for kinds whose parameters are keyed by target.
    pub fn parse(
        kind: OperationKind,
        parameters: &Value,
        target_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Self, OrchestratorError> {
        let directive = match kind {
            OperationKind::Transfer => {
                let p: TransferParams = params(kind, parameters)?;
                require(kind, "classId", &p.class_id)?;
                Directive::Transfer(p)
            }
            OperationKind::StatusUpdate => {
                let p: StatusParams = params(kind, parameters)?;
                require(kind, "status", &p.status)?;
                Directive::StatusUpdate(p)
            }
            OperationKind::AssignAdvisor => Directive::AssignAdvisor(params(kind, parameters)?),
            OperationKind::BulkImport => {
                let mut p: ImportParams = params(kind, parameters)?;
                p.rows = trim_row_keys(p.rows)?;
                if let Some(missing) = target_ids.iter().find(|id| !p.rows.contains_key(*id)) {
                    return Err(OrchestratorError::invalid(format!(
                        "bulkImport has no field map for target '{}'",
                        missing
                    )));
                }
                Directive::BulkImport(p)
            }
            OperationKind::SendNotification => {
                let p: NotificationParams = params(kind, parameters)?;
                require(kind, "title", &p.title)?;
                Directive::SendNotification(p)
            }
            OperationKind::PrintBatch => Directive::PrintBatch(params(kind, parameters)?),
            OperationKind::ToggleAccounts => Directive::ToggleAccounts(params(kind, parameters)?),
            OperationKind::RecordAttendance => {
                let p: AttendanceParams = params(kind, parameters)?;
                require(kind, "status", &p.status)?;
                Directive::RecordAttendance(p)
            }
            OperationKind::PromoteYear => {
                let p: PromotionParams = params(kind, parameters)?;
                require(kind, "stage", &p.stage)?;
                require(kind, "academicYear", &p.academic_year)?;
                Directive::PromoteYear(p)
            }
            OperationKind::ArchiveOrDelete => Directive::ArchiveOrDelete {
                params: params(kind, parameters)?,
                stamped_at: now,
            },
            OperationKind::LinkActivity => {
                let p: LinkParams = params(kind, parameters)?;
                require(kind, "activityId", &p.activity_id)?;
                Directive::LinkActivity(p)
            }
            OperationKind::CopyData => Directive::CopyData(params(kind, parameters)?),
        };
        Ok(directive)
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Directive::Transfer(_) => OperationKind::Transfer,
            Directive::StatusUpdate(_) => OperationKind::StatusUpdate,
            Directive::AssignAdvisor(_) => OperationKind::AssignAdvisor,
            Directive::BulkImport(_) => OperationKind::BulkImport,
            Directive::SendNotification(_) => OperationKind::SendNotification,
            Directive::PrintBatch(_) => OperationKind::PrintBatch,
            Directive::ToggleAccounts(_) => OperationKind::ToggleAccounts,
            Directive::RecordAttendance(_) => OperationKind::RecordAttendance,
            Directive::PromoteYear(_) => OperationKind::PromoteYear,
            Directive::ArchiveOrDelete { .. } => OperationKind::ArchiveOrDelete,
            Directive::LinkActivity(_) => OperationKind::LinkActivity,
            Directive::CopyData(_) => OperationKind::CopyData,
        }
    }

    /// Whether a pre-change snapshot is captured and `undo` is possible.
    ///
    /// Only kinds that overwrite fields of the target records qualify.
    /// Kinds that create rows elsewhere, hard-delete, or touch nothing have
    /// no prior state to restore.
    pub fn undoable(&self) -> bool {
        match self {
            Directive::Transfer(_)
            | Directive::StatusUpdate(_)
            | Directive::AssignAdvisor(_)
            | Directive::BulkImport(_)
            | Directive::ToggleAccounts(_)
            | Directive::PromoteYear(_) => true,
            Directive::ArchiveOrDelete { params, .. } => params.mode == ArchiveMode::Archive,
            Directive::SendNotification(_)
            | Directive::PrintBatch(_)
            | Directive::RecordAttendance(_)
            | Directive::LinkActivity(_)
            | Directive::CopyData(_) => false,
        }
    }

    /// The mutation to apply to one target. Pure: same inputs, same request.
    pub fn resolve(&self, target_id: &str) -> MutationRequest {
        let update = |fields: FieldMap| MutationRequest::Update {
            id: target_id.to_string(),
            fields,
        };

        match self {
            Directive::Transfer(p) => {
                let mut fields = fields([("class_id", json!(p.class_id))]);
                if let Some(stage) = &p.stage {
                    fields.insert("stage".into(), json!(stage));
                }
                update(fields)
            }
            Directive::StatusUpdate(p) => update(fields([("status", json!(p.status))])),
            Directive::AssignAdvisor(p) => update(fields([("advisor_id", json!(p.advisor_id))])),
            Directive::BulkImport(p) => update(p.rows.get(target_id).cloned().unwrap_or_default()),
            Directive::SendNotification(p) => MutationRequest::Insert {
                collection: Collection::Notifications,
                fields: fields([
                    ("record_id", json!(target_id)),
                    ("title", json!(p.title)),
                    ("message", json!(p.message)),
                    ("category", json!(p.category)),
                    ("read", json!(false)),
                ]),
            },
            Directive::PrintBatch(_) | Directive::CopyData(_) => MutationRequest::Noop,
            Directive::ToggleAccounts(p) => {
                update(fields([("account_enabled", json!(p.enabled))]))
            }
            Directive::RecordAttendance(p) => MutationRequest::Insert {
                collection: Collection::Attendance,
                fields: fields([
                    ("id", json!(format!("{}:{}", p.date, target_id))),
                    ("record_id", json!(target_id)),
                    ("date", json!(p.date)),
                    ("status", json!(p.status)),
                ]),
            },
            Directive::PromoteYear(p) => update(fields([
                ("stage", json!(p.stage)),
                ("academic_year", json!(p.academic_year)),
            ])),
            Directive::ArchiveOrDelete { params, stamped_at } => match params.mode {
                ArchiveMode::Archive => update(fields([
                    ("archived", json!(true)),
                    ("archived_at", json!(stamped_at.to_rfc3339())),
                ])),
                ArchiveMode::Delete => MutationRequest::Delete {
                    collection: Collection::Records,
                    id: target_id.to_string(),
                },
            },
            Directive::LinkActivity(p) => {
                let link_id = format!("{}:{}", p.activity_id, target_id);
                match p.action {
                    LinkAction::Link => MutationRequest::Insert {
                        collection: Collection::ActivityLinks,
                        fields: fields([
                            ("id", json!(link_id)),
                            ("record_id", json!(target_id)),
                            ("activity_id", json!(p.activity_id)),
                        ]),
                    },
                    LinkAction::Unlink => MutationRequest::Delete {
                        collection: Collection::ActivityLinks,
                        id: link_id,
                    },
                }
            }
        }
    }

    /// Kind-specific part of the audit entry.
    pub fn audit_detail(&self) -> Value {
        match self {
            Directive::Transfer(p) => json!({ "classId": p.class_id, "stage": p.stage }),
            Directive::StatusUpdate(p) => json!({ "status": p.status }),
            Directive::AssignAdvisor(p) => json!({ "advisorId": p.advisor_id }),
            Directive::BulkImport(p) => {
                let columns: BTreeSet<&String> = p.rows.values().flat_map(|row| row.keys()).collect();
                json!({ "rows": p.rows.len(), "fields": columns })
            }
            Directive::SendNotification(p) => {
                json!({ "title": p.title, "category": p.category })
            }
            Directive::PrintBatch(p) => json!({ "template": p.template }),
            Directive::ToggleAccounts(p) => json!({ "enabled": p.enabled }),
            Directive::RecordAttendance(p) => json!({ "date": p.date, "status": p.status }),
            Directive::PromoteYear(p) => {
                json!({ "stage": p.stage, "academicYear": p.academic_year })
            }
            Directive::ArchiveOrDelete { params, stamped_at } => {
                json!({ "mode": params.mode, "stampedAt": stamped_at.to_rfc3339() })
            }
            Directive::LinkActivity(p) => {
                json!({ "activityId": p.activity_id, "action": p.action })
            }
            Directive::CopyData(p) => json!({ "destination": p.destination }),
        }
    }
}

fn params<T: DeserializeOwned>(kind: OperationKind, value: &Value) -> Result<T, OrchestratorError> {
    let value = match value {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| {
        OrchestratorError::invalid(format!("malformed parameters for {}: {}", kind, e))
    })
}

/// Row keys are matched against trimmed target ids, so they are trimmed too.
fn trim_row_keys(
    rows: HashMap<String, FieldMap>,
) -> Result<HashMap<String, FieldMap>, OrchestratorError> {
    let mut trimmed = HashMap::with_capacity(rows.len());
    for (key, row) in rows {
        let key = key.trim().to_string();
        if trimmed.insert(key.clone(), row).is_some() {
            return Err(OrchestratorError::invalid(format!(
                "bulkImport has more than one row for target '{}'",
                key
            )));
        }
    }
    Ok(trimmed)
}

fn require(kind: OperationKind, name: &str, value: &str) -> Result<(), OrchestratorError> {
    if value.trim().is_empty() {
        return Err(OrchestratorError::invalid(format!(
            "{} requires a non-empty '{}'",
            kind, name
        )));
    }
    Ok(())
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> FieldMap {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
