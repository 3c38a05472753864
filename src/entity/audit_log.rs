//! Audit log entity.

use sea_orm::entity::prelude::*;

/// One row per audited action. Rows are never updated; they are removed only
/// by the retention sweep once older than the configured cutoff.
///
/// | Column        | Type        | Description                               |
/// |---------------|-------------|-------------------------------------------|
/// | id            | INTEGER     | Surrogate key                             |
/// | user_id       | TEXT NULL   | Acting subject, absent for anonymous      |
/// | user_email    | TEXT NULL   | Acting subject's email at the time        |
/// | action        | TEXT        | e.g. `create`, `login`                    |
/// | resource      | TEXT        | Resource kind, e.g. `project`             |
/// | resource_id   | TEXT NULL   | Target resource id                        |
/// | details       | JSON        | Free-form context                         |
/// | ip_address    | TEXT        | Client address                            |
/// | user_agent    | TEXT        | Raw `User-Agent`                          |
/// | session_id    | TEXT NULL   | Session the request belonged to           |
/// | success       | BOOLEAN     | Final outcome                             |
/// | error_message | TEXT NULL   | Failure detail                            |
/// | timestamp     | TIMESTAMPTZ | When the action completed                 |
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "audit_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub details: Json,
    pub ip_address: String,
    pub user_agent: String,
    pub session_id: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
