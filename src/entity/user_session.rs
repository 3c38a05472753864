//! Session entity model.
//!
//! Maps the `user_sessions` table used by [`SessionStore`](crate::SessionStore).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
///
/// The only transitions are `active → expired` (time based, applied in bulk
/// by the sweep) and `active → terminated` (explicit logout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "terminated")]
    Terminated,
}

/// Sea-ORM entity model representing a login session.
///
/// # Database Schema
///
/// | Column        | Type               | Description                         |
/// |---------------|--------------------|-------------------------------------|
/// | id            | INTEGER            | Surrogate key                       |
/// | session_id    | TEXT (Unique)      | Public session identifier           |
/// | user_id       | TEXT               | Owning subject                      |
/// | ip_address    | TEXT               | Address the login came from         |
/// | user_agent    | TEXT               | Raw `User-Agent` at login           |
/// | device_type   | TEXT               | `mobile`, `tablet`, `desktop`, ...  |
/// | browser       | TEXT               | Detected browser family             |
/// | os            | TEXT               | Detected operating system           |
/// | status        | TEXT               | `active`, `expired`, `terminated`   |
/// | login_at      | TIMESTAMPTZ        | Creation time                       |
/// | last_activity | TIMESTAMPTZ        | Last authenticated request          |
/// | logout_at     | TIMESTAMPTZ NULL   | Set on explicit termination         |
/// | expires_at    | TIMESTAMPTZ        | Passive expiry deadline             |
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// The public session identifier, embedded in issued tokens as `sid`.
    #[sea_orm(unique)]
    pub session_id: String,

    pub user_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub device_type: String,
    pub browser: String,
    pub os: String,
    pub status: SessionStatus,
    pub login_at: DateTimeUtc,

    /// Only ever moves forward; see `SessionStore::touch`.
    pub last_activity: DateTimeUtc,

    pub logout_at: Option<DateTimeUtc>,
    pub expires_at: DateTimeUtc,
}

/// This entity doesn't have any relations to other entities.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
