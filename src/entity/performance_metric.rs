//! Request performance sample entity.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "performance_metrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub metric_name: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: i32,
    /// Wall-clock handling time in milliseconds.
    pub response_time: f64,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub user_id: Option<String>,
    pub ip_address: String,
    pub timestamp: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
