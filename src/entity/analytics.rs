//! Analytics counter entity.

use sea_orm::entity::prelude::*;

/// An additive counter increment. Totals are computed at query time by
/// summing `count` per `metric_type` over a date range.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "analytics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Calendar day (UTC) the increment belongs to.
    pub date: Date,
    /// Hour of day (UTC), when the metric is bucketed hourly.
    pub hour: Option<i32>,
    pub metric_type: String,
    pub count: i32,
    /// Optional measured quantity, e.g. bytes uploaded.
    pub value: Option<f64>,
    pub user_id: Option<String>,
    pub resource_id: Option<String>,
    pub metadata: Json,
    pub timestamp: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
