use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuditLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuditLogs::UserId).string())
                    .col(ColumnDef::new(AuditLogs::UserEmail).string())
                    .col(ColumnDef::new(AuditLogs::Action).string().not_null())
                    .col(ColumnDef::new(AuditLogs::Resource).string().not_null())
                    .col(ColumnDef::new(AuditLogs::ResourceId).string())
                    .col(ColumnDef::new(AuditLogs::Details).json().not_null())
                    .col(ColumnDef::new(AuditLogs::IpAddress).string().not_null())
                    .col(ColumnDef::new(AuditLogs::UserAgent).text().not_null())
                    .col(ColumnDef::new(AuditLogs::SessionId).string())
                    .col(ColumnDef::new(AuditLogs::Success).boolean().not_null())
                    .col(ColumnDef::new(AuditLogs::ErrorMessage).text())
                    .col(
                        ColumnDef::new(AuditLogs::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Analytics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Analytics::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Analytics::Date).date().not_null())
                    .col(ColumnDef::new(Analytics::Hour).integer())
                    .col(ColumnDef::new(Analytics::MetricType).string().not_null())
                    .col(
                        ColumnDef::new(Analytics::Count)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(Analytics::Value).double())
                    .col(ColumnDef::new(Analytics::UserId).string())
                    .col(ColumnDef::new(Analytics::ResourceId).string())
                    .col(ColumnDef::new(Analytics::Metadata).json().not_null())
                    .col(
                        ColumnDef::new(Analytics::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PerformanceMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PerformanceMetrics::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PerformanceMetrics::MetricName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PerformanceMetrics::Endpoint)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PerformanceMetrics::Method).string().not_null())
                    .col(
                        ColumnDef::new(PerformanceMetrics::StatusCode)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PerformanceMetrics::ResponseTime)
                            .double()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PerformanceMetrics::CpuUsage).double())
                    .col(ColumnDef::new(PerformanceMetrics::MemoryUsage).double())
                    .col(ColumnDef::new(PerformanceMetrics::UserId).string())
                    .col(
                        ColumnDef::new(PerformanceMetrics::IpAddress)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PerformanceMetrics::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserSessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserSessions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserSessions::SessionId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(UserSessions::UserId).string().not_null())
                    .col(ColumnDef::new(UserSessions::IpAddress).string().not_null())
                    .col(ColumnDef::new(UserSessions::UserAgent).text().not_null())
                    .col(ColumnDef::new(UserSessions::DeviceType).string().not_null())
                    .col(ColumnDef::new(UserSessions::Browser).string().not_null())
                    .col(ColumnDef::new(UserSessions::Os).string().not_null())
                    .col(ColumnDef::new(UserSessions::Status).text().not_null())
                    .col(
                        ColumnDef::new(UserSessions::LoginAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserSessions::LastActivity)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserSessions::LogoutAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(UserSessions::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Retention deletes by age; lookups by subject.
        let indexes = [
            Index::create()
                .name("idx_audit_logs_timestamp")
                .table(AuditLogs::Table)
                .col(AuditLogs::Timestamp)
                .to_owned(),
            Index::create()
                .name("idx_audit_logs_user_id")
                .table(AuditLogs::Table)
                .col(AuditLogs::UserId)
                .to_owned(),
            Index::create()
                .name("idx_analytics_timestamp")
                .table(Analytics::Table)
                .col(Analytics::Timestamp)
                .to_owned(),
            Index::create()
                .name("idx_analytics_metric_type_date")
                .table(Analytics::Table)
                .col(Analytics::MetricType)
                .col(Analytics::Date)
                .to_owned(),
            Index::create()
                .name("idx_performance_metrics_timestamp")
                .table(PerformanceMetrics::Table)
                .col(PerformanceMetrics::Timestamp)
                .to_owned(),
            Index::create()
                .name("idx_user_sessions_user_id_status")
                .table(UserSessions::Table)
                .col(UserSessions::UserId)
                .col(UserSessions::Status)
                .to_owned(),
            Index::create()
                .name("idx_user_sessions_expires_at")
                .table(UserSessions::Table)
                .col(UserSessions::ExpiresAt)
                .to_owned(),
        ];
        for mut index in indexes {
            manager.create_index(index.if_not_exists().to_owned()).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserSessions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PerformanceMetrics::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Analytics::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AuditLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuditLogs {
    Table,
    Id,
    UserId,
    UserEmail,
    Action,
    Resource,
    ResourceId,
    Details,
    IpAddress,
    UserAgent,
    SessionId,
    Success,
    ErrorMessage,
    Timestamp,
}

#[derive(DeriveIden)]
enum Analytics {
    Table,
    Id,
    Date,
    Hour,
    MetricType,
    Count,
    Value,
    UserId,
    ResourceId,
    Metadata,
    Timestamp,
}

#[derive(DeriveIden)]
enum PerformanceMetrics {
    Table,
    Id,
    MetricName,
    Endpoint,
    Method,
    StatusCode,
    ResponseTime,
    CpuUsage,
    MemoryUsage,
    UserId,
    IpAddress,
    Timestamp,
}

#[derive(DeriveIden)]
enum UserSessions {
    Table,
    Id,
    SessionId,
    UserId,
    IpAddress,
    UserAgent,
    DeviceType,
    Browser,
    Os,
    Status,
    LoginAt,
    LastActivity,
    LogoutAt,
    ExpiresAt,
}
