//! Schema migrations for the secondary store.

pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_telemetry_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    // Own migration table so the host application's migrator is unaffected
    fn migration_table_name() -> sea_orm::DynIden {
        Alias::new("tower_identity_migrations").into_iden()
    }

    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20240101_000001_create_telemetry_tables::Migration)]
    }
}
