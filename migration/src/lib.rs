pub use sea_orm_migration::prelude::*;

mod m20250612_000001_create_core_tables;
mod m20250618_101530_create_api_key_tables;
mod m20250701_084210_add_audit_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250612_000001_create_core_tables::Migration),
            Box::new(m20250618_101530_create_api_key_tables::Migration),
            Box::new(m20250701_084210_add_audit_indexes::Migration),
        ]
    }
}
