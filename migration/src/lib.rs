//! Database migrations for the Finbox API.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_oauth_tokens;
mod m2025_06_01_000002_create_connections;
mod m2025_06_01_000003_create_oauth_states;
mod m2025_06_01_000004_create_emails;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_oauth_tokens::Migration),
            Box::new(m2025_06_01_000002_create_connections::Migration),
            Box::new(m2025_06_01_000003_create_oauth_states::Migration),
            Box::new(m2025_06_01_000004_create_emails::Migration),
        ]
    }
}
