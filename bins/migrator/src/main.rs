//! Database migration runner for Flowgate.
//!
//! Usage:
//!   migrator up      - Create the workflow tables
//!   migrator down    - Roll back the last migration
//!   migrator status  - Show migration status
//!   migrator fresh   - Drop the workflow tables and migrate again
//!
//! The database comes from `DATABASE_URL`, read from `.env` when present.

use flowgate_db::migration::Migrator;
use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // run_cli installs its own tracing subscriber
    cli::run_cli(Migrator).await;
}
