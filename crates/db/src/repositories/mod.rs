//! Repository abstractions for data access.
//!
//! Repositories provide a clean interface for database operations,
//! hiding the `SeaORM` implementation details from the rest of the application.

mod mapping;
pub mod request_store;

pub use request_store::SeaOrmRequestStore;
