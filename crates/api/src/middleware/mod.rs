//! Request extractors shared by the route handlers.

pub mod actor;

pub use actor::ActorIdentity;
