pub mod auth;
pub mod lifecycle;
pub mod notify;
pub mod schema;
