//! Operations behind the HTTP handlers. Each takes the acting user and
//! applies role, tenant and quota rules before touching the database.

pub mod accounts;
pub mod dashboard;
pub mod devices;
pub mod organizations;
pub mod projects;
pub mod public;
pub mod readings;
pub mod zones;

#[cfg(test)]
pub mod fixtures;
