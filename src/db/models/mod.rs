//! Database models split into domain-specific modules.

pub mod device;
pub mod invite;
pub mod organization;
pub mod project;
pub mod reading;
pub mod user;
pub mod zone;

pub use device::*;
pub use invite::*;
pub use organization::*;
pub use project::*;
pub use reading::*;
pub use user::*;
pub use zone::*;
