//! Multi-tenant limits and membership.

pub mod invite;
pub mod quota;

pub use invite::{InviteFlow, Invitee, NewMember};
pub use quota::{count_resources, QuotaEnforcer};
