//! Database query functions organized by domain.

pub mod admins;
pub mod invites;
pub mod pending;
pub mod tickets;
pub mod users;
pub mod waves;
