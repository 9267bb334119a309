//! Stateless per-table repositories. Every method takes `&Connection`;
//! transaction scope is owned by the caller (the store facade).

pub mod conversation;
pub mod query;
pub mod scenario;
pub mod token;
pub mod trace;
pub mod turn;
