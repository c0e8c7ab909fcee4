//! Domain model module declarations.

pub mod conf;
pub mod host;
pub mod session;
