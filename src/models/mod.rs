//! Domain model module declarations.

pub mod channel;
pub mod request;
