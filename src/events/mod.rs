//! Inbound chat-event decoding and dispatch.

pub mod classifier;
pub mod router;
