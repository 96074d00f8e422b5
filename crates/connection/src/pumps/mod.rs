//! Transport pump tasks: read, write, keepalive.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
