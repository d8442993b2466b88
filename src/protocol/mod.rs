//! Wire-level protocol: packet framing, message codec and session crypto

pub mod crypto;
pub mod framing;
pub mod messages;
