//! DNS Relay Implementation
//!
//! # Module Structure
//!
//! * `buffer` - Low-level packet buffer operations
//! * `protocol` - Wire format: headers, questions, record views, replies
//! * `cache` - Answer cache with TTL expiry and snapshot persistence
//! * `referral` - Glue entries derived from NS replies
//! * `client` - Forwarding to the upstream resolver
//! * `context` - Server configuration and shared state
//! * `server` - Request handling and the UDP server

/// Low-level buffer operations for DNS packet handling
pub mod buffer;

/// DNS response caching with TTL support
pub mod cache;

/// Upstream forwarding client
pub mod client;

/// Server configuration and shared context
pub mod context;

/// DNS protocol definitions and packet structures
pub mod protocol;

/// Address entries synthesized from referral glue
pub mod referral;

/// Request handling and the UDP server
pub mod server;

#[cfg(test)]
mod test_packets;
