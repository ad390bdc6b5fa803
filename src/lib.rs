//! dnsrelay
//!
//! A caching forwarding DNS proxy. Queries arrive over UDP, are answered
//! from a local cache while a fresh entry exists and are otherwise forwarded
//! to a fixed upstream resolver, whose reply is cached and passed back.
//!
//! # Features
//!
//! * Wire format codec with compressed name handling
//! * Per-question cache of raw answer records with TTL based expiry
//! * Glue synthesis, so nameservers from a NS reply resolve from the cache
//! * JSON snapshot of the cache, reloaded at startup

/// DNS protocol handling, cache and server
pub mod dns;
