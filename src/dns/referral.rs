//! Glue synthesis for cached referrals
//!
//! A NS reply usually carries the addresses of the nameservers it names in
//! its additional section. Turning those into ordinary address entries lets
//! a later A query for a nameserver be answered from the cache.

use chrono::{DateTime, Local};

use crate::dns::cache::{CacheEntry, CacheKey, EntryData};
use crate::dns::protocol::{AddressRecord, DnsMessage, ProtocolError, QueryType, Section};

/// Build address entries for the nameservers of a referral
///
/// Glue is every A record in the additional section, in message order, and
/// is paired with `nameservers` by position: the first glue address belongs
/// to the first nameserver, and so on. The owner names of the glue records
/// are not consulted, so a reply that lists its glue in a different order
/// than its NS records yields wrong pairings. When the counts differ only
/// the first `min(nameservers, glue)` pairs are produced.
///
/// Each synthesized entry holds a single uncompressed A record for the
/// nameserver carrying the glue record's TTL, while the entry itself expires
/// together with the referral.
pub fn synthesize_glue(
    message: &DnsMessage,
    nameservers: &[String],
    class: u16,
    expires_at: DateTime<Local>,
) -> Result<Vec<(CacheKey, CacheEntry)>, ProtocolError> {
    let glue: Vec<_> = message
        .records_of(Section::Additional, QueryType::A)
        .filter_map(|rec| message.address(rec).map(|addr| (addr, rec.ttl)))
        .collect();

    if glue.len() != nameservers.len() {
        log::warn!(
            "referral lists {} nameservers but carries {} glue addresses",
            nameservers.len(),
            glue.len()
        );
    }

    let mut entries = Vec::with_capacity(glue.len().min(nameservers.len()));
    for (name, (addr, ttl)) in nameservers.iter().zip(glue) {
        let record = AddressRecord {
            domain: name.clone(),
            addr,
            class,
            ttl,
        };

        let entry = CacheEntry {
            raw_answers: vec![record.to_bytes()?],
            answer_count: 1,
            expires_at,
            data: EntryData::Address { ips: vec![addr] },
        };

        entries.push((CacheKey::new(name, QueryType::A, class), entry));
    }

    Ok(entries)
}
