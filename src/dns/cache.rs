//! DNS Response Cache
//!
//! Upstream replies are cached per question as the undecoded record blocks
//! they contained, so a hit can be answered by replaying those blocks behind
//! a fresh header. Each entry carries an absolute expiry taken from the
//! reply's TTL; entries are never swept, a stale entry is simply treated as
//! a miss and overwritten by the next successful resolution.
//!
//! # Entry kinds
//!
//! * Address (A): the resolved IPv4 addresses
//! * Alias (CNAME, PTR): the decoded target name
//! * Referral (NS): the nameserver names. Storing a referral also inserts
//!   synthetic address entries for every nameserver that came with glue,
//!   see `referral::synthesize_glue`.
//!
//! Every other type is forwarded but never cached.
//!
//! # Persistence
//!
//! `SynchronizedCache` writes a JSON snapshot of the whole map after each
//! successful store and reads it back once at startup.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use derive_more::{Display, Error, From};
use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

use crate::dns::protocol::{
    DnsMessage, DnsQuestion, ProtocolError, QueryType, ResponseCounts, Section,
};
use crate::dns::referral::synthesize_glue;

#[derive(Debug, Display, From, Error)]
pub enum CacheError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Protocol(ProtocolError),
}

type Result<T> = std::result::Result<T, CacheError>;

/// Snapshot layout version written to disk
const SNAPSHOT_VERSION: u32 = 2;

/// Identifies one cached answer set
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub name: String,
    pub qtype: QueryType,
    pub class: u16,
}

impl CacheKey {
    pub fn new(name: &str, qtype: QueryType, class: u16) -> CacheKey {
        CacheKey {
            name: name.trim_end_matches('.').to_ascii_lowercase(),
            qtype,
            class,
        }
    }

    pub fn from_question(question: &DnsQuestion) -> CacheKey {
        CacheKey::new(&question.name, question.qtype, question.class)
    }
}

/// Data decoded from the reply alongside the raw records
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EntryData {
    Address { ips: Vec<Ipv4Addr> },
    Alias { canonical: String },
    Referral { nameservers: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Answer blocks followed by additional blocks
    pub raw_answers: Vec<Vec<u8>>,
    /// How many leading blocks of `raw_answers` are answers
    pub answer_count: u16,
    pub expires_at: DateTime<Local>,
    pub data: EntryData,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Local>) -> bool {
        self.expires_at > now
    }

    /// Section counts for a reply rebuilt from this entry
    pub fn response_counts(&self) -> ResponseCounts {
        let answers = (self.answer_count as usize).min(self.raw_answers.len());
        ResponseCounts {
            answers: answers as u16,
            additional: (self.raw_answers.len() - answers) as u16,
        }
    }
}

/// How a query type is treated by the cache
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnswerKind {
    Address,
    Alias,
    Referral,
    Unsupported,
}

impl AnswerKind {
    pub fn from_qtype(qtype: QueryType) -> AnswerKind {
        match qtype {
            QueryType::A => AnswerKind::Address,
            QueryType::Cname | QueryType::Ptr => AnswerKind::Alias,
            QueryType::Ns => AnswerKind::Referral,
            _ => AnswerKind::Unsupported,
        }
    }

    /// Decode the auxiliary data for this kind
    ///
    /// Returns `None` when the reply lacks the records the kind depends on,
    /// in which case the reply is passed through uncached.
    pub fn extract(&self, message: &DnsMessage) -> Result<Option<EntryData>> {
        match *self {
            AnswerKind::Address => {
                if message.records_in(Section::Answer).next().is_none() {
                    return Ok(None);
                }

                let ips = message
                    .records_of(Section::Answer, QueryType::A)
                    .filter_map(|rec| message.address(rec))
                    .collect();

                Ok(Some(EntryData::Address { ips }))
            }
            AnswerKind::Alias => {
                let alias = message.records_in(Section::Answer).find(|rec| {
                    rec.rtype == QueryType::Cname || rec.rtype == QueryType::Ptr
                });

                match alias {
                    Some(rec) => Ok(Some(EntryData::Alias {
                        canonical: message.target_name(rec)?,
                    })),
                    None => Ok(None),
                }
            }
            AnswerKind::Referral => {
                let mut nameservers = Vec::new();
                for rec in message.records_of(Section::Answer, QueryType::Ns) {
                    nameservers.push(message.target_name(rec)?);
                }

                if nameservers.is_empty() {
                    return Ok(None);
                }

                Ok(Some(EntryData::Referral { nameservers }))
            }
            AnswerKind::Unsupported => Ok(None),
        }
    }

    /// TTL governing the entry's expiry
    pub fn ttl(&self, message: &DnsMessage) -> Option<u32> {
        match *self {
            AnswerKind::Address | AnswerKind::Alias => message.first_ttl(),
            AnswerKind::Referral => message
                .records_of(Section::Answer, QueryType::Ns)
                .next()
                .map(|rec| rec.ttl),
            AnswerKind::Unsupported => None,
        }
    }
}

/// Result of offering an upstream reply to the cache
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    NotCacheable,
    Cached { synthesized: usize },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Local>,
    pub entries: Vec<(CacheKey, CacheEntry)>,
}

#[derive(Clone, Debug, Default)]
pub struct Cache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl Cache {
    pub fn new() -> Cache {
        Cache {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry for `key`, fresh or not
    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn lookup(&self, key: &CacheKey, now: DateTime<Local>) -> Option<&CacheEntry> {
        self.entries.get(key).filter(|entry| entry.is_fresh(now))
    }

    pub fn insert(&mut self, key: CacheKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Classify an upstream reply and cache it under `key`
    ///
    /// Existing entries are replaced wholesale. For referrals the synthetic
    /// nameserver entries are inserted in the same call.
    pub fn store(
        &mut self,
        key: CacheKey,
        message: &DnsMessage,
        now: DateTime<Local>,
    ) -> Result<StoreOutcome> {
        let kind = AnswerKind::from_qtype(key.qtype);

        let data = match kind.extract(message)? {
            Some(data) => data,
            None => return Ok(StoreOutcome::NotCacheable),
        };
        let ttl = match kind.ttl(message) {
            Some(ttl) => ttl,
            None => return Ok(StoreOutcome::NotCacheable),
        };

        let expires_at = now + Duration::seconds(ttl as i64);
        let entry = CacheEntry {
            raw_answers: message.extract_records(),
            answer_count: message.answer_count() as u16,
            expires_at,
            data,
        };

        let mut synthesized = 0;
        if let EntryData::Referral { ref nameservers } = entry.data {
            for (glue_key, glue_entry) in synthesize_glue(message, nameservers, key.class, expires_at)? {
                self.entries.insert(glue_key, glue_entry);
                synthesized += 1;
            }
        }

        log::debug!(
            "caching {} {:?} until {} ({} records, {} synthesized)",
            key.name,
            key.qtype,
            expires_at,
            entry.raw_answers.len(),
            synthesized
        );
        self.entries.insert(key, entry);

        Ok(StoreOutcome::Cached { synthesized })
    }

    pub fn to_snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Local::now(),
            entries: self
                .entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect(),
        }
    }

    pub fn from_snapshot(snapshot: CacheSnapshot) -> Cache {
        Cache {
            entries: snapshot.entries.into_iter().collect(),
        }
    }
}

/// The cache shared by every request handler
///
/// All reads and writes of the map go through one lock. Snapshot writes are
/// ordered by a second lock and only hold the map lock while copying it.
#[derive(Default)]
pub struct SynchronizedCache {
    cache: Mutex<Cache>,
    snapshot_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl SynchronizedCache {
    /// An in-memory cache that is never persisted
    pub fn new() -> SynchronizedCache {
        SynchronizedCache::default()
    }

    /// A cache backed by a snapshot file, loading it if present
    pub fn with_snapshot<P: AsRef<Path>>(path: P) -> Result<SynchronizedCache> {
        let path = path.as_ref().to_path_buf();
        let cache = Self::load(&path)?;

        log::info!(
            "Loaded {} cache entries from {}",
            cache.len(),
            path.display()
        );

        Ok(SynchronizedCache {
            cache: Mutex::new(cache),
            snapshot_path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    /// An empty cache that overwrites the snapshot at `path` on first store
    pub fn replacing_snapshot<P: AsRef<Path>>(path: P) -> SynchronizedCache {
        SynchronizedCache {
            cache: Mutex::new(Cache::new()),
            snapshot_path: Some(path.as_ref().to_path_buf()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Read a snapshot; a missing file yields an empty cache
    pub fn load(path: &Path) -> Result<Cache> {
        if !path.exists() {
            log::info!(
                "Cache file {} does not exist, starting with empty cache",
                path.display()
            );
            return Ok(Cache::new());
        }

        let data = fs::read(path)?;
        let snapshot: CacheSnapshot = serde_json::from_slice(&data)?;

        Ok(Cache::from_snapshot(snapshot))
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.cache.lock().get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, entry: CacheEntry) {
        self.cache.lock().insert(key, entry);
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lookup_at(key, Local::now())
    }

    pub fn lookup_at(&self, key: &CacheKey, now: DateTime<Local>) -> Option<CacheEntry> {
        self.cache.lock().lookup(key, now).cloned()
    }

    pub fn store(&self, key: CacheKey, message: &DnsMessage) -> Result<StoreOutcome> {
        self.store_at(key, message, Local::now())
    }

    /// Store a reply and persist the snapshot if anything changed
    ///
    /// A failed snapshot write is logged; the in-memory update stands.
    pub fn store_at(
        &self,
        key: CacheKey,
        message: &DnsMessage,
        now: DateTime<Local>,
    ) -> Result<StoreOutcome> {
        let outcome = self.cache.lock().store(key, message, now)?;

        if let StoreOutcome::Cached { .. } = outcome {
            if let Err(e) = self.persist() {
                log::warn!("Failed to persist cache snapshot: {}", e);
            }
        }

        Ok(outcome)
    }

    pub fn persist(&self) -> Result<()> {
        let path = match self.snapshot_path {
            Some(ref path) => path,
            None => return Ok(()),
        };

        let _writer = self.persist_lock.lock();
        let snapshot = self.cache.lock().to_snapshot();

        let data = serde_json::to_vec(&snapshot)?;

        let mut temp_path = OsString::from(path.as_os_str());
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        fs::write(&temp_path, &data)?;
        fs::rename(&temp_path, path)?;

        log::debug!(
            "Saved {} cache entries to {} ({} bytes)",
            snapshot.entries.len(),
            path.display(),
            data.len()
        );

        Ok(())
    }
}
