//! The `ServerContext` holds the common state shared by every request handler

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dns::cache::SynchronizedCache;
use crate::dns::client::{UdpForwarder, UpstreamClient};

/// Default number of request worker threads
pub const DEFAULT_THREAD_COUNT: usize = 20;

/// Default number of datagrams allowed to wait for a worker
pub const DEFAULT_QUEUE_LIMIT: usize = 1024;

/// Default wait for an upstream reply
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct ServerStatistics {
    pub udp_query_count: AtomicUsize,
    pub cache_hit_count: AtomicUsize,
    pub forwarded_count: AtomicUsize,
    pub dropped_count: AtomicUsize,
}

impl ServerStatistics {
    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }

    pub fn get_cache_hit_count(&self) -> usize {
        self.cache_hit_count.load(Ordering::Acquire)
    }

    pub fn get_forwarded_count(&self) -> usize {
        self.forwarded_count.load(Ordering::Acquire)
    }

    pub fn get_dropped_count(&self) -> usize {
        self.dropped_count.load(Ordering::Acquire)
    }
}

/// Shared server state
///
/// Built once at startup and handed to the server behind an `Arc`. The cache
/// carries its own lock, the client is stateless apart from its counters.
pub struct ServerContext {
    pub cache: Arc<SynchronizedCache>,
    pub client: Box<dyn UpstreamClient + Sync + Send>,
    pub listen_addr: SocketAddr,
    pub thread_count: usize,
    pub queue_limit: usize,
    pub statistics: ServerStatistics,
}

impl ServerContext {
    pub fn new(
        cache: Arc<SynchronizedCache>,
        client: Box<dyn UpstreamClient + Sync + Send>,
    ) -> ServerContext {
        ServerContext {
            cache,
            client,
            listen_addr: ([0, 0, 0, 0], 53).into(),
            thread_count: DEFAULT_THREAD_COUNT,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            statistics: ServerStatistics::default(),
        }
    }

    /// A context forwarding over UDP to `upstream`
    pub fn forwarding(
        cache: Arc<SynchronizedCache>,
        upstream: SocketAddr,
        timeout: Duration,
    ) -> ServerContext {
        ServerContext::new(cache, Box::new(UdpForwarder::new(upstream, timeout)))
    }
}
