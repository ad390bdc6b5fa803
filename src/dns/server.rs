//! UDP server and per-request handling for the relay

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Builder;

use derive_more::{Display, Error, From};

use crate::dns::cache::{CacheKey, StoreOutcome};
use crate::dns::client::{ClientError, MAX_PACKET_SIZE};
use crate::dns::context::ServerContext;
use crate::dns::protocol::{
    build_response, decode_question, DnsMessage, ProtocolError, HEADER_LEN,
};

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
    Protocol(ProtocolError),
    Client(ClientError),
}

type Result<T> = std::result::Result<T, ServerError>;

macro_rules! ignore_or_report {
    ( $x:expr, $message:expr ) => {
        match $x {
            Ok(_) => {}
            Err(e) => {
                log::info!("{}: {:?}", $message, e);
                return;
            }
        };
    };
}

/// Common trait for DNS servers
pub trait DnsServer {
    /// Initialize the server and start listenening
    ///
    /// This method should _NOT_ block. Rather, servers are expected to spawn a new
    /// thread to handle requests and return immediately.
    fn run_server(self) -> Result<()>;
}

/// How a single datagram was handled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Answered from the cache with a rebuilt reply
    CacheHit(Vec<u8>),
    /// Answered with the upstream reply, verbatim
    Forwarded(Vec<u8>),
    /// Malformed request or no upstream reply; nothing is sent back
    Dropped,
}

impl RequestOutcome {
    pub fn into_reply(self) -> Option<Vec<u8>> {
        match self {
            RequestOutcome::CacheHit(reply) | RequestOutcome::Forwarded(reply) => Some(reply),
            RequestOutcome::Dropped => None,
        }
    }
}

/// Perform the actual work for a query
///
/// The question is decoded and looked up in the cache. A fresh entry is
/// replayed behind a new header carrying the request id. Otherwise the
/// request goes upstream unmodified, the reply is offered to the cache and
/// returned as is. Any failure along the way drops the request.
pub fn execute_query(context: &ServerContext, request: &[u8]) -> RequestOutcome {
    match resolve_request(context, request) {
        Ok(outcome) => outcome,
        Err(e) => {
            let _ = context
                .statistics
                .dropped_count
                .fetch_add(1, Ordering::Release);
            log::info!("Dropping request: {}", e);
            RequestOutcome::Dropped
        }
    }
}

fn resolve_request(context: &ServerContext, request: &[u8]) -> Result<RequestOutcome> {
    let (question, end) = decode_question(request)?;
    let id = u16::from_be_bytes([request[0], request[1]]);
    let key = CacheKey::from_question(&question);

    if let Some(entry) = context.cache.lookup(&key) {
        log::info!("FROM CACHE: {} {:?}", key.name, key.qtype);
        let _ = context
            .statistics
            .cache_hit_count
            .fetch_add(1, Ordering::Release);

        let reply = build_response(
            id,
            &request[HEADER_LEN..end],
            entry.response_counts(),
            &entry.raw_answers,
        )?;
        return Ok(RequestOutcome::CacheHit(reply));
    }

    log::info!("forwarding {} {:?}", key.name, key.qtype);
    let reply = context.client.forward(request)?;
    let _ = context
        .statistics
        .forwarded_count
        .fetch_add(1, Ordering::Release);

    match DnsMessage::parse(&reply) {
        Ok(message) => match context.cache.store(key, &message) {
            Ok(StoreOutcome::Cached { synthesized }) if synthesized > 0 => {
                log::info!("cached referral with {} glue entries", synthesized);
            }
            Ok(StoreOutcome::Cached { .. }) => {}
            Ok(StoreOutcome::NotCacheable) => {
                log::debug!("reply for {:?} not cacheable", question.qtype);
            }
            Err(e) => log::warn!("Failed to cache reply for {}: {}", question.name, e),
        },
        Err(e) => log::warn!("Upstream reply for {} not parsed, not caching: {}", question.name, e),
    }

    Ok(RequestOutcome::Forwarded(reply))
}

type RequestQueue = VecDeque<(SocketAddr, Vec<u8>)>;

/// Queue a datagram unless `limit` requests are already waiting
fn enqueue(queue: &mut RequestQueue, limit: usize, src: SocketAddr, request: Vec<u8>) -> bool {
    if queue.len() >= limit {
        return false;
    }

    queue.push_back((src, request));
    true
}

/// The UDP server
///
/// Datagrams are read on a single thread and queued; a fixed pool of worker
/// threads handles them and sends replies from a clone of the same socket.
pub struct DnsUdpServer {
    context: Arc<ServerContext>,
    socket: UdpSocket,
    request_queue: Arc<Mutex<RequestQueue>>,
    request_cond: Arc<Condvar>,
}

impl DnsUdpServer {
    pub fn bind(context: Arc<ServerContext>) -> Result<DnsUdpServer> {
        let socket = UdpSocket::bind(context.listen_addr)?;

        Ok(DnsUdpServer {
            context,
            socket,
            request_queue: Arc::new(Mutex::new(VecDeque::new())),
            request_cond: Arc::new(Condvar::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Handle one request and send the reply, if any
    fn process_request(
        socket: &UdpSocket,
        context: &ServerContext,
        src: SocketAddr,
        request: &[u8],
    ) {
        let reply = match execute_query(context, request).into_reply() {
            Some(reply) => reply,
            None => return,
        };

        ignore_or_report!(
            socket.send_to(&reply, src),
            "Failed to send response packet"
        );
    }

    /// Spawn a worker thread to handle DNS requests
    fn spawn_request_handler(&self, thread_id: usize, socket: UdpSocket) -> std::io::Result<()> {
        let context = self.context.clone();
        let request_cond = self.request_cond.clone();
        let request_queue = self.request_queue.clone();

        let name = format!("DnsUdpServer-request-{}", thread_id);
        Builder::new().name(name).spawn(move || loop {
            let (src, request) = {
                let mut queue = match request_queue.lock() {
                    Ok(queue) => queue,
                    Err(_) => {
                        log::warn!("Request queue lock poisoned, worker exiting");
                        return;
                    }
                };

                loop {
                    if let Some(item) = queue.pop_front() {
                        break item;
                    }

                    queue = match request_cond.wait(queue) {
                        Ok(queue) => queue,
                        Err(_) => {
                            log::warn!("Request queue lock poisoned, worker exiting");
                            return;
                        }
                    };
                }
            };

            Self::process_request(&socket, &context, src, &request);
        })?;

        Ok(())
    }

    /// Spawn the main incoming request handler thread
    fn spawn_incoming_handler(self) -> std::io::Result<()> {
        Builder::new()
            .name("DnsUdpServer-incoming".into())
            .spawn(move || loop {
                let mut buf = [0u8; MAX_PACKET_SIZE];
                let (len, src) = match self.socket.recv_from(&mut buf) {
                    Ok(x) => x,
                    Err(e) => {
                        log::info!("Failed to read from UDP socket: {:?}", e);
                        continue;
                    }
                };

                let _ = self
                    .context
                    .statistics
                    .udp_query_count
                    .fetch_add(1, Ordering::Release);

                match self.request_queue.lock() {
                    Ok(mut queue) => {
                        let limit = self.context.queue_limit;
                        if enqueue(&mut queue, limit, src, buf[..len].to_vec()) {
                            self.request_cond.notify_one();
                        } else {
                            let _ = self
                                .context
                                .statistics
                                .dropped_count
                                .fetch_add(1, Ordering::Release);
                            log::warn!("Request queue full, dropping query from {}", src);
                        }
                    }
                    Err(e) => {
                        log::info!("Failed to send UDP request for processing: {}", e);
                    }
                }
            })?;

        Ok(())
    }
}

impl DnsServer for DnsUdpServer {
    fn run_server(self) -> Result<()> {
        let thread_count = self.context.thread_count.max(1);
        for thread_id in 0..thread_count {
            let socket = self.socket.try_clone()?;
            self.spawn_request_handler(thread_id, socket)?;
        }

        self.spawn_incoming_handler()?;

        Ok(())
    }
}
