//! client for forwarding raw queries to the upstream resolver

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use derive_more::{Display, Error, From};

/// Largest reply accepted from upstream
pub const MAX_PACKET_SIZE: usize = 512;

#[derive(Debug, Display, From, Error)]
pub enum ClientError {
    Io(std::io::Error),
    #[from(ignore)]
    EmptyReply,
    #[from(ignore)]
    TimeOut,
}

type Result<T> = std::result::Result<T, ClientError>;

pub trait UpstreamClient {
    fn get_sent_count(&self) -> usize;
    fn get_failed_count(&self) -> usize;

    /// Send `query` unmodified and return the single reply datagram
    fn forward(&self, query: &[u8]) -> Result<Vec<u8>>;
}

/// Forwards over UDP to one fixed resolver
///
/// Every query gets its own ephemeral socket connected to the upstream, so
/// concurrent requests never see each other's replies and no matching by id
/// is needed. The socket carries a read timeout; there are no retries.
pub struct UdpForwarder {
    server: SocketAddr,
    timeout: Duration,

    total_sent: AtomicUsize,
    total_failed: AtomicUsize,
}

impl UdpForwarder {
    pub fn new(server: SocketAddr, timeout: Duration) -> UdpForwarder {
        UdpForwarder {
            server,
            timeout,
            total_sent: AtomicUsize::new(0),
            total_failed: AtomicUsize::new(0),
        }
    }

    fn exchange(&self, query: &[u8]) -> Result<Vec<u8>> {
        let bind_addr: SocketAddr = if self.server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.connect(self.server)?;
        socket.send(query)?;

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(ClientError::TimeOut);
            }
            Err(e) => return Err(ClientError::Io(e)),
        };

        if len == 0 {
            return Err(ClientError::EmptyReply);
        }

        Ok(buf[..len].to_vec())
    }
}

impl UpstreamClient for UdpForwarder {
    fn get_sent_count(&self) -> usize {
        self.total_sent.load(Ordering::Acquire)
    }

    fn get_failed_count(&self) -> usize {
        self.total_failed.load(Ordering::Acquire)
    }

    fn forward(&self, query: &[u8]) -> Result<Vec<u8>> {
        let _ = self.total_sent.fetch_add(1, Ordering::Release);

        let result = self.exchange(query);
        if let Err(ref e) = result {
            let _ = self.total_failed.fetch_add(1, Ordering::Release);
            log::warn!("Forwarding to {} failed: {}", self.server, e);
        }

        result
    }
}
