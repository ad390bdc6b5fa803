use std::env;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use getopts::Options;

use dnsrelay::dns::cache::SynchronizedCache;
use dnsrelay::dns::context::{ServerContext, DEFAULT_THREAD_COUNT, DEFAULT_UPSTREAM_TIMEOUT};
use dnsrelay::dns::server::{DnsServer, DnsUdpServer};

const DEFAULT_UPSTREAM: &str = "8.8.8.8:53";
const DEFAULT_LISTEN: &str = "0.0.0.0:53";
const DEFAULT_CACHE_FILE: &str = "dns_cache.json";

/// How often the running totals are logged
const STATS_INTERVAL: Duration = Duration::from_secs(60);

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

/// Resolve `HOST[:PORT]`, defaulting the port to 53
fn parse_address(value: &str) -> Option<SocketAddr> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr);
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, 53));
    }

    let with_port = match value.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => value.to_string(),
        _ => format!("{}:53", value),
    };

    with_port.to_socket_addrs().ok()?.next()
}

fn main() {
    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
    {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let args: Vec<String> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| "dnsrelay".to_string());

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "f",
        "forward-address",
        "Upstream DNS server to forward to (default 8.8.8.8:53)",
        "HOST[:PORT]",
    );
    opts.optopt(
        "l",
        "listen",
        "Address to accept queries on (default 0.0.0.0:53)",
        "ADDR:PORT",
    );
    opts.optopt(
        "c",
        "cache-file",
        "Path of the cache snapshot (default dns_cache.json)",
        "PATH",
    );
    opts.optflag("", "no-cache-file", "Keep the cache in memory only");
    opts.optopt(
        "t",
        "timeout",
        "Seconds to wait for an upstream reply (default 5)",
        "SECONDS",
    );
    opts.optopt(
        "w",
        "workers",
        "Number of request worker threads (default 20)",
        "COUNT",
    );

    let opt_matches = match opts.parse(args.iter().skip(1)) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}", f);
            print_usage(&program, opts);
            std::process::exit(2);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let forward = opt_matches
        .opt_str("f")
        .unwrap_or_else(|| DEFAULT_UPSTREAM.to_string());
    let upstream = match parse_address(&forward) {
        Some(addr) => addr,
        None => {
            log::error!("Forward address {} could not be resolved", forward);
            std::process::exit(2);
        }
    };

    let listen = opt_matches
        .opt_str("l")
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let listen_addr = match listen.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(e) => {
            log::error!("Listen address {} is invalid: {}", listen, e);
            std::process::exit(2);
        }
    };

    let timeout = match opt_matches.opt_str("t").map(|t| t.parse::<u64>()) {
        Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
        Some(_) => {
            log::warn!(
                "Invalid timeout, using {} seconds",
                DEFAULT_UPSTREAM_TIMEOUT.as_secs()
            );
            DEFAULT_UPSTREAM_TIMEOUT
        }
        None => DEFAULT_UPSTREAM_TIMEOUT,
    };

    let thread_count = match opt_matches.opt_str("w").map(|w| w.parse::<usize>()) {
        Some(Ok(count)) if count > 0 => count,
        Some(_) => {
            log::warn!("Invalid worker count, using {}", DEFAULT_THREAD_COUNT);
            DEFAULT_THREAD_COUNT
        }
        None => DEFAULT_THREAD_COUNT,
    };

    let cache = if opt_matches.opt_present("no-cache-file") {
        SynchronizedCache::new()
    } else {
        let path = opt_matches
            .opt_str("c")
            .unwrap_or_else(|| DEFAULT_CACHE_FILE.to_string());
        match SynchronizedCache::with_snapshot(&path) {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!("Failed to load cache from {}, starting empty: {}", path, e);
                SynchronizedCache::replacing_snapshot(&path)
            }
        }
    };

    let mut context = ServerContext::forwarding(Arc::new(cache), upstream, timeout);
    context.listen_addr = listen_addr;
    context.thread_count = thread_count;
    let context = Arc::new(context);

    let server = match DnsUdpServer::bind(context.clone()) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to bind UDP listener on {}: {}", listen_addr, e);
            std::process::exit(1);
        }
    };

    log::info!(
        "Listening on {}, forwarding to {} with {} workers",
        listen_addr,
        upstream,
        thread_count
    );

    if let Err(e) = server.run_server() {
        log::error!("Failed to start UDP server: {}", e);
        std::process::exit(1);
    }

    loop {
        thread::sleep(STATS_INTERVAL);

        let stats = &context.statistics;
        log::info!(
            "queries={} cache_hits={} forwarded={} dropped={} cached_entries={}",
            stats.get_udp_query_count(),
            stats.get_cache_hit_count(),
            stats.get_forwarded_count(),
            stats.get_dropped_count(),
            context.cache.len()
        );
    }
}
