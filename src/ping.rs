//! Latency measurement.
//!
//! Each relay is probed with a fixed fallback chain: the system `ping`
//! binary, then a TCP connect to the game ports, then a Source Engine
//! query over UDP. The first probe that answers wins.
//!
//! [`PingService::ping_servers`] probes many servers concurrently, bounded
//! by `max_workers`, and reports results as they complete.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, UdpSocket};
use tokio::process::Command;
use tracing::debug;

use crate::models::{Server, ServerStatus};
use crate::signal::ShutdownToken;

pub const DEFAULT_MAX_WORKERS: usize = 50;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Steam game server ports tried by the TCP probe
const GAME_PORTS: std::ops::RangeInclusive<u16> = 27015..=27020;
const QUERY_PORT: u16 = 27015;
const SOURCE_ENGINE_QUERY: &[u8] = b"\xff\xff\xff\xffTSource Engine Query\x00";

/// Something that can measure round-trip time to a host, in milliseconds.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, host: Ipv4Addr, timeout: Duration) -> Option<f64>;
}

/// The production probe chain: system ping, then TCP, then UDP.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackProber;

#[async_trait]
impl Prober for FallbackProber {
    async fn probe(&self, host: Ipv4Addr, timeout: Duration) -> Option<f64> {
        ping_host(host, timeout).await
    }
}

/// Probe a host with the full fallback chain.
pub async fn ping_host(host: Ipv4Addr, timeout: Duration) -> Option<f64> {
    if let Some(ms) = system_ping(host, timeout).await {
        return Some(ms);
    }
    tcp_ping(host, timeout).await
}

/// Run `ping -c 1 -W <secs>` and parse the reported time.
pub async fn system_ping(host: Ipv4Addr, timeout: Duration) -> Option<f64> {
    // -W takes whole seconds; 0 would mean "wait forever" on some builds
    let wait_secs = timeout.as_secs().max(1).to_string();
    let host_str = host.to_string();
    let child = Command::new("ping")
        .args(["-c", "1", "-W", &wait_secs, &host_str])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout + Duration::from_secs(1), child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!("ping unavailable: {}", e);
            return None;
        }
        Err(_) => return None,
    };

    if !output.status.success() {
        return None;
    }
    parse_ping_time(&String::from_utf8_lossy(&output.stdout))
}

/// Extract the RTT from ping output such as `time=12.3 ms` or `time<1 ms`.
pub fn parse_ping_time(output: &str) -> Option<f64> {
    let mut rest = output;
    while let Some(idx) = rest.find("time") {
        let after = &rest[idx + 4..];
        rest = after;

        let Some(value) = after.strip_prefix('=').or_else(|| after.strip_prefix('<')) else {
            continue;
        };
        let number_len = value
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
            .count();
        if number_len == 0 {
            continue;
        }
        let (number, tail) = value.split_at(number_len);
        if !tail.trim_start().starts_with("ms") {
            continue;
        }
        if let Ok(ms) = number.parse::<f64>() {
            return Some(ms);
        }
    }
    None
}

/// Time a TCP connect to the game ports. A refused connection still proves
/// the host answered. Falls back to [`udp_ping`] when no port responds.
pub async fn tcp_ping(host: Ipv4Addr, timeout: Duration) -> Option<f64> {
    for port in GAME_PORTS {
        let addr = SocketAddr::from((host, port));
        let start = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => return Some(elapsed_ms(start)),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                return Some(elapsed_ms(start))
            }
            Ok(Err(_)) | Err(_) => continue,
        }
    }
    udp_ping(host, timeout).await
}

/// Send a Source Engine query and time the reply.
///
/// Without a reply the elapsed time is still returned if it stayed under
/// the timeout.
pub async fn udp_ping(host: Ipv4Addr, timeout: Duration) -> Option<f64> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await.ok()?;
    let start = Instant::now();
    socket
        .send_to(SOURCE_ENGINE_QUERY, (host, QUERY_PORT))
        .await
        .ok()?;

    let mut buf = [0u8; 1024];
    match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Ok(Ok(_)) => Some(elapsed_ms(start)),
        Ok(Err(_)) => None,
        Err(_) => {
            let elapsed = elapsed_ms(start);
            (elapsed < timeout.as_secs_f64() * 1000.0).then_some(elapsed)
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Store a measured latency on the server. Blocked servers keep their status.
fn apply_latency(server: &mut Server, latency: Option<f64>) -> Option<u32> {
    server.latency_ms = latency.map(|ms| ms.max(0.0) as u32);
    if server.status != ServerStatus::Blocked {
        server.status = if server.latency_ms.is_some() {
            ServerStatus::Available
        } else {
            ServerStatus::Timeout
        };
    }
    server.latency_ms
}

/// Concurrent latency measurement for servers
pub struct PingService<P: Prober = FallbackProber> {
    prober: P,
    timeout: Duration,
    max_workers: usize,
    shutdown: ShutdownToken,
}

impl PingService<FallbackProber> {
    pub fn new(timeout: Duration) -> Self {
        Self::with_prober(FallbackProber, timeout, DEFAULT_MAX_WORKERS)
    }
}

impl<P: Prober> PingService<P> {
    pub fn with_prober(prober: P, timeout: Duration, max_workers: usize) -> Self {
        Self {
            prober,
            timeout,
            max_workers: max_workers.max(1),
            shutdown: ShutdownToken::new(),
        }
    }

    /// Stop scheduling new probes once this token is cancelled
    pub fn with_shutdown(mut self, token: ShutdownToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True once the run was asked to stop early
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Probe the first relay, and the second only if the first fails.
    async fn measure(&self, ips: &[Ipv4Addr]) -> Option<f64> {
        for ip in ips.iter().take(2) {
            if let Some(ms) = self.prober.probe(*ip, self.timeout).await {
                return Some(ms);
            }
        }
        None
    }

    /// Ping one server and update its latency and status.
    pub async fn ping_server(&self, server: &mut Server) -> Option<u32> {
        let latency = self.measure(&server.ip_addresses()).await;
        apply_latency(server, latency)
    }

    /// Ping many servers concurrently.
    ///
    /// `on_progress(completed, total, code, latency)` runs as each result
    /// arrives. Results are keyed by server code. After shutdown is requested
    /// remaining servers are not probed and are reported as `None`.
    pub async fn ping_servers<F>(
        &self,
        servers: &mut [Server],
        mut on_progress: F,
    ) -> HashMap<String, Option<u32>>
    where
        F: FnMut(usize, usize, &str, Option<u32>),
    {
        let total = servers.len();
        let jobs: Vec<(usize, Vec<Ipv4Addr>)> = servers
            .iter()
            .enumerate()
            .map(|(idx, s)| (idx, s.ip_addresses()))
            .collect();

        let mut results = stream::iter(jobs.into_iter().map(|(idx, ips)| async move {
            if self.shutdown.is_cancelled() {
                return (idx, None);
            }
            (idx, Some(self.measure(&ips).await))
        }))
        .buffer_unordered(self.max_workers);

        let mut latencies = HashMap::with_capacity(total);
        let mut completed = 0;
        while let Some((idx, measured)) = results.next().await {
            let server = &mut servers[idx];
            let latency = match measured {
                Some(latency) => apply_latency(server, latency),
                None => None,
            };
            completed += 1;
            on_progress(completed, total, &server.code, latency);
            latencies.insert(server.code.clone(), latency);
        }

        debug!(
            "Pinged {} servers, {} responded",
            total,
            latencies.values().filter(|l| l.is_some()).count()
        );
        latencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Relay;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Answers from a fixed table and records peak concurrency
    struct TableProber {
        answers: HashMap<Ipv4Addr, Option<f64>>,
        in_flight: AtomicUsize,
        peak: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl TableProber {
        fn new(answers: &[(&str, Option<f64>)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(ip, ms)| (ip.parse().unwrap(), *ms))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: Arc::new(AtomicUsize::new(0)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Prober for TableProber {
        async fn probe(&self, host: Ipv4Addr, _timeout: Duration) -> Option<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.answers.get(&host).copied().flatten()
        }
    }

    fn server(code: &str, ips: &[&str]) -> Server {
        Server::new(
            code.to_uppercase(),
            code,
            ips.iter()
                .map(|ip| Relay {
                    ipv4: ip.parse().unwrap(),
                    port_range: None,
                })
                .collect(),
        )
    }

    #[test]
    fn test_parse_ping_time_linux() {
        let out = "64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=12.3 ms\n";
        assert_eq!(parse_ping_time(out), Some(12.3));
    }

    #[test]
    fn test_parse_ping_time_less_than() {
        assert_eq!(parse_ping_time("icmp_seq=1 ttl=64 time<1 ms"), Some(1.0));
        assert_eq!(parse_ping_time("time=7ms"), Some(7.0));
    }

    #[test]
    fn test_parse_ping_time_ignores_summary_without_ms() {
        let out = "1 packets transmitted, 0 received, 100% packet loss, time 0ms\n";
        assert_eq!(parse_ping_time(out), None);
        assert_eq!(parse_ping_time(""), None);
    }

    #[test]
    fn test_apply_latency_truncates_and_sets_status() {
        let mut s = server("fra", &[]);
        assert_eq!(apply_latency(&mut s, Some(42.9)), Some(42));
        assert_eq!(s.status, ServerStatus::Available);
        assert_eq!(apply_latency(&mut s, None), None);
        assert_eq!(s.status, ServerStatus::Timeout);
    }

    #[test]
    fn test_apply_latency_keeps_blocked() {
        let mut s = server("fra", &[]);
        s.status = ServerStatus::Blocked;
        apply_latency(&mut s, Some(10.0));
        assert_eq!(s.status, ServerStatus::Blocked);
        assert_eq!(s.latency_ms, Some(10));
    }

    #[tokio::test]
    async fn test_ping_server_falls_back_to_second_ip_only() {
        let prober = TableProber::new(&[("10.0.0.1", None), ("10.0.0.2", Some(33.0))]);
        let calls = Arc::clone(&prober.calls);
        let service = PingService::with_prober(prober, DEFAULT_TIMEOUT, 4)
            .with_shutdown(ShutdownToken::isolated());

        let mut s = server("fra", &["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert_eq!(service.ping_server(&mut s).await, Some(33));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ping_server_without_relays_times_out() {
        let service = PingService::with_prober(TableProber::new(&[]), DEFAULT_TIMEOUT, 4)
            .with_shutdown(ShutdownToken::isolated());
        let mut s = server("nil", &[]);
        assert_eq!(service.ping_server(&mut s).await, None);
        assert_eq!(s.status, ServerStatus::Timeout);
    }

    #[tokio::test]
    async fn test_ping_servers_bounded_and_keyed_by_code() {
        let answers: Vec<(String, Option<f64>)> = (1..=8)
            .map(|i| (format!("10.0.1.{}", i), if i % 2 == 0 { Some(i as f64) } else { None }))
            .collect();
        let answer_refs: Vec<(&str, Option<f64>)> =
            answers.iter().map(|(ip, ms)| (ip.as_str(), *ms)).collect();
        let prober = TableProber::new(&answer_refs);
        let peak = Arc::clone(&prober.peak);
        let service = PingService::with_prober(prober, DEFAULT_TIMEOUT, 3)
            .with_shutdown(ShutdownToken::isolated());

        let ips: Vec<String> = (1..=8).map(|i| format!("10.0.1.{}", i)).collect();
        let mut servers: Vec<Server> = ips
            .iter()
            .enumerate()
            .map(|(i, ip)| server(&format!("s{}", i + 1), &[ip.as_str()]))
            .collect();

        let mut progress = Vec::new();
        let results = service
            .ping_servers(&mut servers, |done, total, code, latency| {
                progress.push((done, total, code.to_string(), latency));
            })
            .await;

        assert_eq!(results.len(), 8);
        assert_eq!(results["s2"], Some(2));
        assert_eq!(results["s1"], None);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(progress.len(), 8);
        assert_eq!(progress.last().unwrap().0, 8);
        assert!(progress.iter().all(|p| p.1 == 8));
        assert_eq!(servers[1].status, ServerStatus::Available);
        assert_eq!(servers[0].status, ServerStatus::Timeout);
    }

    #[tokio::test]
    async fn test_ping_servers_after_shutdown_probes_nothing() {
        let prober = TableProber::new(&[("10.0.0.1", Some(5.0))]);
        let calls = Arc::clone(&prober.calls);
        let token = ShutdownToken::isolated();
        token.cancel();
        let service = PingService::with_prober(prober, DEFAULT_TIMEOUT, 4).with_shutdown(token);

        let mut servers = vec![server("fra", &["10.0.0.1"])];
        let results = service.ping_servers(&mut servers, |_, _, _, _| {}).await;
        assert_eq!(results["fra"], None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(servers[0].status, ServerStatus::Unknown);
    }

    #[tokio::test]
    async fn test_tcp_ping_counts_refused_connection() {
        // Nothing listens on the game ports of localhost, so the connect is refused
        let latency = tcp_ping(Ipv4Addr::LOCALHOST, Duration::from_millis(500)).await;
        assert!(latency.is_some());
    }
}
