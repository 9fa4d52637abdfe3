//! Relay networking on embassy-net
//!
//! [`NetUpstream`] implements [`Upstream`] with reqwless for the JSON
//! fetches and the sensor POST, and with a raw TCP socket for the page the
//! `URL` command streams back unmodified. WiFi and clock state live in
//! critical-section cells shared with the WiFi and SNTP tasks.

use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt::Write as _;

use embassy_net::dns::{DnsQueryType, DnsSocket};
use embassy_net::tcp::TcpSocket;
use embassy_net::tcp::client::{TcpClient, TcpClientState};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_io_async::{Read, Write};
use heapless::String;
use log::{debug, info, warn};
use reqwless::client::{HttpClient, TlsConfig, TlsVerify};
use reqwless::headers::ContentType;
use reqwless::request::{Method, RequestBuilder};

use crate::protocol::{DateTime, status};
use crate::relay::{PageError, PageSink, Upstream, WifiWatch};
use crate::sntp::{self, ClockSync};
use crate::upstream::{Resource, split_location};
use crate::{PodError, config};

const TLS_BUF_LEN: usize = 16_640;
const HEADER_BUF_LEN: usize = 2048;
const URL_LEN: usize = 256;
const PAGE_SOCKET_BUF: usize = 1024;
const SNTP_LOCAL_PORT: u16 = 50_123;
const SNTP_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const SNTP_RETRY: Duration = Duration::from_secs(30);

/// Socket state for reqwless connections
pub type ClientState = TcpClientState<1, 4096, 4096>;

static WIFI: Mutex<CriticalSectionRawMutex, RefCell<WifiWatch>> = Mutex::new(RefCell::new(
    WifiWatch::new(0, config::WIFI_RESTART_AFTER_MS),
));

static CLOCK: Mutex<CriticalSectionRawMutex, RefCell<ClockSync>> =
    Mutex::new(RefCell::new(ClockSync::new(config::UTC_OFFSET_SECS)));

pub fn now_ms() -> u64 {
    Instant::now().as_millis()
}

pub fn wifi_connected() {
    WIFI.lock(|w| w.borrow_mut().connected());
}

pub fn wifi_disconnected() {
    let now = now_ms();
    WIFI.lock(|w| w.borrow_mut().disconnected(now));
}

pub fn wifi_should_restart() -> bool {
    let now = now_ms();
    WIFI.lock(|w| w.borrow().should_restart(now))
}

fn wifi_status() -> u16 {
    WIFI.lock(|w| w.borrow().status())
}

fn local_time() -> Option<DateTime> {
    let now = now_ms();
    CLOCK.lock(|c| c.borrow().local_time(now))
}

async fn resolve(stack: Stack<'_>, host: &str) -> Option<IpAddress> {
    match stack.dns_query(host, DnsQueryType::A).await {
        Ok(addrs) => addrs.first().copied(),
        Err(e) => {
            warn!("[DNS] {} not resolved: {:?}", host, e);
            None
        }
    }
}

fn fetch_error(e: reqwless::Error) -> u16 {
    warn!("[HTTP] no reply: {:?}", e);
    match e {
        reqwless::Error::Codec => status::HEADER_END_MISSING,
        _ => status::NO_REPLY,
    }
}

enum Fetched {
    Body(usize),
    Redirect(String<URL_LEN>),
}

pub struct NetUpstream {
    stack: Stack<'static>,
    tcp: TcpClient<'static, 1, 4096, 4096>,
    dns: DnsSocket<'static>,
    seed: u64,
    tls_read: Vec<u8>,
    tls_write: Vec<u8>,
    headers: Vec<u8>,
}

impl NetUpstream {
    pub fn new(stack: Stack<'static>, state: &'static ClientState, seed: u64) -> Self {
        Self {
            stack,
            tcp: TcpClient::new(stack, state),
            dns: DnsSocket::new(stack),
            seed,
            tls_read: vec![0; TLS_BUF_LEN],
            tls_write: vec![0; TLS_BUF_LEN],
            headers: vec![0; HEADER_BUF_LEN],
        }
    }

    async fn get(&mut self, host: &str, path: &str, body: &mut [u8]) -> Result<Fetched, u16> {
        let mut url: String<URL_LEN> = String::new();
        write!(url, "https://{}{}", host, path).map_err(|_| status::CONNECT_FAILED)?;
        debug!("[HTTP] GET {}", url);

        let tls = TlsConfig::new(
            self.seed,
            &mut self.tls_read,
            &mut self.tls_write,
            TlsVerify::None,
        );
        let mut client = HttpClient::new_with_tls(&self.tcp, &self.dns, tls);
        let mut request = client
            .request(Method::GET, &url)
            .await
            .map_err(|e| {
                warn!("[HTTP] connect to {} failed: {:?}", host, e);
                status::CONNECT_FAILED
            })?
            .headers(&[
                ("User-Agent", config::USER_AGENT),
                ("Accept", "application/json"),
            ]);
        let response = request.send(&mut self.headers).await.map_err(fetch_error)?;

        let code = response.status.0;
        if code == 303 {
            let location = response
                .headers()
                .find(|(name, _)| name.eq_ignore_ascii_case("location"))
                .and_then(|(_, value)| core::str::from_utf8(value).ok())
                .ok_or(status::REDIRECT_NO_LOCATION)?;
            let mut owned = String::new();
            owned
                .push_str(location)
                .map_err(|_| status::REDIRECT_EMPTY)?;
            return Ok(Fetched::Redirect(owned));
        }
        if code != status::OK {
            return Err(code);
        }

        let mut reader = response.body().reader();
        let mut len = 0;
        while len < body.len() {
            match reader.read(&mut body[len..]).await {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) => return Err(fetch_error(e)),
            }
        }
        Ok(Fetched::Body(len))
    }
}

impl Upstream for NetUpstream {
    fn wifi_status(&self) -> u16 {
        wifi_status()
    }

    fn local_time(&self) -> Option<DateTime> {
        local_time()
    }

    async fn fetch(&mut self, resource: Resource, body: &mut [u8]) -> Result<usize, u16> {
        match self.get(resource.host(), resource.path(), body).await? {
            Fetched::Body(len) => Ok(len),
            Fetched::Redirect(location) => {
                let (host, path) = split_location(&location)?;
                info!("[HTTP] redirected to {}{}", host, path);
                match self.get(host, path, body).await? {
                    Fetched::Body(len) => Ok(len),
                    // one redirect is enough
                    Fetched::Redirect(_) => Err(303),
                }
            }
        }
    }

    async fn post(&mut self, host: &str, path: &str, json: &str) -> u16 {
        let mut url: String<URL_LEN> = String::new();
        if write!(url, "http://{}{}", host, path).is_err() {
            return status::BAD_REQUEST;
        }

        let tls = TlsConfig::new(
            self.seed,
            &mut self.tls_read,
            &mut self.tls_write,
            TlsVerify::None,
        );
        let mut client = HttpClient::new_with_tls(&self.tcp, &self.dns, tls);
        let mut request = match client.request(Method::POST, &url).await {
            Ok(request) => request
                .body(json.as_bytes())
                .content_type(ContentType::ApplicationJson)
                .headers(&[("User-Agent", config::USER_AGENT)]),
            Err(e) => {
                warn!("[HTTP] connect to {} failed: {:?}", host, e);
                return status::BAD_REQUEST;
            }
        };

        match request.send(&mut self.headers).await {
            Ok(response) => response.status.0,
            Err(e) => {
                warn!("[HTTP] POST {} failed: {:?}", url, e);
                status::UPSTREAM_TIMEOUT
            }
        }
    }

    async fn stream_page<P: PageSink>(
        &mut self,
        host: &str,
        path: &str,
        sink: &mut P,
    ) -> Result<(), PageError> {
        let addr = resolve(self.stack, host).await.ok_or(PageError::Connect)?;

        let mut rx = [0u8; PAGE_SOCKET_BUF];
        let mut tx = [0u8; 256];
        let mut socket = TcpSocket::new(self.stack, &mut rx, &mut tx);
        socket.set_timeout(Some(Duration::from_millis(config::UPSTREAM_TIMEOUT_MS)));
        socket
            .connect(IpEndpoint::new(addr, 80))
            .await
            .map_err(|_| PageError::Connect)?;

        let mut request: String<URL_LEN> = String::new();
        write!(
            request,
            "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: close\r\n\r\n",
            path,
            host,
            config::USER_AGENT
        )
        .map_err(|_| PageError::Connect)?;
        socket
            .write_all(request.as_bytes())
            .await
            .map_err(|_| PageError::Connect)?;

        let mut chunk = [0u8; 128];
        loop {
            match socket.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = sink.push(&chunk[..n]).await {
                        socket.abort();
                        return Err(e);
                    }
                }
                Err(_) => {
                    socket.abort();
                    return Err(PageError::Read);
                }
            }
        }
        socket.close();
        Ok(())
    }
}

async fn sntp_once(stack: Stack<'_>) -> Result<u64, PodError> {
    let addr = resolve(stack, config::NTP_SERVER)
        .await
        .ok_or(PodError::Upstream)?;

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buf = [0u8; 128];
    let mut tx_buf = [0u8; 128];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buf, &mut tx_meta, &mut tx_buf);
    socket.bind(SNTP_LOCAL_PORT).map_err(|_| PodError::Upstream)?;

    socket
        .send_to(&sntp::request(), IpEndpoint::new(addr, config::NTP_PORT))
        .await
        .map_err(|_| PodError::Upstream)?;

    let mut reply = [0u8; 64];
    let (len, _) = with_timeout(SNTP_REPLY_TIMEOUT, socket.recv_from(&mut reply))
        .await
        .map_err(|_| PodError::Upstream)?
        .map_err(|_| PodError::Upstream)?;
    sntp::parse_reply(&reply[..len])
}

/// Keep the shared clock synchronised
pub async fn run_sntp(stack: Stack<'static>) -> ! {
    loop {
        stack.wait_config_up().await;
        let wait = match sntp_once(stack).await {
            Ok(unix) => {
                let now = now_ms();
                CLOCK.lock(|c| c.borrow_mut().update(unix, now));
                if let Some(time) = local_time() {
                    info!("[SNTP] local time {}", time);
                }
                Duration::from_millis(config::NTP_RESYNC_INTERVAL_MS)
            }
            Err(e) => {
                warn!("[SNTP] sync failed: {:?}", e);
                SNTP_RETRY
            }
        };
        Timer::after(wait).await;
    }
}
