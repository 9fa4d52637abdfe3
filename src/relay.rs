//! Relay-side command interpreter
//!
//! The relay reads `\n`-terminated command lines from the serial link,
//! carries out the network or clock operation through an [`Upstream`] and
//! answers with the fixed-size records of [`crate::protocol`]. `URL` is the
//! one streamed reply: the page goes out in windows, each of which the
//! controller has to acknowledge before the next one is sent.

use embassy_time::{Duration, with_timeout};
use embedded_io_async::{Read, Write};
use heapless::{String, Vec};
use log::{debug, info, warn};

use crate::config;
use crate::protocol::{
    ACK, Command, DateTime, EOT, NtpReply, PostReply, READY_TOKEN, Record, UvReply, WeatherReply,
    WifiReply, status,
};
use crate::upstream::{Resource, parse_uv, parse_weather};

/// Longest accepted command or payload line (the POST body is the long one)
pub const LINE_LEN: usize = 256;

/// Upstream document buffer
pub const BODY_LEN: usize = 8 * 1024;

/// Largest supported URL-relay window
pub const MAX_WINDOW: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// Serial port read or write failed
    Serial,
    Timeout,
    /// A line did not fit in [`LINE_LEN`]; it was discarded
    LineTooLong,
}

/// Why a page relay stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageError {
    Connect,
    /// Upstream stalled or dropped mid-page
    Read,
    AckTimeout,
    /// Controller answered a window with something other than ACK
    BadAck(u8),
    Serial,
}

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub upstream_timeout: Duration,
    pub ack_timeout: Duration,
    pub line_timeout: Duration,
    pub window: usize,
    pub page_path: &'static str,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_millis(config::UPSTREAM_TIMEOUT_MS),
            ack_timeout: Duration::from_millis(config::ACK_TIMEOUT_MS),
            line_timeout: Duration::from_millis(config::LINE_TIMEOUT_MS),
            window: config::URL_WINDOW,
            page_path: config::URL_PATH,
        }
    }
}

/// Receiver of a relayed page
#[allow(async_fn_in_trait)]
pub trait PageSink {
    async fn push(&mut self, bytes: &[u8]) -> Result<(), PageError>;
}

/// Network and clock services the interpreter relies on
#[allow(async_fn_in_trait)]
pub trait Upstream {
    /// 200 connected, 410 disconnected, 425 not attempted yet
    fn wifi_status(&self) -> u16;

    /// Local time, `None` until the clock has been synchronised
    fn local_time(&self) -> Option<DateTime>;

    /// GET `resource` into `body`, returning its length or a failure code
    async fn fetch(&mut self, resource: Resource, body: &mut [u8]) -> Result<usize, u16>;

    /// POST `json` to `host` `path`, returning the HTTP status or a failure code
    async fn post(&mut self, host: &str, path: &str, json: &str) -> u16;

    /// GET `path` from `host` over plain HTTP and push the raw reply into `sink`
    async fn stream_page<P: PageSink>(
        &mut self,
        host: &str,
        path: &str,
        sink: &mut P,
    ) -> Result<(), PageError>;
}

/// Windowed writer for the URL reply
pub struct PageRelay<'a, S> {
    serial: &'a mut S,
    window: usize,
    ack_timeout: Duration,
    packet: Vec<u8, MAX_WINDOW>,
    sent: usize,
}

impl<'a, S: Read + Write> PageRelay<'a, S> {
    pub fn new(serial: &'a mut S, window: usize, ack_timeout: Duration) -> Self {
        Self {
            serial,
            window: window.clamp(1, MAX_WINDOW),
            ack_timeout,
            packet: Vec::new(),
            sent: 0,
        }
    }

    async fn flush_window(&mut self) -> Result<(), PageError> {
        self.serial
            .write_all(&self.packet)
            .await
            .map_err(|_| PageError::Serial)?;
        self.sent += self.packet.len();
        self.packet.clear();

        let mut ack = [0u8; 1];
        match with_timeout(self.ack_timeout, self.serial.read_exact(&mut ack)).await {
            Err(_) => Err(PageError::AckTimeout),
            Ok(Err(_)) => Err(PageError::Serial),
            Ok(Ok(())) if ack[0] == ACK => Ok(()),
            Ok(Ok(())) => Err(PageError::BadAck(ack[0])),
        }
    }

    /// Send the last partial window and the end marker, returning the page size
    pub async fn finish(self) -> Result<usize, PageError> {
        let total = self.sent + self.packet.len();
        self.serial
            .write_all(&self.packet)
            .await
            .map_err(|_| PageError::Serial)?;
        self.serial
            .write_all(&[EOT])
            .await
            .map_err(|_| PageError::Serial)?;
        self.serial.flush().await.map_err(|_| PageError::Serial)?;
        Ok(total)
    }
}

impl<S: Read + Write> PageSink for PageRelay<'_, S> {
    async fn push(&mut self, mut bytes: &[u8]) -> Result<(), PageError> {
        while !bytes.is_empty() {
            let take = (self.window - self.packet.len()).min(bytes.len());
            self.packet
                .extend_from_slice(&bytes[..take])
                .map_err(|_| PageError::Serial)?;
            bytes = &bytes[take..];
            if self.packet.len() == self.window {
                self.flush_window().await?;
            }
        }
        Ok(())
    }
}

/// Relay WiFi status as reported to the controller
#[derive(Debug, Clone, Copy)]
pub struct WifiWatch {
    status: u16,
    down_since_ms: u64,
    restart_after_ms: u64,
}

impl WifiWatch {
    pub const fn new(now_ms: u64, restart_after_ms: u64) -> Self {
        Self {
            status: status::WIFI_NOT_ATTEMPTED,
            down_since_ms: now_ms,
            restart_after_ms,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Associated and holding an address
    pub fn connected(&mut self) {
        if self.status != status::OK {
            info!("[WIFI] connected");
        }
        self.status = status::OK;
    }

    pub fn disconnected(&mut self, now_ms: u64) {
        if self.status == status::OK {
            warn!("[WIFI] connection lost");
            self.down_since_ms = now_ms;
        }
        self.status = status::WIFI_DISCONNECTED;
    }

    /// WiFi has been down for longer than the restart threshold
    pub fn should_restart(&self, now_ms: u64) -> bool {
        self.status != status::OK
            && now_ms.saturating_sub(self.down_since_ms) > self.restart_after_ms
    }
}

pub struct Relay<S, U> {
    serial: S,
    upstream: U,
    config: RelayConfig,
    body: [u8; BODY_LEN],
}

impl<S: Read + Write, U: Upstream> Relay<S, U> {
    pub fn new(serial: S, upstream: U, config: RelayConfig) -> Self {
        Self {
            serial,
            upstream,
            config,
            body: [0; BODY_LEN],
        }
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Serve commands forever
    pub async fn run(&mut self) -> ! {
        info!("[RELAY] ready");
        loop {
            if let Err(e) = self.serve_one().await {
                warn!("[RELAY] {:?}", e);
            }
        }
    }

    /// Read and answer one command line
    pub async fn serve_one(&mut self) -> Result<(), RelayError> {
        let line = match self.read_line().await {
            Ok(line) => line,
            Err(RelayError::LineTooLong) => {
                warn!("[RELAY] command line too long");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let token = line.trim();
        if token.is_empty() {
            return Ok(());
        }
        if token == READY_TOKEN {
            return self.write_all(&[ACK]).await;
        }

        let Some(command) = Command::from_token(token) else {
            warn!("[RELAY] unknown command '{}'", token);
            return Ok(());
        };
        debug!("[RELAY] {}", token);

        match command {
            Command::SyncTime => {
                let reply = match self.upstream.local_time() {
                    Some(time) => NtpReply::valid(time),
                    None => NtpReply::not_valid(),
                };
                self.write_record(&reply).await
            }
            Command::CheckWifi => {
                let reply = WifiReply {
                    status: self.upstream.wifi_status(),
                };
                self.write_record(&reply).await
            }
            Command::FetchWeather => self.weather().await,
            Command::FetchUv => self.uv().await,
            Command::PostSensors => self.post().await,
            Command::RelayUrl => self.relay_url().await,
        }
    }

    async fn read_line(&mut self) -> Result<String<LINE_LEN>, RelayError> {
        let mut line = String::new();
        let mut overflow = false;
        loop {
            let mut byte = [0u8; 1];
            self.serial
                .read_exact(&mut byte)
                .await
                .map_err(|_| RelayError::Serial)?;
            match byte[0] {
                b'\n' if overflow => return Err(RelayError::LineTooLong),
                b'\n' => return Ok(line),
                // '\r', and the trailing ACK the controller sends after a URL relay
                b if b < 0x20 || b == 0x7f => {}
                b => {
                    if !overflow && line.push(char::from(b)).is_err() {
                        overflow = true;
                    }
                }
            }
        }
    }

    /// Payload line of a command; a missing or oversized line reads as empty
    async fn payload_line(&mut self) -> Result<String<LINE_LEN>, RelayError> {
        let timeout = self.config.line_timeout;
        match with_timeout(timeout, self.read_line()).await {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(RelayError::Serial)) => Err(RelayError::Serial),
            Ok(Err(_)) | Err(_) => Ok(String::new()),
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), RelayError> {
        self.serial
            .write_all(bytes)
            .await
            .map_err(|_| RelayError::Serial)?;
        self.serial.flush().await.map_err(|_| RelayError::Serial)
    }

    async fn write_record<R: Record>(&mut self, record: &R) -> Result<(), RelayError> {
        let mut buf = [0u8; 32];
        let len = record.encode(&mut buf).map_err(|_| RelayError::Serial)?;
        self.write_all(&buf[..len]).await
    }

    async fn fetch(&mut self, resource: Resource) -> Result<usize, u16> {
        let timeout = self.config.upstream_timeout;
        match with_timeout(timeout, self.upstream.fetch(resource, &mut self.body)).await {
            Ok(Ok(len)) => Ok(len.min(BODY_LEN)),
            Ok(Err(code)) => Err(code),
            Err(_) => Err(status::NO_REPLY),
        }
    }

    async fn weather(&mut self) -> Result<(), RelayError> {
        let reply = match self.fetch(Resource::Weather).await {
            Ok(len) => match parse_weather(&self.body[..len]) {
                Ok(weather) => WeatherReply {
                    weather,
                    status: status::OK,
                },
                Err(code) => WeatherReply::error(code),
            },
            Err(code) => WeatherReply::error(code),
        };
        info!("[WFC] reply {}", reply.status);
        self.write_record(&reply).await
    }

    async fn uv(&mut self) -> Result<(), RelayError> {
        let reply = match self.fetch(Resource::Uv).await {
            Ok(len) => match parse_uv(&self.body[..len]) {
                Ok(index) => UvReply {
                    status: status::OK,
                    index,
                },
                Err(code) => UvReply::error(code),
            },
            Err(code) => UvReply::error(code),
        };
        info!("[UV] reply {}", reply.status);
        self.write_record(&reply).await
    }

    async fn post(&mut self) -> Result<(), RelayError> {
        let host = self.payload_line().await?;
        let path = self.payload_line().await?;
        let json = self.payload_line().await?;

        let code = if host.is_empty() || path.is_empty() || json.is_empty() {
            status::BAD_REQUEST
        } else {
            let timeout = self.config.upstream_timeout;
            with_timeout(timeout, self.upstream.post(&host, &path, &json))
                .await
                .unwrap_or(status::UPSTREAM_TIMEOUT)
        };
        info!("[POST] {}{} -> {}", host, path, code);
        self.write_record(&PostReply { status: code }).await
    }

    async fn relay_url(&mut self) -> Result<(), RelayError> {
        let host = self.payload_line().await?;
        if host.is_empty() {
            self.write_all(b"Invalid host\r\n").await?;
            return self.write_all(&[EOT]).await;
        }

        let path = self.config.page_path;
        let mut page = PageRelay::new(&mut self.serial, self.config.window, self.config.ack_timeout);
        let streamed = self.upstream.stream_page(&host, path, &mut page).await;
        let message: &[u8] = match streamed {
            Ok(()) => {
                let total = page.finish().await.map_err(|_| RelayError::Serial)?;
                info!("[URL] relayed {} bytes from {}", total, host);
                return Ok(());
            }
            Err(PageError::Serial) => return Err(RelayError::Serial),
            Err(PageError::Connect) => b"Connection failed\r\n",
            Err(PageError::Read) => b"Request timed out\r\n",
            Err(PageError::AckTimeout) => b"ACK timed out\r\n",
            Err(PageError::BadAck(_)) => b"Invalid response\r\n",
        };
        warn!("[URL] relay of {} stopped", host);
        self.write_all(message).await?;
        self.write_all(&[EOT]).await
    }
}
