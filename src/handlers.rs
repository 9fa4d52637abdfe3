//! Per-command response handlers
//!
//! Every command the queue can run has one handler. The queue calls
//! [`Handler::request`] once the relay acknowledged the ready probe,
//! [`Handler::reply`] on every pass until the reply is complete, and exactly
//! one of [`Handler::failed`] / [`Handler::timed_out`] when the exchange is
//! aborted. Handlers touch nothing but their own status register, their own
//! payload fields in [`PodState`] and the action list.

use alloc::vec::Vec;

use log::{info, warn};

use crate::config;
use crate::controller::{Action, Chunk};
use crate::link::Link;
use crate::protocol::{
    Command, NtpReply, PostReply, Record, UvReply, WeatherReply, WifiReply, ACK, EOT, status,
};
use crate::state::PodState;
use crate::PodError;

/// What a handler sees while it runs
pub struct Context<'a> {
    pub link: &'a mut dyn Link,
    pub state: &'a mut PodState,
    pub actions: &'a mut Vec<Action>,
}

/// Outcome of one [`Handler::reply`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Not enough bytes yet, call again on a later pass
    Pending,
    /// Reply consumed, the exchange is over
    Done,
}

pub trait Handler {
    /// Write the command token and payload lines
    fn request(&mut self, ctx: &mut Context<'_>) -> Result<(), PodError>;

    /// Consume the reply if enough of it has arrived
    fn reply(&mut self, ctx: &mut Context<'_>) -> Result<Progress, PodError>;

    /// Handshake or reply was invalid
    fn failed(&mut self, ctx: &mut Context<'_>);

    /// No complete reply within the command timeout
    fn timed_out(&mut self, ctx: &mut Context<'_>);
}

/// Read one fixed-size record, or `None` while it is still incomplete
fn read_record<R: Record>(link: &mut dyn Link) -> Result<Option<R>, PodError> {
    if link.available() < R::LEN {
        return Ok(None);
    }
    let mut buf = [0u8; 32];
    let buf = buf.get_mut(..R::LEN).ok_or(PodError::Protocol)?;
    link.read_exact(buf)?;
    R::decode(buf).map(Some)
}

#[derive(Debug, Default)]
pub struct NtpHandler;

impl Handler for NtpHandler {
    fn request(&mut self, ctx: &mut Context<'_>) -> Result<(), PodError> {
        ctx.link.write_line(Command::SyncTime.token())
    }

    fn reply(&mut self, ctx: &mut Context<'_>) -> Result<Progress, PodError> {
        let Some(reply) = read_record::<NtpReply>(ctx.link)? else {
            return Ok(Progress::Pending);
        };
        ctx.state.status.ntp = u16::from(reply.status);
        if ctx.state.status.ntp == status::OK {
            ctx.state.clock = reply.time;
            ctx.state.clock_lost = false;
            ctx.actions.push(Action::SetClock(reply.time));
            info!("[NTP] time synced: {}", reply.time);
        } else {
            info!("[NTP] time not valid yet ({})", reply.status);
        }
        Ok(Progress::Done)
    }

    fn failed(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.ntp = status::INVALID_REPLY;
        warn!("[NTP] invalid response");
    }

    fn timed_out(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.ntp = status::TIMEOUT;
        warn!("[NTP] handler timed out");
    }
}

#[derive(Debug, Default)]
pub struct WeatherHandler;

impl Handler for WeatherHandler {
    fn request(&mut self, ctx: &mut Context<'_>) -> Result<(), PodError> {
        ctx.link.write_line(Command::FetchWeather.token())
    }

    fn reply(&mut self, ctx: &mut Context<'_>) -> Result<Progress, PodError> {
        let Some(reply) = read_record::<WeatherReply>(ctx.link)? else {
            return Ok(Progress::Pending);
        };
        ctx.state.status.weather = reply.status;
        if reply.status == status::OK {
            ctx.state.weather = reply.weather;
            info!("[WFC] weather synced");
        } else {
            warn!("[WFC] weather error {}", reply.status);
        }
        Ok(Progress::Done)
    }

    fn failed(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.weather = status::INVALID_REPLY;
        warn!("[WFC] invalid response");
    }

    fn timed_out(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.weather = status::TIMEOUT;
        warn!("[WFC] handler timed out");
    }
}

#[derive(Debug, Default)]
pub struct UvHandler;

impl Handler for UvHandler {
    fn request(&mut self, ctx: &mut Context<'_>) -> Result<(), PodError> {
        ctx.link.write_line(Command::FetchUv.token())
    }

    fn reply(&mut self, ctx: &mut Context<'_>) -> Result<Progress, PodError> {
        let Some(reply) = read_record::<UvReply>(ctx.link)? else {
            return Ok(Progress::Pending);
        };
        ctx.state.status.uv = reply.status;
        if reply.status == status::OK {
            ctx.state.uv_index = reply.index;
            info!("[UV] UV synced: {}", reply.index);
        } else {
            warn!("[UV] UV error {}", reply.status);
        }
        Ok(Progress::Done)
    }

    fn failed(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.uv = status::INVALID_REPLY;
        warn!("[UV] invalid response");
    }

    fn timed_out(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.uv = status::TIMEOUT;
        warn!("[UV] handler timed out");
    }
}

/// Posts the sensor snapshot taken at request time
#[derive(Debug)]
pub struct PostHandler {
    host: &'static str,
    path: &'static str,
}

impl PostHandler {
    pub fn new(host: &'static str, path: &'static str) -> Self {
        Self { host, path }
    }
}

impl Default for PostHandler {
    fn default() -> Self {
        Self::new(config::POST_HOST, config::POST_PATH)
    }
}

impl Handler for PostHandler {
    fn request(&mut self, ctx: &mut Context<'_>) -> Result<(), PodError> {
        let body = ctx.state.post_body()?;
        ctx.link.write_line(Command::PostSensors.token())?;
        ctx.link.write_line(self.host)?;
        ctx.link.write_line(self.path)?;
        ctx.link.write_line(&body)
    }

    fn reply(&mut self, ctx: &mut Context<'_>) -> Result<Progress, PodError> {
        let Some(reply) = read_record::<PostReply>(ctx.link)? else {
            return Ok(Progress::Pending);
        };
        ctx.state.status.post = reply.status;
        if reply.status == status::OK {
            info!("[POST] sensors posted");
        } else {
            warn!("[POST] post error {:03}", reply.status);
        }
        Ok(Progress::Done)
    }

    fn failed(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.post = status::INVALID_REPLY;
        warn!("[POST] invalid response");
    }

    fn timed_out(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.post = status::TIMEOUT;
        warn!("[POST] handler timed out");
    }
}

/// Relay connectivity check; resets the relay after repeated timeouts
#[derive(Debug)]
pub struct WifiHandler {
    fails: u8,
    max_fail: u8,
}

impl WifiHandler {
    pub fn new(max_fail: u8) -> Self {
        Self { fails: 0, max_fail }
    }

    /// Consecutive timeouts since the last decoded reply
    pub fn fails(&self) -> u8 {
        self.fails
    }
}

impl Default for WifiHandler {
    fn default() -> Self {
        Self::new(config::WIFI_MAX_FAIL)
    }
}

impl Handler for WifiHandler {
    fn request(&mut self, ctx: &mut Context<'_>) -> Result<(), PodError> {
        ctx.link.write_line(Command::CheckWifi.token())
    }

    fn reply(&mut self, ctx: &mut Context<'_>) -> Result<Progress, PodError> {
        let Some(reply) = read_record::<WifiReply>(ctx.link)? else {
            return Ok(Progress::Pending);
        };
        ctx.state.status.wifi = reply.status;
        self.fails = 0;
        if reply.status != status::OK {
            warn!("[WIFI] relay reports {}", reply.status);
        }
        Ok(Progress::Done)
    }

    fn failed(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.wifi = status::INVALID_REPLY;
        warn!("[WIFI] invalid response");
    }

    fn timed_out(&mut self, ctx: &mut Context<'_>) {
        ctx.state.status.wifi = status::TIMEOUT;
        warn!("[WIFI] handler timed out");
        self.fails = self.fails.saturating_add(1);
        if self.fails >= self.max_fail {
            self.fails = 0;
            warn!("[WIFI] {} consecutive timeouts, resetting relay", self.max_fail);
            ctx.actions.push(Action::ResetRelay);
        }
    }
}

/// Streams a page from the relay to the console with windowed flow control
#[derive(Debug)]
pub struct UrlHandler {
    host: &'static str,
    window: usize,
    since_ack: usize,
    forwarded: usize,
}

impl UrlHandler {
    pub fn new(host: &'static str, window: usize) -> Self {
        Self {
            host,
            window,
            since_ack: 0,
            forwarded: 0,
        }
    }

    fn ack(ctx: &mut Context<'_>) -> Result<(), PodError> {
        ctx.link.write(&[ACK])
    }
}

impl Default for UrlHandler {
    fn default() -> Self {
        Self::new(config::URL_HOST, config::URL_WINDOW)
    }
}

impl Handler for UrlHandler {
    fn request(&mut self, ctx: &mut Context<'_>) -> Result<(), PodError> {
        self.since_ack = 0;
        self.forwarded = 0;
        ctx.link.write_line(Command::RelayUrl.token())?;
        ctx.link.write_line(self.host)
    }

    fn reply(&mut self, ctx: &mut Context<'_>) -> Result<Progress, PodError> {
        let mut chunk = Chunk::new();
        let mut progress = Progress::Pending;

        while !chunk.is_full() {
            if ctx.link.available() == 0 {
                break;
            }
            let Some(byte) = ctx.link.read_byte() else {
                break;
            };
            if byte == EOT {
                progress = Progress::Done;
                break;
            }
            // capacity checked by the loop condition
            let _ = chunk.push(byte);
            self.forwarded += 1;
            self.since_ack += 1;
            if self.since_ack == self.window {
                Self::ack(ctx)?;
                self.since_ack = 0;
            }
        }

        if !chunk.is_empty() {
            ctx.actions.push(Action::Forward(chunk));
        }
        if progress == Progress::Done {
            Self::ack(ctx)?;
            info!("[URL] relay finished, {} bytes", self.forwarded);
        }
        Ok(progress)
    }

    fn failed(&mut self, _ctx: &mut Context<'_>) {
        warn!("[URL] relay failed after {} bytes", self.forwarded);
    }

    fn timed_out(&mut self, _ctx: &mut Context<'_>) {
        warn!("[URL] relay timed out after {} bytes", self.forwarded);
    }
}

/// Dispatch table: one handler per command
#[derive(Debug, Default)]
pub struct Handlers {
    pub ntp: NtpHandler,
    pub weather: WeatherHandler,
    pub uv: UvHandler,
    pub post: PostHandler,
    pub wifi: WifiHandler,
    pub url: UrlHandler,
}

impl Handlers {
    pub fn get(&mut self, command: Command) -> &mut dyn Handler {
        match command {
            Command::SyncTime => &mut self.ntp,
            Command::FetchWeather => &mut self.weather,
            Command::FetchUv => &mut self.uv,
            Command::PostSensors => &mut self.post,
            Command::CheckWifi => &mut self.wifi,
            Command::RelayUrl => &mut self.url,
        }
    }
}
