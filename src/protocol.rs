//! Controller <-> relay wire contract
//!
//! Commands are `\n`-terminated ASCII lines. Every exchange starts with the
//! `RSP` ready probe, answered by a single [`ACK`] byte. Replies are
//! fixed-width records encoded explicitly here, field by field, in the order
//! listed on each type. Multi-byte fields are little-endian. The URL relay
//! reply is the exception: an unbounded byte stream terminated by [`EOT`].

use core::fmt;

use crate::PodError;

/// Acknowledgment sentinel (ready probe answer, URL-relay credit)
pub const ACK: u8 = 0x06;

/// End-of-stream sentinel of the URL relay
pub const EOT: u8 = 0x04;

/// Ready probe sent before every command
pub const READY_TOKEN: &str = "RSP";

/// Status codes carried in reply records and status registers
pub mod status {
    pub const OK: u16 = 200;
    /// Relay clock has not been synchronised yet
    pub const CLOCK_NOT_VALID: u16 = 202;
    pub const BAD_REQUEST: u16 = 400;
    /// Controller gave up waiting for the reply
    pub const TIMEOUT: u16 = 408;
    pub const WIFI_DISCONNECTED: u16 = 410;
    pub const WIFI_NOT_ATTEMPTED: u16 = 425;
    /// Handshake failed or the reply could not be decoded
    pub const INVALID_REPLY: u16 = 502;
    /// Register never written since boot
    pub const NOT_ATTEMPTED: u16 = 503;
    pub const UPSTREAM_TIMEOUT: u16 = 504;

    // Relay-side fetch failures. Redirect and parse failures share values.
    pub const CONNECT_FAILED: u16 = 1;
    pub const NO_REPLY: u16 = 2;
    pub const REDIRECT_NO_LOCATION: u16 = 4;
    pub const REDIRECT_NO_SCHEME: u16 = 5;
    pub const REDIRECT_EMPTY: u16 = 6;
    pub const REDIRECT_NO_PATH: u16 = 7;
    pub const KEY_MISSING: u16 = 6;
    pub const VALUE_INVALID: u16 = 7;
    pub const HEADER_END_MISSING: u16 = 9;
    pub const JSON_INVALID: u16 = 10;
    pub const FIELD_MISSING: u16 = 11;
}

/// Commands understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SyncTime,
    FetchWeather,
    FetchUv,
    PostSensors,
    CheckWifi,
    RelayUrl,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::SyncTime,
        Command::FetchWeather,
        Command::FetchUv,
        Command::PostSensors,
        Command::CheckWifi,
        Command::RelayUrl,
    ];

    /// Three-character wire token
    pub fn token(self) -> &'static str {
        match self {
            Command::SyncTime => "NTP",
            Command::FetchWeather => "WFC",
            Command::FetchUv => "UVI",
            Command::PostSensors => "PST",
            Command::CheckWifi => "WIF",
            Command::RelayUrl => "URL",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.token() == token)
    }
}

/// Fixed-width wire record
pub trait Record: Sized {
    /// Encoded size in bytes
    const LEN: usize;

    /// Write the record into `out`, returning the number of bytes written
    fn encode(&self, out: &mut [u8]) -> Result<usize, PodError>;

    /// Decode a record from the first [`Self::LEN`] bytes of `bytes`
    fn decode(bytes: &[u8]) -> Result<Self, PodError>;
}

fn check_len(len: usize, need: usize) -> Result<(), PodError> {
    if len < need {
        Err(PodError::Protocol)
    } else {
        Ok(())
    }
}

fn f32_at(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Calendar time as carried on the wire and kept by the RTC
///
/// `year` counts from 2000, `weekday` is 0 for Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u8,
    pub month: u8,
    pub weekday: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Encoded size: year, month, weekday, day, hour, minute, second
    pub const LEN: usize = 7;

    fn write_to(&self, out: &mut [u8]) {
        out[0] = self.year;
        out[1] = self.month;
        out[2] = self.weekday;
        out[3] = self.day;
        out[4] = self.hour;
        out[5] = self.minute;
        out[6] = self.second;
    }

    fn read_from(bytes: &[u8]) -> Self {
        Self {
            year: bytes[0],
            month: bytes[1],
            weekday: bytes[2],
            day: bytes[3],
            hour: bytes[4],
            minute: bytes[5],
            second: bytes[6],
        }
    }
}

/// ISO-8601 local timestamp, e.g. `2021-08-06T13:05:09`
impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "20{:02}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// `NTP` reply: date/time fields followed by a one-byte status (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpReply {
    pub time: DateTime,
    pub status: u8,
}

impl NtpReply {
    pub fn valid(time: DateTime) -> Self {
        Self {
            time,
            status: status::OK as u8,
        }
    }

    pub fn not_valid() -> Self {
        Self {
            time: DateTime::default(),
            status: status::CLOCK_NOT_VALID as u8,
        }
    }
}

impl Record for NtpReply {
    const LEN: usize = DateTime::LEN + 1;

    fn encode(&self, out: &mut [u8]) -> Result<usize, PodError> {
        check_len(out.len(), Self::LEN)?;
        self.time.write_to(out);
        out[7] = self.status;
        Ok(Self::LEN)
    }

    fn decode(bytes: &[u8]) -> Result<Self, PodError> {
        check_len(bytes.len(), Self::LEN)?;
        Ok(Self {
            time: DateTime::read_from(bytes),
            status: bytes[7],
        })
    }
}

/// Latest weather observation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Weather {
    /// degC
    pub temperature: f32,
    /// degC
    pub dewpoint: f32,
    /// degrees
    pub wind_direction: f32,
    /// m/s
    pub wind_speed: f32,
    /// m/s
    pub wind_gust: f32,
    /// percent
    pub relative_humidity: f32,
}

/// `WFC` reply (28 bytes): temperature, dewpoint, wind direction, wind speed,
/// wind gust, relative humidity as f32, status as u16, two padding bytes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherReply {
    pub weather: Weather,
    pub status: u16,
}

impl WeatherReply {
    pub fn error(status: u16) -> Self {
        Self {
            weather: Weather::default(),
            status,
        }
    }
}

impl Record for WeatherReply {
    const LEN: usize = 6 * 4 + 2 + 2;

    fn encode(&self, out: &mut [u8]) -> Result<usize, PodError> {
        check_len(out.len(), Self::LEN)?;
        let w = &self.weather;
        let fields = [
            w.temperature,
            w.dewpoint,
            w.wind_direction,
            w.wind_speed,
            w.wind_gust,
            w.relative_humidity,
        ];
        for (i, value) in fields.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        out[24..26].copy_from_slice(&self.status.to_le_bytes());
        out[26] = 0;
        out[27] = 0;
        Ok(Self::LEN)
    }

    fn decode(bytes: &[u8]) -> Result<Self, PodError> {
        check_len(bytes.len(), Self::LEN)?;
        Ok(Self {
            weather: Weather {
                temperature: f32_at(bytes, 0),
                dewpoint: f32_at(bytes, 4),
                wind_direction: f32_at(bytes, 8),
                wind_speed: f32_at(bytes, 12),
                wind_gust: f32_at(bytes, 16),
                relative_humidity: f32_at(bytes, 20),
            },
            status: u16::from_le_bytes([bytes[24], bytes[25]]),
        })
    }
}

/// `UVI` reply (4 bytes): status u16, UV index u8, one padding byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UvReply {
    pub status: u16,
    pub index: u8,
}

impl UvReply {
    pub fn error(status: u16) -> Self {
        Self { status, index: 0 }
    }
}

impl Record for UvReply {
    const LEN: usize = 4;

    fn encode(&self, out: &mut [u8]) -> Result<usize, PodError> {
        check_len(out.len(), Self::LEN)?;
        out[0..2].copy_from_slice(&self.status.to_le_bytes());
        out[2] = self.index;
        out[3] = 0;
        Ok(Self::LEN)
    }

    fn decode(bytes: &[u8]) -> Result<Self, PodError> {
        check_len(bytes.len(), Self::LEN)?;
        Ok(Self {
            status: u16::from_le_bytes([bytes[0], bytes[1]]),
            index: bytes[2],
        })
    }
}

/// `PST` reply: the upstream status as three ASCII digits, zero padded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostReply {
    pub status: u16,
}

impl Record for PostReply {
    const LEN: usize = 3;

    fn encode(&self, out: &mut [u8]) -> Result<usize, PodError> {
        check_len(out.len(), Self::LEN)?;
        let code = self.status.min(999);
        out[0] = b'0' + (code / 100) as u8;
        out[1] = b'0' + (code / 10 % 10) as u8;
        out[2] = b'0' + (code % 10) as u8;
        Ok(Self::LEN)
    }

    fn decode(bytes: &[u8]) -> Result<Self, PodError> {
        check_len(bytes.len(), Self::LEN)?;
        let mut code = 0u16;
        for &b in &bytes[..Self::LEN] {
            if !b.is_ascii_digit() {
                return Err(PodError::Protocol);
            }
            code = code * 10 + u16::from(b - b'0');
        }
        Ok(Self { status: code })
    }
}

/// `WIF` reply (2 bytes): relay WiFi status as u16
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiReply {
    pub status: u16,
}

impl Record for WifiReply {
    const LEN: usize = 2;

    fn encode(&self, out: &mut [u8]) -> Result<usize, PodError> {
        check_len(out.len(), Self::LEN)?;
        out[0..2].copy_from_slice(&self.status.to_le_bytes());
        Ok(Self::LEN)
    }

    fn decode(bytes: &[u8]) -> Result<Self, PodError> {
        check_len(bytes.len(), Self::LEN)?;
        Ok(Self {
            status: u16::from_le_bytes([bytes[0], bytes[1]]),
        })
    }
}
