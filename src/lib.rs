#![cfg_attr(not(test), no_std)]

//! Sensor Pod library
//!
//! A controller node polls local sensors, renders a small text display and
//! drives a WiFi relay node over a half-duplex serial link. The relay runs
//! network and clock operations on the controller's behalf and answers with
//! fixed-layout binary records.
//!
//! Everything in this library except [`wifi`] and [`net`] is hardware
//! independent and is tested on the host; the ESP32-C3 glue lives behind the
//! `firmware` feature.

extern crate alloc;

pub mod buttons;
pub mod console;
pub mod controller;
pub mod dust;
pub mod handlers;
pub mod link;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod rtc;
pub mod scheduler;
pub mod screen;
pub mod sntp;
pub mod state;
pub mod upstream;

#[cfg(feature = "firmware")]
pub mod net;
#[cfg(feature = "firmware")]
pub mod wifi;

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    /// Baud rate of the controller <-> relay link
    pub const LINK_BAUD: u32 = 19_200;

    /// Baud rate of the controller's console port
    pub const CONSOLE_BAUD: u32 = 115_200;

    /// Time a queued command may stay in flight before the watchdog aborts it
    pub const COMMAND_TIMEOUT_MS: u64 = 10_000;

    /// Bytes per URL-relay window; one acknowledgment is owed per window
    pub const URL_WINDOW: usize = 56;

    /// Consecutive WiFi-check timeouts before the relay gets a reset pulse
    pub const WIFI_MAX_FAIL: u8 = 4;

    /// Width of the relay reset pulse in microseconds
    pub const RELAY_RESET_PULSE_US: u32 = 20;

    /// Sensor collection endpoint
    pub const POST_HOST: &str = "twonky.centralpark.lan";
    pub const POST_PATH: &str = "/sensors.php";

    /// Page relayed by the URL command
    pub const URL_HOST: &str = "twonky.centralpark.lan";
    pub const URL_PATH: &str = "/index.php";

    /// Latest observation of the nearest weather station
    pub const WEATHER_HOST: &str = "api.weather.gov";
    pub const WEATHER_PATH: &str = "/stations/LOAC1/observations/latest";

    /// Daily UV index forecast by ZIP code
    pub const UV_HOST: &str = "data.epa.gov";
    pub const UV_PATH: &str = "/efservice/getEnvirofactsUVDAILY/ZIP/94043/JSON";

    /// User agent sent with upstream requests (api.weather.gov rejects requests without one)
    pub const USER_AGENT: &str = "SensorPod/0.1 (relay)";

    /// Relay-side wait for an upstream HTTP reply
    pub const UPSTREAM_TIMEOUT_MS: u64 = 10_000;

    /// Relay-side wait for each URL-relay acknowledgment
    pub const ACK_TIMEOUT_MS: u64 = 5_000;

    /// Relay-side wait for a command payload line
    pub const LINE_TIMEOUT_MS: u64 = 1_000;

    /// Relay restarts itself when WiFi stays down this long
    pub const WIFI_RESTART_AFTER_MS: u64 = 60_000;

    /// DHCP hostname of the relay
    pub const HOSTNAME: &str = "SensorPod";

    /// SNTP server and resync period
    pub const NTP_SERVER: &str = "pool.ntp.org";
    pub const NTP_PORT: u16 = 123;
    pub const NTP_RESYNC_INTERVAL_MS: u64 = 3_600_000;

    /// Local time offset used when answering NTP commands (Pacific Standard Time)
    pub const UTC_OFFSET_SECS: i32 = -8 * 3600;

    /// I2C address of the real-time clock
    pub const RTC_ADDR: u8 = 0x51;

    /// WiFi configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");
}

/// Error types for the sensor pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodError {
    /// Serial link read/write error
    Link,
    /// Malformed or truncated wire record
    Protocol,
    /// A command is already in flight
    Busy,
    /// Upstream (network) operation failed
    Upstream,
    /// Real-time clock access error
    Clock,
    /// Display driver error
    Display,
    /// Sensor read error
    Sensor,
    /// Invalid configuration value
    Config,
}
