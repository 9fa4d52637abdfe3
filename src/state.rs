//! Controller-side data the handlers write and the screens read

use core::fmt::Write as _;

use heapless::String;
use serde::Serialize;

use crate::PodError;
use crate::protocol::{DateTime, Weather, status};

/// Capacity of the serialised POST body
pub const POST_BODY_LEN: usize = 192;

/// Last known status per command family
///
/// Each register is written only by the handler that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegisters {
    pub wifi: u16,
    pub ntp: u16,
    pub weather: u16,
    pub uv: u16,
    pub post: u16,
}

impl Default for StatusRegisters {
    fn default() -> Self {
        Self {
            wifi: status::NOT_ATTEMPTED,
            ntp: status::NOT_ATTEMPTED,
            weather: status::NOT_ATTEMPTED,
            uv: status::NOT_ATTEMPTED,
            post: status::NOT_ATTEMPTED,
        }
    }
}

/// Latest local sensor sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReadings {
    /// degC
    pub temperature: f32,
    /// percent
    pub humidity: f32,
    /// bar
    pub pressure: f32,
    /// lux
    pub light: f32,
    /// Dust sensor channels, absent when no dust sensor is fitted
    pub pm10: Option<f32>,
    pub pm25: Option<f32>,
}

#[derive(Serialize)]
struct PostBody<'a> {
    timestamp: &'a str,
    temperature: f32,
    humidity: f32,
    pressure: f32,
    photo: f32,
    pm10: Option<f32>,
    pm25: Option<f32>,
}

/// Everything the controller knows about itself and the outside world
#[derive(Debug, Clone, Default)]
pub struct PodState {
    pub status: StatusRegisters,
    pub weather: Weather,
    pub uv_index: u8,
    /// Wall clock as last read from (or written to) the RTC
    pub clock: DateTime,
    /// RTC reported voltage loss; the clock value is not trustworthy
    pub clock_lost: bool,
    pub sensors: SensorReadings,
}

impl PodState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status shown for the RTC on the status screen
    pub fn rtc_status(&self) -> u16 {
        if self.clock_lost {
            status::TIMEOUT
        } else {
            status::OK
        }
    }

    /// JSON body of the sensor post, stamped with the current clock
    pub fn post_body(&self) -> Result<String<POST_BODY_LEN>, PodError> {
        let mut timestamp: String<20> = String::new();
        write!(timestamp, "{}", self.clock).map_err(|_| PodError::Protocol)?;

        let body = PostBody {
            timestamp: &timestamp,
            temperature: self.sensors.temperature,
            humidity: self.sensors.humidity,
            pressure: self.sensors.pressure,
            photo: self.sensors.light,
            pm10: self.sensors.pm10,
            pm25: self.sensors.pm25,
        };
        serde_json_core::to_string(&body).map_err(|_| PodError::Protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_start_not_attempted() {
        let state = PodState::new();
        assert_eq!(state.status.wifi, 503);
        assert_eq!(state.status.ntp, 503);
        assert_eq!(state.status.weather, 503);
        assert_eq!(state.status.uv, 503);
        assert_eq!(state.status.post, 503);
    }

    #[test]
    fn rtc_status_follows_voltage_loss() {
        let mut state = PodState::new();
        assert_eq!(state.rtc_status(), 200);
        state.clock_lost = true;
        assert_eq!(state.rtc_status(), 408);
    }

    #[test]
    fn post_body_matches_collector_format() {
        let mut state = PodState::new();
        state.clock = DateTime {
            year: 21,
            month: 8,
            weekday: 5,
            day: 6,
            hour: 13,
            minute: 5,
            second: 9,
        };
        state.sensors = SensorReadings {
            temperature: 21.5,
            humidity: 40.5,
            pressure: 1.25,
            light: 120.5,
            pm10: None,
            pm25: Some(3.5),
        };
        let body = state.post_body().unwrap();
        assert_eq!(
            body.as_str(),
            "{\"timestamp\":\"2021-08-06T13:05:09\",\"temperature\":21.5,\"humidity\":40.5,\
             \"pressure\":1.25,\"photo\":120.5,\"pm10\":null,\"pm25\":3.5}"
        );
    }
}
