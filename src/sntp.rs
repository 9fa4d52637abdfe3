//! Minimal SNTP client logic and the relay's notion of wall-clock time

use chrono::{Datelike, FixedOffset, Timelike};
use log::{debug, info};

use crate::PodError;
use crate::protocol::DateTime;

pub const PACKET_LEN: usize = 48;

/// Seconds between the NTP era (1900) and the Unix epoch
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Client request: LI 0, version 4, mode 3 (client)
pub fn request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = 0x23;
    packet
}

/// Unix seconds carried in a server reply's transmit timestamp
pub fn parse_reply(packet: &[u8]) -> Result<u64, PodError> {
    if packet.len() < PACKET_LEN {
        return Err(PodError::Protocol);
    }
    let mode = packet[0] & 0x07;
    let stratum = packet[1];
    if mode != 4 || stratum == 0 {
        debug!("[SNTP] rejected reply: mode {} stratum {}", mode, stratum);
        return Err(PodError::Protocol);
    }

    let secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    u64::from(secs)
        .checked_sub(NTP_UNIX_OFFSET)
        .filter(|_| secs != 0)
        .ok_or(PodError::Protocol)
}

/// Calendar fields of `unix_secs` shifted by `utc_offset_secs`
pub fn to_local(unix_secs: u64, utc_offset_secs: i32) -> Option<DateTime> {
    let offset = FixedOffset::east_opt(utc_offset_secs)?;
    let utc = chrono::DateTime::from_timestamp(i64::try_from(unix_secs).ok()?, 0)?;
    let local = utc.with_timezone(&offset);

    Some(DateTime {
        year: u8::try_from(local.year().rem_euclid(100)).ok()?,
        month: local.month() as u8,
        weekday: local.weekday().num_days_from_sunday() as u8,
        day: local.day() as u8,
        hour: local.hour() as u8,
        minute: local.minute() as u8,
        second: local.second() as u8,
    })
}

/// Last successful synchronisation, extrapolated with the local monotonic clock
#[derive(Debug, Clone, Copy)]
pub struct ClockSync {
    synced: Option<(u64, u64)>,
    utc_offset_secs: i32,
}

impl ClockSync {
    pub const fn new(utc_offset_secs: i32) -> Self {
        Self {
            synced: None,
            utc_offset_secs,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.synced.is_some()
    }

    /// Record that it was `unix_secs` at monotonic time `now_ms`
    pub fn update(&mut self, unix_secs: u64, now_ms: u64) {
        if !self.is_valid() {
            info!("[SNTP] clock valid");
        }
        self.synced = Some((unix_secs, now_ms));
    }

    pub fn unix_now(&self, now_ms: u64) -> Option<u64> {
        let (secs, at) = self.synced?;
        Some(secs + now_ms.saturating_sub(at) / 1000)
    }

    /// Local calendar time, `None` until the first sync
    pub fn local_time(&self, now_ms: u64) -> Option<DateTime> {
        to_local(self.unix_now(now_ms)?, self.utc_offset_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_with(secs: u32) -> [u8; PACKET_LEN] {
        let mut p = [0u8; PACKET_LEN];
        p[0] = 0x24; // version 4, server
        p[1] = 2;
        p[40..44].copy_from_slice(&secs.to_be_bytes());
        p
    }

    #[test]
    fn request_is_v4_client() {
        let r = request();
        assert_eq!(r[0] >> 3 & 0x07, 4);
        assert_eq!(r[0] & 0x07, 3);
    }

    #[test]
    fn transmit_time_converts_to_unix() {
        // 2021-08-06T20:05:09Z
        let unix = 1_628_280_309u64;
        let p = reply_with((unix + NTP_UNIX_OFFSET) as u32);
        assert_eq!(parse_reply(&p), Ok(unix));
    }

    #[test]
    fn bad_replies_are_rejected() {
        let good = reply_with(3_837_269_109);
        assert_eq!(parse_reply(&good[..47]), Err(PodError::Protocol));

        let mut kiss = good;
        kiss[1] = 0;
        assert_eq!(parse_reply(&kiss), Err(PodError::Protocol));

        let mut client = good;
        client[0] = 0x23;
        assert_eq!(parse_reply(&client), Err(PodError::Protocol));

        assert_eq!(parse_reply(&reply_with(0)), Err(PodError::Protocol));
    }

    #[test]
    fn pacific_standard_time_fields() {
        // 2021-08-06T20:05:09Z is 12:05:09 at UTC-8, a Friday
        let t = to_local(1_628_280_309, -8 * 3600).unwrap();
        assert_eq!(
            t,
            DateTime {
                year: 21,
                month: 8,
                weekday: 5,
                day: 6,
                hour: 12,
                minute: 5,
                second: 9,
            }
        );
    }

    #[test]
    fn clock_sync_extrapolates() {
        let mut clock = ClockSync::new(0);
        assert_eq!(clock.local_time(1_000), None);
        clock.update(1_628_280_309, 1_000);
        assert!(clock.is_valid());
        assert_eq!(clock.unix_now(62_999), Some(1_628_280_370));
        assert_eq!(clock.local_time(62_999).unwrap().minute, 6);
    }
}
