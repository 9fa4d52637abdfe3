//! Text views for the 16x8 character display

use core::fmt::{self, Write};

use heapless::String;

use crate::protocol::DateTime;
use crate::state::PodState;

pub const COLUMNS: usize = 16;
pub const ROWS: usize = 8;

pub type Line = String<COLUMNS>;
pub type Frame = [Line; ROWS];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Clock,
    Weather,
    Sensors,
    Status,
}

impl View {
    pub fn next(self) -> Self {
        match self {
            View::Clock => View::Weather,
            View::Weather => View::Sensors,
            View::Sensors => View::Status,
            View::Status => View::Clock,
        }
    }
}

/// Writer that silently drops whatever does not fit on a line
struct Clip<'a>(&'a mut Line);

impl Write for Clip<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn line(args: fmt::Arguments<'_>) -> Line {
    let mut out = Line::new();
    let _ = Clip(&mut out).write_fmt(args);
    out
}

fn clock_of(t: &DateTime) -> Line {
    line(format_args!("{:02}:{:02}:{:02}", t.hour, t.minute, t.second))
}

fn pm(value: Option<f32>) -> Line {
    match value {
        Some(v) => line(format_args!("{:3.0}", v)),
        None => line(format_args!("{:>3}", "--")),
    }
}

/// Current view and panel power
#[derive(Debug)]
pub struct Screen {
    view: View,
    powered: bool,
}

impl Screen {
    pub fn new() -> Self {
        Self {
            view: View::Clock,
            powered: true,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Switch to the next view
    pub fn next_view(&mut self) -> View {
        self.view = self.view.next();
        self.view
    }

    /// Flip panel power, returning the new state
    pub fn toggle_power(&mut self) -> bool {
        self.powered = !self.powered;
        self.powered
    }

    pub fn render(&self, state: &PodState) -> Frame {
        let mut frame: Frame = core::array::from_fn(|_| Line::new());
        let t = &state.clock;
        let lost = if state.clock_lost { '!' } else { ' ' };

        match self.view {
            View::Clock => {
                let year = line(format_args!("20{:02}", t.year));
                frame[0] = line(format_args!("{}{:>15}", lost, year.as_str()));
                let month = MONTHS
                    .get(usize::from(t.month).wrapping_sub(1))
                    .copied()
                    .unwrap_or("---");
                let date = line(format_args!("{} {}", month, t.day));
                frame[2] = line(format_args!("{:>16}", date.as_str()));
                frame[5] = line(format_args!(
                    "{}",
                    WEEKDAYS.get(usize::from(t.weekday)).copied().unwrap_or("---")
                ));
                frame[6] = clock_of(t);
            }
            View::Weather => {
                let w = &state.weather;
                frame[0] = line(format_args!("UV {:<5}{}", state.uv_index, clock_of(t).as_str()));
                frame[2] = line(format_args!("temp: {:5.1}  C", w.temperature));
                frame[3] = line(format_args!("dewp: {:5.1}  C", w.dewpoint));
                frame[4] = line(format_args!("wind: {:5.0}deg", w.wind_direction));
                frame[5] = line(format_args!("wind: {:5.1}m/s", w.wind_speed));
                frame[6] = line(format_args!("gust: {:5.1}m/s", w.wind_gust));
                frame[7] = line(format_args!("humi: {:5.0}  %", w.relative_humidity));
            }
            View::Sensors => {
                let s = &state.sensors;
                frame[0] = line(format_args!("Sensors {}", clock_of(t).as_str()));
                frame[2] = line(format_args!("phot: {:6.0} lx", s.light));
                frame[3] = line(format_args!("humi: {:5.1}  %", s.humidity));
                frame[4] = line(format_args!("temp: {:5.1}deg", s.temperature));
                frame[5] = line(format_args!("pres: {:5.3}bar", s.pressure));
                frame[6] = line(format_args!("pm10: {} mg/m3", pm(s.pm10).as_str()));
                frame[7] = line(format_args!("pm25: {} mg/m3", pm(s.pm25).as_str()));
            }
            View::Status => {
                let r = &state.status;
                frame[0] = line(format_args!("Status  {}", clock_of(t).as_str()));
                frame[2] = line(format_args!("WiFi   : {:3}", r.wifi));
                frame[3] = line(format_args!("RTC    : {:3}", state.rtc_status()));
                frame[4] = line(format_args!("NTP    : {:3}", r.ntp));
                frame[5] = line(format_args!("Weather: {:3}", r.weather));
                frame[6] = line(format_args!("UV     : {:3}", r.uv));
                frame[7] = line(format_args!("Post   : {:3}", r.post));
            }
        }
        frame
    }
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}
