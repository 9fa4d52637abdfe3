//! Controller control loop
//!
//! [`Controller::poll`] is one pass of the cooperative loop: service the
//! link, run the queue watchdog, handle console input, then check the timers
//! in their fixed order. Anything that needs hardware is returned as an
//! [`Action`] for the firmware to carry out.

use alloc::vec::Vec;

use log::{info, warn};

use crate::buttons::{Button, ButtonPad};
use crate::console::{self, Console, ConsoleCommand};
use crate::handlers::{Context, Handlers};
use crate::link::Link;
use crate::protocol::{Command, DateTime};
use crate::queue::Queue;
use crate::rtc::ClockReading;
use crate::scheduler::{Activity, ScheduleConfig, Scheduler};
use crate::screen::{Frame, Screen};
use crate::state::{PodState, SensorReadings};
use crate::PodError;

/// Largest block of bytes forwarded to the console in one action
pub const CHUNK_LEN: usize = 64;

pub type Chunk = heapless::Vec<u8, CHUNK_LEN>;

/// Work the firmware has to carry out after a pass
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write bytes to the console port
    Forward(Chunk),
    /// Set the real-time clock
    SetClock(DateTime),
    /// Pulse the relay's reset line
    ResetRelay,
    /// Read the RTC, report it with [`Controller::record_clock`], then draw [`Controller::frame`]
    Redraw,
    ClearDisplay,
    SetDisplayPower(bool),
    /// Sample the local sensors and report them with [`Controller::record_sensors`]
    SampleSensors,
}

/// Inputs sampled by the firmware for one pass
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    pub now_ms: u64,
    /// Button ladder reading on the 10-bit scale, if sampled this pass
    pub button_level: Option<u16>,
    /// Bytes received on the console port since the last pass
    pub console: &'a [u8],
}

impl Inputs<'_> {
    pub fn at(now_ms: u64) -> Self {
        Self {
            now_ms,
            button_level: None,
            console: &[],
        }
    }
}

pub struct Controller<L: Link> {
    link: L,
    queue: Queue,
    handlers: Handlers,
    state: PodState,
    scheduler: Scheduler,
    buttons: ButtonPad,
    screen: Screen,
    console: Console,
}

impl<L: Link> Controller<L> {
    pub fn new(link: L, schedule: &ScheduleConfig, now_ms: u64) -> Self {
        Self {
            link,
            queue: Queue::default(),
            handlers: Handlers::default(),
            state: PodState::new(),
            scheduler: Scheduler::new(schedule, now_ms),
            buttons: ButtonPad::new(),
            screen: Screen::new(),
            console: Console::new(),
        }
    }

    pub fn state(&self) -> &PodState {
        &self.state
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Frame of the current view
    pub fn frame(&self) -> Frame {
        self.screen.render(&self.state)
    }

    pub fn record_clock(&mut self, reading: ClockReading) {
        self.state.clock = reading.time;
        self.state.clock_lost = reading.voltage_lost;
    }

    pub fn record_sensors(&mut self, readings: SensorReadings) {
        self.state.sensors = readings;
    }

    /// Start `command` now, subject to the idle rule
    pub fn start(
        &mut self,
        command: Command,
        now_ms: u64,
        actions: &mut Vec<Action>,
    ) -> Result<(), PodError> {
        let mut ctx = Context {
            link: &mut self.link,
            state: &mut self.state,
            actions,
        };
        self.queue.start(command, now_ms, &mut self.handlers, &mut ctx)
    }

    /// One pass of the control loop
    pub fn poll(&mut self, inputs: Inputs<'_>) -> Vec<Action> {
        let now = inputs.now_ms;
        let mut actions = Vec::new();

        {
            let mut ctx = Context {
                link: &mut self.link,
                state: &mut self.state,
                actions: &mut actions,
            };
            if ctx.link.available() > 0 {
                self.queue.service(&mut self.handlers, &mut ctx);
            }
            self.queue.check_timeout(now, &mut self.handlers, &mut ctx);
        }

        for &byte in inputs.console {
            if let Some(command) = self.console.feed(byte) {
                self.run_console(command, now, &mut actions);
            }
        }

        for activity in Activity::ORDER {
            let fired = self.scheduler.try_fire(
                activity,
                now,
                self.queue.is_idle(),
                self.state.status.wifi,
            );
            if fired {
                self.run_activity(activity, now, inputs.button_level, &mut actions);
            }
        }

        actions
    }

    fn run_activity(
        &mut self,
        activity: Activity,
        now: u64,
        button_level: Option<u16>,
        actions: &mut Vec<Action>,
    ) {
        if let Some(command) = activity.command() {
            // gate already checked the queue is idle
            let _ = self.start(command, now, actions);
            return;
        }

        match activity {
            Activity::Button => {
                if let Some(button) = button_level.and_then(|level| self.buttons.update(level)) {
                    self.press(button, now, actions);
                }
            }
            Activity::Display => actions.push(Action::Redraw),
            Activity::Sensors => actions.push(Action::SampleSensors),
            _ => {}
        }
    }

    fn press(&mut self, button: Button, now: u64, actions: &mut Vec<Action>) {
        match button {
            Button::None => {}
            Button::Display => {
                let powered = self.screen.toggle_power();
                actions.push(Action::SetDisplayPower(powered));
            }
            Button::Post => {
                if self.queue.is_idle() {
                    let _ = self.start(Command::PostSensors, now, actions);
                }
            }
            Button::Uv => {
                if self.queue.is_idle() {
                    let _ = self.start(Command::FetchUv, now, actions);
                }
            }
            Button::NextView => {
                self.screen.next_view();
                actions.push(Action::ClearDisplay);
                actions.push(Action::Redraw);
            }
        }
    }

    fn run_console(&mut self, command: ConsoleCommand, now: u64, actions: &mut Vec<Action>) {
        match command {
            ConsoleCommand::Help => console::print_help(),
            ConsoleCommand::Status => {
                let r = &self.state.status;
                info!("WiFi   : {}", r.wifi);
                info!("RTC    : {}", self.state.rtc_status());
                info!("NTP    : {}", r.ntp);
                info!("Weather: {}", r.weather);
                info!("UV     : {}", r.uv);
                info!("Post   : {}", r.post);
                info!("Queue  : {:?} {:?}", self.queue.stage(), self.queue.active());
            }
            ConsoleCommand::Run(cmd) => {
                if self.start(cmd, now, actions) == Err(PodError::Busy) {
                    warn!("[CONSOLE] queue busy, {} not started", cmd.token());
                }
            }
            ConsoleCommand::NextView => {
                self.screen.next_view();
                actions.push(Action::ClearDisplay);
                actions.push(Action::Redraw);
            }
            ConsoleCommand::ToggleDisplay => {
                let powered = self.screen.toggle_power();
                actions.push(Action::SetDisplayPower(powered));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Loopback;
    use crate::protocol::{ACK, status};
    use crate::queue::Stage;

    fn controller() -> Controller<Loopback> {
        Controller::new(Loopback::new(), &ScheduleConfig::default(), 0)
    }

    /// Answer the WiFi check started at `now` with 200
    fn bring_wifi_up(c: &mut Controller<Loopback>, now: u64) -> Vec<Action> {
        let actions = c.poll(Inputs::at(now));
        assert!(!actions.contains(&Action::ResetRelay));
        assert_eq!(c.queue().active(), Some(Command::CheckWifi));
        c.link_mut().inject(&[ACK]);
        c.poll(Inputs::at(now + 1));
        c.link_mut().clear_sent();
        c.link_mut().inject(&[200, 0]);
        let actions = c.poll(Inputs::at(now + 2));
        assert_eq!(c.state().status.wifi, status::OK);
        actions
    }

    #[test]
    fn display_redraws_every_second() {
        let mut c = controller();
        assert!(c.poll(Inputs::at(999)).is_empty());
        assert_eq!(c.poll(Inputs::at(1_000)), [Action::Redraw]);
        assert!(c.poll(Inputs::at(1_500)).is_empty());
    }

    #[test]
    fn network_commands_wait_for_wifi_then_run_one_at_a_time() {
        let mut c = controller();
        // boot delays of the network timers have long passed, but they only
        // start once the relay reports WiFi; time sync is first in line
        bring_wifi_up(&mut c, 30_000);
        assert_eq!(c.queue().active(), Some(Command::SyncTime));
        assert_eq!(c.link().sent(), b"RSP\n");

        c.link_mut().inject(&[ACK]);
        c.poll(Inputs::at(30_003));
        assert_eq!(c.queue().active(), Some(Command::SyncTime));
        c.link_mut().inject(&[21, 8, 5, 6, 13, 5, 9, 200]);
        let actions = c.poll(Inputs::at(30_004));
        assert!(actions.iter().any(|a| matches!(a, Action::SetClock(_))));
        assert_eq!(c.queue().active(), Some(Command::FetchWeather));
        assert_eq!(c.state().status.ntp, 200);
    }

    #[test]
    fn unanswered_uv_times_out_after_ten_seconds() {
        let mut c = controller();
        let mut level = Inputs::at(3_000);
        level.button_level = Some(700);
        c.poll(level);
        assert_eq!(c.queue().active(), Some(Command::FetchUv));
        assert_eq!(c.link().sent(), b"RSP\n");

        c.poll(Inputs::at(12_999));
        assert_eq!(c.queue().stage(), Stage::Exec);
        c.poll(Inputs::at(13_000));
        assert!(c.queue().is_idle());
        assert_eq!(c.state().status.uv, status::TIMEOUT);
    }

    #[test]
    fn held_button_starts_one_command() {
        let mut c = controller();
        for t in (3_000..3_100).step_by(10) {
            let mut inputs = Inputs::at(t);
            inputs.button_level = Some(500);
            c.poll(inputs);
        }
        assert_eq!(c.queue().active(), Some(Command::PostSensors));
        assert_eq!(c.link().sent(), b"RSP\n");
    }

    #[test]
    fn view_and_power_buttons() {
        let mut c = controller();
        assert_eq!(c.poll(Inputs::at(2_999)), [Action::Redraw]);
        let mut inputs = Inputs::at(3_000);
        inputs.button_level = Some(1_000);
        assert_eq!(c.poll(inputs), [Action::ClearDisplay, Action::Redraw]);

        let mut inputs = Inputs::at(3_010);
        inputs.button_level = Some(300);
        assert_eq!(c.poll(inputs), [Action::SetDisplayPower(false)]);
    }

    #[test]
    fn console_runs_commands_subject_to_idle_rule() {
        let mut c = controller();
        let mut inputs = Inputs::at(10);
        inputs.console = b"weather\nuv\n";
        c.poll(inputs);
        assert_eq!(c.queue().active(), Some(Command::FetchWeather));
        assert_eq!(c.link().sent(), b"RSP\n");
    }

    #[test]
    fn relay_is_reset_after_four_missed_wifi_checks() {
        let mut c = controller();
        let mut resets = 0;
        for round in 0..4u64 {
            let start = 30_000 * (round + 1);
            c.poll(Inputs::at(start));
            assert_eq!(c.queue().active(), Some(Command::CheckWifi));
            let actions = c.poll(Inputs::at(start + 10_000));
            resets += actions.iter().filter(|a| **a == Action::ResetRelay).count();
            assert_eq!(c.state().status.wifi, status::TIMEOUT);
        }
        assert_eq!(resets, 1);
    }

    #[test]
    fn url_dump_reaches_console_and_returns_to_idle() {
        let mut c = controller();
        let mut inputs = Inputs::at(5);
        inputs.console = b"url\n";
        c.poll(inputs);
        c.link_mut().inject(&[ACK]);
        c.poll(Inputs::at(6));
        assert_eq!(c.link().sent(), b"RSP\nURL\ntwonky.centralpark.lan\n");

        c.link_mut().inject(b"<html></html>");
        c.link_mut().inject(&[0x04]);
        let actions = c.poll(Inputs::at(7));
        assert!(c.queue().is_idle());
        match &actions[0] {
            Action::Forward(chunk) => assert_eq!(chunk.as_slice(), b"<html></html>"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(c.link().sent().last(), Some(&ACK));
    }

    #[test]
    fn clock_and_sensor_reports_feed_the_frame() {
        let mut c = controller();
        c.record_clock(ClockReading {
            time: DateTime {
                hour: 7,
                minute: 8,
                second: 9,
                ..DateTime::default()
            },
            voltage_lost: true,
        });
        c.record_sensors(SensorReadings {
            temperature: 20.0,
            ..SensorReadings::default()
        });
        assert!(c.state().clock_lost);
        assert_eq!(c.state().sensors.temperature, 20.0);
        assert_eq!(c.frame()[6].as_str(), "07:08:09");
    }
}
