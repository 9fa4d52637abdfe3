//! Cooperative software timers driving the periodic activities

use crate::protocol::{Command, status};

/// Boot delay and steady-state period of one timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpec {
    pub delay_ms: u64,
    pub interval_ms: u64,
}

impl TimerSpec {
    pub const fn new(delay_ms: u64, interval_ms: u64) -> Self {
        Self {
            delay_ms,
            interval_ms,
        }
    }

    pub const fn every(interval_ms: u64) -> Self {
        Self::new(interval_ms, interval_ms)
    }
}

/// Timer settings of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub button: TimerSpec,
    pub time_sync: TimerSpec,
    pub weather: TimerSpec,
    pub uv: TimerSpec,
    pub display: TimerSpec,
    pub post: TimerSpec,
    pub wifi: TimerSpec,
    pub sensors: TimerSpec,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            button: TimerSpec::new(3_000, 10),
            time_sync: TimerSpec::new(30_000, 5 * 3_600_000),
            weather: TimerSpec::new(30_000, 30 * 60_000),
            uv: TimerSpec::new(30_000, 3_600_000),
            display: TimerSpec::every(1_000),
            post: TimerSpec::every(15 * 60_000),
            wifi: TimerSpec::every(30_000),
            sensors: TimerSpec::every(5_000),
        }
    }
}

/// Periodic activity, listed in the order the control loop checks them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Button,
    TimeSync,
    Weather,
    Uv,
    Display,
    Post,
    Wifi,
    Sensors,
}

/// Precondition for an activity to fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Always,
    QueueIdle,
    /// Queue idle and relay WiFi up
    Network,
}

impl Activity {
    pub const ORDER: [Activity; 8] = [
        Activity::Button,
        Activity::TimeSync,
        Activity::Weather,
        Activity::Uv,
        Activity::Display,
        Activity::Post,
        Activity::Wifi,
        Activity::Sensors,
    ];

    pub fn gate(self) -> Gate {
        match self {
            Activity::Button | Activity::Display | Activity::Sensors => Gate::Always,
            Activity::Wifi => Gate::QueueIdle,
            Activity::TimeSync | Activity::Weather | Activity::Uv | Activity::Post => {
                Gate::Network
            }
        }
    }

    /// Relay command started when this activity fires
    pub fn command(self) -> Option<Command> {
        match self {
            Activity::TimeSync => Some(Command::SyncTime),
            Activity::Weather => Some(Command::FetchWeather),
            Activity::Uv => Some(Command::FetchUv),
            Activity::Post => Some(Command::PostSensors),
            Activity::Wifi => Some(Command::CheckWifi),
            Activity::Button | Activity::Display | Activity::Sensors => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// One software timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftTimer {
    delay: u64,
    interval: u64,
    last: u64,
}

impl SoftTimer {
    pub const fn new(spec: TimerSpec, now_ms: u64) -> Self {
        Self {
            delay: spec.delay_ms,
            interval: spec.interval_ms,
            last: now_ms,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last) >= self.delay
    }

    /// Record a fire; the boot delay is replaced by the interval
    pub fn fire(&mut self, now_ms: u64) {
        self.last = now_ms;
        self.delay = self.interval;
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }
}

/// The full timer set, indexed by [`Activity`]
#[derive(Debug, Clone)]
pub struct Scheduler {
    timers: [SoftTimer; 8],
}

impl Scheduler {
    pub fn new(config: &ScheduleConfig, now_ms: u64) -> Self {
        let mut timers = [SoftTimer::new(TimerSpec::every(0), now_ms); 8];
        for activity in Activity::ORDER {
            let spec = match activity {
                Activity::Button => config.button,
                Activity::TimeSync => config.time_sync,
                Activity::Weather => config.weather,
                Activity::Uv => config.uv,
                Activity::Display => config.display,
                Activity::Post => config.post,
                Activity::Wifi => config.wifi,
                Activity::Sensors => config.sensors,
            };
            timers[activity.index()] = SoftTimer::new(spec, now_ms);
        }
        Self { timers }
    }

    pub fn timer(&self, activity: Activity) -> &SoftTimer {
        &self.timers[activity.index()]
    }

    /// Fire `activity` if it is due and its gate is open
    ///
    /// A due timer whose gate is closed is left untouched so it is retried
    /// on the next call.
    pub fn try_fire(
        &mut self,
        activity: Activity,
        now_ms: u64,
        queue_idle: bool,
        wifi_status: u16,
    ) -> bool {
        let timer = &mut self.timers[activity.index()];
        if !timer.is_due(now_ms) {
            return false;
        }

        let open = match activity.gate() {
            Gate::Always => true,
            Gate::QueueIdle => queue_idle,
            Gate::Network => queue_idle && wifi_status == status::OK,
        };
        if open {
            timer.fire(now_ms);
        }
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_becomes_interval_after_first_fire() {
        let mut timer = SoftTimer::new(TimerSpec::new(3_000, 10), 0);
        assert!(!timer.is_due(2_999));
        assert!(timer.is_due(3_000));
        timer.fire(3_000);
        assert_eq!(timer.delay(), 10);
        assert!(!timer.is_due(3_009));
        assert!(timer.is_due(3_010));
    }

    #[test]
    fn order_matches_activity_index() {
        for (i, activity) in Activity::ORDER.into_iter().enumerate() {
            assert_eq!(activity.index(), i);
        }
    }

    #[test]
    fn network_timers_wait_for_wifi() {
        let mut scheduler = Scheduler::new(&ScheduleConfig::default(), 0);
        assert!(!scheduler.try_fire(Activity::Weather, 30_000, true, status::NOT_ATTEMPTED));
        // still due, so the very next pass may fire it
        assert!(scheduler.try_fire(Activity::Weather, 30_001, true, status::OK));
        assert_eq!(scheduler.timer(Activity::Weather).delay(), 30 * 60_000);
    }

    #[test]
    fn wifi_check_only_needs_idle_queue() {
        let mut scheduler = Scheduler::new(&ScheduleConfig::default(), 0);
        assert!(!scheduler.try_fire(Activity::Wifi, 30_000, false, status::OK));
        assert!(scheduler.try_fire(Activity::Wifi, 30_000, true, status::TIMEOUT));
        assert!(!scheduler.try_fire(Activity::Wifi, 59_999, true, status::OK));
    }

    #[test]
    fn local_timers_ignore_gates() {
        let mut scheduler = Scheduler::new(&ScheduleConfig::default(), 0);
        assert!(scheduler.try_fire(Activity::Display, 1_000, false, status::TIMEOUT));
        assert!(scheduler.try_fire(Activity::Sensors, 5_000, false, status::TIMEOUT));
        assert!(!scheduler.try_fire(Activity::Button, 2_000, true, status::OK));
    }

    #[test]
    fn only_queue_activities_map_to_commands() {
        assert_eq!(Activity::Uv.command(), Some(Command::FetchUv));
        assert_eq!(Activity::Display.command(), None);
        assert_eq!(Activity::Post.gate(), Gate::Network);
    }
}
