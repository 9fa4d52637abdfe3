//! Single-slot command queue and handshake state machine
//!
//! ```text
//! IDLE --start--> EXEC --ack--> ACT --reply--> IDLE
//!                   |             |
//!                   +--bad ack----+--bad reply--> FAILED --> IDLE
//!                   +-------------+--watchdog---> TIMEOUT --> IDLE
//! ```
//!
//! At most one command is in flight. Every step returns as soon as it runs
//! out of buffered link bytes, so the control loop never blocks on the relay.

use log::{debug, warn};

use crate::controller::{Action, Chunk};
use crate::handlers::{Context, Handlers, Progress};
use crate::protocol::{ACK, Command, READY_TOKEN};
use crate::PodError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    /// Ready probe sent, waiting for the acknowledgment byte
    Exec,
    /// Command sent, waiting for the reply
    Act,
    Failed,
    Timeout,
}

#[derive(Debug)]
pub struct Queue {
    stage: Stage,
    active: Option<Command>,
    started_at: u64,
    timeout_ms: u64,
}

impl Queue {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            stage: Stage::Idle,
            active: None,
            started_at: 0,
            timeout_ms,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Command currently in flight
    pub fn active(&self) -> Option<Command> {
        self.active
    }

    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// Send the ready probe for `command` and run the first EXEC step
    ///
    /// Returns [`PodError::Busy`] without touching anything unless idle.
    pub fn start(
        &mut self,
        command: Command,
        now_ms: u64,
        handlers: &mut Handlers,
        ctx: &mut Context<'_>,
    ) -> Result<(), PodError> {
        if !self.is_idle() {
            debug!("[QUEUE] busy, {} not started", command.token());
            return Err(PodError::Busy);
        }

        self.active = Some(command);
        self.started_at = now_ms;
        self.stage = Stage::Exec;
        debug!("[QUEUE] start {}", command.token());

        if ctx.link.write_line(READY_TOKEN).is_err() {
            warn!("[QUEUE] {} ready probe not sent", command.token());
            self.abort(command, handlers, ctx);
            return Ok(());
        }

        self.execute(command, handlers, ctx);
        Ok(())
    }

    /// Advance the exchange with whatever bytes the link has buffered
    ///
    /// While idle, link bytes are passed through to the console.
    pub fn service(&mut self, handlers: &mut Handlers, ctx: &mut Context<'_>) {
        let Some(command) = self.active else {
            self.forward_idle(ctx);
            return;
        };

        match self.stage {
            Stage::Exec => self.execute(command, handlers, ctx),
            Stage::Act => self.act(command, handlers, ctx),
            Stage::Idle | Stage::Failed | Stage::Timeout => self.reset(),
        }
    }

    /// Abort the in-flight command once it has run for the configured timeout
    ///
    /// Returns `true` when a command was timed out.
    pub fn check_timeout(
        &mut self,
        now_ms: u64,
        handlers: &mut Handlers,
        ctx: &mut Context<'_>,
    ) -> bool {
        let Some(command) = self.active else {
            return false;
        };
        if now_ms.saturating_sub(self.started_at) < self.timeout_ms {
            return false;
        }

        self.stage = Stage::Timeout;
        handlers.get(command).timed_out(ctx);
        self.reset();
        true
    }

    /// Drop the in-flight command, if any, without running a hook
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.active = None;
    }

    fn execute(&mut self, command: Command, handlers: &mut Handlers, ctx: &mut Context<'_>) {
        if ctx.link.available() == 0 {
            return;
        }
        let Some(byte) = ctx.link.read_byte() else {
            return;
        };

        if byte != ACK {
            warn!("[QUEUE] {} handshake failed: {:#04x}", command.token(), byte);
            self.abort(command, handlers, ctx);
            return;
        }

        match handlers.get(command).request(ctx) {
            Ok(()) => self.stage = Stage::Act,
            Err(e) => {
                warn!("[QUEUE] {} request not sent: {:?}", command.token(), e);
                self.abort(command, handlers, ctx);
            }
        }
    }

    fn act(&mut self, command: Command, handlers: &mut Handlers, ctx: &mut Context<'_>) {
        match handlers.get(command).reply(ctx) {
            Ok(Progress::Pending) => {}
            Ok(Progress::Done) => self.reset(),
            Err(e) => {
                warn!("[QUEUE] {} reply rejected: {:?}", command.token(), e);
                self.abort(command, handlers, ctx);
            }
        }
    }

    fn abort(&mut self, command: Command, handlers: &mut Handlers, ctx: &mut Context<'_>) {
        self.stage = Stage::Failed;
        handlers.get(command).failed(ctx);
        self.reset();
    }

    fn forward_idle(&mut self, ctx: &mut Context<'_>) {
        let mut chunk = Chunk::new();
        while ctx.link.available() > 0 {
            let Some(byte) = ctx.link.read_byte() else {
                break;
            };
            if chunk.push(byte).is_err() {
                ctx.actions.push(Action::Forward(core::mem::take(&mut chunk)));
                // fresh chunk has room
                let _ = chunk.push(byte);
            }
        }
        if !chunk.is_empty() {
            ctx.actions.push(Action::Forward(chunk));
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(crate::config::COMMAND_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Link, Loopback};
    use crate::protocol::{Record, Weather, WeatherReply, status};
    use crate::state::PodState;
    use alloc::vec::Vec;

    struct Rig {
        queue: Queue,
        handlers: Handlers,
        link: Loopback,
        state: PodState,
        actions: Vec<Action>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                queue: Queue::default(),
                handlers: Handlers::default(),
                link: Loopback::new(),
                state: PodState::new(),
                actions: Vec::new(),
            }
        }

        fn start(&mut self, command: Command, now: u64) -> Result<(), PodError> {
            let mut ctx = Context {
                link: &mut self.link,
                state: &mut self.state,
                actions: &mut self.actions,
            };
            self.queue.start(command, now, &mut self.handlers, &mut ctx)
        }

        fn service(&mut self) {
            let mut ctx = Context {
                link: &mut self.link,
                state: &mut self.state,
                actions: &mut self.actions,
            };
            self.queue.service(&mut self.handlers, &mut ctx);
        }

        fn check_timeout(&mut self, now: u64) -> bool {
            let mut ctx = Context {
                link: &mut self.link,
                state: &mut self.state,
                actions: &mut self.actions,
            };
            self.queue.check_timeout(now, &mut self.handlers, &mut ctx)
        }
    }

    #[test]
    fn start_sends_probe_and_waits_for_ack() {
        let mut rig = Rig::new();
        rig.start(Command::FetchUv, 0).unwrap();
        assert_eq!(rig.link.sent(), b"RSP\n");
        assert_eq!(rig.queue.stage(), Stage::Exec);
        assert_eq!(rig.queue.active(), Some(Command::FetchUv));

        // nothing buffered: still suspended
        rig.service();
        assert_eq!(rig.queue.stage(), Stage::Exec);

        rig.link.inject(&[ACK]);
        rig.service();
        assert_eq!(rig.link.sent(), b"RSP\nUVI\n");
        assert_eq!(rig.queue.stage(), Stage::Act);
    }

    #[test]
    fn ack_already_buffered_is_consumed_by_start() {
        let mut rig = Rig::new();
        rig.link.inject(&[ACK]);
        rig.start(Command::CheckWifi, 0).unwrap();
        assert_eq!(rig.queue.stage(), Stage::Act);
        assert_eq!(rig.link.sent(), b"RSP\nWIF\n");
    }

    #[test]
    fn weather_exchange_updates_all_fields() {
        let mut rig = Rig::new();
        rig.start(Command::FetchWeather, 0).unwrap();
        rig.link.inject(&[ACK]);
        rig.service();

        let reply = WeatherReply {
            weather: Weather {
                temperature: 18.5,
                dewpoint: 9.25,
                wind_direction: 270.0,
                wind_speed: 4.5,
                wind_gust: 7.75,
                relative_humidity: 63.0,
            },
            status: status::OK,
        };
        let mut buf = [0u8; WeatherReply::LEN];
        reply.encode(&mut buf).unwrap();
        rig.link.inject(&buf[..10]);
        rig.service();
        assert_eq!(rig.queue.stage(), Stage::Act);

        rig.link.inject(&buf[10..]);
        rig.service();
        assert!(rig.queue.is_idle());
        assert_eq!(rig.queue.active(), None);
        assert_eq!(rig.state.status.weather, 200);
        assert_eq!(rig.state.weather, reply.weather);
    }

    #[test]
    fn start_while_in_flight_is_a_no_op() {
        let mut rig = Rig::new();
        rig.link.inject(&[ACK]);
        rig.start(Command::FetchUv, 0).unwrap();
        assert_eq!(rig.queue.stage(), Stage::Act);
        let sent_before = rig.link.sent().len();

        assert_eq!(rig.start(Command::SyncTime, 5), Err(PodError::Busy));
        assert_eq!(rig.queue.stage(), Stage::Act);
        assert_eq!(rig.queue.active(), Some(Command::FetchUv));
        assert_eq!(rig.link.sent().len(), sent_before);
    }

    #[test]
    fn bad_ack_fails_without_sending_token() {
        let mut rig = Rig::new();
        rig.start(Command::FetchUv, 0).unwrap();
        rig.link.inject(&[0x00]);
        rig.service();

        assert!(rig.queue.is_idle());
        assert_eq!(rig.queue.active(), None);
        assert_eq!(rig.state.status.uv, status::INVALID_REPLY);
        assert_eq!(rig.link.sent(), b"RSP\n");
    }

    #[test]
    fn unanswered_command_times_out() {
        let mut rig = Rig::new();
        rig.start(Command::FetchUv, 1_000).unwrap();
        rig.link.inject(&[ACK]);
        rig.service();

        assert!(!rig.check_timeout(10_999));
        assert_eq!(rig.queue.stage(), Stage::Act);

        assert!(rig.check_timeout(11_000));
        assert!(rig.queue.is_idle());
        assert_eq!(rig.state.status.uv, status::TIMEOUT);

        // the hook ran once; nothing left to time out
        assert!(!rig.check_timeout(30_000));
    }

    #[test]
    fn timeout_also_covers_missing_ack() {
        let mut rig = Rig::new();
        rig.start(Command::SyncTime, 0).unwrap();
        assert!(rig.check_timeout(10_000));
        assert_eq!(rig.state.status.ntp, status::TIMEOUT);
        assert!(rig.queue.is_idle());
    }

    #[test]
    fn failed_probe_write_is_a_failed_exchange() {
        let mut rig = Rig::new();
        rig.link.set_fail_writes(true);
        assert_eq!(rig.start(Command::PostSensors, 0), Ok(()));
        assert!(rig.queue.is_idle());
        assert_eq!(rig.state.status.post, status::INVALID_REPLY);
    }

    #[test]
    fn late_reply_after_timeout_is_passed_through() {
        let mut rig = Rig::new();
        rig.link.inject(&[ACK]);
        rig.start(Command::CheckWifi, 0).unwrap();
        assert!(rig.check_timeout(10_000));

        rig.link.inject(&[200, 0]);
        rig.service();
        assert_eq!(rig.state.status.wifi, status::TIMEOUT);
        assert!(matches!(
            &rig.actions[..],
            [Action::Forward(chunk)] if chunk.as_slice() == &[200u8, 0][..]
        ));
    }

    #[test]
    fn partial_reply_still_times_out() {
        let mut rig = Rig::new();
        rig.link.inject(&[ACK]);
        rig.start(Command::FetchWeather, 0).unwrap();
        assert_eq!(rig.queue.stage(), Stage::Act);

        let partial = [1u8, 2, 3, 4, 5];
        rig.link.inject(&partial);
        rig.service();
        assert_eq!(rig.queue.stage(), Stage::Act);
        assert_eq!(rig.link.available(), partial.len());

        assert!(rig.check_timeout(10_000));
        assert!(rig.queue.is_idle());
        assert_eq!(rig.state.status.weather, status::TIMEOUT);

        rig.service();
        assert!(matches!(
            &rig.actions[..],
            [Action::Forward(chunk)] if chunk.as_slice() == &partial[..]
        ));
        assert_eq!(rig.link.available(), 0);
    }

    #[test]
    fn idle_passthrough_splits_into_chunks() {
        let mut rig = Rig::new();
        let text = [b'.'; 100];
        rig.link.inject(&text);
        rig.service();
        let lens: Vec<usize> = rig
            .actions
            .iter()
            .map(|a| match a {
                Action::Forward(chunk) => chunk.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(lens, [64, 36]);
        assert_eq!(rig.link.available(), 0);
    }
}
