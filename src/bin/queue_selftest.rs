//! On-device smoke test of the command queue
//!
//! Drives the queue over an in-memory loopback link and checks the
//! handshake, a full weather exchange, mutual exclusion, the watchdog and
//! handshake rejection.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::vec::Vec;

use esp_hal::clock::CpuClock;
use esp_println::println;
use sensor_pod::handlers::{Context, Handlers};
use sensor_pod::link::Loopback;
use sensor_pod::protocol::{ACK, Command, Record, Weather, WeatherReply, status};
use sensor_pod::queue::{Queue, Stage};
use sensor_pod::state::PodState;
use sensor_pod::PodError;

esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("❌ {}", info);
    loop {}
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let _peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 32 * 1024);

    println!("=== Command queue self test ===");

    let mut link = Loopback::new();
    let mut state = PodState::new();
    let mut actions = Vec::new();
    let mut handlers = Handlers::default();
    let mut queue = Queue::default();

    macro_rules! ctx {
        () => {
            &mut Context {
                link: &mut link,
                state: &mut state,
                actions: &mut actions,
            }
        };
    }

    println!("\n1. Initial state");
    assert_eq!(queue.stage(), Stage::Idle);
    assert_eq!(state.status.weather, status::NOT_ATTEMPTED);
    println!("✅ idle, registers not attempted");

    println!("\n2. Ready probe and handshake");
    queue
        .start(Command::FetchWeather, 0, &mut handlers, ctx!())
        .unwrap_or_else(|e| panic!("start failed: {:?}", e));
    assert_eq!(link.sent(), b"RSP\n");
    assert_eq!(queue.stage(), Stage::Exec);
    link.clear_sent();
    link.inject(&[ACK]);
    queue.service(&mut handlers, ctx!());
    assert_eq!(link.sent(), b"WFC\n");
    assert_eq!(queue.stage(), Stage::Act);
    println!("✅ probe acknowledged, token sent");

    println!("\n3. Weather reply");
    let reply = WeatherReply {
        weather: Weather {
            temperature: 18.5,
            dewpoint: 9.0,
            wind_direction: 250.0,
            wind_speed: 4.5,
            wind_gust: 7.25,
            relative_humidity: 61.0,
        },
        status: status::OK,
    };
    let mut wire = [0u8; WeatherReply::LEN];
    let len = reply
        .encode(&mut wire)
        .unwrap_or_else(|e| panic!("encode failed: {:?}", e));
    link.inject(&wire[..len]);
    queue.service(&mut handlers, ctx!());
    assert_eq!(queue.stage(), Stage::Idle);
    assert_eq!(state.status.weather, status::OK);
    assert_eq!(state.weather, reply.weather);
    println!("✅ weather stored: {:?}", state.weather);

    println!("\n4. Mutual exclusion");
    link.clear_sent();
    queue
        .start(Command::FetchUv, 1_000, &mut handlers, ctx!())
        .unwrap_or_else(|e| panic!("start failed: {:?}", e));
    let second = queue.start(Command::PostSensors, 1_001, &mut handlers, ctx!());
    assert_eq!(second, Err(PodError::Busy));
    assert_eq!(queue.active(), Some(Command::FetchUv));
    assert_eq!(link.sent(), b"RSP\n");
    println!("✅ second start rejected while busy");

    println!("\n5. Watchdog");
    assert!(!queue.check_timeout(10_999, &mut handlers, ctx!()));
    assert!(queue.check_timeout(11_000, &mut handlers, ctx!()));
    assert_eq!(queue.stage(), Stage::Idle);
    assert_eq!(state.status.uv, status::TIMEOUT);
    println!("✅ unanswered UV timed out with {}", state.status.uv);

    println!("\n6. Rejected handshake");
    link.clear_sent();
    queue
        .start(Command::SyncTime, 20_000, &mut handlers, ctx!())
        .unwrap_or_else(|e| panic!("start failed: {:?}", e));
    link.inject(&[0x00]);
    queue.service(&mut handlers, ctx!());
    assert_eq!(queue.stage(), Stage::Idle);
    assert_eq!(state.status.ntp, status::INVALID_REPLY);
    assert_eq!(link.sent(), b"RSP\n");
    println!("✅ wrong ack failed the command, token never sent");

    println!("\n=== All queue tests passed ===");

    loop {
        core::hint::spin_loop();
    }
}
