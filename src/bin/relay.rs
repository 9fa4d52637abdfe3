//! Relay node firmware
//!
//! Joins WiFi, keeps the clock in sync and serves controller commands on
//! UART1.

#![no_std]
#![no_main]

extern crate alloc;

use embassy_net::{Config, DhcpConfig, Stack, StackResources};
use embassy_time::{Duration, Timer};
use esp_hal::Async;
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{self, Uart};
use esp_hal_embassy::Executor;
use esp_println::println;
use esp_wifi::wifi;
use log::{LevelFilter, error};
use static_cell::StaticCell;

use sensor_pod::config;
use sensor_pod::net::{self, ClientState, NetUpstream};
use sensor_pod::relay::{Relay, RelayConfig};
use sensor_pod::wifi::WifiManager;

esp_bootloader_esp_idf::esp_app_desc!();

type SerialRelay = Relay<Uart<'static, Async>, NetUpstream>;

static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
static CLIENT_STATE: StaticCell<ClientState> = StaticCell::new();
static RELAY_CELL: StaticCell<SerialRelay> = StaticCell::new();
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[PANIC] {}", info);
    loop {}
}

fn halt(what: &str) -> ! {
    error!("[MAIN] {} init failed", what);
    loop {}
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, wifi::WifiDevice<'static>>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn wifi_task(mut manager: WifiManager<'static>) -> ! {
    manager.run(config::WIFI_SSID, config::WIFI_PASSWORD).await
}

#[embassy_executor::task]
async fn sntp_task(stack: Stack<'static>) -> ! {
    net::run_sntp(stack).await
}

#[embassy_executor::task]
async fn relay_task(relay: &'static mut SerialRelay) -> ! {
    relay.run().await
}

/// Restart when WiFi stays down too long
#[embassy_executor::task]
async fn supervisor_task() -> ! {
    loop {
        Timer::after(Duration::from_secs(1)).await;
        if net::wifi_should_restart() {
            error!("[WIFI] down for too long, restarting");
            Timer::after(Duration::from_millis(100)).await;
            esp_hal::system::software_reset();
        }
    }
}

#[esp_hal::main]
fn main() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

    // WiFi driver plus TLS buffers
    esp_alloc::heap_allocator!(size: 120 * 1024);
    esp_println::logger::init_logger(LevelFilter::Info);
    println!("[MAIN] SensorPod relay {}", sensor_pod::VERSION);

    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let Ok(wifi_init) = esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) else {
        halt("wifi driver");
    };
    let wifi_init = WIFI_INIT_CELL.init(wifi_init);
    let Ok((controller, interfaces)) = wifi::new(wifi_init, peripherals.WIFI) else {
        halt("wifi controller");
    };

    let mut dhcp = DhcpConfig::default();
    dhcp.hostname = heapless::String::try_from(config::HOSTNAME).ok();
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        Config::dhcpv4(dhcp),
        STACK_RESOURCES.init(StackResources::new()),
        seed,
    );

    let uart_config = uart::Config::default().with_baudrate(config::LINK_BAUD);
    let Ok(serial) = Uart::new(peripherals.UART1, uart_config) else {
        halt("link uart");
    };
    let serial = serial
        .with_rx(peripherals.GPIO4)
        .with_tx(peripherals.GPIO5)
        .into_async();

    let upstream = NetUpstream::new(stack, CLIENT_STATE.init(ClientState::new()), seed);
    let relay = RELAY_CELL.init(Relay::new(serial, upstream, RelayConfig::default()));
    let manager = WifiManager::new(controller, stack);

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        spawner.spawn(net_task(runner)).ok();
        spawner.spawn(wifi_task(manager)).ok();
        spawner.spawn(sntp_task(stack)).ok();
        spawner.spawn(supervisor_task()).ok();
        if let Err(e) = spawner.spawn(relay_task(relay)) {
            error!("[MAIN] relay task not spawned: {:?}", e);
        }
    });
}
