#![no_std]
#![no_main]

use core::cell::RefCell;
use core::fmt::Write as _;

use bme280_rs::{Bme280, Configuration, Oversampling, SensorMode};
use embedded_hal::delay::DelayNs;
use embedded_hal_bus::i2c::RefCellDevice;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig};
use esp_hal::i2c::master::{self as i2c, I2c};
use esp_hal::time::{Instant, Rate};
use esp_hal::uart::{self, Uart};
use esp_println::println;
use log::{LevelFilter, error, info, warn};
use ssd1306::mode::TerminalMode;
use ssd1306::prelude::*;
use ssd1306::{I2CDisplayInterface, Ssd1306};

extern crate alloc;

use sensor_pod::buttons::scale_to_10bit;
use sensor_pod::controller::{Action, Controller, Inputs};
use sensor_pod::dust::Dsm501;
use sensor_pod::link::{BufferedLink, Link};
use sensor_pod::rtc::Pcf8563;
use sensor_pod::scheduler::ScheduleConfig;
use sensor_pod::screen::{COLUMNS, Frame};
use sensor_pod::state::SensorReadings;
use sensor_pod::{PodError, config};

esp_bootloader_esp_idf::esp_app_desc!();

/// 12-bit ADC on the ESP32-C3
const ADC_BITS: u8 = 12;

type Display<DI> = Ssd1306<DI, DisplaySize128x64, TerminalMode>;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[PANIC] {}", info);
    loop {}
}

fn halt(what: &str) -> ! {
    error!("[MAIN] {} init failed", what);
    loop {}
}

fn now_ms() -> u64 {
    Instant::now().duration_since_epoch().as_millis()
}

fn draw<DI: WriteOnlyDataCommand>(display: &mut Display<DI>, frame: &Frame) -> Result<(), PodError> {
    for (row, line) in frame.iter().enumerate() {
        display
            .set_position(0, row as u8)
            .map_err(|_| PodError::Display)?;
        display.write_str(line).map_err(|_| PodError::Display)?;
        for _ in line.len()..COLUMNS {
            display.print_char(' ').map_err(|_| PodError::Display)?;
        }
    }
    Ok(())
}

fn sample<I2C: embedded_hal::i2c::I2c, D: DelayNs>(
    bme: &mut Bme280<I2C, D>,
    light: u16,
    (pm10, pm25): (Option<f32>, Option<f32>),
) -> Result<SensorReadings, PodError> {
    let temperature = bme.read_temperature().map_err(|_| PodError::Sensor)?;
    let humidity = bme.read_humidity().map_err(|_| PodError::Sensor)?;
    let pressure = bme.read_pressure().map_err(|_| PodError::Sensor)?;

    match (temperature, humidity, pressure) {
        (Some(t), Some(h), Some(p)) => Ok(SensorReadings {
            temperature: t,
            humidity: h,
            // Pa to bar
            pressure: p / 100_000.0,
            light: f32::from(light),
            pm10,
            pm25,
        }),
        _ => Err(PodError::Sensor),
    }
}

#[esp_hal::main]
fn main() -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(size: 32 * 1024);
    esp_println::logger::init_logger(LevelFilter::Info);
    println!("[MAIN] SensorPod controller {}", sensor_pod::VERSION);

    let mut delay = Delay::new();

    let console_config = uart::Config::default().with_baudrate(config::CONSOLE_BAUD);
    let Ok(console) = Uart::new(peripherals.UART0, console_config) else {
        halt("console uart");
    };
    let mut console = BufferedLink::new(
        console
            .with_rx(peripherals.GPIO20)
            .with_tx(peripherals.GPIO21),
    );

    let link_config = uart::Config::default().with_baudrate(config::LINK_BAUD);
    let Ok(link) = Uart::new(peripherals.UART1, link_config) else {
        halt("link uart");
    };
    let link = BufferedLink::new(link.with_rx(peripherals.GPIO4).with_tx(peripherals.GPIO5));

    // active low, released
    let mut relay_reset = Output::new(peripherals.GPIO6, Level::High, OutputConfig::default());

    // DSM501 outputs, low while particles are counted
    let pm10_pin = Input::new(peripherals.GPIO7, InputConfig::default());
    let pm25_pin = Input::new(peripherals.GPIO10, InputConfig::default());
    let mut dust = Dsm501::new(now_ms());

    let mut adc_config = AdcConfig::new();
    let mut button_pin = adc_config.enable_pin(peripherals.GPIO2, Attenuation::_11dB);
    let mut light_pin = adc_config.enable_pin(peripherals.GPIO3, Attenuation::_11dB);
    let mut adc = Adc::new(peripherals.ADC1, adc_config);

    let i2c_config = i2c::Config::default().with_frequency(Rate::from_khz(400));
    let Ok(bus) = I2c::new(peripherals.I2C0, i2c_config) else {
        halt("i2c");
    };
    let bus = RefCell::new(bus.with_sda(peripherals.GPIO8).with_scl(peripherals.GPIO9));

    let mut rtc = Pcf8563::new(RefCellDevice::new(&bus), config::RTC_ADDR);

    let mut display = Ssd1306::new(
        I2CDisplayInterface::new(RefCellDevice::new(&bus)),
        DisplaySize128x64,
        DisplayRotation::Rotate0,
    )
    .into_terminal_mode();
    let mut display_ok = display.init().is_ok() && display.clear().is_ok();
    if !display_ok {
        warn!("[DISPLAY] init failed, running headless");
    }

    let mut bme = Bme280::new(RefCellDevice::new(&bus), delay);
    let bme_ok = bme.init().is_ok()
        && bme
            .set_sampling_configuration(
                Configuration::default()
                    .with_temperature_oversampling(Oversampling::Oversample1)
                    .with_pressure_oversampling(Oversampling::Oversample1)
                    .with_humidity_oversampling(Oversampling::Oversample1)
                    .with_sensor_mode(SensorMode::Normal),
            )
            .is_ok();
    if !bme_ok {
        warn!("[SENSOR] BME280 not found");
    }

    let mut controller = Controller::new(link, &ScheduleConfig::default(), now_ms());
    info!("[MAIN] controller ready, type 'help' on the console");

    let mut typed = [0u8; 32];
    loop {
        let now = now_ms();

        let mut n = 0;
        while n < typed.len() {
            let Some(byte) = console.read_byte() else {
                break;
            };
            typed[n] = byte;
            n += 1;
        }

        dust.sample(now, pm10_pin.is_low(), pm25_pin.is_low());

        let raw = nb::block!(adc.read_oneshot(&mut button_pin)).unwrap_or(0);
        let inputs = Inputs {
            now_ms: now,
            button_level: Some(scale_to_10bit(raw, ADC_BITS)),
            console: &typed[..n],
        };

        for action in controller.poll(inputs) {
            match action {
                Action::Forward(chunk) => {
                    if console.write(&chunk).is_err() {
                        warn!("[CONSOLE] forward failed");
                    }
                }
                Action::SetClock(time) => {
                    if let Err(e) = rtc.write(&time) {
                        warn!("[RTC] write failed: {:?}", e);
                    }
                }
                Action::ResetRelay => {
                    warn!("[MAIN] resetting relay");
                    relay_reset.set_low();
                    delay.delay_us(config::RELAY_RESET_PULSE_US);
                    relay_reset.set_high();
                }
                Action::Redraw => {
                    match rtc.read() {
                        Ok(reading) => controller.record_clock(reading),
                        Err(e) => warn!("[RTC] read failed: {:?}", e),
                    }
                    if display_ok && controller.screen().is_powered() {
                        if let Err(e) = draw(&mut display, &controller.frame()) {
                            warn!("[DISPLAY] {:?}", e);
                            display_ok = false;
                        }
                    }
                }
                Action::ClearDisplay => {
                    if display_ok && display.clear().is_err() {
                        display_ok = false;
                    }
                }
                Action::SetDisplayPower(on) => {
                    if display_ok && display.set_display_on(on).is_err() {
                        warn!("[DISPLAY] power switch failed");
                    }
                }
                Action::SampleSensors => {
                    if !bme_ok {
                        continue;
                    }
                    let light = nb::block!(adc.read_oneshot(&mut light_pin)).unwrap_or(0);
                    let pm = dust.readings(now);
                    match sample(&mut bme, scale_to_10bit(light, ADC_BITS), pm) {
                        Ok(readings) => controller.record_sensors(readings),
                        Err(e) => warn!("[SENSOR] {:?}", e),
                    }
                }
            }
        }

        delay.delay_ms(1);
    }
}
