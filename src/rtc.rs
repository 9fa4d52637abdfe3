//! PCF8563 real-time clock

use embedded_hal::i2c::I2c;
use log::warn;

use crate::PodError;
use crate::protocol::DateTime;

/// First time register (seconds); the other six follow
const REG_SECONDS: u8 = 0x02;
/// Voltage-low flag in the seconds register
const VL_BIT: u8 = 0x80;

fn from_bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Clock registers as read from the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub time: DateTime,
    /// The oscillator stopped at some point; `time` is not reliable
    pub voltage_lost: bool,
}

pub struct Pcf8563<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Pcf8563<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn read(&mut self) -> Result<ClockReading, PodError> {
        let mut regs = [0u8; 7];
        self.i2c
            .write_read(self.address, &[REG_SECONDS], &mut regs)
            .map_err(|_| {
                warn!("[RTC] read failed");
                PodError::Clock
            })?;

        Ok(ClockReading {
            time: DateTime {
                second: from_bcd(regs[0] & 0x7F),
                minute: from_bcd(regs[1] & 0x7F),
                hour: from_bcd(regs[2] & 0x3F),
                day: from_bcd(regs[3] & 0x3F),
                weekday: regs[4] & 0x07,
                month: from_bcd(regs[5] & 0x1F),
                year: from_bcd(regs[6]),
            },
            voltage_lost: regs[0] & VL_BIT != 0,
        })
    }

    /// Set the clock; also clears the voltage-low flag
    pub fn write(&mut self, time: &DateTime) -> Result<(), PodError> {
        let frame = [
            REG_SECONDS,
            to_bcd(time.second % 60),
            to_bcd(time.minute % 60),
            to_bcd(time.hour % 24),
            to_bcd(time.day.clamp(1, 31)),
            time.weekday % 7,
            to_bcd(time.month.clamp(1, 12)),
            to_bcd(time.year % 100),
        ];
        self.i2c.write(self.address, &frame).map_err(|_| {
            warn!("[RTC] write failed");
            PodError::Clock
        })
    }

    pub fn release(self) -> I2C {
        self.i2c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

    /// Register file with an auto-incrementing pointer
    struct FakeChip {
        regs: [u8; 16],
        pointer: usize,
        fail: bool,
    }

    impl ErrorType for FakeChip {
        type Error = ErrorKind;
    }

    impl I2c for FakeChip {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), ErrorKind> {
            if self.fail || address != 0x51 {
                return Err(ErrorKind::Other);
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if let Some((&first, rest)) = bytes.split_first() {
                            self.pointer = usize::from(first);
                            for &b in rest {
                                self.regs[self.pointer] = b;
                                self.pointer += 1;
                            }
                        }
                    }
                    Operation::Read(buf) => {
                        for slot in buf.iter_mut() {
                            *slot = self.regs[self.pointer];
                            self.pointer += 1;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn chip() -> FakeChip {
        FakeChip {
            regs: [0; 16],
            pointer: 0,
            fail: false,
        }
    }

    #[test]
    fn decodes_bcd_registers() {
        let mut fake = chip();
        // 13:05:59, Friday 2021-08-06, century bit set, VL set
        fake.regs[2..9].copy_from_slice(&[0xD9, 0x05, 0x13, 0x06, 0x05, 0x88, 0x21]);
        let mut rtc = Pcf8563::new(fake, 0x51);
        let reading = rtc.read().unwrap();
        assert!(reading.voltage_lost);
        assert_eq!(
            reading.time,
            DateTime {
                year: 21,
                month: 8,
                weekday: 5,
                day: 6,
                hour: 13,
                minute: 5,
                second: 59,
            }
        );
    }

    #[test]
    fn write_encodes_bcd_and_clears_voltage_loss() {
        let mut fake = chip();
        fake.regs[2] = VL_BIT;
        let mut rtc = Pcf8563::new(fake, 0x51);
        let t = DateTime {
            year: 24,
            month: 12,
            weekday: 2,
            day: 31,
            hour: 23,
            minute: 59,
            second: 30,
        };
        rtc.write(&t).unwrap();
        assert_eq!(rtc.release().regs[2..9], [0x30, 0x59, 0x23, 0x31, 0x02, 0x12, 0x24]);
    }

    #[test]
    fn bus_errors_map_to_clock_error() {
        let mut fake = chip();
        fake.fail = true;
        let mut rtc = Pcf8563::new(fake, 0x51);
        assert_eq!(rtc.read(), Err(PodError::Clock));
    }
}
