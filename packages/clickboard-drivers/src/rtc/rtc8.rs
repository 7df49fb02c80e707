//! RTC 8 Click, a real-time clock with EEPROM backup.
//!
//! # Hardware Description
//!
//! The board carries a Micro Crystal RV-3028-C7, an extremely low power I2C real-time clock
//! (address 0x52) with an integrated 32.768 kHz crystal. Besides the calendar registers it
//! has a free-running 32-bit UNIX counter, an alarm, a 12-bit countdown timer, two bytes of
//! user RAM and 43 bytes of user EEPROM.
//!
//! The configuration registers are mirrored in EEPROM and reloaded from it every 24 hours
//! ("auto refresh"). EEPROM accesses go through the `EEADDR`/`EEDATA`/`EECMD` registers with
//! auto refresh disabled, and the `EEBusy` status bit must be polled until the cell is
//! written.

use bitflags::bitflags;
use clickboard_core::{Accumulator, BusError, RegisterInterface, pin, time};
use embedded_hal::{delay::DelayNs, digital::InputPin};
use snafu::Snafu;

/// 7-bit I2C address.
pub const I2C_ADDRESS: u8 = 0x52;

/// Highest user EEPROM address.
pub const EEPROM_USER_END: u8 = 0x2A;

/// Budget for a single EEPROM operation.
pub const EEPROM_TIMEOUT_MS: u32 = 100;

/// How many times [`Rtc8::unix_time`] reads the counter while waiting for two reads to agree.
pub const UNIX_READ_ATTEMPTS: usize = 3;

/// Register addresses.
#[allow(missing_docs)]
pub mod reg {
    pub const SECONDS: u8 = 0x00;
    pub const MINUTES: u8 = 0x01;
    pub const HOURS: u8 = 0x02;
    pub const WEEKDAY: u8 = 0x03;
    pub const DATE: u8 = 0x04;
    pub const MONTH: u8 = 0x05;
    pub const YEAR: u8 = 0x06;
    pub const MINUTES_ALARM: u8 = 0x07;
    pub const HOURS_ALARM: u8 = 0x08;
    pub const WEEKDAY_DATE_ALARM: u8 = 0x09;
    pub const TIMER_VALUE_0: u8 = 0x0A;
    pub const TIMER_VALUE_1: u8 = 0x0B;
    pub const STATUS: u8 = 0x0E;
    pub const CONTROL_1: u8 = 0x0F;
    pub const CONTROL_2: u8 = 0x10;
    pub const UNIX_TIME_0: u8 = 0x1B;
    pub const USER_RAM_1: u8 = 0x1F;
    pub const USER_RAM_2: u8 = 0x20;
    pub const EEADDR: u8 = 0x25;
    pub const EEDATA: u8 = 0x26;
    pub const EECMD: u8 = 0x27;
    pub const ID: u8 = 0x28;
}

mod eecmd {
    pub const FIRST: u8 = 0x00;
    pub const UPDATE: u8 = 0x11;
    pub const REFRESH: u8 = 0x12;
    pub const WRITE: u8 = 0x21;
    pub const READ: u8 = 0x22;
}

const HOURS_PM: u8 = 1 << 5;
const ALARM_DISABLE: u8 = 1 << 7;
const CONTROL1_TRPT: u8 = 1 << 7;
const CONTROL1_WADA: u8 = 1 << 5;
const CONTROL1_EERD: u8 = 1 << 3;
const CONTROL1_TE: u8 = 1 << 2;
const CONTROL1_TD: u8 = 0b11;
const CONTROL2_12_24: u8 = 1 << 1;
const CONTROL2_RESET: u8 = 1 << 0;

bitflags! {
    /// The status flags of an RV-3028.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct Status: u8 {
        /// An EEPROM write or refresh is in progress.
        const EEPROM_BUSY = 1 << 7;
        /// A clock output interrupt occurred.
        const CLOCK_OUTPUT = 1 << 6;
        /// The supply switched to the backup source.
        const BACKUP_SWITCH = 1 << 5;
        /// A periodic time update occurred.
        const UPDATE = 1 << 4;
        /// The countdown timer reached zero.
        const TIMER = 1 << 3;
        /// The alarm matched.
        const ALARM = 1 << 2;
        /// An external event was detected.
        const EVENT = 1 << 1;
        /// The supply dropped below the power-on reset threshold. Time is invalid.
        const POWER_ON_RESET = 1 << 0;
    }
}

bitflags! {
    /// Interrupt sources routed to the INT pin.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct Interrupts: u8 {
        /// Clock output on interrupt.
        const CLOCK_OUTPUT = 1 << 6;
        /// Periodic time update.
        const UPDATE = 1 << 5;
        /// Countdown timer.
        const TIMER = 1 << 4;
        /// Alarm.
        const ALARM = 1 << 3;
        /// External event.
        const EVENT = 1 << 2;
    }
}

/// Converts a packed BCD byte to binary.
#[must_use]
pub const fn bcd_to_dec(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0F)
}

/// Converts a binary value below 100 to packed BCD.
#[must_use]
pub const fn dec_to_bcd(dec: u8) -> u8 {
    ((dec / 10) << 4) | (dec % 10)
}

/// Hour register format.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum HourMode {
    /// 0-23.
    #[default]
    TwentyFour,
    /// 1-12 with an AM/PM flag.
    Twelve,
}

impl HourMode {
    /// Encodes a 0-23 hour for the hour registers.
    #[must_use]
    pub const fn encode(self, hour: u8) -> u8 {
        match self {
            Self::TwentyFour => dec_to_bcd(hour),
            Self::Twelve => {
                let pm = if hour >= 12 { HOURS_PM } else { 0 };
                let hour = match hour % 12 {
                    0 => 12,
                    h => h,
                };
                pm | dec_to_bcd(hour)
            }
        }
    }

    /// Decodes an hour register into a 0-23 hour.
    #[must_use]
    pub const fn decode(self, raw: u8) -> u8 {
        match self {
            Self::TwentyFour => bcd_to_dec(raw & 0x3F),
            Self::Twelve => {
                let hour = bcd_to_dec(raw & 0x1F) % 12;
                if raw & HOURS_PM != 0 { hour + 12 } else { hour }
            }
        }
    }
}

/// Time of day, always in 24-hour form.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Time {
    /// 0-23.
    pub hour: u8,
    /// 0-59.
    pub minute: u8,
    /// 0-59.
    pub second: u8,
}

/// Calendar date.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Date {
    /// Day of the week, 0-6. The meaning of 0 is up to the application.
    pub weekday: u8,
    /// 1-31.
    pub day: u8,
    /// 1-12.
    pub month: u8,
    /// 2000-2099.
    pub year: u16,
}

/// The day field of an alarm.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AlarmDay {
    /// Match a day of the week, 0-6.
    Weekday(u8),
    /// Match a day of the month, 1-31.
    Date(u8),
}

/// An alarm setting. Fields left as `None` are not compared.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Alarm {
    /// Minute to match.
    pub minute: Option<u8>,
    /// Hour to match, 0-23.
    pub hour: Option<u8>,
    /// Day to match.
    pub day: Option<AlarmDay>,
}

/// Countdown timer clock.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum TimerFrequency {
    /// 4096 Hz, 244 µs per tick.
    Hz4096 = 0,
    /// 64 Hz, 15.625 ms per tick.
    Hz64 = 1,
    /// 1 Hz.
    Hz1 = 2,
    /// One tick per minute.
    PerMinute = 3,
}

/// Device configuration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Config {
    /// Hour format written by [`Rtc8::default_cfg`]. Defaults to 24-hour.
    pub hour_mode: HourMode,
}

impl Config {
    /// Sets the hour format.
    #[must_use]
    pub const fn with_hour_mode(mut self, hour_mode: HourMode) -> Self {
        self.hour_mode = hour_mode;
        self
    }
}

/// An RTC 8 Click.
#[derive(Debug)]
pub struct Rtc8<IF, D, INT> {
    interface: IF,
    delay: D,
    int: INT,
    hour_mode: HourMode,
}

impl<IF: RegisterInterface, D: DelayNs, INT: InputPin> Rtc8<IF, D, INT> {
    /// Creates a driver.
    ///
    /// The hour format is assumed to be the one in `config` until [`Rtc8::default_cfg`] or
    /// [`Rtc8::set_hour_mode`] writes it.
    pub const fn new(interface: IF, delay: D, int: INT, config: Config) -> Self {
        Self {
            interface,
            delay,
            int,
            hour_mode: config.hour_mode,
        }
    }

    /// Applies the configured hour format and clears all status flags.
    ///
    /// Both steps are attempted; the error returned is the first one encountered and does not
    /// identify the failing step.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if a transfer fails.
    pub fn default_cfg(&mut self) -> Result<(), Rtc8Error> {
        let mut acc = Accumulator::new();
        acc.record(self.set_hour_mode(self.hour_mode));
        acc.record(self.clear_status(Status::all()));
        acc.finish()
    }

    /// Reads the identification register (hardware id in the high nibble, version in the low).
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn device_id(&mut self) -> Result<u8, Rtc8Error> {
        Ok(self.interface.read_register(reg::ID)?)
    }

    /// Issues a software reset of the prescaler, clearing the sub-second counters.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn reset(&mut self) -> Result<(), Rtc8Error> {
        self.interface
            .modify_register(reg::CONTROL_2, CONTROL2_RESET, CONTROL2_RESET)?;
        Ok(())
    }

    /// Selects 12- or 24-hour format. Hour registers are converted by the device.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn set_hour_mode(&mut self, mode: HourMode) -> Result<(), Rtc8Error> {
        let bit = match mode {
            HourMode::TwentyFour => 0,
            HourMode::Twelve => CONTROL2_12_24,
        };
        self.interface
            .modify_register(reg::CONTROL_2, CONTROL2_12_24, bit)?;
        self.hour_mode = mode;
        Ok(())
    }

    /// Returns the hour format in use.
    #[must_use]
    pub const fn hour_mode(&self) -> HourMode {
        self.hour_mode
    }

    /// Reads the time of day.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn time(&mut self) -> Result<Time, Rtc8Error> {
        let mut data = [0; 3];
        self.interface.read_registers(reg::SECONDS, &mut data)?;
        Ok(Time {
            second: bcd_to_dec(data[0] & 0x7F),
            minute: bcd_to_dec(data[1] & 0x7F),
            hour: self.hour_mode.decode(data[2]),
        })
    }

    /// Sets the time of day.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::InvalidArgument`] if a field is out of range.
    /// - [`Rtc8Error::Bus`] if the transfer fails.
    pub fn set_time(&mut self, time: Time) -> Result<(), Rtc8Error> {
        if time.hour > 23 || time.minute > 59 || time.second > 59 {
            return Err(Rtc8Error::InvalidArgument);
        }
        self.interface.write_registers(
            reg::SECONDS,
            &[
                dec_to_bcd(time.second),
                dec_to_bcd(time.minute),
                self.hour_mode.encode(time.hour),
            ],
        )?;
        Ok(())
    }

    /// Reads the calendar date.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn date(&mut self) -> Result<Date, Rtc8Error> {
        let mut data = [0; 4];
        self.interface.read_registers(reg::WEEKDAY, &mut data)?;
        Ok(Date {
            weekday: data[0] & 0x07,
            day: bcd_to_dec(data[1] & 0x3F),
            month: bcd_to_dec(data[2] & 0x1F),
            year: 2000 + u16::from(bcd_to_dec(data[3])),
        })
    }

    /// Sets the calendar date.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::InvalidArgument`] if a field is out of range.
    /// - [`Rtc8Error::Bus`] if the transfer fails.
    pub fn set_date(&mut self, date: Date) -> Result<(), Rtc8Error> {
        if date.weekday > 6
            || !(1..=31).contains(&date.day)
            || !(1..=12).contains(&date.month)
            || !(2000..=2099).contains(&date.year)
        {
            return Err(Rtc8Error::InvalidArgument);
        }
        self.interface.write_registers(
            reg::WEEKDAY,
            &[
                date.weekday,
                dec_to_bcd(date.day),
                dec_to_bcd(date.month),
                dec_to_bcd((date.year - 2000) as u8),
            ],
        )?;
        Ok(())
    }

    /// Reads the 32-bit UNIX time counter.
    ///
    /// The counter is read until two consecutive reads agree, so a carry between bytes cannot
    /// produce a torn value. After [`UNIX_READ_ATTEMPTS`] reads without agreement the last one
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn unix_time(&mut self) -> Result<u32, Rtc8Error> {
        let mut previous = self.read_unix()?;
        for _ in 1..UNIX_READ_ATTEMPTS {
            let current = self.read_unix()?;
            if current == previous {
                return Ok(current);
            }
            previous = current;
        }

        log::warn!("rtc8: unix time still changing after {UNIX_READ_ATTEMPTS} reads");
        Ok(previous)
    }

    /// Sets the UNIX time counter. It is independent of the calendar registers.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn set_unix_time(&mut self, seconds: u32) -> Result<(), Rtc8Error> {
        self.interface
            .write_registers(reg::UNIX_TIME_0, &seconds.to_le_bytes())?;
        Ok(())
    }

    /// Programs the alarm. The alarm flag is cleared so a stale match does not fire.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::InvalidArgument`] if a field is out of range.
    /// - [`Rtc8Error::Bus`] if the transfer fails.
    pub fn set_alarm(&mut self, alarm: Alarm) -> Result<(), Rtc8Error> {
        let minute = match alarm.minute {
            Some(minute) if minute > 59 => return Err(Rtc8Error::InvalidArgument),
            Some(minute) => dec_to_bcd(minute),
            None => ALARM_DISABLE,
        };
        let hour = match alarm.hour {
            Some(hour) if hour > 23 => return Err(Rtc8Error::InvalidArgument),
            Some(hour) => self.hour_mode.encode(hour),
            None => ALARM_DISABLE,
        };
        let (day, wada) = match alarm.day {
            Some(AlarmDay::Weekday(weekday)) if weekday > 6 => {
                return Err(Rtc8Error::InvalidArgument);
            }
            Some(AlarmDay::Date(date)) if !(1..=31).contains(&date) => {
                return Err(Rtc8Error::InvalidArgument);
            }
            Some(AlarmDay::Weekday(weekday)) => (weekday, 0),
            Some(AlarmDay::Date(date)) => (dec_to_bcd(date), CONTROL1_WADA),
            None => (ALARM_DISABLE, 0),
        };

        self.interface
            .modify_register(reg::CONTROL_1, CONTROL1_WADA, wada)?;
        self.interface
            .write_registers(reg::MINUTES_ALARM, &[minute, hour, day])?;
        self.clear_status(Status::ALARM)
    }

    /// Starts the countdown timer.
    ///
    /// The timer counts `value` ticks of `frequency` and raises [`Status::TIMER`]; with
    /// `repeat` it reloads and keeps running.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::InvalidArgument`] if `value` does not fit in 12 bits.
    /// - [`Rtc8Error::Bus`] if the transfer fails.
    pub fn set_timer(
        &mut self,
        value: u16,
        frequency: TimerFrequency,
        repeat: bool,
    ) -> Result<(), Rtc8Error> {
        if value > 0x0FFF {
            return Err(Rtc8Error::InvalidArgument);
        }

        // The timer must be stopped while its value is changed.
        self.interface
            .modify_register(reg::CONTROL_1, CONTROL1_TE, 0)?;
        self.interface
            .write_registers(reg::TIMER_VALUE_0, &value.to_le_bytes())?;

        let trpt = if repeat { CONTROL1_TRPT } else { 0 };
        self.interface.modify_register(
            reg::CONTROL_1,
            CONTROL1_TRPT | CONTROL1_TE | CONTROL1_TD,
            trpt | CONTROL1_TE | frequency as u8,
        )?;
        Ok(())
    }

    /// Stops the countdown timer.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn stop_timer(&mut self) -> Result<(), Rtc8Error> {
        self.interface
            .modify_register(reg::CONTROL_1, CONTROL1_TE, 0)?;
        Ok(())
    }

    /// Selects which events drive the INT pin.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn set_interrupts(&mut self, interrupts: Interrupts) -> Result<(), Rtc8Error> {
        self.interface.modify_register(
            reg::CONTROL_2,
            Interrupts::all().bits(),
            interrupts.bits(),
        )?;
        Ok(())
    }

    /// Returns `true` while the open-drain INT line is pulled low.
    ///
    /// This needs the INT pin to be wired. With [`NoPin`](clickboard_core::pin::NoPin) the line
    /// reads low and the interrupt always appears asserted; read [`Rtc8::status`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the pin cannot be read.
    pub fn interrupt(&mut self) -> Result<bool, Rtc8Error> {
        Ok(!pin::is_high(&mut self.int)?)
    }

    /// Reads the status flags.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn status(&mut self) -> Result<Status, Rtc8Error> {
        Ok(Status::from_bits_retain(
            self.interface.read_register(reg::STATUS)?,
        ))
    }

    /// Clears the given status flags, leaving the others untouched.
    ///
    /// [`Status::EEPROM_BUSY`] is read-only and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn clear_status(&mut self, flags: Status) -> Result<(), Rtc8Error> {
        let flags = flags.difference(Status::EEPROM_BUSY);
        self.interface
            .modify_register(reg::STATUS, flags.bits(), 0)?;
        Ok(())
    }

    /// Reads one of the two bytes of battery-backed user RAM.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::InvalidAddress`] if `index` is not 0 or 1.
    /// - [`Rtc8Error::Bus`] if the transfer fails.
    pub fn user_ram(&mut self, index: u8) -> Result<u8, Rtc8Error> {
        let reg = Self::user_ram_register(index)?;
        Ok(self.interface.read_register(reg)?)
    }

    /// Writes one of the two bytes of battery-backed user RAM.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::InvalidAddress`] if `index` is not 0 or 1.
    /// - [`Rtc8Error::Bus`] if the transfer fails.
    pub fn set_user_ram(&mut self, index: u8, value: u8) -> Result<(), Rtc8Error> {
        let reg = Self::user_ram_register(index)?;
        self.interface.write_register(reg, value)?;
        Ok(())
    }

    /// Reads a byte of user EEPROM.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::InvalidAddress`] if `address` is above [`EEPROM_USER_END`].
    /// - [`Rtc8Error::EepromBusy`] if the EEPROM did not become ready in time.
    /// - [`Rtc8Error::Bus`] if a transfer fails.
    pub fn read_eeprom(&mut self, address: u8) -> Result<u8, Rtc8Error> {
        Self::check_eeprom_address(address)?;
        self.with_eeprom(|rtc| {
            rtc.interface.write_register(reg::EEADDR, address)?;
            rtc.eeprom_command(eecmd::READ)?;
            Ok(rtc.interface.read_register(reg::EEDATA)?)
        })
    }

    /// Writes a byte of user EEPROM and waits for the write to finish.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::InvalidAddress`] if `address` is above [`EEPROM_USER_END`].
    /// - [`Rtc8Error::EepromBusy`] if the EEPROM did not become ready in time.
    /// - [`Rtc8Error::Bus`] if a transfer fails.
    pub fn write_eeprom(&mut self, address: u8, value: u8) -> Result<(), Rtc8Error> {
        Self::check_eeprom_address(address)?;
        self.with_eeprom(|rtc| {
            rtc.interface.write_register(reg::EEADDR, address)?;
            rtc.interface.write_register(reg::EEDATA, value)?;
            rtc.eeprom_command(eecmd::WRITE)
        })
    }

    /// Copies the configuration registers into their EEPROM mirror.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::EepromBusy`] if the EEPROM did not become ready in time.
    /// - [`Rtc8Error::Bus`] if a transfer fails.
    pub fn update_config(&mut self) -> Result<(), Rtc8Error> {
        self.with_eeprom(|rtc| rtc.eeprom_command(eecmd::UPDATE))
    }

    /// Reloads the configuration registers from their EEPROM mirror.
    ///
    /// # Errors
    ///
    /// - [`Rtc8Error::EepromBusy`] if the EEPROM did not become ready in time.
    /// - [`Rtc8Error::Bus`] if a transfer fails.
    pub fn refresh_config(&mut self) -> Result<(), Rtc8Error> {
        self.with_eeprom(|rtc| rtc.eeprom_command(eecmd::REFRESH))
    }

    /// Writes `data` starting at `reg`.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn generic_write(&mut self, reg: u8, data: &[u8]) -> Result<(), Rtc8Error> {
        self.interface.write_registers(reg, data)?;
        Ok(())
    }

    /// Reads `data.len()` bytes starting at `reg`.
    ///
    /// # Errors
    ///
    /// Returns [`Rtc8Error::Bus`] if the transfer fails.
    pub fn generic_read(&mut self, reg: u8, data: &mut [u8]) -> Result<(), Rtc8Error> {
        self.interface.read_registers(reg, data)?;
        Ok(())
    }

    /// Returns the register interface, the delay and the interrupt pin.
    pub fn release(self) -> (IF, D, INT) {
        (self.interface, self.delay, self.int)
    }

    fn read_unix(&mut self) -> Result<u32, Rtc8Error> {
        let mut data = [0; 4];
        self.interface.read_registers(reg::UNIX_TIME_0, &mut data)?;
        Ok(u32::from_le_bytes(data))
    }

    const fn user_ram_register(index: u8) -> Result<u8, Rtc8Error> {
        match index {
            0 => Ok(reg::USER_RAM_1),
            1 => Ok(reg::USER_RAM_2),
            _ => Err(Rtc8Error::InvalidAddress { address: index }),
        }
    }

    const fn check_eeprom_address(address: u8) -> Result<(), Rtc8Error> {
        if address > EEPROM_USER_END {
            return Err(Rtc8Error::InvalidAddress { address });
        }
        Ok(())
    }

    /// Runs `op` with auto refresh disabled, re-enabling it afterwards even if `op` failed.
    fn with_eeprom<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, Rtc8Error>,
    ) -> Result<T, Rtc8Error> {
        self.interface
            .modify_register(reg::CONTROL_1, CONTROL1_EERD, CONTROL1_EERD)?;

        let result = self.wait_eeprom().and_then(|()| op(self));
        let restored = self
            .interface
            .modify_register(reg::CONTROL_1, CONTROL1_EERD, 0);

        let value = result?;
        restored?;
        Ok(value)
    }

    fn eeprom_command(&mut self, command: u8) -> Result<(), Rtc8Error> {
        self.interface.write_register(reg::EECMD, eecmd::FIRST)?;
        self.interface.write_register(reg::EECMD, command)?;
        self.wait_eeprom()
    }

    fn wait_eeprom(&mut self) -> Result<(), Rtc8Error> {
        let interface = &mut self.interface;
        let ready = time::poll_until(&mut self.delay, EEPROM_TIMEOUT_MS, 1, || {
            let status = Status::from_bits_retain(interface.read_register(reg::STATUS)?);
            Ok::<_, BusError>((!status.contains(Status::EEPROM_BUSY)).then_some(()))
        })?;

        ready.ok_or_else(|| {
            log::warn!("rtc8: EEPROM still busy after {EEPROM_TIMEOUT_MS} ms");
            Rtc8Error::EepromBusy
        })
    }
}

/// Errors that can occur when using an RTC 8 Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum Rtc8Error {
    /// A time, date or timer field was out of range.
    InvalidArgument,

    /// A RAM or EEPROM address was out of range.
    #[snafu(display("address {address:#04x} is out of range"))]
    InvalidAddress {
        /// The rejected address.
        address: u8,
    },

    /// The EEPROM stayed busy past [`EEPROM_TIMEOUT_MS`].
    EepromBusy,

    /// Generic bus related error.
    #[snafu(transparent)]
    Bus {
        /// The source of the error.
        source: BusError,
    },
}

#[cfg(test)]
mod test {
    use clickboard_core::{
        AddressMask, I2cInterface,
        mock::{MockDelay, MockI2c, MockPin},
        pin::NoPin,
    };

    use super::*;

    type Driver = Rtc8<I2cInterface<MockI2c>, MockDelay, NoPin>;

    fn driver(config: Config) -> (MockI2c, MockDelay, Driver) {
        let i2c = MockI2c::new();
        let delay = MockDelay::new();
        let rtc = Rtc8::new(
            I2cInterface::new(i2c.clone(), I2C_ADDRESS, AddressMask::NONE),
            delay.clone(),
            NoPin,
            config,
        );
        (i2c, delay, rtc)
    }

    #[test]
    fn bcd_conversions() {
        assert_eq!(bcd_to_dec(0x59), 59);
        assert_eq!(dec_to_bcd(47), 0x47);
        for value in 0..100 {
            assert_eq!(bcd_to_dec(dec_to_bcd(value)), value);
        }
    }

    #[test]
    fn twelve_hour_encoding() {
        let mode = HourMode::Twelve;
        assert_eq!(mode.encode(0), 0x12);
        assert_eq!(mode.encode(11), 0x11);
        assert_eq!(mode.encode(12), HOURS_PM | 0x12);
        assert_eq!(mode.encode(23), HOURS_PM | 0x11);
        for hour in 0..24 {
            assert_eq!(mode.decode(mode.encode(hour)), hour);
        }
    }

    #[test]
    fn time_and_date_registers() {
        let (i2c, _, mut rtc) = driver(Config::default());
        let time = Time {
            hour: 21,
            minute: 7,
            second: 33,
        };
        let date = Date {
            weekday: 3,
            day: 18,
            month: 10,
            year: 2026,
        };

        rtc.set_time(time).unwrap();
        rtc.set_date(date).unwrap();

        assert_eq!(i2c.register(I2C_ADDRESS, reg::HOURS), 0x21);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::YEAR), 0x26);
        assert_eq!(rtc.time().unwrap(), time);
        assert_eq!(rtc.date().unwrap(), date);
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let (i2c, _, mut rtc) = driver(Config::default());
        let bad = Time {
            hour: 24,
            minute: 0,
            second: 0,
        };
        assert_eq!(rtc.set_time(bad), Err(Rtc8Error::InvalidArgument));
        assert_eq!(
            rtc.set_timer(0x1000, TimerFrequency::Hz1, false),
            Err(Rtc8Error::InvalidArgument)
        );
        assert!(i2c.writes().is_empty());
    }

    #[test]
    fn default_cfg_selects_mode_and_clears_flags() {
        let (i2c, _, mut rtc) = driver(Config::default().with_hour_mode(HourMode::Twelve));
        i2c.set_register(I2C_ADDRESS, reg::STATUS, 0xFF);

        rtc.default_cfg().unwrap();

        assert_eq!(i2c.register(I2C_ADDRESS, reg::CONTROL_2), CONTROL2_12_24);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::STATUS), 0x80);
    }

    #[test]
    fn alarm_registers() {
        let (i2c, _, mut rtc) = driver(Config::default());
        rtc.set_alarm(Alarm {
            minute: Some(30),
            hour: None,
            day: Some(AlarmDay::Date(15)),
        })
        .unwrap();

        assert_eq!(i2c.register(I2C_ADDRESS, reg::MINUTES_ALARM), 0x30);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::HOURS_ALARM), ALARM_DISABLE);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::WEEKDAY_DATE_ALARM), 0x15);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::CONTROL_1), CONTROL1_WADA);
    }

    #[test]
    fn countdown_timer() {
        let (i2c, _, mut rtc) = driver(Config::default());
        rtc.set_timer(0x0ABC, TimerFrequency::Hz64, true).unwrap();

        assert_eq!(i2c.register(I2C_ADDRESS, reg::TIMER_VALUE_0), 0xBC);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::TIMER_VALUE_1), 0x0A);
        assert_eq!(
            i2c.register(I2C_ADDRESS, reg::CONTROL_1),
            CONTROL1_TRPT | CONTROL1_TE | 0x01
        );
    }

    #[test]
    fn unix_time_gives_up_on_a_changing_counter() {
        let (i2c, _, mut rtc) = driver(Config::default());
        for seconds in 1u32..=3 {
            i2c.queue_read(&seconds.to_le_bytes());
        }

        assert_eq!(rtc.unix_time().unwrap(), 3);
    }

    #[test]
    fn interrupt_follows_the_int_line() {
        let int = MockPin::new();
        let mut rtc = Rtc8::new(
            I2cInterface::new(MockI2c::new(), I2C_ADDRESS, AddressMask::NONE),
            MockDelay::new(),
            int.clone(),
            Config::default(),
        );

        int.drive(true);
        assert!(!rtc.interrupt().unwrap());
        int.drive(false);
        assert!(rtc.interrupt().unwrap());
    }

    #[test]
    fn unix_time_round_trip() {
        let (_, _, mut rtc) = driver(Config::default());
        rtc.set_unix_time(1_792_300_000).unwrap();
        assert_eq!(rtc.unix_time().unwrap(), 1_792_300_000);
    }

    #[test]
    fn eeprom_read_sequence() {
        let (i2c, _, mut rtc) = driver(Config::default());
        i2c.set_register(I2C_ADDRESS, reg::EEDATA, 0x5A);

        assert_eq!(rtc.read_eeprom(0x10).unwrap(), 0x5A);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::EEADDR), 0x10);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::EECMD), eecmd::READ);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::CONTROL_1) & CONTROL1_EERD, 0);
    }

    #[test]
    fn eeprom_write_sequence() {
        let (i2c, _, mut rtc) = driver(Config::default());
        rtc.write_eeprom(0x2A, 0xC3).unwrap();

        assert_eq!(i2c.register(I2C_ADDRESS, reg::EEDATA), 0xC3);
        assert_eq!(i2c.register(I2C_ADDRESS, reg::EECMD), eecmd::WRITE);
        assert_eq!(
            rtc.write_eeprom(0x2B, 0),
            Err(Rtc8Error::InvalidAddress { address: 0x2B })
        );
    }

    #[test]
    fn busy_eeprom_times_out_and_restores_refresh() {
        let (i2c, delay, mut rtc) = driver(Config::default());
        i2c.set_register(I2C_ADDRESS, reg::STATUS, Status::EEPROM_BUSY.bits());

        assert_eq!(rtc.update_config(), Err(Rtc8Error::EepromBusy));
        assert_eq!(delay.elapsed_ms(), u64::from(EEPROM_TIMEOUT_MS));
        assert_eq!(i2c.register(I2C_ADDRESS, reg::CONTROL_1) & CONTROL1_EERD, 0);
    }

    #[test]
    fn user_ram() {
        let (i2c, _, mut rtc) = driver(Config::default());
        rtc.set_user_ram(1, 0x42).unwrap();
        assert_eq!(i2c.register(I2C_ADDRESS, reg::USER_RAM_2), 0x42);
        assert_eq!(rtc.user_ram(1).unwrap(), 0x42);
        assert_eq!(
            rtc.user_ram(2),
            Err(Rtc8Error::InvalidAddress { address: 2 })
        );
    }
}
