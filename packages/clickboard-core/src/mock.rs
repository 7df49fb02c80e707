//! Host-side doubles for the HAL traits.
//!
//! These are for unit tests only. Every mock is a cheap handle around shared state, so a test
//! can hand one clone to a driver and keep another to script replies and inspect traffic.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
    string::String,
    vec::Vec,
};

use embedded_hal::{
    delay::DelayNs,
    digital,
    i2c::{self, NoAcknowledgeSource},
    spi,
};

/// An I2C bus with register-file devices behind it.
///
/// The first written byte of a transaction selects a register pointer (after applying the
/// pointer mask), further written bytes are stored from the pointer onwards and reads return
/// bytes from the pointer onwards. Reads queued with [`MockI2c::queue_read`] take precedence
/// over the register file, which suits command based devices.
#[derive(Clone, Default)]
pub struct MockI2c {
    inner: Rc<RefCell<MockI2cInner>>,
}

#[derive(Default)]
struct MockI2cInner {
    registers: HashMap<u8, [u8; 256]>,
    pointer: u8,
    pointer_mask: Option<u8>,
    reads: VecDeque<Vec<u8>>,
    writes: Vec<(u8, Vec<u8>)>,
    naks: usize,
}

impl MockI2c {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Masks the register pointer byte, e.g. `0x7F` to strip an auto-increment bit.
    #[must_use]
    pub fn with_pointer_mask(self, mask: u8) -> Self {
        self.inner.borrow_mut().pointer_mask = Some(mask);
        self
    }

    /// Presets a register of the device at `address`.
    pub fn set_register(&self, address: u8, reg: u8, value: u8) {
        self.inner
            .borrow_mut()
            .registers
            .entry(address)
            .or_insert([0; 256])[reg as usize] = value;
    }

    /// Returns a register of the device at `address`.
    #[must_use]
    pub fn register(&self, address: u8, reg: u8) -> u8 {
        self.inner
            .borrow()
            .registers
            .get(&address)
            .map_or(0, |file| file[reg as usize])
    }

    /// Queues bytes returned by the next read operation.
    pub fn queue_read(&self, bytes: &[u8]) {
        self.inner.borrow_mut().reads.push_back(bytes.to_vec());
    }

    /// Makes the next `count` transactions fail with an address NAK.
    pub fn nak_next(&self, count: usize) {
        self.inner.borrow_mut().naks = count;
    }

    /// Returns every `(address, written bytes)` pair seen so far, one per transaction.
    #[must_use]
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.inner.borrow().writes.clone()
    }

    /// Forgets recorded writes.
    pub fn clear_writes(&self) {
        self.inner.borrow_mut().writes.clear();
    }
}

impl i2c::ErrorType for MockI2c {
    type Error = i2c::ErrorKind;
}

impl i2c::I2c for MockI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.naks > 0 {
            inner.naks -= 1;
            return Err(i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        let mut written = Vec::new();
        let mut pointer_set = false;

        for operation in operations.iter_mut() {
            match operation {
                i2c::Operation::Write(bytes) => {
                    for &byte in bytes.iter() {
                        written.push(byte);
                        if pointer_set {
                            let pointer = inner.pointer;
                            inner.registers.entry(address).or_insert([0; 256])
                                [pointer as usize] = byte;
                            inner.pointer = pointer.wrapping_add(1);
                        } else {
                            inner.pointer = byte & inner.pointer_mask.unwrap_or(0xFF);
                            pointer_set = true;
                        }
                    }
                }
                i2c::Operation::Read(buffer) => {
                    if let Some(bytes) = inner.reads.pop_front() {
                        for (slot, byte) in buffer
                            .iter_mut()
                            .zip(bytes.iter().copied().chain(core::iter::repeat(0)))
                        {
                            *slot = byte;
                        }
                    } else {
                        let file = *inner.registers.entry(address).or_insert([0; 256]);
                        for slot in buffer.iter_mut() {
                            *slot = file[inner.pointer as usize];
                            inner.pointer = inner.pointer.wrapping_add(1);
                        }
                    }
                }
            }
        }

        inner.writes.push((address, written));
        Ok(())
    }
}

/// An SPI device that records every frame and plays back queued reads.
#[derive(Clone, Default)]
pub struct MockSpi {
    inner: Rc<RefCell<MockSpiInner>>,
}

#[derive(Default)]
struct MockSpiInner {
    frames: Vec<Vec<u8>>,
    reads: VecDeque<Vec<u8>>,
    failures: usize,
}

impl MockSpi {
    /// Creates a device with no queued reads.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes clocked in by the next read operation.
    pub fn queue_read(&self, bytes: &[u8]) {
        self.inner.borrow_mut().reads.push_back(bytes.to_vec());
    }

    /// Returns the bytes written in each transaction so far.
    #[must_use]
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.inner.borrow().frames.clone()
    }

    /// Forgets recorded frames.
    pub fn clear_frames(&self) {
        self.inner.borrow_mut().frames.clear();
    }

    /// Makes the next `count` transactions fail without recording a frame.
    pub fn fail_next(&self, count: usize) {
        self.inner.borrow_mut().failures = count;
    }
}

impl MockSpiInner {
    fn fill(&mut self, buffer: &mut [u8]) {
        let bytes = self.reads.pop_front().unwrap_or_default();
        for (slot, byte) in buffer
            .iter_mut()
            .zip(bytes.into_iter().chain(core::iter::repeat(0)))
        {
            *slot = byte;
        }
    }
}

impl spi::ErrorType for MockSpi {
    type Error = spi::ErrorKind;
}

impl spi::SpiDevice for MockSpi {
    fn transaction(&mut self, operations: &mut [spi::Operation<'_, u8>]) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.failures > 0 {
            inner.failures -= 1;
            return Err(spi::ErrorKind::Other);
        }
        let mut frame = Vec::new();

        for operation in operations.iter_mut() {
            match operation {
                spi::Operation::Write(bytes) => frame.extend_from_slice(bytes),
                spi::Operation::Read(buffer) => inner.fill(buffer),
                spi::Operation::Transfer(read, write) => {
                    frame.extend_from_slice(write);
                    inner.fill(read);
                }
                spi::Operation::TransferInPlace(buffer) => {
                    frame.extend_from_slice(buffer);
                    inner.fill(buffer);
                }
                spi::Operation::DelayNs(_) => {}
            }
        }

        inner.frames.push(frame);
        Ok(())
    }
}

/// A UART whose peer replies once per flushed command.
///
/// Bytes given to [`MockUart::inject`] are readable immediately. Replies given to
/// [`MockUart::reply_on_flush`] are released, one per call, whenever the driver flushes.
#[derive(Clone, Default)]
pub struct MockUart {
    inner: Rc<RefCell<MockUartInner>>,
}

#[derive(Default)]
struct MockUartInner {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    replies: VecDeque<Vec<u8>>,
}

impl MockUart {
    /// Creates an idle UART.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `bytes` readable right away.
    pub fn inject(&self, bytes: &[u8]) {
        self.inner.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Queues a reply released by the next flush that has not been answered yet.
    pub fn reply_on_flush(&self, bytes: &[u8]) {
        self.inner.borrow_mut().replies.push_back(bytes.to_vec());
    }

    /// Returns everything the driver has written.
    #[must_use]
    pub fn written(&self) -> Vec<u8> {
        self.inner.borrow().tx.clone()
    }

    /// Returns everything the driver has written, as text.
    #[must_use]
    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.inner.borrow().tx).into_owned()
    }

    /// Forgets written bytes.
    pub fn clear_written(&self) {
        self.inner.borrow_mut().tx.clear();
    }

    /// Returns the number of bytes still waiting to be read.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().rx.len()
    }
}

impl embedded_io::ErrorType for MockUart {
    type Error = embedded_io::ErrorKind;
}

impl embedded_io::Read for MockUart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut inner = self.inner.borrow_mut();
        let mut count = 0;
        while count < buf.len() {
            match inner.rx.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl embedded_io::ReadReady for MockUart {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.inner.borrow().rx.is_empty())
    }
}

impl embedded_io::Write for MockUart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.inner.borrow_mut().tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        if let Some(reply) = inner.replies.pop_front() {
            inner.rx.extend(reply);
        }
        Ok(())
    }
}

/// A GPIO line usable as input or output.
#[derive(Clone, Default)]
pub struct MockPin {
    inner: Rc<RefCell<MockPinInner>>,
}

#[derive(Default)]
struct MockPinInner {
    high: bool,
    history: Vec<bool>,
}

impl MockPin {
    /// Creates a low pin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the level an input read will observe.
    pub fn drive(&self, high: bool) {
        self.inner.borrow_mut().high = high;
    }

    /// Returns the current level.
    #[must_use]
    pub fn level(&self) -> bool {
        self.inner.borrow().high
    }

    /// Returns every level the driver set, in order.
    #[must_use]
    pub fn history(&self) -> Vec<bool> {
        self.inner.borrow().history.clone()
    }
}

impl digital::ErrorType for MockPin {
    type Error = digital::ErrorKind;
}

impl digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        inner.high = false;
        inner.history.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut inner = self.inner.borrow_mut();
        inner.high = true;
        inner.history.push(true);
        Ok(())
    }
}

impl digital::InputPin for MockPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.inner.borrow().high)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.inner.borrow().high)
    }
}

/// A delay that returns immediately and keeps count of the time it should have spent.
#[derive(Clone, Default)]
pub struct MockDelay {
    elapsed_ns: Rc<Cell<u64>>,
}

impl MockDelay {
    /// Creates a delay with nothing elapsed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total requested delay in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns.get() / 1_000_000
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns.set(self.elapsed_ns.get() + u64::from(ns));
    }
}
