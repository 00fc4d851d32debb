//! Driver for the NXP PN544 NFC controller.
//!
//! The chip pushes HCI frames over I²C, pacing everything with an IRQ
//! line: while IRQ is high there is a frame to fetch. [`Pn544`] owns the
//! bus and the power pins and services the IRQ, parking every received
//! frame in a shared ring; a [`Reader`] on the other side drains the ring
//! without ever touching the bus. The split lets reception run in its own
//! task while protocol code only reads.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

mod buffer;
mod frame;

pub use buffer::{BufferError, CircularBuffer};
pub use frame::{check_frame, encode_frame, FrameError, LLC_HCI_OVERHEAD, LLC_MIN_SIZE, MSG_MAX_SIZE};

/// Default receive ring capacity in bytes.
pub const READ_BUF_SIZE: usize = 256;

/// VEN reset low time.
const RESETVEN_TIME_MS: u32 = 30;
/// An RSET command restarts the LLC sequence numbering.
const RSET_CMD: u8 = 0xF9;

/// NFC driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// Underlying I²C bus error.
  I2c(E),
  /// A power pin collaborator failed.
  Power,
  /// The controller is powered off.
  NotReady,
  /// Frame traffic is rejected while the chip waits for a firmware
  /// download.
  FirmwareMode,
  /// The outgoing frame is malformed.
  Frame(FrameError),
  /// The chip echoed its own read address instead of a length byte,
  /// meaning it had nothing queued after all.
  AddressEcho,
  /// Every descriptor slot is taken.
  HandlesExhausted,
}

/// Power sequencing state of the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerState {
  /// Everything off.
  Cold = 0,
  /// Powered with FIRM asserted, waiting for a firmware download.
  FwReady = 1,
  /// Powered for normal HCI traffic.
  Ready = 2,
}

/// Which mode to bring the chip up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
  Hci,
  Fw,
}

/// Requested power transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerCommand {
  Off,
  Hci,
  FwDownload,
}

/// Board-specific power pins of the chip.
pub trait PowerControl {
  type Error;
  /// VEN, the chip enable.
  fn set_ven(&mut self, high: bool) -> Result<(), Self::Error>;
  /// FIRM, selects firmware download mode on the next VEN reset.
  fn set_firm(&mut self, high: bool) -> Result<(), Self::Error>;
  /// Battery switch.
  fn set_vbat(&mut self, on: bool) -> Result<(), Self::Error>;
  /// Supply regulator.
  fn set_rail(&mut self, on: bool) -> Result<(), Self::Error>;
}

/// State shared between the driver and its readers: the receive ring, the
/// data-ready signal and the bookkeeping counters.
pub struct State<M: RawMutex, const N: usize = READ_BUF_SIZE> {
  ring: Mutex<M, RefCell<CircularBuffer<N>>>,
  data_ready: Signal<M, ()>,
  power_state: AtomicU8,
  pending_irqs: AtomicUsize,
  bytes_to_read: AtomicUsize,
  open_handles: AtomicUsize,
}

impl<M: RawMutex, const N: usize> State<M, N> {
  pub const fn new() -> Self {
    Self {
      ring: Mutex::new(RefCell::new(CircularBuffer::new())),
      data_ready: Signal::new(),
      power_state: AtomicU8::new(PowerState::Cold as u8),
      pending_irqs: AtomicUsize::new(0),
      bytes_to_read: AtomicUsize::new(0),
      open_handles: AtomicUsize::new(0),
    }
  }

  fn power(&self) -> PowerState {
    match self.power_state.load(Ordering::Acquire) {
      0 => PowerState::Cold,
      1 => PowerState::FwReady,
      _ => PowerState::Ready,
    }
  }

  fn set_power(&self, state: PowerState) {
    self.power_state.store(state as u8, Ordering::Release);
  }
}

impl<M: RawMutex, const N: usize> Default for State<M, N> {
  fn default() -> Self {
    Self::new()
  }
}

/// Drains received bytes out of the shared ring. Holds no hardware, so it
/// can live in a different task than the driver.
pub struct Reader<'a, M: RawMutex, const N: usize = READ_BUF_SIZE> {
  state: &'a State<M, N>,
}

/// Reader-side error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadError {
  /// The controller is powered off.
  NotReady,
  /// No received byte is buffered right now.
  WouldBlock,
}

impl<M: RawMutex, const N: usize> Reader<'_, M, N> {
  pub fn power_state(&self) -> PowerState {
    self.state.power()
  }

  /// Received bytes waiting in the ring.
  pub fn bytes_available(&self) -> usize {
    self.state.bytes_to_read.load(Ordering::Acquire)
  }

  /// Drains up to `out.len()` buffered bytes without waiting.
  pub fn try_read(&mut self, out: &mut [u8]) -> Result<usize, ReadError> {
    if self.state.power() == PowerState::Cold {
      return Err(ReadError::NotReady);
    }
    let available = self.bytes_available();
    if available == 0 {
      return Err(ReadError::WouldBlock);
    }
    let n = out.len().min(available);
    match self.state.ring.lock(|ring| ring.borrow_mut().drain(&mut out[..n])) {
      Ok(n) => {
        self.state.bytes_to_read.fetch_sub(n, Ordering::AcqRel);
        Ok(n)
      }
      Err(_) => Err(ReadError::WouldBlock),
    }
  }

  /// Like [`Self::try_read`] but waits for data to arrive.
  pub async fn read(&mut self, out: &mut [u8]) -> Result<usize, ReadError> {
    loop {
      match self.try_read(out) {
        Err(ReadError::WouldBlock) => self.state.data_ready.wait().await,
        other => return other,
      }
    }
  }
}

/// PN544 driver over I²C with an IRQ line, power pins and a delay source.
pub struct Pn544<'a, I, IRQ, P, D, M: RawMutex, const N: usize = READ_BUF_SIZE> {
  state: &'a State<M, N>,
  i2c: I,
  irq: IRQ,
  power: P,
  delay: D,
  addr: u8,
  max_handles: usize,
}

impl<'a, I, IRQ, P, D, M: RawMutex, const N: usize> Pn544<'a, I, IRQ, P, D, M, N> {
  /// Creates the driver and its paired [`Reader`] over shared `state`.
  pub fn new(
    state: &'a State<M, N>,
    i2c: I,
    irq: IRQ,
    power: P,
    delay: D,
    addr: u8,
  ) -> (Self, Reader<'a, M, N>) {
    (
      Self { state, i2c, irq, power, delay, addr, max_handles: 1 },
      Reader { state },
    )
  }

  /// Concurrent open handles allowed, 1 by default.
  pub fn set_max_handles(&mut self, max_handles: usize) {
    self.max_handles = max_handles;
  }

  pub fn power_state(&self) -> PowerState {
    self.state.power()
  }

  pub fn firmware_mode(&self) -> bool {
    self.state.power() == PowerState::FwReady
  }
}

impl<I, IRQ, P, D, M, E, const N: usize> Pn544<'_, I, IRQ, P, D, M, N>
where
  I: I2c<SevenBitAddress, Error = E>,
  IRQ: Wait + InputPin,
  P: PowerControl,
  D: DelayNs,
  M: RawMutex,
{
  /// Powers the chip into `mode`, VEN-resetting it on the way. Any bytes
  /// still buffered belong to the previous session and are flushed.
  pub async fn enable(&mut self, mode: Mode) -> Result<(), Error<E>> {
    self.reset_receive_state();
    if self.state.power() == PowerState::Cold {
      self.power.set_rail(true).map_err(|_| Error::Power)?;
      self.delay.delay_ms(10).await;
      self.power.set_vbat(true).map_err(|_| Error::Power)?;
      self.power.set_ven(false).map_err(|_| Error::Power)?;
      self.delay.delay_ms(RESETVEN_TIME_MS).await;
      self.power.set_ven(true).map_err(|_| Error::Power)?;
      self.delay.delay_ms(4).await;
    }
    match mode {
      Mode::Fw => {
        self.power.set_firm(true).map_err(|_| Error::Power)?;
        self.pulse_ven().await?;
        self.state.set_power(PowerState::FwReady);
      }
      Mode::Hci => {
        self.power.set_firm(false).map_err(|_| Error::Power)?;
        self.pulse_ven().await?;
        self.state.set_power(PowerState::Ready);
      }
    }
    self.delay.delay_ms(4).await;
    // boot settle before the first HCI exchange
    self.delay.delay_ms(10).await;
    Ok(())
  }

  /// Cuts power. A cold chip stays cold.
  pub async fn disable(&mut self) -> Result<(), Error<E>> {
    self.reset_receive_state();
    if self.state.power() != PowerState::Cold {
      self.power.set_ven(false).map_err(|_| Error::Power)?;
      self.delay.delay_us(100).await;
      self.power.set_rail(false).map_err(|_| Error::Power)?;
      self.power.set_vbat(false).map_err(|_| Error::Power)?;
      self.state.set_power(PowerState::Cold);
      self.delay.delay_ms(RESETVEN_TIME_MS).await;
    }
    Ok(())
  }

  /// Executes a power transition, skipping it when the chip is already in
  /// the requested mode.
  pub async fn set_power(&mut self, command: PowerCommand) -> Result<(), Error<E>> {
    match command {
      PowerCommand::Off => {
        self.disable().await?;
        self.delay.delay_ms(RESETVEN_TIME_MS).await;
      }
      PowerCommand::Hci => {
        if self.state.power() != PowerState::Ready {
          self.disable().await?;
          self.enable(Mode::Hci).await?;
        }
      }
      PowerCommand::FwDownload => {
        if self.state.power() != PowerState::FwReady {
          self.disable().await?;
          self.enable(Mode::Fw).await?;
        }
      }
    }
    Ok(())
  }

  /// Opens one client handle. The first open powers the chip up for HCI.
  pub async fn open(&mut self) -> Result<(), Error<E>> {
    let handles = self.state.open_handles.load(Ordering::Acquire);
    if handles > self.max_handles {
      return Err(Error::HandlesExhausted);
    }
    if handles == 0 {
      self.enable(Mode::Hci).await?;
    }
    self.state.open_handles.fetch_add(1, Ordering::AcqRel);
    Ok(())
  }

  /// Releases one client handle, powering down on the last one.
  pub async fn release(&mut self) -> Result<(), Error<E>> {
    let handles = &self.state.open_handles;
    if handles.load(Ordering::Acquire) > 0 {
      handles.fetch_sub(1, Ordering::AcqRel);
    }
    if handles.load(Ordering::Acquire) == 0 {
      self.disable().await?;
    }
    Ok(())
  }

  /// Switches firmware download mode on or off, re-sequencing the power
  /// pins as needed.
  pub async fn set_firmware_mode(&mut self, enable: bool) -> Result<(), Error<E>> {
    let command = if enable { PowerCommand::FwDownload } else { PowerCommand::Hci };
    self.set_power(command).await
  }

  /// Whether system suspend may proceed. A pending firmware download must
  /// not be interrupted.
  pub fn may_suspend(&self) -> bool {
    self.state.power() != PowerState::FwReady
  }

  /// Validates and sends one frame. Oversized input is truncated to the
  /// length its first byte promises, an RSET command flushes stale
  /// received bytes first, and a not-acknowledging chip gets one retry
  /// after a standby wakeup delay.
  pub async fn write_frame(&mut self, buf: &[u8]) -> Result<usize, Error<E>> {
    match self.state.power() {
      PowerState::Cold => return Err(Error::NotReady),
      PowerState::FwReady => return Err(Error::FirmwareMode),
      PowerState::Ready => {}
    }
    if buf.len() < LLC_MIN_SIZE {
      return Err(Error::Frame(FrameError::Length));
    }
    let len = buf.len().min(usize::from(buf[0]) + 1);
    let frame = &buf[..len];
    if frame.len() != usize::from(frame[0]) + 1 {
      return Err(Error::Frame(FrameError::Length));
    }
    check_frame(frame).map_err(Error::Frame)?;
    if frame[1] == RSET_CMD {
      // responses to the old sequence numbering are stale now
      self.state.ring.lock(|ring| ring.borrow_mut().flush());
      self.state.bytes_to_read.store(0, Ordering::Release);
    }
    match self.i2c.write(self.addr, frame).await {
      Ok(()) => Ok(frame.len()),
      Err(_) => {
        self.delay.delay_ms(6).await;
        self.i2c.write(self.addr, frame).await.map_err(Error::I2c)?;
        Ok(frame.len())
      }
    }
  }

  /// Services IRQs forever. Run this in its own task.
  pub async fn run(&mut self) -> ! {
    loop {
      let _ = self.irq.wait_for_high().await;
      self.note_irq();
      let _ = self.service().await;
    }
  }

  /// Records one IRQ edge for [`Self::service`] to handle.
  pub fn note_irq(&self) {
    self.state.pending_irqs.fetch_add(1, Ordering::AcqRel);
  }

  /// Handles pending IRQs: fetches frames while the IRQ line stays high,
  /// parks them in the ring and wakes readers. Returns the byte count
  /// handed over.
  pub async fn service(&mut self) -> Result<usize, Error<E>> {
    if self.state.pending_irqs.load(Ordering::Acquire) == 0 {
      return Ok(0);
    }
    let result = self.receive().await;
    if let Ok(total) = &result {
      if *total > 0 {
        self.state.bytes_to_read.fetch_add(*total, Ordering::AcqRel);
        self.state.data_ready.signal(());
      }
    }
    self.state.pending_irqs.store(0, Ordering::Release);
    result
  }

  async fn receive(&mut self) -> Result<usize, Error<E>> {
    let mut total = 0;
    let failure = loop {
      if !self.irq.is_high().map_err(|_| unreachable!())? {
        break None;
      }
      let mut len_buf = [0u8; 1];
      if let Err(e) = self.i2c.read(self.addr, &mut len_buf).await {
        break Some(Error::I2c(e));
      }
      if len_buf[0] == (self.addr << 1) | 0x01 {
        break Some(Error::AddressEcho);
      }
      let len = usize::from(len_buf[0]).clamp(LLC_HCI_OVERHEAD, MSG_MAX_SIZE - 1);
      let mut raw = [0u8; MSG_MAX_SIZE];
      raw[0] = len as u8;
      if let Err(e) = self.i2c.read(self.addr, &mut raw[1..=len]).await {
        break Some(Error::I2c(e));
      }
      // a full ring drops the frame, readers are too far behind
      if let Ok(n) = self.state.ring.lock(|ring| ring.borrow_mut().fill(&raw[..=len])) {
        total += n;
      }
    };
    match failure {
      None => Ok(total),
      Some(_) if total > 0 => Ok(total),
      Some(e) => Err(e),
    }
  }

  async fn pulse_ven(&mut self) -> Result<(), Error<E>> {
    self.power.set_ven(false).map_err(|_| Error::Power)?;
    self.delay.delay_ms(RESETVEN_TIME_MS).await;
    self.power.set_ven(true).map_err(|_| Error::Power)
  }

  fn reset_receive_state(&mut self) {
    self.state.ring.lock(|ring| ring.borrow_mut().flush());
    self.state.data_ready.reset();
    self.state.pending_irqs.store(0, Ordering::Release);
    self.state.bytes_to_read.store(0, Ordering::Release);
  }
}
