//! Driver for Atmel maXTouch touchscreen controllers.
//!
//! The chip exposes an object-based register map: an information block, a
//! directory of objects and a message processor all transactions go through.
//! [`Mxt::initialize`] walks the directory, [`Mxt::next_report`] waits for
//! the CHG line and folds every pending message into one [`Report`].

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

mod boot;
mod config;
pub(crate) mod defs;
mod gesture;
mod object;
mod touch;

pub use config::ConfigReport;
pub use gesture::{map_direction, Gesture};
pub use object::{Info, Object, ObjectTable};
pub use touch::{Finger, FingerState, Report, ReportEvent, ReportProtocol};

use defs::*;
use gesture::{decode_one_touch, decode_two_touch};
use touch::TouchState;

/// Touch driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// Underlying I²C bus error.
  I2c(E),
  /// The power rail collaborator failed.
  Power,
  /// A required object is missing from the chip's directory.
  ObjectMissing(u8),
  /// The chip reports more objects than the directory can hold.
  TableOverflow,
  /// The message processor object has an unusable size.
  MessageOverflow(u16),
  /// The no-message sentinel arrived while a specific report was awaited.
  NoMessage,
  /// A poll or retry budget ran out before the chip responded.
  Timeout,
  /// The operation is not valid in the current driver state.
  WrongState,
  /// The controller is powered off.
  NotPowered,
  /// A config or firmware upload is in flight.
  Busy,
  /// The configuration blob is malformed.
  ConfigFormat,
  /// The configuration blob was built for a different chip.
  ConfigMismatch { family_id: u8, variant_id: u8 },
  /// No bootloader pairing is known for the current bus address.
  UnknownAddress(u8),
  /// The bootloader answered with an unexpected status byte.
  Bootloader(u8),
  /// A firmware frame kept failing the bootloader's CRC check.
  FlashFailed,
}

/// Where the chip currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverState {
  Init,
  AppMode,
  Bootloader,
}

/// Acquisition power mode. Deep sleep stops scanning entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
  Run,
  DeepSleep,
}

/// Controls the supply rail of the touch controller.
pub trait TouchPower {
  type Error;
  fn set_power(&mut self, on: bool) -> Result<(), Self::Error>;
}

/// For boards where the rail is not software controlled.
impl TouchPower for () {
  type Error = core::convert::Infallible;
  fn set_power(&mut self, _on: bool) -> Result<(), Self::Error> {
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Message {
  pub(crate) report_id: u8,
  pub(crate) payload: [u8; MSG_PAYLOAD_SIZE],
}

/// maXTouch driver over I²C with a CHG interrupt line, a supply rail
/// control and a delay source.
pub struct Mxt<I, CHG, P, D> {
  i2c: I,
  chg: CHG,
  power: P,
  delay: D,
  addr: u8,
  state: DriverState,
  info: Info,
  table: ObjectTable,
  touch: TouchState,
  protocol: ReportProtocol,
  use_gestures: bool,
  mode: PowerMode,
  powered: bool,
  actv_cycle_time: u8,
  idle_cycle_time: u8,
  max_x: u16,
  max_y: u16,
  busy: AtomicBool,
}

impl<I, CHG, P, D> Mxt<I, CHG, P, D> {
  /// Creates the driver for the chip at `addr` (its application-mode
  /// address). Nothing is touched on the bus until [`Self::initialize`].
  pub fn new(i2c: I, chg: CHG, power: P, delay: D, addr: u8) -> Self {
    Self {
      i2c,
      chg,
      power,
      delay,
      addr,
      state: DriverState::Init,
      info: Info {
        family_id: 0,
        variant_id: 0,
        version: 0,
        build: 0,
        matrix_x_size: 0,
        matrix_y_size: 0,
        object_count: 0,
      },
      table: ObjectTable::new(),
      touch: TouchState::new(),
      protocol: ReportProtocol::Slots,
      use_gestures: false,
      mode: PowerMode::Run,
      powered: true,
      actv_cycle_time: 0,
      idle_cycle_time: 0,
      max_x: 0,
      max_y: 0,
      busy: AtomicBool::new(false),
    }
  }

  /// Selects how contacts are laid out in emitted reports.
  pub fn set_report_protocol(&mut self, protocol: ReportProtocol) {
    self.protocol = protocol;
  }

  /// Enables the firmware gesture recognizer channels.
  pub fn use_firmware_gestures(&mut self, enable: bool) {
    self.use_gestures = enable;
  }

  pub const fn state(&self) -> DriverState {
    self.state
  }

  pub const fn info(&self) -> &Info {
    &self.info
  }

  pub const fn table(&self) -> &ObjectTable {
    &self.table
  }

  /// Effective touchscreen resolution, valid after initialization.
  pub const fn resolution(&self) -> (u16, u16) {
    (self.max_x, self.max_y)
  }

  pub fn power_mode(&self) -> PowerMode {
    self.mode
  }

  /// False while a config or firmware upload must not be interrupted.
  pub fn may_suspend(&self) -> bool {
    !self.busy.load(Ordering::Acquire)
  }

  /// Releases the driver and hands the peripherals back.
  pub fn release(self) -> (I, CHG, P, D) {
    (self.i2c, self.chg, self.power, self.delay)
  }
}

impl<I, CHG, P, D, E> Mxt<I, CHG, P, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  CHG: Wait + InputPin,
  P: TouchPower,
  D: DelayNs,
{
  /// Probes the chip and reads its object directory.
  ///
  /// When the application firmware does not answer, the paired bootloader
  /// address is probed instead: a chip with a failed application CRC check
  /// boots straight into its bootloader and waits for a new firmware. The
  /// returned state tells the two cases apart.
  pub async fn initialize(&mut self) -> Result<DriverState, Error<E>> {
    match self.read_info().await {
      Ok(info) => self.info = info,
      Err(Error::I2c(_)) => {
        self.enter_bootloader_address()?;
        self.check_bootloader(BOOT_APP_CRC_FAIL).await?;
        return Ok(self.state);
      }
      Err(e) => return Err(e),
    }
    self.state = DriverState::AppMode;
    self.read_object_table().await?;

    let t5 = self.object(T5_MESSAGE_PROCESSOR)?;
    if t5.size < 2 || t5.size > MSG_MAX_SIZE as u16 {
      return Err(Error::MessageOverflow(t5.size));
    }

    self.probe_power_cfg().await?;
    self.read_resolution().await?;
    Ok(self.state)
  }

  async fn read_info(&mut self) -> Result<Info, Error<E>> {
    let mut raw = [0u8; INFO_BLOCK_SIZE];
    self.read_bytes(INFO_BLOCK_ADDR, &mut raw).await?;
    Ok(Info::from(raw))
  }

  async fn read_object_table(&mut self) -> Result<(), Error<E>> {
    self.table.clear();
    for i in 0..u16::from(self.info.object_count) {
      let mut raw = [0u8; OBJECT_ENTRY_SIZE];
      self
        .read_bytes(OBJECT_TABLE_START + i * OBJECT_ENTRY_SIZE as u16, &mut raw)
        .await?;
      self.table.push(raw).map_err(|_| Error::TableOverflow)?;
    }
    Ok(())
  }

  async fn read_resolution(&mut self) -> Result<(), Error<E>> {
    let mut x_range = u16::from_le_bytes([
      self.read_object(T9_MULTITOUCH, T9_XRANGE_LSB).await?,
      self.read_object(T9_MULTITOUCH, T9_XRANGE_MSB).await?,
    ]);
    let mut y_range = u16::from_le_bytes([
      self.read_object(T9_MULTITOUCH, T9_YRANGE_LSB).await?,
      self.read_object(T9_MULTITOUCH, T9_YRANGE_MSB).await?,
    ]);
    let orient = self.read_object(T9_MULTITOUCH, T9_ORIENT).await?;

    // an unprogrammed range register means the default 10-bit axis
    if x_range == 0 {
      x_range = 1023;
    }
    if y_range == 0 {
      y_range = 1023;
    }
    self.max_x = x_range + 1;
    self.max_y = y_range + 1;
    if orient & ORIENT_XY_SWITCH != 0 {
      core::mem::swap(&mut self.max_x, &mut self.max_y);
    }
    Ok(())
  }

  /// Waits for the CHG line and turns all pending messages into one report.
  pub async fn next_report(&mut self) -> Result<Report, Error<E>> {
    self.chg.wait_for_low().await.map_err(|_| unreachable!())?;
    self.process_messages().await
  }

  /// Drains the message processor and consolidates what it produced. The
  /// message-count object bounds the drain when present, otherwise reading
  /// stops at the no-message sentinel or a 2x-report-ID safety bound.
  pub async fn process_messages(&mut self) -> Result<Report, Error<E>> {
    let (Some(t6), Some(t9)) = (
      self.table.lookup(T6_COMMAND_PROCESSOR).copied(),
      self.table.lookup(T9_MULTITOUCH).copied(),
    ) else {
      // nothing to route to, drain blind so CHG deasserts
      let mut budget = u16::from(self.table.max_report_id()) * 2;
      while budget > 0 {
        let msg = self.read_message().await?;
        if msg.report_id == RPTID_NOMSG {
          break;
        }
        budget -= 1;
      }
      return Ok(Report::default());
    };
    let t24 = self.table.lookup(T24_ONE_TOUCH_GESTURE).copied();
    let t27 = self.table.lookup(T27_TWO_TOUCH_GESTURE).copied();

    let counted = match self.table.lookup(T44_MESSAGE_COUNT).copied() {
      Some(t44) => self.read_u8(t44.start).await.ok(),
      None => None,
    };

    match counted {
      Some(count) => {
        for _ in 0..count {
          let Ok(msg) = self.read_message().await else { break };
          self.route(&msg, &t6, &t9, t24.as_ref(), t27.as_ref());
        }
      }
      None => {
        let mut budget = u16::from(self.table.max_report_id()) * 2;
        while budget > 0 {
          let Ok(msg) = self.read_message().await else { break };
          if msg.report_id == RPTID_NOMSG {
            break;
          }
          self.route(&msg, &t6, &t9, t24.as_ref(), t27.as_ref());
          budget -= 1;
        }
      }
    }

    Ok(self.touch.emit_report(self.protocol, self.use_gestures))
  }

  fn route(&mut self, msg: &Message, t6: &Object, t9: &Object, t24: Option<&Object>, t27: Option<&Object>) {
    let id = msg.report_id;
    if t9.owns_report(id) {
      if self.mode == PowerMode::DeepSleep {
        return;
      }
      let slot = usize::from(id - t9.min_report_id);
      if slot < MAX_FINGERS {
        self.touch.touch_event(slot, &msg.payload, self.max_x, self.max_y);
      }
    } else if id == t6.max_report_id {
      #[cfg(feature = "defmt")]
      defmt::debug!("command processor status {=u8:#04x}", msg.payload[0]);
    } else if t24.is_some_and(|o| o.owns_report(id)) {
      if self.mode != PowerMode::DeepSleep {
        self.touch.one_touch.observe(decode_one_touch(&msg.payload));
      }
    } else if t27.is_some_and(|o| o.owns_report(id)) && self.mode != PowerMode::DeepSleep {
      self.touch.two_touch.observe(decode_two_touch(&msg.payload));
    }
  }

  pub(crate) async fn read_message(&mut self) -> Result<Message, Error<E>> {
    let t5 = self.object(T5_MESSAGE_PROCESSOR)?;
    if t5.size < 2 || t5.size > MSG_MAX_SIZE as u16 {
      return Err(Error::MessageOverflow(t5.size));
    }
    // the trailing checksum byte is never read
    let len = usize::from(t5.size) - 1;
    let mut buf = [0u8; MSG_MAX_SIZE];
    self.read_bytes(t5.start, &mut buf[..len]).await?;
    let mut payload = [0u8; MSG_PAYLOAD_SIZE];
    let n = (len - 1).min(MSG_PAYLOAD_SIZE);
    payload[..n].copy_from_slice(&buf[1..1 + n]);
    Ok(Message { report_id: buf[0], payload })
  }

  /// Polls the message processor for a specific report ID. The no-message
  /// sentinel fails fast, anything else burns one unit of the poll budget.
  pub(crate) async fn read_message_matching(&mut self, report_id: u8) -> Result<Message, Error<E>> {
    for _ in 0..MSG_POLL_BUDGET {
      let msg = self.read_message().await?;
      if msg.report_id == RPTID_NOMSG {
        return Err(Error::NoMessage);
      }
      if msg.report_id == report_id {
        return Ok(msg);
      }
    }
    Err(Error::Timeout)
  }

  /// Reads messages until the CHG line deasserts, bounded by the pending
  /// message count (or twice the report-ID space when that read fails).
  pub(crate) async fn drain_messages(&mut self) -> Result<(), Error<E>> {
    let count = match self.table.lookup(T44_MESSAGE_COUNT).copied() {
      Some(t44) => match self.read_u8(t44.start).await {
        Ok(count) => u16::from(count) + 1,
        Err(_) => u16::from(self.table.max_report_id()) * 2,
      },
      None => u16::from(self.table.max_report_id()) * 2,
    };
    for _ in 0..count {
      self.read_message().await?;
      if self.chg.is_high().map_err(|_| unreachable!())? {
        break;
      }
    }
    Ok(())
  }

  /// Sets the acquisition mode by rewriting the T7 cycle times. Deep sleep
  /// writes zeros, run mode restores the stored times.
  pub async fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), Error<E>> {
    if self.state != DriverState::AppMode {
      return Err(Error::WrongState);
    }
    let (actv, idle) = match mode {
      PowerMode::DeepSleep => (0, 0),
      PowerMode::Run => (self.actv_cycle_time, self.idle_cycle_time),
    };
    self.write_object(T7_POWER_CONFIG, T7_ACTVACQINT, actv).await?;
    self.write_object(T7_POWER_CONFIG, T7_IDLEACQINT, idle).await?;
    self.mode = if actv == 0 || idle == 0 { PowerMode::DeepSleep } else { PowerMode::Run };
    Ok(())
  }

  async fn read_power_cfg(&mut self) -> Result<(), Error<E>> {
    self.actv_cycle_time = self.read_object(T7_POWER_CONFIG, T7_ACTVACQINT).await?;
    self.idle_cycle_time = self.read_object(T7_POWER_CONFIG, T7_IDLEACQINT).await?;
    self.mode = if self.actv_cycle_time == 0 || self.idle_cycle_time == 0 {
      PowerMode::DeepSleep
    } else {
      PowerMode::Run
    };
    Ok(())
  }

  async fn check_power_cfg_post_reset(&mut self) -> Result<(), Error<E>> {
    self.read_power_cfg().await?;
    if self.actv_cycle_time == 0 || self.idle_cycle_time == 0 {
      // a zeroed T7 would leave the chip asleep with no way to wake it
      self.actv_cycle_time = 255;
      self.idle_cycle_time = 255;
      self.set_power_mode(PowerMode::Run).await?;
    }
    Ok(())
  }

  async fn probe_power_cfg(&mut self) -> Result<(), Error<E>> {
    self.read_power_cfg().await?;
    if self.actv_cycle_time == 0 || self.idle_cycle_time == 0 {
      self.soft_reset().await?;
      self.check_power_cfg_post_reset().await?;
    }
    Ok(())
  }

  /// Commands a soft reset and waits for CHG to signal completion.
  pub async fn soft_reset(&mut self) -> Result<(), Error<E>> {
    self.soft_reset_with(RESET_VALUE).await
  }

  pub(crate) async fn soft_reset_with(&mut self, value: u8) -> Result<(), Error<E>> {
    self.write_object(T6_COMMAND_PROCESSOR, T6_RESET, value).await?;
    let reset_time = match self.info.family_id {
      MXT224_ID => MXT224_RESET_TIME,
      MXT768E_ID => MXT768E_RESET_TIME,
      MXT1386_ID => MXT1386_RESET_TIME,
      MXT1188S_ID => MXT1188S_RESET_TIME,
      _ => RESET_TIME,
    };
    let retries = 3 * reset_time / 10;
    let mut waited = 0;
    while self.chg.is_high().map_err(|_| unreachable!())? {
      if waited > retries {
        return Err(Error::Timeout);
      }
      self.delay.delay_ms(10).await;
      waited += 1;
    }
    Ok(())
  }

  /// Commits the volatile configuration to non-volatile storage. The
  /// backup register reads back nonzero until the write completes.
  pub async fn backup_nv(&mut self) -> Result<(), Error<E>> {
    self.write_object(T6_COMMAND_PROCESSOR, T6_BACKUPNV, BACKUP_VALUE).await?;
    self.delay.delay_ms(BACKUP_TIME).await;
    for _ in 0..1000 {
      if self.read_object(T6_COMMAND_PROCESSOR, T6_BACKUPNV).await? == 0 {
        return Ok(());
      }
      self.delay.delay_ms(10).await;
    }
    Err(Error::Timeout)
  }

  /// Asks the chip for the CRC of its currently loaded configuration.
  pub async fn device_config_crc(&mut self) -> Result<u32, Error<E>> {
    let t6 = self.object(T6_COMMAND_PROCESSOR)?;
    // stale messages would shadow the status report we are about to request
    let _ = self.drain_messages().await;
    self.write_u8(t6.start + T6_REPORTALL, 1).await?;
    for _ in 0..100 {
      self.delay.delay_ms(10).await;
      if !self.chg.is_high().map_err(|_| unreachable!())? {
        break;
      }
    }
    let msg = self.read_message_matching(t6.max_report_id).await?;
    Ok(u32::from(msg.payload[1])
      | u32::from(msg.payload[2]) << 8
      | u32::from(msg.payload[3]) << 16)
  }

  /// Leaves deep sleep unless the chip free-runs anyway.
  pub async fn start(&mut self) -> Result<(), Error<E>> {
    if self.actv_cycle_time != 255 || self.idle_cycle_time != 255 {
      self.set_power_mode(PowerMode::Run).await?;
    }
    Ok(())
  }

  /// Puts the chip into deep sleep.
  pub async fn stop(&mut self) -> Result<(), Error<E>> {
    self.set_power_mode(PowerMode::DeepSleep).await
  }

  /// Powers the chip up and brings it to a scanning state.
  pub async fn open(&mut self) -> Result<(), Error<E>> {
    if !self.powered {
      self.power.set_power(true).map_err(|_| Error::Power)?;
      self.powered = true;
      self.delay.delay_ms(RESUME_TIME).await;
      self.probe_power_cfg().await?;
      self.start().await?;
    }
    Ok(())
  }

  /// Stops scanning and cuts the supply rail.
  pub async fn close(&mut self) -> Result<(), Error<E>> {
    if self.powered {
      self.stop().await?;
      self.power.set_power(false).map_err(|_| Error::Power)?;
      self.powered = false;
    }
    Ok(())
  }

  /// Powers the chip down for system suspend. All tracked contacts are
  /// released and the report retiring them is returned, so no finger stays
  /// stuck down across the suspend. Refused while an upload is in flight.
  pub async fn suspend(&mut self) -> Result<Report, Error<E>> {
    if !self.may_suspend() {
      return Err(Error::Busy);
    }
    self.stop().await?;
    self.power.set_power(false).map_err(|_| Error::Power)?;
    self.powered = false;
    for finger in self.touch.fingers_mut() {
      if finger.state != FingerState::Idle {
        finger.state = FingerState::Released;
      }
    }
    Ok(self.touch.emit_report(self.protocol, self.use_gestures))
  }

  /// Restores power after suspend, optionally forcing a soft reset for
  /// chips that lose their configuration over a power cycle.
  pub async fn resume(&mut self, reset: bool) -> Result<(), Error<E>> {
    if !self.powered {
      self.power.set_power(true).map_err(|_| Error::Power)?;
      self.powered = true;
    }
    if reset {
      self.soft_reset().await?;
      self.check_power_cfg_post_reset().await?;
    }
    self.delay.delay_ms(RESUME_TIME).await;
    self.probe_power_cfg().await?;
    self.start().await
  }

  pub(crate) fn object(&self, type_id: u8) -> Result<Object, Error<E>> {
    self.table.lookup(type_id).copied().ok_or(Error::ObjectMissing(type_id))
  }

  pub(crate) async fn read_object(&mut self, type_id: u8, offset: u16) -> Result<u8, Error<E>> {
    let object = self.object(type_id)?;
    self.read_u8(object.start + offset).await
  }

  pub(crate) async fn write_object(&mut self, type_id: u8, offset: u16, value: u8) -> Result<(), Error<E>> {
    let object = self.object(type_id)?;
    self.write_u8(object.start + offset, value).await
  }

  async fn read_u8(&mut self, reg: u16) -> Result<u8, Error<E>> {
    let mut buf = [0u8; 1];
    self.read_bytes(reg, &mut buf).await?;
    Ok(buf[0])
  }

  async fn read_bytes(&mut self, reg: u16, buf: &mut [u8]) -> Result<(), Error<E>> {
    self.i2c.write_read(self.addr, &reg.to_le_bytes(), buf).await.map_err(Error::I2c)
  }

  pub(crate) async fn write_u8(&mut self, reg: u16, value: u8) -> Result<(), Error<E>> {
    let [lo, hi] = reg.to_le_bytes();
    self.i2c.write(self.addr, &[lo, hi, value]).await.map_err(Error::I2c)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use embassy_futures::block_on;
  use embedded_hal::i2c::{ErrorKind, Operation};

  #[derive(Debug, PartialEq, Eq)]
  pub(crate) struct BusFault;

  impl embedded_hal::i2c::Error for BusFault {
    fn kind(&self) -> ErrorKind {
      ErrorKind::Other
    }
  }

  /// Register-map I²C double. Reads at the message processor address pop a
  /// scripted message queue, everything else is backed by flat memory.
  /// Register writes are logged for assertions. Transactions addressed to
  /// the paired bootloader use a separate raw status/write model.
  pub(crate) struct Bus {
    pub(crate) mem: [u8; 1024],
    pub(crate) msgs: heapless::Deque<[u8; 8], 32>,
    pub(crate) t5_start: u16,
    pub(crate) writes: heapless::Vec<(u16, u8), 128>,
    pub(crate) app_silent: bool,
    pub(crate) boot_status: heapless::Deque<u8, 16>,
    pub(crate) boot_writes: heapless::Vec<heapless::Vec<u8, 40>, 8>,
  }

  pub(crate) const APP_ADDR: u8 = 0x4A;
  pub(crate) const BOOT_ADDR: u8 = 0x26;

  pub(crate) const T5_START: u16 = 0x0100;
  pub(crate) const T6_START: u16 = 0x0110;
  pub(crate) const T7_START: u16 = 0x0120;
  pub(crate) const T9_START: u16 = 0x0130;
  pub(crate) const T24_START: u16 = 0x0160;
  pub(crate) const T44_START: u16 = 0x0180;

  impl Bus {
    /// A chip with T5/T6/T7/T9/T24/T44, awake, x range 1279, y range 799.
    pub(crate) fn with_table() -> Self {
      let mut bus = Self {
        mem: [0; 1024],
        msgs: heapless::Deque::new(),
        t5_start: T5_START,
        writes: heapless::Vec::new(),
        app_silent: false,
        boot_status: heapless::Deque::new(),
        boot_writes: heapless::Vec::new(),
      };
      bus.mem[..7].copy_from_slice(&[0xA2, 0x01, 0x10, 0xAA, 16, 14, 6]);
      let entries: [[u8; 6]; 6] = [
        [5, 0x00, 0x01, 8, 0, 0],
        [6, 0x10, 0x01, 5, 0, 1],
        [7, 0x20, 0x01, 2, 0, 0],
        [9, 0x30, 0x01, 34, 0, 10],
        [24, 0x60, 0x01, 18, 0, 1],
        [44, 0x80, 0x01, 0, 0, 0],
      ];
      for (i, entry) in entries.iter().enumerate() {
        bus.mem[7 + 6 * i..13 + 6 * i].copy_from_slice(entry);
      }
      bus.mem[usize::from(T7_START)] = 32; // idle cycle time
      bus.mem[usize::from(T7_START) + 1] = 16; // actv cycle time
      bus.mem[usize::from(T9_START) + 18] = 0xFF; // x range 1279
      bus.mem[usize::from(T9_START) + 19] = 0x04;
      bus.mem[usize::from(T9_START) + 20] = 0x1F; // y range 799
      bus.mem[usize::from(T9_START) + 21] = 0x03;
      bus
    }

    pub(crate) fn push_msg(&mut self, msg: [u8; 8]) {
      self.msgs.push_back(msg).expect("msg queue");
    }

    pub(crate) fn pending(&mut self, count: u8) {
      self.mem[usize::from(T44_START)] = count;
    }
  }

  impl embedded_hal::i2c::ErrorType for Bus {
    type Error = BusFault;
  }

  impl I2c for Bus {
    async fn transaction(
      &mut self,
      address: u8,
      operations: &mut [Operation<'_>],
    ) -> Result<(), BusFault> {
      if address == BOOT_ADDR {
        for op in operations.iter_mut() {
          match op {
            Operation::Write(bytes) => {
              let mut logged = heapless::Vec::new();
              logged.extend_from_slice(bytes).expect("boot write log");
              self.boot_writes.push(logged).expect("boot write log");
            }
            Operation::Read(buf) => {
              for byte in buf.iter_mut() {
                *byte = self.boot_status.pop_front().expect("boot status script");
              }
            }
          }
        }
        return Ok(());
      }
      if self.app_silent {
        return Err(BusFault);
      }
      let mut reg: Option<u16> = None;
      for op in operations.iter_mut() {
        match op {
          Operation::Write(bytes) => match bytes.len() {
            2 => reg = Some(u16::from_le_bytes([bytes[0], bytes[1]])),
            3 => {
              let r = u16::from_le_bytes([bytes[0], bytes[1]]);
              self.writes.push((r, bytes[2])).expect("write log");
              // command processor registers self-clear once handled
              if !(T6_START..T6_START + 6).contains(&r) {
                self.mem[usize::from(r)] = bytes[2];
              }
            }
            _ => panic!("unexpected write of {} bytes", bytes.len()),
          },
          Operation::Read(buf) => {
            let r = reg.take().expect("read without a register prefix");
            if r == self.t5_start {
              let msg = self.msgs.pop_front().unwrap_or([RPTID_NOMSG, 0, 0, 0, 0, 0, 0, 0]);
              buf.copy_from_slice(&msg[..buf.len()]);
            } else {
              let r = usize::from(r);
              buf.copy_from_slice(&self.mem[r..r + buf.len()]);
            }
          }
        }
      }
      Ok(())
    }
  }

  /// CHG line double, permanently asserted (low).
  pub(crate) struct Chg;

  impl embedded_hal::digital::ErrorType for Chg {
    type Error = core::convert::Infallible;
  }

  impl InputPin for Chg {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
      Ok(false)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
      Ok(true)
    }
  }

  impl Wait for Chg {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
      Ok(())
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
      Ok(())
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
      Ok(())
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
      Ok(())
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
      Ok(())
    }
  }

  pub(crate) struct NoDelay;

  impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
  }

  #[derive(Default)]
  pub(crate) struct Rail {
    pub(crate) on: bool,
    pub(crate) toggles: usize,
  }

  impl TouchPower for Rail {
    type Error = core::convert::Infallible;

    fn set_power(&mut self, on: bool) -> Result<(), Self::Error> {
      self.on = on;
      self.toggles += 1;
      Ok(())
    }
  }

  pub(crate) fn driver(bus: Bus) -> Mxt<Bus, Chg, Rail, NoDelay> {
    Mxt::new(bus, Chg, Rail::default(), NoDelay, APP_ADDR)
  }

  pub(crate) fn initialized(bus: Bus) -> Mxt<Bus, Chg, Rail, NoDelay> {
    let mut mxt = driver(bus);
    let state = block_on(mxt.initialize()).expect("initialize");
    assert_eq!(state, DriverState::AppMode);
    mxt
  }

  fn touch_msg(report_id: u8, status: u8, x: u16, y: u16) -> [u8; 8] {
    [
      report_id,
      status,
      (x >> 4) as u8,
      (y >> 4) as u8,
      ((x as u8) & 0x0F) << 4 | (y as u8) & 0x0F,
      10,
      33,
      0,
    ]
  }

  #[test]
  fn initialize_reads_directory_and_resolution() {
    let mxt = initialized(Bus::with_table());
    assert_eq!(mxt.info().family_id, 0xA2);
    assert_eq!(mxt.table().len(), 6);
    assert_eq!(mxt.resolution(), (1280, 800));
    assert_eq!(mxt.power_mode(), PowerMode::Run);

    let t9 = mxt.table().lookup(T9_MULTITOUCH).expect("t9");
    assert_eq!((t9.min_report_id, t9.max_report_id), (2, 11));
  }

  #[test]
  fn initialize_fails_without_message_processor() {
    let mut bus = Bus::with_table();
    bus.mem[7] = 39; // retype the T5 entry
    let mut mxt = driver(bus);
    assert_eq!(block_on(mxt.initialize()), Err(Error::ObjectMissing(T5_MESSAGE_PROCESSOR)));
  }

  #[test]
  fn press_move_release_cycle() {
    let mut bus = Bus::with_table();
    bus.pending(1);
    bus.push_msg(touch_msg(2, TOUCH_DETECT | TOUCH_PRESS, 0x123, 0x0A0));
    let mut mxt = initialized(bus);

    let report = block_on(mxt.next_report()).expect("report");
    assert!(report.touching());
    let contact = report
      .events
      .iter()
      .find_map(|e| match e {
        ReportEvent::Contact { slot: 0, finger } => Some(*finger),
        _ => None,
      })
      .expect("contact");
    // x is 12 bit on a wide panel, y is scaled down to the 800 range
    assert_eq!((contact.x, contact.y), (0x123, 0x0A0 >> 2));
    assert_eq!(contact.state, FingerState::Pressed);

    mxt.i2c.pending(1);
    mxt.i2c.push_msg(touch_msg(2, TOUCH_DETECT | TOUCH_MOVE, 0x130, 0x0A4));
    let report = block_on(mxt.next_report()).expect("report");
    assert!(matches!(
      report.events.as_slice(),
      [ReportEvent::Select(0), ReportEvent::Contact { finger: Finger { state: FingerState::Moving, .. }, .. }, ReportEvent::Touch(true)]
    ));

    mxt.i2c.pending(1);
    mxt.i2c.push_msg(touch_msg(2, TOUCH_RELEASE, 0, 0));
    let report = block_on(mxt.next_report()).expect("report");
    assert!(report.events.contains(&ReportEvent::Lift(0)));
    assert!(!report.touching());
  }

  #[test]
  fn counted_drain_reads_exactly_the_budget() {
    let mut bus = Bus::with_table();
    bus.pending(2);
    bus.push_msg(touch_msg(2, TOUCH_DETECT | TOUCH_PRESS, 10, 10));
    bus.push_msg(touch_msg(3, TOUCH_DETECT | TOUCH_PRESS, 900, 200));
    // a third queued message must survive this cycle
    bus.push_msg(touch_msg(2, TOUCH_RELEASE, 0, 0));
    let mut mxt = initialized(bus);

    let report = block_on(mxt.next_report()).expect("report");
    assert_eq!(report.active_contacts(), 2);
    assert_eq!(mxt.i2c.msgs.len(), 1);
  }

  #[test]
  fn sentinel_drain_without_message_count_object() {
    let mut bus = Bus::with_table();
    bus.mem[37] = 39; // retype the T44 entry away
    bus.push_msg(touch_msg(2, TOUCH_DETECT | TOUCH_PRESS, 50, 50));
    let mut mxt = initialized(bus);

    let report = block_on(mxt.next_report()).expect("report");
    assert_eq!(report.active_contacts(), 1);
    // queue is drained down to the sentinel
    assert!(mxt.i2c.msgs.is_empty());
  }

  #[test]
  fn gesture_message_routes_to_the_recognizer() {
    let mut bus = Bus::with_table();
    bus.pending(2);
    bus.push_msg(touch_msg(2, TOUCH_DETECT | TOUCH_PRESS, 10, 10));
    let mut one_touch = [0u8; 8];
    one_touch[0] = 12; // T24 report ID
    one_touch[1] = ONETOUCH_TAP;
    bus.push_msg(one_touch);
    let mut mxt = initialized(bus);
    mxt.use_firmware_gestures(true);

    let report = block_on(mxt.next_report()).expect("report");
    assert!(report.events.contains(&ReportEvent::Gesture {
      gesture: Some(Gesture::SingleClick),
      fingers: 1,
      count: 1,
    }));
  }

  #[test]
  fn matching_poll_fails_fast_on_sentinel() {
    let mut mxt = initialized(Bus::with_table());
    assert_eq!(block_on(mxt.read_message_matching(1)), Err(Error::NoMessage));
  }

  #[test]
  fn matching_poll_gives_up_after_the_budget() {
    let mut bus = Bus::with_table();
    for _ in 0..defs::MSG_POLL_BUDGET {
      bus.push_msg(touch_msg(5, 0, 0, 0));
    }
    bus.push_msg([1, 0, 0, 0, 0, 0, 0, 0]);
    let mut mxt = initialized(bus);
    assert_eq!(block_on(mxt.read_message_matching(1)), Err(Error::Timeout));
  }

  #[test]
  fn drain_reads_on_while_chg_stays_asserted() {
    let mut bus = Bus::with_table();
    bus.pending(2); // count register reports pending + 1
    bus.push_msg(touch_msg(2, TOUCH_DETECT | TOUCH_PRESS, 1, 1));
    bus.push_msg(touch_msg(3, TOUCH_DETECT | TOUCH_PRESS, 2, 2));
    bus.push_msg(touch_msg(4, TOUCH_DETECT | TOUCH_PRESS, 3, 3));
    let mut mxt = initialized(bus);

    // the line never deasserts in this double, so the whole budget is read
    block_on(mxt.drain_messages()).expect("drain");
    assert!(mxt.i2c.msgs.is_empty());
  }

  #[test]
  fn reads_device_config_crc_from_status_report() {
    let mut bus = Bus::with_table();
    bus.push_msg([RPTID_NOMSG, 0, 0, 0, 0, 0, 0, 0]); // consumed by the drain
    bus.push_msg([1, 0x00, 0xAA, 0xBB, 0xCC, 0, 0, 0]);
    let mut mxt = initialized(bus);

    let crc = block_on(mxt.device_config_crc()).expect("crc");
    assert_eq!(crc, 0x00CC_BBAA);
    // the report-all command was issued at T6 offset 3
    assert!(mxt.i2c.writes.contains(&(T6_START + 3, 1)));
  }

  #[test]
  fn deep_sleep_writes_zero_cycle_times() {
    let mut mxt = initialized(Bus::with_table());
    block_on(mxt.stop()).expect("stop");
    assert_eq!(mxt.power_mode(), PowerMode::DeepSleep);
    assert!(mxt.i2c.writes.contains(&(T7_START + 1, 0)));
    assert!(mxt.i2c.writes.contains(&(T7_START, 0)));

    block_on(mxt.start()).expect("start");
    assert_eq!(mxt.power_mode(), PowerMode::Run);
    assert!(mxt.i2c.writes.contains(&(T7_START + 1, 16)));
    assert!(mxt.i2c.writes.contains(&(T7_START, 32)));
  }

  #[test]
  fn deep_sleep_drops_touch_messages() {
    let mut mxt = initialized(Bus::with_table());
    block_on(mxt.stop()).expect("stop");
    mxt.i2c.pending(1);
    mxt.i2c.push_msg(touch_msg(2, TOUCH_DETECT | TOUCH_PRESS, 10, 10));
    let report = block_on(mxt.next_report()).expect("report");
    assert_eq!(report.active_contacts(), 0);
  }

  #[test]
  fn suspend_releases_all_contacts_and_cuts_power() {
    let mut bus = Bus::with_table();
    bus.pending(2);
    bus.push_msg(touch_msg(2, TOUCH_DETECT | TOUCH_PRESS, 10, 10));
    bus.push_msg(touch_msg(4, TOUCH_DETECT | TOUCH_PRESS, 20, 20));
    let mut mxt = initialized(bus);
    block_on(mxt.next_report()).expect("report");

    let report = block_on(mxt.suspend()).expect("suspend");
    assert!(report.events.contains(&ReportEvent::Lift(0)));
    assert!(report.events.contains(&ReportEvent::Lift(2)));
    assert!(!report.touching());
    assert!(!mxt.power.on);
  }

  #[test]
  fn suspend_refused_while_busy() {
    let mut mxt = initialized(Bus::with_table());
    mxt.busy.store(true, Ordering::Release);
    assert!(!mxt.may_suspend());
    assert!(matches!(block_on(mxt.suspend()), Err(Error::Busy)));
  }

  #[test]
  fn resume_restores_power_and_run_mode() {
    let mut mxt = initialized(Bus::with_table());
    block_on(mxt.suspend()).expect("suspend");
    block_on(mxt.resume(false)).expect("resume");
    assert!(mxt.power.on);
    assert_eq!(mxt.power_mode(), PowerMode::Run);
  }

  #[test]
  fn power_mode_needs_app_state() {
    let mut mxt = driver(Bus::with_table());
    assert_eq!(block_on(mxt.set_power_mode(PowerMode::Run)), Err(Error::WrongState));
  }
}
