//! Bootloader-mode firmware flashing.
//!
//! In bootloader mode the chip answers on a different, paired bus address
//! and speaks a raw protocol: a status byte on reads, unframed commands
//! and firmware frames on writes. Each frame carries its own length header
//! and is acknowledged with a CRC status.

use core::sync::atomic::Ordering;

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::defs::*;
use super::{DriverState, Error, Mxt, TouchPower};

impl<I, CHG, P, D, E> Mxt<I, CHG, P, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  CHG: Wait + InputPin,
  P: TouchPower,
  D: DelayNs,
{
  /// Flashes a firmware image and reinitializes into it.
  ///
  /// From application mode the chip is first reset into its bootloader.
  /// Every frame is sent with its two length-header bytes included and
  /// retried with a growing backoff while the bootloader reports a CRC
  /// failure. Afterwards the driver waits out the firmware reset, probes
  /// the chip again and drains the reset messages, so the caller gets the
  /// driver back fully operational. Suspend is refused throughout.
  pub async fn flash_firmware(&mut self, firmware: &[u8]) -> Result<DriverState, Error<E>> {
    let prev = self.busy.swap(true, Ordering::AcqRel);
    let result = self.flash_inner(firmware).await;
    self.busy.store(prev, Ordering::Release);
    result
  }

  async fn flash_inner(&mut self, firmware: &[u8]) -> Result<DriverState, Error<E>> {
    if self.state != DriverState::Bootloader {
      self.soft_reset_with(BOOT_VALUE).await?;
      self.enter_bootloader_address()?;
    }

    match self.check_bootloader(BOOT_WAITING_BOOTLOAD_CMD).await {
      Ok(()) => self.unlock_bootloader().await?,
      Err(_) => {
        // an aborted update leaves the bootloader unlocked and waiting
        if let Err(e) = self.check_bootloader(BOOT_WAITING_FRAME_DATA).await {
          self.enter_app_address()?;
          return Err(e);
        }
      }
    }

    let mut pos = 0;
    let mut retries = 0;
    while pos < firmware.len() {
      self.check_bootloader(BOOT_WAITING_FRAME_DATA).await?;
      if pos + 2 > firmware.len() {
        return Err(Error::FlashFailed);
      }
      // the frame includes its two header bytes
      let frame_size = usize::from(u16::from_be_bytes([firmware[pos], firmware[pos + 1]])) + 2;
      let end = pos + frame_size;
      if end > firmware.len() {
        return Err(Error::FlashFailed);
      }
      self.send_raw(&firmware[pos..end]).await?;
      match self.check_bootloader(BOOT_FRAME_CRC_PASS).await {
        Ok(()) => {
          retries = 0;
          pos = end;
        }
        Err(_) => {
          retries += 1;
          if retries > FLASH_RETRY_LIMIT {
            return Err(Error::FlashFailed);
          }
          self.delay.delay_ms(retries * 20).await;
        }
      }
    }

    self.enter_app_address()?;
    self.delay.delay_ms(FWRESET_TIME).await;
    self.state = DriverState::Init;
    self.initialize().await?;
    let _ = self.drain_messages().await;
    Ok(self.state)
  }

  /// Waits for the bootloader to report `expected`. Status bytes carry
  /// extra bits in their low six positions that are masked off, and a
  /// CRC-check-in-progress status is polled through.
  pub(crate) async fn check_bootloader(&mut self, expected: u8) -> Result<(), Error<E>> {
    loop {
      let mut status = self.recv_raw_byte().await?;
      match expected {
        BOOT_WAITING_BOOTLOAD_CMD => {
          status = self.bootloader_version(status).await? & !BOOT_STATUS_MASK;
        }
        BOOT_WAITING_FRAME_DATA | BOOT_APP_CRC_FAIL => {
          status &= !BOOT_STATUS_MASK;
        }
        BOOT_FRAME_CRC_PASS => {
          if status == BOOT_FRAME_CRC_CHECK {
            continue;
          }
          if status == BOOT_FRAME_CRC_FAIL {
            return Err(Error::Bootloader(status));
          }
        }
        _ => return Err(Error::Bootloader(status)),
      }
      return if status == expected { Ok(()) } else { Err(Error::Bootloader(status)) };
    }
  }

  /// First status read after power-up may carry a version record instead
  /// of the plain status byte.
  async fn bootloader_version(&mut self, status: u8) -> Result<u8, Error<E>> {
    if status & BOOT_EXTENDED_ID != 0 {
      let mut record = [0u8; 3];
      self.i2c.read(self.addr, &mut record).await.map_err(Error::I2c)?;
      Ok(record[0])
    } else {
      Ok(status)
    }
  }

  async fn unlock_bootloader(&mut self) -> Result<(), Error<E>> {
    self.send_raw(&UNLOCK_CMD).await
  }

  async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error<E>> {
    self.i2c.write(self.addr, bytes).await.map_err(Error::I2c)
  }

  async fn recv_raw_byte(&mut self) -> Result<u8, Error<E>> {
    let mut buf = [0u8; 1];
    self.i2c.read(self.addr, &mut buf).await.map_err(Error::I2c)?;
    Ok(buf[0])
  }

  /// Switches to the paired bootloader address for the current bus
  /// address. Fails when already in bootloader mode or the address has no
  /// known pairing.
  pub(crate) fn enter_bootloader_address(&mut self) -> Result<(), Error<E>> {
    if self.state == DriverState::Bootloader {
      return Err(Error::WrongState);
    }
    let pair = ADDRESS_PAIRS
      .iter()
      .find(|(app, _)| *app == self.addr)
      .ok_or(Error::UnknownAddress(self.addr))?;
    self.addr = pair.1;
    self.state = DriverState::Bootloader;
    Ok(())
  }

  pub(crate) fn enter_app_address(&mut self) -> Result<(), Error<E>> {
    if self.state == DriverState::AppMode {
      return Err(Error::WrongState);
    }
    let pair = ADDRESS_PAIRS
      .iter()
      .find(|(_, boot)| *boot == self.addr)
      .ok_or(Error::UnknownAddress(self.addr))?;
    self.addr = pair.0;
    self.state = DriverState::AppMode;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::super::tests::{driver, Bus, APP_ADDR, BOOT_ADDR};
  use super::*;
  use embassy_futures::block_on;

  #[test]
  fn app_silence_falls_back_to_the_bootloader() {
    let mut bus = Bus::with_table();
    bus.app_silent = true;
    // application CRC failed, low status bits are noise
    bus.boot_status.push_back(0x44).expect("status");
    let mut mxt = driver(bus);
    let state = block_on(mxt.initialize()).expect("initialize");
    assert_eq!(state, DriverState::Bootloader);
    assert_eq!(mxt.addr, BOOT_ADDR);
  }

  #[test]
  fn unknown_address_has_no_bootloader_pairing() {
    let mut bus = Bus::with_table();
    bus.app_silent = true;
    let mut mxt = driver(bus);
    mxt.addr = 0x42;
    assert_eq!(block_on(mxt.initialize()), Err(Error::UnknownAddress(0x42)));
  }

  #[test]
  fn flashes_two_frames_with_a_crc_retry() {
    let mut bus = Bus::with_table();
    let status = &mut bus.boot_status;
    status.push_back(0xC4).expect("status"); // waiting for the unlock command
    status.push_back(0x81).expect("status"); // waiting for frame data
    status.push_back(0x02).expect("status"); // CRC check still running
    status.push_back(0x04).expect("status"); // frame one passed
    status.push_back(0x80).expect("status");
    status.push_back(0x03).expect("status"); // frame two failed its CRC
    status.push_back(0x80).expect("status");
    status.push_back(0x04).expect("status"); // retry passed
    let mut mxt = driver(bus);
    block_on(mxt.initialize()).expect("initialize");

    let firmware = [0x00, 0x03, 0xAA, 0xBB, 0xCC, 0x00, 0x01, 0xDD];
    let state = block_on(mxt.flash_firmware(&firmware)).expect("flash");
    assert_eq!(state, DriverState::AppMode);
    assert_eq!(mxt.addr, APP_ADDR);

    let writes = &mxt.i2c.boot_writes;
    assert_eq!(writes[0].as_slice(), &UNLOCK_CMD);
    assert_eq!(writes[1].as_slice(), &firmware[..5]);
    // the failed frame was sent twice
    assert_eq!(writes[2].as_slice(), &firmware[5..]);
    assert_eq!(writes[3].as_slice(), &firmware[5..]);
    assert_eq!(writes.len(), 4);
  }

  #[test]
  fn extended_id_record_is_consumed_before_the_status() {
    let mut bus = Bus::with_table();
    let status = &mut bus.boot_status;
    status.push_back(0xE0).expect("status"); // extended ID flag set
    status.push_back(0xC2).expect("status"); // record: status, id, version
    status.push_back(0x11).expect("status");
    status.push_back(0x22).expect("status");
    let mut mxt = driver(bus);
    block_on(mxt.initialize()).expect("initialize");
    mxt.enter_bootloader_address().expect("address");

    block_on(mxt.check_bootloader(BOOT_WAITING_BOOTLOAD_CMD)).expect("bootloader");
    assert!(mxt.i2c.boot_status.is_empty());
  }

  #[test]
  fn frame_crc_fail_is_an_error_not_a_poll() {
    let mut bus = Bus::with_table();
    bus.boot_status.push_back(0x03).expect("status");
    let mut mxt = driver(bus);
    block_on(mxt.initialize()).expect("initialize");
    mxt.enter_bootloader_address().expect("address");

    assert_eq!(
      block_on(mxt.check_bootloader(BOOT_FRAME_CRC_PASS)),
      Err(Error::Bootloader(BOOT_FRAME_CRC_FAIL))
    );
  }

  #[test]
  fn truncated_firmware_is_rejected() {
    let mut bus = Bus::with_table();
    let status = &mut bus.boot_status;
    status.push_back(0xC0).expect("status");
    status.push_back(0x80).expect("status");
    let mut mxt = driver(bus);
    block_on(mxt.initialize()).expect("initialize");

    // header promises three payload bytes, only one follows
    let firmware = [0x00, 0x03, 0xAA];
    assert_eq!(block_on(mxt.flash_firmware(&firmware)), Err(Error::FlashFailed));
  }
}
