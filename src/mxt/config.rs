//! OBP_RAW configuration upload.
//!
//! A configuration blob names the chip it was exported from, then carries
//! one block per object instance. Blocks the chip does not know are
//! skipped, everything else is written register by register before the
//! result is committed to non-volatile storage.

use core::sync::atomic::Ordering;

use embedded_hal::digital::InputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

use super::defs::*;
use super::{Error, Mxt, TouchPower};

/// What a configuration upload did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigReport {
  pub blocks_written: u32,
  pub blocks_skipped: u32,
  /// The blob was exported from a different firmware version. The upload
  /// proceeds anyway, values may need review.
  pub version_mismatch: bool,
  pub build_mismatch: bool,
  /// Info CRC recorded in the blob.
  pub info_crc: u32,
  /// Config CRC recorded in the blob.
  pub config_crc: u32,
  /// CRC the chip computed over what was actually written, when the chip
  /// reported one after the post-upload reset.
  pub device_crc: Option<u32>,
}

struct ConfigHeader {
  info: [u8; INFO_BLOCK_SIZE],
  info_crc: u32,
  config_crc: u32,
}

struct BlockHeader {
  type_id: u32,
  instance: u32,
  size: u32,
}

/// One blob encoding. Both encodings carry the same header, block headers
/// and per-register data, only the framing differs.
trait ConfigSource {
  fn header(&mut self) -> Option<ConfigHeader>;
  fn next_block(&mut self) -> Result<Option<BlockHeader>, ()>;
  fn data_byte(&mut self) -> Option<u8>;
  fn skip(&mut self, size: u32) -> Result<(), ()>;
}

/// Whitespace-separated hex tokens, as exported by the vendor tools.
struct TextSource<'a> {
  rest: &'a [u8],
}

impl<'a> TextSource<'a> {
  fn new(blob: &'a [u8]) -> Option<Self> {
    blob
      .starts_with(CFG_MAGIC)
      .then(|| Self { rest: &blob[CFG_MAGIC.len()..] })
  }

  fn token(&mut self) -> Option<&'a [u8]> {
    let start = self.rest.iter().position(|b| !b.is_ascii_whitespace())?;
    let rest = &self.rest[start..];
    let end = rest.iter().position(|b| b.is_ascii_whitespace()).unwrap_or(rest.len());
    self.rest = &rest[end..];
    Some(&rest[..end])
  }

  fn hex(&mut self) -> Option<u32> {
    let token = self.token()?;
    let mut value: u32 = 0;
    for &b in token {
      value = value.wrapping_mul(16).wrapping_add(char::from(b).to_digit(16)?);
    }
    Some(value)
  }

  fn exhausted(&self) -> bool {
    self.rest.iter().all(|b| b.is_ascii_whitespace())
  }
}

impl ConfigSource for TextSource<'_> {
  fn header(&mut self) -> Option<ConfigHeader> {
    let mut info = [0u8; INFO_BLOCK_SIZE];
    for byte in info.iter_mut() {
      *byte = self.hex()? as u8;
    }
    Some(ConfigHeader { info, info_crc: self.hex()?, config_crc: self.hex()? })
  }

  fn next_block(&mut self) -> Result<Option<BlockHeader>, ()> {
    if self.exhausted() {
      return Ok(None);
    }
    let type_id = self.hex().ok_or(())?;
    let instance = self.hex().ok_or(())?;
    let size = self.hex().ok_or(())?;
    Ok(Some(BlockHeader { type_id, instance, size }))
  }

  fn data_byte(&mut self) -> Option<u8> {
    self.hex().map(|v| v as u8)
  }

  fn skip(&mut self, size: u32) -> Result<(), ()> {
    // skipped values still have to tokenize
    for _ in 0..size {
      self.hex().ok_or(())?;
    }
    Ok(())
  }
}

/// The same layout with little-endian binary fields.
struct BinarySource<'a> {
  rest: &'a [u8],
}

impl<'a> BinarySource<'a> {
  fn new(blob: &'a [u8]) -> Option<Self> {
    blob
      .starts_with(CFG_MAGIC)
      .then(|| Self { rest: &blob[CFG_MAGIC.len()..] })
  }

  fn byte(&mut self) -> Option<u8> {
    let (&first, rest) = self.rest.split_first()?;
    self.rest = rest;
    Some(first)
  }

  fn word(&mut self) -> Option<u32> {
    if self.rest.len() < 4 {
      return None;
    }
    let (raw, rest) = self.rest.split_at(4);
    self.rest = rest;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
  }
}

impl ConfigSource for BinarySource<'_> {
  fn header(&mut self) -> Option<ConfigHeader> {
    let mut info = [0u8; INFO_BLOCK_SIZE];
    for byte in info.iter_mut() {
      *byte = self.byte()?;
    }
    Some(ConfigHeader { info, info_crc: self.word()?, config_crc: self.word()? })
  }

  fn next_block(&mut self) -> Result<Option<BlockHeader>, ()> {
    if self.rest.is_empty() {
      return Ok(None);
    }
    let type_id = self.word().ok_or(())?;
    let instance = self.word().ok_or(())?;
    let size = self.word().ok_or(())?;
    Ok(Some(BlockHeader { type_id, instance, size }))
  }

  fn data_byte(&mut self) -> Option<u8> {
    self.byte()
  }

  fn skip(&mut self, size: u32) -> Result<(), ()> {
    let size = usize::try_from(size).map_err(|_| ())?;
    if self.rest.len() < size {
      return Err(());
    }
    self.rest = &self.rest[size..];
    Ok(())
  }
}

impl<I, CHG, P, D, E> Mxt<I, CHG, P, D>
where
  I: I2c<SevenBitAddress, Error = E>,
  CHG: Wait + InputPin,
  P: TouchPower,
  D: DelayNs,
{
  /// Uploads a text-encoded OBP_RAW configuration blob.
  ///
  /// `None` means no configuration is provisioned for this board and is a
  /// successful no-op. A blob for a different family or variant is
  /// rejected before anything is written, a mere version difference only
  /// flags the report. On success the configuration has been backed up to
  /// non-volatile storage and the chip has been reset into it.
  ///
  /// Suspend is refused for the duration of the upload.
  pub async fn upload_text_config(&mut self, blob: Option<&[u8]>) -> Result<ConfigReport, Error<E>> {
    let prev = self.busy.swap(true, Ordering::AcqRel);
    let result = self.upload_text_inner(blob).await;
    self.busy.store(prev, Ordering::Release);
    result
  }

  /// Uploads a binary-encoded OBP_RAW configuration blob. Semantics match
  /// [`Self::upload_text_config`].
  pub async fn upload_binary_config(&mut self, blob: Option<&[u8]>) -> Result<ConfigReport, Error<E>> {
    let prev = self.busy.swap(true, Ordering::AcqRel);
    let result = self.upload_binary_inner(blob).await;
    self.busy.store(prev, Ordering::Release);
    result
  }

  async fn upload_text_inner(&mut self, blob: Option<&[u8]>) -> Result<ConfigReport, Error<E>> {
    if !self.powered {
      return Err(Error::NotPowered);
    }
    let Some(blob) = blob else { return Ok(ConfigReport::default()) };
    let source = TextSource::new(blob).ok_or(Error::ConfigFormat)?;
    self.apply_config(source).await
  }

  async fn upload_binary_inner(&mut self, blob: Option<&[u8]>) -> Result<ConfigReport, Error<E>> {
    if !self.powered {
      return Err(Error::NotPowered);
    }
    let Some(blob) = blob else { return Ok(ConfigReport::default()) };
    let source = BinarySource::new(blob).ok_or(Error::ConfigFormat)?;
    self.apply_config(source).await
  }

  async fn apply_config<S: ConfigSource>(&mut self, mut source: S) -> Result<ConfigReport, Error<E>> {
    let header = source.header().ok_or(Error::ConfigFormat)?;
    if header.info[0] != self.info.family_id || header.info[1] != self.info.variant_id {
      return Err(Error::ConfigMismatch { family_id: header.info[0], variant_id: header.info[1] });
    }
    let mut report = ConfigReport {
      version_mismatch: header.info[2] != self.info.version,
      build_mismatch: header.info[3] != self.info.build,
      info_crc: header.info_crc,
      config_crc: header.config_crc,
      ..ConfigReport::default()
    };

    loop {
      let block = match source.next_block() {
        Ok(Some(block)) => block,
        Ok(None) => break,
        Err(()) => return Err(Error::ConfigFormat),
      };
      let target = u8::try_from(block.type_id)
        .ok()
        .and_then(|t| self.table.lookup(t))
        .copied();
      match target {
        Some(object)
          if block.size <= u32::from(object.size) && block.instance < u32::from(object.instances) =>
        {
          let reg = object.start + object.size * block.instance as u16;
          for i in 0..block.size as u16 {
            let value = source.data_byte().ok_or(Error::ConfigFormat)?;
            self.write_u8(reg + i, value).await?;
          }
          // the remainder of the object is zeroed, starting one past the
          // block's length
          for i in (block.size as u16 + 1)..object.size {
            self.write_u8(reg + i, 0).await?;
          }
          report.blocks_written += 1;
        }
        _ => {
          source.skip(block.size).map_err(|()| Error::ConfigFormat)?;
          report.blocks_skipped += 1;
        }
      }
    }

    if report.blocks_written > 0 {
      self.backup_nv().await?;
      self.soft_reset().await?;
      report.device_crc = self.device_config_crc().await.ok();
    }
    Ok(report)
  }
}
