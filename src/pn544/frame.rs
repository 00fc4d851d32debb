use crc::{Crc, CRC_16_IBM_SDLC};

/// Smallest valid LLC frame: length byte, one header byte, two CRC bytes.
pub const LLC_MIN_SIZE: usize = 4;
/// LLC bytes wrapped around an HCI payload.
pub const LLC_HCI_OVERHEAD: usize = 3;
/// Largest frame the chip produces, length byte included.
pub const MSG_MAX_SIZE: usize = 33;

/// X.25 CRC over the length byte and payload, appended least significant
/// byte first.
pub(crate) const FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
  /// Frame shorter than the minimum, longer than the maximum, or its
  /// length byte disagrees with its size.
  Length,
  /// The trailing CRC does not cover the frame.
  Crc,
}

/// Validates a complete frame: its length byte counts every following
/// byte, and the last two bytes are the CRC over everything before them.
pub fn check_frame(buf: &[u8]) -> Result<(), FrameError> {
  let Some(&length_byte) = buf.first() else {
    return Err(FrameError::Length);
  };
  let len = usize::from(length_byte) + 1;
  if len < LLC_MIN_SIZE || len != buf.len() || len > MSG_MAX_SIZE {
    return Err(FrameError::Length);
  }
  let crc = FRAME_CRC.checksum(&buf[..len - 2]);
  if buf[len - 2] != crc.to_le_bytes()[0] || buf[len - 1] != crc.to_le_bytes()[1] {
    return Err(FrameError::Crc);
  }
  Ok(())
}

/// Wraps a payload into a frame: length byte, payload, CRC.
pub fn encode_frame(payload: &[u8]) -> Result<heapless::Vec<u8, MSG_MAX_SIZE>, FrameError> {
  if payload.is_empty() || payload.len() + LLC_HCI_OVERHEAD > MSG_MAX_SIZE {
    return Err(FrameError::Length);
  }
  let mut frame = heapless::Vec::new();
  // infallible, capacity was just checked
  let _ = frame.push((payload.len() + LLC_HCI_OVERHEAD - 1) as u8);
  let _ = frame.extend_from_slice(payload);
  let crc = FRAME_CRC.checksum(&frame);
  let _ = frame.extend_from_slice(&crc.to_le_bytes());
  Ok(frame)
}
