use super::defs::*;

/// Gestures the firmware recognizers report, with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Gesture {
  North = 0x10,
  NorthEast = 0x12,
  East = 0x14,
  SouthEast = 0x16,
  South = 0x18,
  SouthWest = 0x1A,
  West = 0x1C,
  NorthWest = 0x1E,
  SingleClick = 0x20,
  DoubleClick = 0x22,
  TouchDown = 0x2F,
  ZoomIn = 0x48,
  ZoomOut = 0x49,
  LiftOff = 0x4F,
}

impl Gesture {
  pub const fn code(self) -> u8 {
    self as u8
  }
}

const COMPASS_NORTH: u8 = 0x01;
const COMPASS_SOUTH: u8 = 0x02;
const COMPASS_EAST: u8 = 0x04;
const COMPASS_WEST: u8 = 0x08;

/// Maps a raw direction byte to one of eight compass gestures.
///
/// The byte counts counter-clockwise from east over the full 0x00..=0xFF
/// circle, so every octant spans 0x20 with east wrapping around the top.
/// North and south are then swapped because the sensor origin is the top
/// left corner while the direction circle assumes a bottom left origin.
pub fn map_direction(dir: u8) -> Gesture {
  let mut compass = if dir < 0x10 || dir >= 0xF0 {
    COMPASS_EAST
  } else if dir < 0x30 {
    COMPASS_NORTH | COMPASS_EAST
  } else if dir < 0x50 {
    COMPASS_NORTH
  } else if dir < 0x70 {
    COMPASS_NORTH | COMPASS_WEST
  } else if dir < 0x90 {
    COMPASS_WEST
  } else if dir < 0xB0 {
    COMPASS_SOUTH | COMPASS_WEST
  } else if dir < 0xD0 {
    COMPASS_SOUTH
  } else {
    COMPASS_SOUTH | COMPASS_EAST
  };

  if compass & (COMPASS_NORTH | COMPASS_SOUTH) != 0 {
    compass ^= COMPASS_NORTH | COMPASS_SOUTH;
  }

  match compass {
    COMPASS_EAST => Gesture::East,
    x if x == COMPASS_NORTH | COMPASS_EAST => Gesture::NorthEast,
    COMPASS_NORTH => Gesture::North,
    x if x == COMPASS_NORTH | COMPASS_WEST => Gesture::NorthWest,
    COMPASS_WEST => Gesture::West,
    x if x == COMPASS_SOUTH | COMPASS_WEST => Gesture::SouthWest,
    COMPASS_SOUTH => Gesture::South,
    _ => Gesture::SouthEast,
  }
}

/// Decodes a one-touch gesture processor message payload.
pub(crate) fn decode_one_touch(payload: &[u8; MSG_PAYLOAD_SIZE]) -> Option<Gesture> {
  match payload[0] & ONETOUCH_EVENT_MASK {
    ONETOUCH_PRESS => Some(Gesture::TouchDown),
    ONETOUCH_RELEASE => Some(Gesture::LiftOff),
    ONETOUCH_TAP => Some(Gesture::SingleClick),
    ONETOUCH_DOUBLE_TAP => Some(Gesture::DoubleClick),
    ONETOUCH_FLICK | ONETOUCH_DRAG | ONETOUCH_THROW => Some(map_direction(payload[4])),
    _ => None,
  }
}

/// Decodes a two-touch gesture processor message payload. Stretch wins over
/// pinch when both bits are set; rotate carries only a direction flag and
/// maps to nothing.
pub(crate) fn decode_two_touch(payload: &[u8; MSG_PAYLOAD_SIZE]) -> Option<Gesture> {
  let status = payload[0] & TWOTOUCH_STATUS_MASK;
  if status & TWOTOUCH_STRETCH != 0 {
    Some(Gesture::ZoomIn)
  } else if status & TWOTOUCH_PINCH != 0 {
    Some(Gesture::ZoomOut)
  } else {
    None
  }
}

/// Debounces a recognizer channel. A repeated decode bumps the count, a
/// different one restarts it, and a decoded gesture arms the channel until
/// the report pass consumes it.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Recognizer {
  pub(crate) gesture: Option<Gesture>,
  pub(crate) count: u8,
  pub(crate) active: bool,
}

impl Recognizer {
  pub(crate) fn observe(&mut self, gesture: Option<Gesture>) {
    if gesture == self.gesture {
      self.count = self.count.wrapping_add(1);
    } else {
      self.gesture = gesture;
      self.count = 1;
    }
    if self.gesture.is_some() {
      self.active = true;
    } else {
      self.active = false;
      self.count = 0;
    }
  }

  pub(crate) fn clear(&mut self) {
    *self = Self::default();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn direction_map_is_total() {
    // every raw byte resolves to a compass gesture, never a fallthrough
    for dir in 0..=u8::MAX {
      let g = map_direction(dir);
      assert!(g.code() >= 0x10 && g.code() <= 0x1E, "dir {dir:#04x}");
    }
  }

  #[test]
  fn octants_map_with_north_south_swapped() {
    assert_eq!(map_direction(0x00), Gesture::East);
    assert_eq!(map_direction(0xF8), Gesture::East);
    assert_eq!(map_direction(0x20), Gesture::SouthEast);
    assert_eq!(map_direction(0x40), Gesture::South);
    assert_eq!(map_direction(0x60), Gesture::SouthWest);
    assert_eq!(map_direction(0x80), Gesture::West);
    assert_eq!(map_direction(0xA0), Gesture::NorthWest);
    assert_eq!(map_direction(0xC0), Gesture::North);
    assert_eq!(map_direction(0xE0), Gesture::NorthEast);
  }

  #[test]
  fn octant_boundaries() {
    assert_eq!(map_direction(0x0F), Gesture::East);
    assert_eq!(map_direction(0x10), Gesture::SouthEast);
    assert_eq!(map_direction(0x2F), Gesture::SouthEast);
    assert_eq!(map_direction(0x30), Gesture::South);
    assert_eq!(map_direction(0xEF), Gesture::NorthEast);
    assert_eq!(map_direction(0xF0), Gesture::East);
  }

  #[test]
  fn one_touch_events_decode() {
    let mut payload = [0u8; MSG_PAYLOAD_SIZE];
    payload[0] = ONETOUCH_TAP;
    assert_eq!(decode_one_touch(&payload), Some(Gesture::SingleClick));
    payload[0] = ONETOUCH_DOUBLE_TAP;
    assert_eq!(decode_one_touch(&payload), Some(Gesture::DoubleClick));
    payload[0] = ONETOUCH_PRESS;
    assert_eq!(decode_one_touch(&payload), Some(Gesture::TouchDown));
    payload[0] = ONETOUCH_RELEASE;
    assert_eq!(decode_one_touch(&payload), Some(Gesture::LiftOff));

    // flick direction comes from the fifth payload byte
    payload[0] = ONETOUCH_FLICK;
    payload[4] = 0x40;
    assert_eq!(decode_one_touch(&payload), Some(Gesture::South));

    payload[0] = 0x07;
    assert_eq!(decode_one_touch(&payload), None);
    payload[0] = 0x00;
    assert_eq!(decode_one_touch(&payload), None);
  }

  #[test]
  fn two_touch_stretch_beats_pinch() {
    let mut payload = [0u8; MSG_PAYLOAD_SIZE];
    payload[0] = TWOTOUCH_STRETCH | TWOTOUCH_PINCH;
    assert_eq!(decode_two_touch(&payload), Some(Gesture::ZoomIn));
    payload[0] = TWOTOUCH_PINCH;
    assert_eq!(decode_two_touch(&payload), Some(Gesture::ZoomOut));
    // rotation reports no gesture code, only a direction flag
    payload[0] = 0x40;
    assert_eq!(decode_two_touch(&payload), None);
    payload[0] = 0x00;
    assert_eq!(decode_two_touch(&payload), None);
  }

  #[test]
  fn recognizer_counts_repeats() {
    let mut r = Recognizer::default();
    r.observe(Some(Gesture::SingleClick));
    assert!(r.active);
    assert_eq!(r.count, 1);
    r.observe(Some(Gesture::SingleClick));
    assert_eq!(r.count, 2);
    r.observe(Some(Gesture::DoubleClick));
    assert_eq!((r.gesture, r.count), (Some(Gesture::DoubleClick), 1));
  }

  #[test]
  fn recognizer_disarms_on_none() {
    let mut r = Recognizer::default();
    r.observe(Some(Gesture::TouchDown));
    r.observe(None);
    assert!(!r.active);
    assert_eq!(r.count, 0);
  }
}
