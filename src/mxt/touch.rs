use heapless::Vec;

use super::defs::*;
use super::gesture::{Gesture, Recognizer};

/// Lifecycle of one tracked contact.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FingerState {
  #[default]
  Idle,
  Pressed,
  Moving,
  Released,
}

/// One contact slot with its last decoded position.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Finger {
  pub state: FingerState,
  pub x: u16,
  pub y: u16,
  pub area: u8,
  pub pressure: u8,
}

/// How contact positions are laid out in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportProtocol {
  /// Per-slot tracking, each contact keeps its slot across reports.
  Slots,
  /// Anonymous contacts, each followed by a sync marker.
  Legacy,
  /// Position reporting disabled, only the touch flag and gestures remain.
  Off,
}

/// One entry of a consolidated input report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportEvent {
  /// Selects the slot the next events apply to.
  Select(u8),
  /// An active contact with its current position.
  Contact { slot: u8, finger: Finger },
  /// The slot's contact lifted.
  Lift(u8),
  /// Terminates one anonymous contact.
  Sync,
  /// Overall touch flag, true while any contact is down.
  Touch(bool),
  /// A recognizer fired, or the gesture stream was reset when `gesture`
  /// is `None`.
  Gesture { gesture: Option<Gesture>, fingers: u8, count: u8 },
}

pub(crate) const REPORT_CAPACITY: usize = 2 * MAX_FINGERS + 6;

/// Everything one dispatch cycle produced, in emission order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Report {
  pub events: Vec<ReportEvent, REPORT_CAPACITY>,
}

impl Report {
  /// Number of contacts currently down.
  pub fn active_contacts(&self) -> usize {
    self.events.iter().filter(|e| matches!(e, ReportEvent::Contact { .. })).count()
  }

  pub fn touching(&self) -> bool {
    self.events.iter().any(|e| matches!(e, ReportEvent::Touch(true)))
  }
}

/// Tracker state shared by the message router and the report pass. Routing
/// updates slots and recognizers, the report pass folds them into one
/// [`Report`] in a fixed order: fingers first, then the one-touch channel,
/// then the two-touch channel.
#[derive(Debug, Default)]
pub(crate) struct TouchState {
  fingers: [Finger; MAX_FINGERS],
  pub(crate) one_touch: Recognizer,
  pub(crate) two_touch: Recognizer,
  prev_active: u8,
}

impl TouchState {
  pub(crate) const fn new() -> Self {
    Self {
      fingers: [Finger { state: FingerState::Idle, x: 0, y: 0, area: 0, pressure: 0 }; MAX_FINGERS],
      one_touch: Recognizer { gesture: None, count: 0, active: false },
      two_touch: Recognizer { gesture: None, count: 0, active: false },
      prev_active: 0,
    }
  }

  pub(crate) fn fingers_mut(&mut self) -> &mut [Finger; MAX_FINGERS] {
    &mut self.fingers
  }

  /// Applies a T9 touch message to its slot. Positions are 12 bit on the
  /// wire and scaled down to 10 bit when the axis range fits.
  pub(crate) fn touch_event(
    &mut self,
    slot: usize,
    payload: &[u8; MSG_PAYLOAD_SIZE],
    max_x: u16,
    max_y: u16,
  ) {
    let status = payload[0];
    if status & TOUCH_DETECT == 0 {
      if status & TOUCH_RELEASE != 0 {
        self.fingers[slot].state = FingerState::Released;
      }
      return;
    }
    if status & (TOUCH_PRESS | TOUCH_MOVE) == 0 {
      return;
    }

    let mut x = u16::from(payload[1]) << 4 | u16::from(payload[3] >> 4) & 0x0F;
    let mut y = u16::from(payload[2]) << 4 | u16::from(payload[3]) & 0x0F;
    if max_x <= 1024 {
      x >>= 2;
    }
    if max_y <= 1024 {
      y >>= 2;
    }

    self.fingers[slot] = Finger {
      state: if status & TOUCH_MOVE != 0 { FingerState::Moving } else { FingerState::Pressed },
      x,
      y,
      area: payload[4],
      pressure: payload[5],
    };
  }

  /// Folds the tracked state into one report and retires released slots.
  pub(crate) fn emit_report(&mut self, protocol: ReportProtocol, gestures: bool) -> Report {
    let mut events: Vec<ReportEvent, REPORT_CAPACITY> = Vec::new();
    let mut active: u8 = 0;

    match protocol {
      ReportProtocol::Slots => {
        for slot in 0..MAX_FINGERS {
          if self.fingers[slot].state == FingerState::Idle {
            continue;
          }
          let _ = events.push(ReportEvent::Select(slot as u8));
          if self.fingers[slot].state == FingerState::Released {
            let _ = events.push(ReportEvent::Lift(slot as u8));
            self.fingers[slot].state = FingerState::Idle;
          } else {
            let _ = events.push(ReportEvent::Contact { slot: slot as u8, finger: self.fingers[slot] });
            active += 1;
          }
        }
      }
      ReportProtocol::Legacy => {
        for slot in 0..MAX_FINGERS {
          if self.fingers[slot].state == FingerState::Idle {
            continue;
          }
          if self.fingers[slot].state == FingerState::Released {
            // anonymous contacts vanish by omission
            self.fingers[slot].state = FingerState::Idle;
          } else {
            let _ = events.push(ReportEvent::Contact { slot: slot as u8, finger: self.fingers[slot] });
            let _ = events.push(ReportEvent::Sync);
            active += 1;
          }
        }
      }
      ReportProtocol::Off => {}
    }

    let _ = events.push(ReportEvent::Touch(active > 0));

    if gestures {
      if active > self.prev_active {
        let _ = events.push(ReportEvent::Gesture {
          gesture: Some(Gesture::TouchDown),
          fingers: active,
          count: 1,
        });
      }
      if active <= 1 && self.one_touch.gesture.is_some() && self.one_touch.active {
        let _ = events.push(ReportEvent::Gesture {
          gesture: self.one_touch.gesture,
          fingers: active,
          count: self.one_touch.count,
        });
        self.one_touch.active = false;
      } else if active == 2 && self.two_touch.gesture.is_some() && self.two_touch.active {
        let _ = events.push(ReportEvent::Gesture {
          gesture: self.two_touch.gesture,
          fingers: active,
          count: self.two_touch.count,
        });
        self.two_touch.active = false;
      }
      if active < self.prev_active {
        let _ = events.push(ReportEvent::Gesture {
          gesture: Some(Gesture::LiftOff),
          fingers: active,
          count: 1,
        });
      }
      if active == 0 || active > 2 {
        // all fingers gone or too many for the recognizers, restart both
        self.one_touch.clear();
        self.two_touch.clear();
        let _ = events.push(ReportEvent::Gesture { gesture: None, fingers: 0, count: 0 });
      }
    }

    self.prev_active = active;
    Report { events }
  }
}
