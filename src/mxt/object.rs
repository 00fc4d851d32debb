use heapless::Vec;

use super::defs::*;

/// Information block read from the start of the register map.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Info {
  pub family_id: u8,
  pub variant_id: u8,
  pub version: u8,
  pub build: u8,
  pub matrix_x_size: u8,
  pub matrix_y_size: u8,
  pub object_count: u8,
}

impl From<[u8; INFO_BLOCK_SIZE]> for Info {
  fn from(raw: [u8; INFO_BLOCK_SIZE]) -> Self {
    Self {
      family_id: raw[0],
      variant_id: raw[1],
      version: raw[2],
      build: raw[3],
      matrix_x_size: raw[4],
      matrix_y_size: raw[5],
      object_count: raw[6],
    }
  }
}

/// One entry of the object table directory, with the report-ID span the
/// running counter assigned to it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Object {
  pub type_id: u8,
  pub start: u16,
  pub size: u16,
  pub instances: u16,
  pub num_report_ids: u8,
  pub min_report_id: u8,
  pub max_report_id: u8,
}

impl Object {
  /// Whether `report_id` was assigned to this object.
  pub fn owns_report(&self, report_id: u8) -> bool {
    self.num_report_ids > 0
      && report_id >= self.min_report_id
      && report_id <= self.max_report_id
  }
}

/// Directory of the objects a given chip exposes. Entries arrive in table
/// order and report IDs are handed out sequentially starting at 1.
#[derive(Debug, Default)]
pub struct ObjectTable {
  objects: Vec<Object, { MAX_OBJECTS }>,
  report_counter: u16,
}

pub(crate) const MAX_OBJECTS: usize = 48;

impl ObjectTable {
  pub const fn new() -> Self {
    Self { objects: Vec::new(), report_counter: 0 }
  }

  pub fn clear(&mut self) {
    self.objects.clear();
    self.report_counter = 0;
  }

  /// Decodes a raw 6-byte directory entry and appends it. Size and instance
  /// counts are stored off by one on the wire.
  pub fn push(&mut self, raw: [u8; OBJECT_ENTRY_SIZE]) -> Result<(), Object> {
    let instances = u16::from(raw[4]) + 1;
    let num_report_ids = raw[5];
    let (min_report_id, max_report_id) = if num_report_ids > 0 {
      let span = u16::from(num_report_ids) * instances;
      self.report_counter += span;
      ((self.report_counter - span + 1) as u8, self.report_counter as u8)
    } else {
      (0, 0)
    };
    self.objects.push(Object {
      type_id: raw[0],
      start: u16::from_le_bytes([raw[1], raw[2]]),
      size: u16::from(raw[3]) + 1,
      instances,
      num_report_ids,
      min_report_id,
      max_report_id,
    })
  }

  pub fn lookup(&self, type_id: u8) -> Option<&Object> {
    self.objects.iter().find(|o| o.type_id == type_id)
  }

  /// Highest report ID handed out so far, 0 when no object reports.
  pub fn max_report_id(&self) -> u8 {
    self.report_counter as u8
  }

  pub fn len(&self) -> usize {
    self.objects.len()
  }

  pub fn is_empty(&self) -> bool {
    self.objects.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Object> {
    self.objects.iter()
  }
}
