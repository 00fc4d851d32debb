/******************************************************************************
 * Refer to the Atmel maXTouch object-based protocol guide for details on     *
 * the information block, object table and message formats.                   *
 * ========================================================================== *
 *                      maXTouch - Object Protocol Constants                  *
*******************************************************************************/

// Information block (address 0x0000)
pub(crate) const INFO_BLOCK_SIZE: usize = 7;
pub(crate) const INFO_BLOCK_ADDR: u16 = 0x0000;

// Object table directory (6-byte entries following the info block)
pub(crate) const OBJECT_TABLE_START: u16 = 0x0007;
pub(crate) const OBJECT_ENTRY_SIZE: usize = 6;

// Object types used by the driver
pub(crate) const T5_MESSAGE_PROCESSOR: u8 = 5;
pub(crate) const T6_COMMAND_PROCESSOR: u8 = 6;
pub(crate) const T7_POWER_CONFIG: u8 = 7;
pub(crate) const T9_MULTITOUCH: u8 = 9;
pub(crate) const T24_ONE_TOUCH_GESTURE: u8 = 24;
pub(crate) const T27_TWO_TOUCH_GESTURE: u8 = 27;
pub(crate) const T44_MESSAGE_COUNT: u8 = 44;

// Message framing
pub(crate) const RPTID_NOMSG: u8 = 0xFF;
pub(crate) const MSG_MAX_SIZE: usize = 9;
pub(crate) const MSG_PAYLOAD_SIZE: usize = 7;
pub(crate) const MSG_POLL_BUDGET: usize = 20;

// T6 command processor register offsets and magic values
pub(crate) const T6_RESET: u16 = 0;
pub(crate) const T6_BACKUPNV: u16 = 1;
pub(crate) const T6_REPORTALL: u16 = 3;
pub(crate) const RESET_VALUE: u8 = 0x01;
pub(crate) const BOOT_VALUE: u8 = 0xA5;
pub(crate) const BACKUP_VALUE: u8 = 0x55;

// T7 power config register offsets
pub(crate) const T7_IDLEACQINT: u16 = 0;
pub(crate) const T7_ACTVACQINT: u16 = 1;

// T9 multitouch register offsets
pub(crate) const T9_ORIENT: u16 = 9;
pub(crate) const T9_XRANGE_LSB: u16 = 18;
pub(crate) const T9_XRANGE_MSB: u16 = 19;
pub(crate) const T9_YRANGE_LSB: u16 = 20;
pub(crate) const T9_YRANGE_MSB: u16 = 21;
pub(crate) const ORIENT_XY_SWITCH: u8 = 0x01;

// T9 touch status bits
pub(crate) const TOUCH_DETECT: u8 = 0x80;
pub(crate) const TOUCH_PRESS: u8 = 0x40;
pub(crate) const TOUCH_RELEASE: u8 = 0x20;
pub(crate) const TOUCH_MOVE: u8 = 0x10;

// T24 one-touch gesture events (low nibble of the status byte)
pub(crate) const ONETOUCH_EVENT_MASK: u8 = 0x0F;
pub(crate) const ONETOUCH_PRESS: u8 = 0x01;
pub(crate) const ONETOUCH_RELEASE: u8 = 0x02;
pub(crate) const ONETOUCH_TAP: u8 = 0x03;
pub(crate) const ONETOUCH_DOUBLE_TAP: u8 = 0x04;
pub(crate) const ONETOUCH_FLICK: u8 = 0x05;
pub(crate) const ONETOUCH_DRAG: u8 = 0x06;
pub(crate) const ONETOUCH_THROW: u8 = 0x0B;

// T27 two-touch gesture status (high nibble of the status byte)
pub(crate) const TWOTOUCH_STATUS_MASK: u8 = 0xF0;
pub(crate) const TWOTOUCH_PINCH: u8 = 0x20;
pub(crate) const TWOTOUCH_STRETCH: u8 = 0x80;

// Family IDs with a known reset time
pub(crate) const MXT224_ID: u8 = 0x80;
pub(crate) const MXT1386_ID: u8 = 0xA0;
pub(crate) const MXT768E_ID: u8 = 0xA1;
pub(crate) const MXT1188S_ID: u8 = 0xA2;

// Timings, in milliseconds
pub(crate) const MXT224_RESET_TIME: u32 = 65;
pub(crate) const MXT1386_RESET_TIME: u32 = 200;
pub(crate) const MXT768E_RESET_TIME: u32 = 250;
pub(crate) const MXT1188S_RESET_TIME: u32 = 250;
pub(crate) const RESET_TIME: u32 = 200;
pub(crate) const BACKUP_TIME: u32 = 25;
pub(crate) const FWRESET_TIME: u32 = 1000;
pub(crate) const RESUME_TIME: u32 = 50;

// Bootloader mode status bytes
pub(crate) const BOOT_WAITING_BOOTLOAD_CMD: u8 = 0xC0;
pub(crate) const BOOT_WAITING_FRAME_DATA: u8 = 0x80;
pub(crate) const BOOT_FRAME_CRC_CHECK: u8 = 0x02;
pub(crate) const BOOT_FRAME_CRC_FAIL: u8 = 0x03;
pub(crate) const BOOT_FRAME_CRC_PASS: u8 = 0x04;
pub(crate) const BOOT_APP_CRC_FAIL: u8 = 0x40;
pub(crate) const BOOT_STATUS_MASK: u8 = 0x3F;
pub(crate) const BOOT_EXTENDED_ID: u8 = 0x20;
pub(crate) const UNLOCK_CMD: [u8; 2] = [0xDC, 0xAA];
pub(crate) const FLASH_RETRY_LIMIT: u32 = 20;

/// Application/bootloader bus address pairs. The same physical chip answers
/// on a different address depending on which mode it booted into.
pub(crate) const ADDRESS_PAIRS: [(u8, u8); 7] = [
  (0x4A, 0x26),
  (0x4B, 0x25),
  (0x4B, 0x25),
  (0x4C, 0x26),
  (0x4D, 0x27),
  (0x5A, 0x34),
  (0x5B, 0x35),
];

// Configuration blob magic
pub(crate) const CFG_MAGIC: &[u8] = b"OBP_RAW V1";

// Fingers tracked simultaneously
pub(crate) const MAX_FINGERS: usize = 10;
