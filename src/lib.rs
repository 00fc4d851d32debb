#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, `no_std` drivers for two of the usual companions on a handset
//! mainboard: the Atmel maXTouch family of touchscreen controllers and the
//! NXP PN544 NFC controller.
//!
//! Both chips hang off an I²C bus and pace the host with an interrupt
//! line; both drivers are written against `embedded-hal` /
//! `embedded-hal-async` 1.0 traits so they work across MCU families.
//!
//! - [`mxt`]: object table discovery, interrupt-paced message dispatch into
//!   consolidated touch reports, firmware gesture recognizers, OBP_RAW
//!   configuration upload and bootloader firmware flashing
//! - [`pn544`]: CRC-protected HCI framing, IRQ-paced reception into a
//!   shared ring with split driver and reader halves, full power sequencing
//! - Optional `defmt` instrumentation behind the `defmt` Cargo feature
//!
//! ```no_run
//! use embedded_hal::digital::InputPin;
//! use embedded_hal_async::{delay::DelayNs, digital::Wait, i2c::{I2c, SevenBitAddress}};
//! use mxt_pn544::mxt::{Error, Mxt};
//!
//! async fn example<I2C, CHG, D, E>(i2c: I2C, chg: CHG, delay: D) -> Result<(), Error<E>>
//! where
//!   I2C: I2c<SevenBitAddress, Error = E>,
//!   CHG: Wait + InputPin,
//!   D: DelayNs,
//! {
//!   let mut touch = Mxt::new(i2c, chg, (), delay, 0x4A);
//!   touch.initialize().await?;
//!   loop {
//!     let report = touch.next_report().await?;
//!     for event in &report.events {
//!       // feed the input stack
//!       let _ = event;
//!     }
//!   }
//! }
//! ```

pub mod mxt;
pub mod pn544;
