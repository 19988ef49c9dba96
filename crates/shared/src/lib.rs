//! Wire types shared between the flasher client and the flashing service.

pub mod domain;
pub mod error;
pub mod protocol;
