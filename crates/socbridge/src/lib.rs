//! Host-side driver for PSoC controller boards.
//!
//! socbridge talks to a controller over serial, I2C or SPI using fixed
//! 4-byte frames, discovers what the firmware was built with, and drives
//! PWM and digital pins on top of that.
//!
//! # Crate Structure
//!
//! - [`frame`]: Command frames, response words and register ids
//! - [`transport`]: Serial/I2C/SPI links, port discovery and reconnect
//! - [`session`]: Request/response engine, capability discovery, PWM and GPIO handles

/// Re-export frame types.
pub mod frame {
    pub use socbridge_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use socbridge_transport::*;
}

/// Re-export session types.
pub mod session {
    pub use socbridge_session::*;
}

pub use socbridge_session::{ControllerSession, DigitalPin, Pwm, SessionConfig, SessionError};
