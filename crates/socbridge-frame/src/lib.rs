//! Fixed-size command/response framing for PSoC controller boards.
//!
//! This is the lowest layer of socbridge. Every request is a 4-byte frame:
//! - 1-byte register id (one peripheral instance on the controller)
//! - 1-byte opcode (sub-command within that register)
//! - 2-byte little-endian payload (zero when unused)
//!
//! Every response is a 4-byte little-endian word. Status sentinels are
//! recognised on the raw word; numeric results are sign-reinterpreted
//! according to the link's [`ProtocolRevision`].

pub mod codec;
pub mod error;
pub mod registers;
pub mod response;

pub use codec::{decode_command, encode, encode_frame, Command, RawFrame, FRAME_SIZE};
pub use error::{EncodingError, Result};
pub use registers::{
    pwm_channel, pwm_register, register_name, BuildInfo, BUILD_INFO, GPIO, RESET, RESET_OPCODE,
};
pub use response::{
    ProtocolRevision, Response, ResponseStatus, STATUS_ACCEPTED, STATUS_BAD_PARAMETER,
};
