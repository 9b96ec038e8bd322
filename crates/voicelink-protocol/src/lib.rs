//! Binary frame protocol spoken with the speech server.
//!
//! Every frame is one socket message: a leading tag byte followed by a
//! kind-specific payload. There is no length prefix.

pub mod codec;
pub mod error;
pub mod message;

//re-export types for easier access
pub use codec::{decode, encode};
pub use error::ProtocolError;
pub use message::{ControlAction, Message, MessageKind};
