pub mod codec;
pub mod header;
pub mod message;

pub use codec::{decode_message, encode_message};
pub use header::{HEADER_SIZE, Header, MessageKind};
pub use message::OverlayMessage;
