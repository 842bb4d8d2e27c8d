// Wire module - THE FORMAT
// Message envelope (postcard) and length-delimited framing

mod codec;
mod message;

pub use codec::{
    encode, framed, read_frame, read_message, write_frame, CodecError, Framing,
    DEFAULT_MAX_FRAME_LEN,
};
pub use message::{Message, MessageType, WireError, VERSION_1};
