mod header;
mod message;
mod option;

pub use header::{Header, OpCode};
pub use message::Message;
pub use option::{DhcpOption, MessageType, OptionCode};
