pub mod client;
pub mod convert;
pub mod platform;
pub mod send;

pub use client::{chat_info, sanitize_identifier, TdlibClient};
pub use platform::GrammersPlatform;
pub use send::MessageSender;
