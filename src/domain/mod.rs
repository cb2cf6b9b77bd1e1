mod channel;
mod gift;
mod message;

pub use channel::*;
pub use gift::*;
pub use message::*;
