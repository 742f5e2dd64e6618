pub mod actor;
pub mod clock;
pub mod config;
pub mod dns;
pub mod error;
pub mod frame;
pub mod mailbox;
pub mod message;
pub mod net;
pub mod timer;
mod test;
pub mod utils;

pub mod prelude;

pub use utils::logger::Throttle;
