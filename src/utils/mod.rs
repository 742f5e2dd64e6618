pub use cancel_token::*;
pub use core_pinner::*;

pub mod backoff;
mod cancel_token;
pub mod config_io;
mod core_pinner;
pub mod logger;
