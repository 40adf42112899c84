mod command;
mod constants;
mod control;
mod data;
mod message;

pub use command::*;
pub use constants::*;
pub use control::*;
pub use data::*;
pub use message::*;
