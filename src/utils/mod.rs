mod error;
mod rand_bytes;
mod time;

pub use error::*;
pub use rand_bytes::*;
pub use time::*;
