mod events;
mod flags;
mod state;
mod supervisor;

pub use events::*;
pub use flags::*;
pub use state::*;
pub use supervisor::*;
