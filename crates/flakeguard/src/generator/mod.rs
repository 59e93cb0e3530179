mod atomic;
mod interface;
mod lock;
mod state;

pub use atomic::*;
pub use interface::*;
pub use lock::*;
pub use state::{GenerationState, Tick};
