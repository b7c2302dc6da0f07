#![doc = "Real-time core of the sound locator: tick context and task context."]

pub mod context;
pub mod controller;
pub mod phase;
pub mod tick;
pub mod timebase;

pub use context::*;
pub use controller::*;
pub use phase::*;
pub use tick::*;
pub use timebase::*;
