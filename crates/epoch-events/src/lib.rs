pub mod bus;
pub mod events;

pub use bus::*;
pub use events::*;
