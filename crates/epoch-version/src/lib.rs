pub mod capability;
pub mod catalog;

pub use capability::*;
pub use catalog::*;
