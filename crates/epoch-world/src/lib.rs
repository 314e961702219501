pub mod chunk;
pub mod generator;
pub mod serialize;
pub mod store;

pub use chunk::*;
pub use store::*;
