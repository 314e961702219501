pub mod cipher;
pub mod codec;
pub mod connection;
pub mod error;
pub mod framing;
pub mod registry;
pub mod state;

pub use cipher::Cfb8Cipher;
pub use codec::*;
pub use connection::{Connection, ConnectionReader, ConnectionWriter};
pub use error::ProtocolError;
pub use framing::*;
pub use registry::*;
pub use state::*;
