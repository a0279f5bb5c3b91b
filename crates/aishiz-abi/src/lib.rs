//! Aishiz ABI crate: the engine contract shared by the session manager and
//! the inference engines (built-in or loaded as plugins).

pub mod batch;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod sampling;
pub mod token;

pub use batch::*;
pub use engine::*;
pub use error::*;
pub use sampling::*;
pub use token::*;
