pub mod backend;
pub mod data;
pub mod error;
pub mod nn;
pub mod ops_cpu;
pub mod tensor;
pub mod train;

pub use error::{Error, ErrorKind, Result};
