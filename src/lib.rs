// Module naming follows project convention (capitalised subsystem directories)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Protocol;
#[allow(non_snake_case)]
pub mod Child;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;

pub use config::{ProcessConfig, ProcessRole};
pub use error::{ProtocolError, ReplayError, Result};
