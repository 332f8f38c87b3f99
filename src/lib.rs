pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod llp;
pub mod seq;
pub mod socket;
pub mod tun;
pub mod window;

pub use config::Config;
pub use connection::{Connection, DisconnectReason, FrameSink, Host, Role, State};
pub use error::{Result, SwtpError};
