//! FTP and explicit FTPS client.
//!
//! A [`Session`] drives one control connection through a state machine and
//! opens a passive data connection per transfer. Connect, disconnect, size
//! and delete block until the server answered. Downloads run from
//! [`Session::process_events`] and report through the event callback;
//! uploads are fed with [`Session::send`].

pub mod client;
pub mod config;
pub mod constants;
pub mod core_driver;
pub mod core_ftpcommand;
pub mod core_network;
pub mod core_reply;
pub mod core_tls;
pub mod error;
pub mod session;

pub use config::{ClientConfig, Config};
pub use core_driver::ControlState;
pub use core_network::tcp::TcpConnector;
pub use error::{FtpError, Result};
pub use session::{
    AddressFamily, Event, EventCallback, SecurityMode, Session, SessionInfo, SessionOptions,
    SessionPool, SessionRef, WriteCallback,
};
