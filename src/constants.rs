// src/constants.rs

/// Default FTP control port.
pub const DEFAULT_CTRL_PORT: u16 = 21;

pub const SERVER_NAME_MAX: usize = 255;
pub const USER_NAME_MAX: usize = 64;
pub const PASSWORD_MAX: usize = 64;
pub const PATH_MAX: usize = 255;

/// Number of sessions a `SessionPool` hands out by default.
pub const SESSION_MAX: usize = 2;

/// Size of the control channel line buffer.
pub const REPLY_BUFFER_SIZE: usize = 1024;
/// Largest chunk read from the data channel in one go.
pub const DATA_BUFFER_SIZE: usize = 4096;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Slice used to poll the control socket while a data socket is monitored too.
pub const POLL_SLICE_MS: u64 = 10;
