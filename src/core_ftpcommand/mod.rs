// Control channel command formatting
pub mod builder;
pub mod ftpcommand;

pub use ftpcommand::FtpCommand;
