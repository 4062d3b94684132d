// Control channel state machine
pub mod driver;
pub mod state;

pub use state::{ControlState, Step, TransferTarget};
