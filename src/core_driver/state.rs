use crate::error::Result;

/// Control channel states. Exactly one is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    Closed,
    Connected,
    AuthSent,
    TlsHandshake,
    UserSent,
    PassSent,
    PbszSent,
    ProtSent,
    LoggedIn,
    TypeSent,
    PasvSent,
    RestSent,
    RetrSent,
    StorSent,
    AppeSent,
    Transferring,
    TransferNotified,
    TransferDone,
    SizeSent,
    DeleteSent,
    Quit,
    QuitSent,
    Closing,
}

impl ControlState {
    /// States in which a data socket may be held.
    pub fn holds_data_channel(&self) -> bool {
        matches!(
            self,
            ControlState::PasvSent
                | ControlState::RestSent
                | ControlState::RetrSent
                | ControlState::StorSent
                | ControlState::AppeSent
                | ControlState::Transferring
                | ControlState::TransferNotified
        )
    }

    /// No command is outstanding.
    pub fn is_idle(&self) -> bool {
        matches!(self, ControlState::Closed | ControlState::LoggedIn)
    }
}

/// Outcome of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Enter the state and wait for the next readiness signal.
    Wait(ControlState),
    /// Enter the state and keep going without I/O.
    Immediate(ControlState),
    /// The operation is over with this result.
    Terminal(Result<()>),
}

/// Command issued once the data channel address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferTarget {
    Retr,
    Rest,
    Stor,
    Appe,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_channel_states() {
        assert!(ControlState::PasvSent.holds_data_channel());
        assert!(ControlState::TransferNotified.holds_data_channel());
        assert!(!ControlState::TransferDone.holds_data_channel());
        assert!(!ControlState::LoggedIn.holds_data_channel());
        assert!(!ControlState::TypeSent.holds_data_channel());
    }

    #[test]
    fn test_idle_states() {
        assert!(ControlState::Closed.is_idle());
        assert!(ControlState::LoggedIn.is_idle());
        assert!(!ControlState::QuitSent.is_idle());
        assert!(!ControlState::Transferring.is_idle());
    }
}
