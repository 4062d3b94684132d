use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info};
use zeroize::Zeroizing;

use crate::constants::{
    DEFAULT_CTRL_PORT, DEFAULT_TIMEOUT_SECS, PASSWORD_MAX, REPLY_BUFFER_SIZE, SERVER_NAME_MAX,
    SESSION_MAX, USER_NAME_MAX,
};
use crate::core_driver::{ControlState, TransferTarget};
use crate::core_network::pasv::DataChannel;
use crate::core_network::timer::Timer;
use crate::core_network::{Connector, Transport};
use crate::core_reply::ResponseReader;
use crate::error::{FtpError, Result};

/// Smallest reply buffer that still holds a sane reply line.
const REPLY_BUFFER_MIN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Plain,
    /// Explicit FTPS, AUTH TLS then protected data channels.
    Secure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// Events delivered to the callback during asynchronous transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    DataStart,
    DataEnd,
    Closed,
    Timeout,
    Error,
}

pub type EventCallback = Box<dyn FnMut(Event, Result<()>)>;

/// Receives downloaded bytes in arrival order.
pub type WriteCallback = Box<dyn FnMut(&[u8])>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    /// `store` is still negotiating the data channel.
    Negotiating,
    Streaming,
    /// `send` was called with `done`.
    Finished,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOp {
    pub phase: StorePhase,
}

pub struct RetrieveOp {
    pub offset: u64,
    pub sink: WriteCallback,
}

/// The operation in flight. At most one per session.
pub enum Operation {
    None,
    Connect,
    Disconnect,
    Store(StoreOp),
    Retrieve(RetrieveOp),
    /// Holds the size once the server answered.
    Size(Option<u64>),
    Delete,
}

impl Operation {
    pub fn is_async(&self) -> bool {
        matches!(self, Operation::Store(_) | Operation::Retrieve(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::None => "none",
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::Store(_) => "store",
            Operation::Retrieve(_) => "retrieve",
            Operation::Size(_) => "size",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to create a session.
#[derive(Clone)]
pub struct SessionOptions {
    pub server: String,
    pub port: u16,
    pub user: String,
    /// Wiped from memory when dropped.
    pub password: Zeroizing<String>,
    pub timeout_secs: u64,
    /// Fail a transfer when an unexpected reply is coalesced after the
    /// transfer start instead of only recording its code.
    pub strict_replies: bool,
    pub reply_buffer_size: usize,
}

impl SessionOptions {
    pub fn new(server: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            server: server.to_string(),
            port,
            user: user.to_string(),
            password: Zeroizing::new(password.to_string()),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            strict_replies: false,
            reply_buffer_size: REPLY_BUFFER_SIZE,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() || self.server.len() > SERVER_NAME_MAX {
            return Err(FtpError::BadParameter);
        }
        if self.user.is_empty() || self.user.len() > USER_NAME_MAX {
            return Err(FtpError::BadParameter);
        }
        if self.password.len() > PASSWORD_MAX {
            return Err(FtpError::BadParameter);
        }
        if self.port == 0 || self.timeout_secs == 0 {
            return Err(FtpError::BadParameter);
        }
        if self.reply_buffer_size < REPLY_BUFFER_MIN {
            return Err(FtpError::BadParameter);
        }
        Ok(())
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_CTRL_PORT, "anonymous", "")
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("timeout_secs", &self.timeout_secs)
            .field("strict_replies", &self.strict_replies)
            .finish_non_exhaustive()
    }
}

/// Snapshot returned by `Session::info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub server: String,
    pub port: u16,
    /// Family of the connected control peer.
    pub family: Option<AddressFamily>,
    pub user: String,
    pub security: SecurityMode,
    pub connected: bool,
    pub running: bool,
    pub response: u16,
}

/// One FTP connection and the operation running on it.
pub struct Session {
    pub(crate) server: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: Zeroizing<String>,
    pub(crate) security: SecurityMode,
    pub(crate) certificates: Vec<Vec<u8>>,
    pub(crate) timeout: Duration,
    pub(crate) strict_replies: bool,
    pub(crate) connector: Rc<dyn Connector>,

    pub(crate) control: Option<Box<dyn Transport>>,
    pub(crate) data: Option<DataChannel>,
    pub(crate) reader: ResponseReader,
    pub(crate) peer: Option<SocketAddr>,

    pub(crate) operation: Operation,
    pub(crate) state: ControlState,
    pub(crate) target: TransferTarget,
    pub(crate) remote_path: String,
    pub(crate) last_response: u16,
    /// Result of the operation in flight, handed out when it ends.
    pub(crate) result: Result<()>,
    /// Set when an operation ends, read by blocking calls.
    pub(crate) pending: Option<Result<()>>,
    pub(crate) data_eof: bool,
    pub(crate) timer: Timer,
    pub(crate) event_callback: Option<EventCallback>,

    #[cfg(test)]
    pub(crate) trace: Vec<ControlState>,
}

impl Session {
    pub fn new(options: SessionOptions, connector: Rc<dyn Connector>) -> Result<Self> {
        options.validate()?;
        let SessionOptions {
            server,
            port,
            user,
            password,
            timeout_secs,
            strict_replies,
            reply_buffer_size,
        } = options;
        let timeout = Duration::from_secs(timeout_secs);

        Ok(Self {
            server,
            port,
            user,
            password,
            security: SecurityMode::Plain,
            certificates: Vec::new(),
            timeout,
            strict_replies,
            connector,
            control: None,
            data: None,
            reader: ResponseReader::new(reply_buffer_size),
            peer: None,
            operation: Operation::None,
            state: ControlState::Closed,
            target: TransferTarget::Retr,
            remote_path: String::new(),
            last_response: 0,
            result: Ok(()),
            pending: None,
            data_eof: false,
            timer: Timer::new(timeout, false),
            event_callback: None,
            #[cfg(test)]
            trace: Vec::new(),
        })
    }

    /// Installs the callback that receives transfer events. `None` removes it.
    pub fn set_event_callback(&mut self, callback: Option<EventCallback>) {
        self.event_callback = callback;
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn last_response(&self) -> u16 {
        self.last_response
    }

    pub fn is_connected(&self) -> bool {
        self.state == ControlState::LoggedIn || (self.control.is_some() && !self.state.is_idle())
    }

    pub fn is_running(&self) -> bool {
        self.operation.is_async()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            server: self.server.clone(),
            port: self.port,
            family: self.peer.map(|addr| {
                if addr.is_ipv6() {
                    AddressFamily::Ipv6
                } else {
                    AddressFamily::Ipv4
                }
            }),
            user: self.user.clone(),
            security: self.security,
            connected: self.is_connected(),
            running: self.is_running(),
            response: self.last_response,
        }
    }

    pub(crate) fn notify(&mut self, event: Event, result: Result<()>) {
        debug!("Event {:?} ({:?})", event, result);
        if let Some(callback) = self.event_callback.as_mut() {
            callback(event, result);
        }
    }

    /// Closes both sockets and stops the timer. No event is sent.
    pub(crate) fn release(&mut self) {
        self.timer.stop();
        self.close_data_channel();
        if let Some(mut control) = self.control.take() {
            control.set_monitoring(false);
            if let Err(e) = control.disconnect() {
                debug!("Control channel close failed: {}", e);
            }
            info!("Disconnected from {}:{}", self.server, self.port);
        }
        self.peer = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.event_callback = None;
        self.operation = Operation::None;
        self.release();
    }
}

/// Handle to a pooled session. A handle goes stale when its session is
/// destroyed, even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionRef {
    index: usize,
    generation: u32,
}

struct Slot {
    generation: u32,
    session: Option<Session>,
}

/// Fixed-capacity set of sessions sharing one connector.
pub struct SessionPool {
    slots: Vec<Slot>,
    connector: Rc<dyn Connector>,
}

impl SessionPool {
    pub fn new(capacity: usize, connector: Rc<dyn Connector>) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                session: None,
            })
            .collect();
        Self { slots, connector }
    }

    pub fn with_default_capacity(connector: Rc<dyn Connector>) -> Self {
        Self::new(SESSION_MAX, connector)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.session.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create_session(
        &mut self,
        server: &str,
        port: u16,
        user: &str,
        password: &str,
        timeout_secs: u64,
    ) -> Result<SessionRef> {
        let mut options = SessionOptions::new(server, port, user, password);
        options.timeout_secs = timeout_secs;
        self.create_with_options(options)
    }

    pub fn create_with_options(&mut self, options: SessionOptions) -> Result<SessionRef> {
        options.validate()?;

        let index = self
            .slots
            .iter()
            .position(|slot| slot.session.is_none())
            .ok_or(FtpError::NoMemory)?;

        let session = Session::new(options, Rc::clone(&self.connector))?;
        let slot = &mut self.slots[index];
        slot.session = Some(session);
        debug!("Session {} created", index);

        Ok(SessionRef {
            index,
            generation: slot.generation,
        })
    }

    fn slot(&self, session: SessionRef) -> Option<&Slot> {
        self.slots
            .get(session.index)
            .filter(|slot| slot.generation == session.generation)
    }

    pub fn get(&self, session: SessionRef) -> Option<&Session> {
        self.slot(session)?.session.as_ref()
    }

    pub fn get_mut(&mut self, session: SessionRef) -> Option<&mut Session> {
        self.slots
            .get_mut(session.index)
            .filter(|slot| slot.generation == session.generation)?
            .session
            .as_mut()
    }

    /// Force-closes the session and frees its slot.
    pub fn destroy_session(&mut self, session: SessionRef) -> Result<()> {
        let slot = self
            .slots
            .get_mut(session.index)
            .filter(|slot| slot.generation == session.generation && slot.session.is_some())
            .ok_or(FtpError::BadParameter)?;

        slot.generation = slot.generation.wrapping_add(1);
        drop(slot.session.take());
        debug!("Session {} destroyed", session.index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_network::mock::MockServer;

    #[test]
    fn test_options_validation() {
        assert!(SessionOptions::new("ftp.example.com", 21, "bob", "pw").validate().is_ok());
        assert_eq!(
            SessionOptions::new("", 21, "bob", "pw").validate(),
            Err(FtpError::BadParameter)
        );
        assert_eq!(
            SessionOptions::new(&"h".repeat(SERVER_NAME_MAX + 1), 21, "bob", "pw").validate(),
            Err(FtpError::BadParameter)
        );
        assert_eq!(
            SessionOptions::new("host", 21, &"u".repeat(USER_NAME_MAX + 1), "pw").validate(),
            Err(FtpError::BadParameter)
        );
        assert_eq!(
            SessionOptions::new("host", 21, "bob", &"p".repeat(PASSWORD_MAX + 1)).validate(),
            Err(FtpError::BadParameter)
        );

        let mut options = SessionOptions::new("host", 21, "bob", "pw");
        options.timeout_secs = 0;
        assert_eq!(options.validate(), Err(FtpError::BadParameter));
    }

    #[test]
    fn test_pool_exhaustion() {
        let server = MockServer::new();
        let mut pool = SessionPool::with_default_capacity(server.connector());

        let first = pool.create_session("host", 21, "bob", "pw", 5).unwrap();
        let second = pool.create_session("host", 21, "bob", "pw", 5).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            pool.create_session("host", 21, "bob", "pw", 5),
            Err(FtpError::NoMemory)
        );
        assert_eq!(pool.len(), SESSION_MAX);

        pool.destroy_session(first).unwrap();
        assert!(pool.create_session("host", 21, "bob", "pw", 5).is_ok());
    }

    #[test]
    fn test_stale_handle() {
        let server = MockServer::new();
        let mut pool = SessionPool::new(1, server.connector());

        let handle = pool.create_session("host", 21, "bob", "pw", 5).unwrap();
        assert!(pool.get(handle).is_some());
        pool.destroy_session(handle).unwrap();

        let reused = pool.create_session("host", 21, "bob", "pw", 5).unwrap();
        assert!(pool.get(handle).is_none());
        assert!(pool.get_mut(handle).is_none());
        assert!(pool.get(reused).is_some());
        assert_eq!(pool.destroy_session(handle), Err(FtpError::BadParameter));
    }

    #[test]
    fn test_bad_parameters_do_not_use_a_slot() {
        let server = MockServer::new();
        let mut pool = SessionPool::new(1, server.connector());
        assert_eq!(
            pool.create_session("", 21, "bob", "pw", 5),
            Err(FtpError::BadParameter)
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn test_info_before_connect() {
        let server = MockServer::new();
        let mut options = SessionOptions::new("ftp.example.com", 2121, "bob", "pw");
        options.timeout_secs = 5;
        let session = Session::new(options, server.connector()).unwrap();

        let info = session.info();
        assert_eq!(info.server, "ftp.example.com");
        assert_eq!(info.port, 2121);
        assert_eq!(info.user, "bob");
        assert_eq!(info.family, None);
        assert_eq!(info.security, SecurityMode::Plain);
        assert!(!info.connected);
        assert!(!info.running);
        assert_eq!(info.response, 0);
    }
}
