//! UI command channel
//!
//! Buttons arrive as short text datagrams on a local UDP socket:
//!
//! | command        | UI event                              |
//! |----------------|---------------------------------------|
//! | `chat`         | enter CHAT (join / previously picked) |
//! | `direct`       | enter CHAT with the closest peer      |
//! | `search`       | back to SEARCH                        |
//! | `next`         | show the next common interest         |
//! | `share`        | share contact                         |
//! | `select <hex>` | preselect a peer                      |
//! | `status`       | reply with the JSON snapshot          |

use std::io;
use std::net::SocketAddr;
use std::str::FromStr;

use badge_protocol::{Identity, IdentityError, SessionContext};
use mio::net::UdpSocket;
use mio::{Interest, Registry, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EnterChat { directed: bool },
    ExitChat,
    Next,
    Share,
    Select(Identity),
    Status,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'select' needs a peer identity")]
    MissingIdentity,
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?.to_lowercase();

        match verb.as_str() {
            "chat" => Ok(Command::EnterChat { directed: false }),
            "direct" => Ok(Command::EnterChat { directed: true }),
            "search" => Ok(Command::ExitChat),
            "next" => Ok(Command::Next),
            "share" => Ok(Command::Share),
            "status" => Ok(Command::Status),
            "select" => {
                let hex = words.next().ok_or(CommandError::MissingIdentity)?;
                Ok(Command::Select(hex.parse()?))
            }
            _ => Err(CommandError::Unknown(verb)),
        }
    }
}

impl Command {
    /// Apply to the session; true if state changed
    pub fn apply(self, session: &mut SessionContext) -> bool {
        match self {
            Command::EnterChat { directed } => session.enter_chat(directed),
            Command::ExitChat => session.exit_chat(),
            Command::Next => session.advance_cursor(),
            Command::Share => session.share_contact(),
            Command::Select(identity) => session.select_peer(identity),
            Command::Status => false,
        }
    }
}

// ============================================================================
// Control Socket
// ============================================================================

pub struct ControlSocket {
    socket: UdpSocket,
    recv_buf: Vec<u8>,
}

impl ControlSocket {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        log::info!("Control socket on {}", socket.local_addr()?);
        Ok(ControlSocket {
            socket,
            recv_buf: vec![0u8; 512],
        })
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.socket, token, Interest::READABLE)
    }

    /// Drain pending commands; malformed ones are logged and skipped
    pub fn drain(&mut self) -> Vec<(Command, SocketAddr)> {
        let socket = &self.socket;
        collect_commands(&mut self.recv_buf, |buf| socket.recv_from(buf))
    }

    pub fn reply(&self, to: SocketAddr, body: &[u8]) {
        if let Err(e) = self.socket.send_to(body, to) {
            log::debug!("Failed to reply to {}: {}", to, e);
        }
    }
}

/// Pull datagrams from `recv` until it would block. Receive errors never
/// escape: a button press must not take the node down.
pub fn collect_commands<F>(buf: &mut [u8], mut recv: F) -> Vec<(Command, SocketAddr)>
where
    F: FnMut(&mut [u8]) -> io::Result<(usize, SocketAddr)>,
{
    let mut commands = Vec::new();
    loop {
        let (len, from) = match recv(buf) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            // ICMP feedback from an earlier reply; the next datagram is fine
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionRefused
                        | io::ErrorKind::ConnectionReset
                ) =>
            {
                log::debug!("Control socket: {}", e);
                continue;
            }
            Err(e) => {
                log::warn!("Control socket receive failed: {}", e);
                break;
            }
        };

        let text = String::from_utf8_lossy(&buf[..len]);
        match text.parse::<Command>() {
            Ok(cmd) => {
                log::debug!("Command {:?} from {}", cmd, from);
                commands.push((cmd, from));
            }
            Err(e) => log::warn!("Ignoring command from {}: {}", from, e),
        }
    }
    commands
}
