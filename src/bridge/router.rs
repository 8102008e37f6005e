//! # Telemetry Router
//!
//! One simulator telemetry stream, many consumers. Clients register by
//! sending a one-byte command from the socket they want telemetry on; every
//! telemetry datagram is then copied to each registered address unmodified.
//!
//! Telemetry leaves from the command port: each destination gets a socket
//! bound to the command address (with address reuse) and connected to the
//! client, so clients that connected their own socket to the router still
//! accept it. The kernel prefers the connected socket for that client's
//! later commands, so each destination relays what it receives back to the
//! router task.
//!
//! The router task owns the destination set, so registration and broadcast
//! never run concurrently.

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::{classify_send_error, SendFailure, Shutdown};
use crate::config::RouterConfig;
use crate::error::{CrsfBridgeError, Result};

/// Largest simulator telemetry datagram
const MAX_TELEMETRY_DATAGRAM: usize = 65_507;

/// Largest command datagram read; only the first byte matters
const MAX_COMMAND_DATAGRAM: usize = 16;

/// Command opcodes
pub const CMD_REGISTER: u8 = 0x00;
pub const CMD_UNREGISTER: u8 = 0x01;
pub const CMD_QUIT: u8 = 0xFF;

/// Router control command; the sender's address is the registration key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Add the sender, or refresh it (keepalive)
    Register,
    Unregister,
    /// Stop the router
    Quit,
}

impl ControlCommand {
    /// Parse a command datagram by its first byte
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        match datagram.first()? {
            &CMD_REGISTER => Some(Self::Register),
            &CMD_UNREGISTER => Some(Self::Unregister),
            &CMD_QUIT => Some(Self::Quit),
            _ => None,
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            Self::Register => CMD_REGISTER,
            Self::Unregister => CMD_UNREGISTER,
            Self::Quit => CMD_QUIT,
        }
    }
}

/// UDP socket bound to `bind` that other sockets may bind to as well
fn reusable_udp_socket(bind: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    // BSD-derived stacks only allow duplicate unicast binds with SO_REUSEPORT
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&bind.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Where broadcast datagrams go
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Send one datagram
    ///
    /// An error means the destination should be dropped.
    async fn send(&self, data: &[u8]) -> Result<()>;
}

/// Registered client reached through its own connected socket
///
/// Connecting lets the kernel report ICMP errors for this destination alone.
#[derive(Debug)]
pub struct UdpDestination {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    relay: Option<JoinHandle<()>>,
}

impl UdpDestination {
    /// Bind a socket to `local` (normally the command address) and connect it to `addr`
    pub async fn connect(local: SocketAddr, addr: SocketAddr) -> Result<Self> {
        let socket = reusable_udp_socket(local)?;
        socket.connect(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            addr,
            relay: None,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Forward everything this socket receives to `events` until it fails
    fn relay_to(&mut self, events: mpsc::UnboundedSender<RouterEvent>) {
        self.relay = Some(tokio::spawn(relay_commands(self.socket.clone(), self.addr, events)));
    }
}

impl Drop for UdpDestination {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

#[async_trait]
impl DatagramSink for UdpDestination {
    async fn send(&self, data: &[u8]) -> Result<()> {
        match self.socket.send(data).await {
            Ok(_) => Ok(()),
            Err(e) => match classify_send_error(e)? {
                SendFailure::Unreachable => Err(CrsfBridgeError::DestinationUnreachable(self.addr)),
                SendFailure::NotReady => Ok(()),
            },
        }
    }
}

/// Commands a client sends after registering arrive on its connected socket
async fn relay_commands(socket: Arc<UdpSocket>, addr: SocketAddr, events: mpsc::UnboundedSender<RouterEvent>) {
    let mut buf = [0u8; MAX_COMMAND_DATAGRAM];
    loop {
        let event = match socket.recv(&mut buf).await {
            Ok(n) => RouterEvent::Command(ControlCommand::parse(&buf[..n]), addr),
            // Pending ICMP errors surface here rather than on send
            Err(e) => {
                let _ = events.send(RouterEvent::Gone(addr, e));
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

/// Registered destinations keyed by address
#[derive(Debug)]
pub struct DestinationSet<D> {
    destinations: HashMap<SocketAddr, D>,
}

impl<D> Default for DestinationSet<D> {
    fn default() -> Self {
        Self {
            destinations: HashMap::new(),
        }
    }
}

impl<D: DatagramSink> DestinationSet<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a destination; returns false if the address was already registered
    pub fn register(&mut self, addr: SocketAddr, destination: D) -> bool {
        if self.destinations.contains_key(&addr) {
            return false;
        }
        self.destinations.insert(addr, destination);
        true
    }

    /// Remove a destination; returns false if it was not registered
    pub fn unregister(&mut self, addr: &SocketAddr) -> bool {
        self.destinations.remove(addr).is_some()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.destinations.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Send `data` to every destination, dropping the ones that fail
    ///
    /// Returns the number of destinations that accepted the datagram.
    pub async fn broadcast(&mut self, data: &[u8]) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (addr, destination) in &self.destinations {
            match destination.send(data).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Removing destination {}: {}", addr, e);
                    failed.push(*addr);
                }
            }
        }

        for addr in failed {
            self.destinations.remove(&addr);
        }

        delivered
    }
}

/// What woke the router up
#[derive(Debug)]
enum RouterEvent {
    /// Command datagram (`None` if unrecognised) and its sender
    Command(Option<ControlCommand>, SocketAddr),
    Telemetry(usize),
    /// A destination socket failed to receive
    Gone(SocketAddr, io::Error),
}

/// Router actor owning the sockets and destination set
#[derive(Debug)]
pub struct TelemetryRouter {
    command: UdpSocket,
    command_local: SocketAddr,
    telemetry: UdpSocket,
    destinations: DestinationSet<UdpDestination>,
    events_tx: mpsc::UnboundedSender<RouterEvent>,
    events_rx: mpsc::UnboundedReceiver<RouterEvent>,
}

impl TelemetryRouter {
    pub async fn bind(config: &RouterConfig) -> Result<Self> {
        let command = reusable_udp_socket(config.command_bind)?;
        let command_local = command.local_addr()?;
        let telemetry = UdpSocket::bind(config.telemetry_bind).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            command,
            command_local,
            telemetry,
            destinations: DestinationSet::new(),
            events_tx,
            events_rx,
        })
    }

    pub fn command_addr(&self) -> Result<SocketAddr> {
        Ok(self.command.local_addr()?)
    }

    pub fn telemetry_addr(&self) -> Result<SocketAddr> {
        Ok(self.telemetry.local_addr()?)
    }

    /// Serve commands and telemetry until QUIT or shutdown
    pub async fn run(mut self, mut shutdown: Shutdown) -> Result<()> {
        let mut command_buf = [0u8; MAX_COMMAND_DATAGRAM];
        let mut telemetry_buf = vec![0u8; MAX_TELEMETRY_DATAGRAM];

        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                received = self.command.recv_from(&mut command_buf) => {
                    let (n, from) = received?;
                    RouterEvent::Command(ControlCommand::parse(&command_buf[..n]), from)
                }
                Some(event) = self.events_rx.recv() => event,
                received = self.telemetry.recv_from(&mut telemetry_buf) => {
                    let (n, _) = received?;
                    RouterEvent::Telemetry(n)
                }
            };

            match event {
                RouterEvent::Command(Some(command), from) => {
                    if !self.handle_command(command, from).await {
                        return Ok(());
                    }
                }
                RouterEvent::Command(None, from) => debug!("Ignoring unknown command from {}", from),
                RouterEvent::Telemetry(n) => {
                    self.destinations.broadcast(&telemetry_buf[..n]).await;
                }
                RouterEvent::Gone(addr, e) => {
                    if self.destinations.unregister(&addr) {
                        warn!("Removing destination {}: {}", addr, e);
                    }
                }
            }
        }
    }

    /// Apply one command; returns false once the router should stop
    async fn handle_command(&mut self, command: ControlCommand, from: SocketAddr) -> bool {
        match command {
            ControlCommand::Register => self.register(from).await,
            ControlCommand::Unregister => {
                if self.destinations.unregister(&from) {
                    info!("Unregistered {} ({} left)", from, self.destinations.len());
                }
            }
            ControlCommand::Quit => {
                info!("Quit requested by {}", from);
                return false;
            }
        }
        true
    }

    async fn register(&mut self, addr: SocketAddr) {
        if self.destinations.contains(&addr) {
            debug!("Keepalive from {}", addr);
            return;
        }

        match UdpDestination::connect(self.command_local, addr).await {
            Ok(mut destination) => {
                destination.relay_to(self.events_tx.clone());
                self.destinations.register(addr, destination);
                info!("Registered {} ({} total)", addr, self.destinations.len());
            }
            Err(e) => warn!("Cannot register {}: {}", addr, e),
        }
    }
}

/// Bind the router sockets and spawn the router task
pub async fn start(config: &RouterConfig, tasks: &mut JoinSet<Result<()>>, shutdown: &Shutdown) -> Result<()> {
    let router = TelemetryRouter::bind(config).await?;
    info!(
        "Routing telemetry from {} (commands on {})",
        router.telemetry_addr()?,
        router.command_addr()?
    );
    tasks.spawn(router.run(shutdown.clone()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::timeout;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn accepting(times: usize) -> MockDatagramSink {
        let mut sink = MockDatagramSink::new();
        sink.expect_send()
            .withf(|data: &[u8]| data == [1u8, 2, 3])
            .times(times)
            .returning(|_| Ok(()));
        sink
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ControlCommand::parse(&[0x00]), Some(ControlCommand::Register));
        assert_eq!(ControlCommand::parse(&[0x01]), Some(ControlCommand::Unregister));
        assert_eq!(ControlCommand::parse(&[0xFF]), Some(ControlCommand::Quit));
        assert_eq!(ControlCommand::parse(&[0x00, 0x99]), Some(ControlCommand::Register));
        assert_eq!(ControlCommand::parse(&[0x42]), None);
        assert_eq!(ControlCommand::parse(&[]), None);
    }

    #[test]
    fn test_opcode_matches_parse() {
        for command in [ControlCommand::Register, ControlCommand::Unregister, ControlCommand::Quit] {
            assert_eq!(ControlCommand::parse(&[command.opcode()]), Some(command));
        }
    }

    #[test]
    fn test_register_is_keyed_by_address() {
        let mut set = DestinationSet::new();
        assert!(set.register(addr(9001), MockDatagramSink::new()));
        assert!(!set.register(addr(9001), MockDatagramSink::new()));
        assert!(set.register(addr(9002), MockDatagramSink::new()));
        assert_eq!(set.len(), 2);

        assert!(set.unregister(&addr(9001)));
        assert!(!set.unregister(&addr(9001)));
        assert!(!set.contains(&addr(9001)));
        assert!(set.contains(&addr(9002)));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_destination() {
        let mut set = DestinationSet::new();
        set.register(addr(9001), accepting(1));
        set.register(addr(9002), accepting(1));

        assert_eq!(set.broadcast(&[1, 2, 3]).await, 2);
    }

    #[tokio::test]
    async fn test_broadcast_drops_failing_destination() {
        let mut failing = MockDatagramSink::new();
        failing
            .expect_send()
            .times(1)
            .returning(|_| Err(CrsfBridgeError::DestinationUnreachable(addr(9002))));

        let mut set = DestinationSet::new();
        set.register(addr(9001), accepting(2));
        set.register(addr(9002), failing);

        assert_eq!(set.broadcast(&[1, 2, 3]).await, 1);
        assert!(!set.contains(&addr(9002)));
        assert_eq!(set.broadcast(&[1, 2, 3]).await, 1);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_destinations() {
        let mut set: DestinationSet<MockDatagramSink> = DestinationSet::new();
        assert_eq!(set.broadcast(&[1, 2, 3]).await, 0);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_udp_destination_sends_from_command_port() {
        let command = reusable_udp_socket(addr(0)).unwrap();
        let command_addr = command.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let destination = UdpDestination::connect(command_addr, client_addr).await.unwrap();
        assert_eq!(destination.addr(), client_addr);

        destination.send(&[0xAB, 0xCD]).await.unwrap();

        let mut buf = [0u8; 8];
        let (n, from) = timeout(Duration::from_secs(2), client.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..n], &[0xAB, 0xCD]);
        assert_eq!(from, command_addr);
    }

    #[tokio::test]
    async fn test_broadcast_removes_closed_client() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let mut set = DestinationSet::new();
        set.register(client_addr, UdpDestination::connect(addr(0), client_addr).await.unwrap());
        drop(client);

        // The refusal comes back asynchronously and fails a later send
        timeout(Duration::from_secs(2), async {
            while set.contains(&client_addr) {
                set.broadcast(&[1, 2, 3]).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("closed client was never removed");
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_relay_forwards_commands_and_reports_closed_client() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();
        let mut destination = UdpDestination::connect(addr(0), client_addr).await.unwrap();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        destination.relay_to(events_tx);

        let local = destination.socket.local_addr().unwrap();
        client.send_to(&[CMD_UNREGISTER], local).await.unwrap();
        match timeout(Duration::from_secs(2), events_rx.recv()).await.unwrap() {
            Some(RouterEvent::Command(Some(ControlCommand::Unregister), from)) => assert_eq!(from, client_addr),
            other => panic!("Expected relayed UNREGISTER, got: {:?}", other),
        }

        drop(client);
        let event = timeout(Duration::from_secs(2), async {
            loop {
                let _ = destination.send(&[1, 2, 3]).await;
                if let Ok(Some(event)) = timeout(Duration::from_millis(50), events_rx.recv()).await {
                    return event;
                }
            }
        })
        .await
        .expect("relay never reported the closed client");
        assert!(matches!(event, RouterEvent::Gone(gone, _) if gone == client_addr));
    }

    async fn local_router() -> TelemetryRouter {
        TelemetryRouter::bind(&RouterConfig {
            command_bind: addr(0),
            telemetry_bind: addr(0),
        })
        .await
        .unwrap()
    }

    /// Send telemetry until the client receives some
    async fn receive_routed(client: &UdpSocket, simulator: &UdpSocket, telemetry_addr: SocketAddr) -> Vec<u8> {
        let mut buf = [0u8; 64];
        timeout(Duration::from_secs(2), async {
            loop {
                simulator.send_to(&[1, 2, 3], telemetry_addr).await.unwrap();
                if let Ok(Ok(n)) = timeout(Duration::from_millis(50), client.recv(&mut buf)).await {
                    return buf[..n].to_vec();
                }
            }
        })
        .await
        .expect("telemetry was never routed")
    }

    /// Send QUIT until the router task ends; `None` sends on a connected client
    async fn quit(client: &UdpSocket, command_addr: Option<SocketAddr>, mut task: JoinHandle<Result<()>>) -> Result<()> {
        timeout(Duration::from_secs(2), async {
            loop {
                match command_addr {
                    Some(command_addr) => client.send_to(&[CMD_QUIT], command_addr).await.unwrap(),
                    None => client.send(&[CMD_QUIT]).await.unwrap(),
                };
                if let Ok(joined) = timeout(Duration::from_millis(50), &mut task).await {
                    return joined.unwrap();
                }
            }
        })
        .await
        .expect("router never quit")
    }

    #[tokio::test]
    async fn test_router_forwards_to_registered_client() {
        let router = local_router().await;
        let command_addr = router.command_addr().unwrap();
        let telemetry_addr = router.telemetry_addr().unwrap();
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(router.run(rx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let simulator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[CMD_REGISTER], command_addr).await.unwrap();

        assert_eq!(receive_routed(&client, &simulator, telemetry_addr).await, vec![1, 2, 3]);

        client.send_to(&[CMD_UNREGISTER], command_addr).await.unwrap();
        assert!(quit(&client, Some(command_addr), task).await.is_ok());
    }

    #[tokio::test]
    async fn test_router_serves_client_connected_to_command_port() {
        let router = local_router().await;
        let command_addr = router.command_addr().unwrap();
        let telemetry_addr = router.telemetry_addr().unwrap();
        let (_tx, rx) = watch::channel(false);
        let task = tokio::spawn(router.run(rx));

        // Only accepts datagrams whose source is the command address
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(command_addr).await.unwrap();
        client.send(&[CMD_REGISTER]).await.unwrap();

        let simulator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        assert_eq!(receive_routed(&client, &simulator, telemetry_addr).await, vec![1, 2, 3]);

        // Later commands land on the destination socket and are relayed
        client.send(&[CMD_REGISTER]).await.unwrap();
        client.send(&[CMD_UNREGISTER]).await.unwrap();
        assert!(quit(&client, None, task).await.is_ok());
    }

    #[tokio::test]
    async fn test_router_stops_on_shutdown() {
        let router = local_router().await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(router.run(rx));

        tx.send(true).unwrap();
        let result = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
