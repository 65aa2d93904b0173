/*! The boundary between the Messenger core and net-crypto/the DHT/TCP
relay stack.

`Transport` is a cheap handle that can be asked to send a packet and
queried for status, with the actual socket owned elsewhere, expressed
as a plain trait instead of a concrete relay-specific struct.
*/

use crypto::PublicKey;

/// Opaque, transport-assigned number for an enqueued reliable packet.
///
/// Used only to ask the transport "has this been acknowledged yet?" —
/// the Messenger never interprets the value itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PacketNumber(pub u64);

/// Externally visible connection kind, as reported to the application.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionKind {
    /// Not connected at all.
    None,
    /// Connected via a direct UDP net-crypto session.
    Udp,
    /// Connected via a TCP relay.
    Tcp,
    /// Connected, but the transport hasn't resolved which kind yet.
    Unknown,
}

/// A connection handle's current status, as the transport itself sees it
/// (`Connected`/`NotConnected` only — the Udp/Tcp/Unknown distinction is a
/// property the Messenger queries separately via `connection_kind`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionStatus {
    /// No working path to the peer.
    NotConnected,
    /// A working path exists; packets may be sent.
    Connected,
}

/// Errors a `Transport` can report back to the Messenger.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum TransportError {
    /// The connection's outbound queue has no room for another packet.
    #[fail(display = "send queue full")]
    QueueFull,
    /// No connection is currently open to this peer/device.
    #[fail(display = "not connected")]
    NotConnected,
}

/// A handle to one device's connection, opened by [`Transport::connect`].
///
/// Connection handles are owned by the Messenger but their lifetime is
/// managed by the transport; `close` on the
/// transport is the Messenger's way of asking for that lifetime to end.
pub type ConnectionHandle = u64;

/// The net-crypto-and-friends collaborator the Messenger core is built
/// against. A real implementation wraps a DHT + onion + net-crypto stack;
/// tests wrap a deterministic in-memory fake.
///
/// Every method here is non-blocking:
/// an operation that would otherwise block returns `TransportError`
/// instead.
pub trait Transport {
    /// Open a connection to `pk`, returning a handle the Messenger will
    /// use for all further calls about this device.
    fn connect(&mut self, pk: PublicKey) -> ConnectionHandle;

    /// Close a previously opened connection. The handle must not be
    /// reused afterwards.
    fn close(&mut self, handle: ConnectionHandle);

    /// Current low-level status of a connection.
    fn status(&self, handle: ConnectionHandle) -> ConnectionStatus;

    /// The connection kind presently in effect, if connected.
    fn connection_kind(&self, handle: ConnectionHandle) -> ConnectionKind;

    /// Send a reliable packet, returning the packet number to poll for
    /// acknowledgement, or an error if the send queue is full.
    fn send_reliable(&mut self, handle: ConnectionHandle, data: &[u8]) -> Result<PacketNumber, TransportError>;

    /// Send an unreliable (lossy) packet. No delivery tracking is offered.
    fn send_unreliable(&mut self, handle: ConnectionHandle, data: &[u8]) -> Result<(), TransportError>;

    /// `true` once the transport has observed an acknowledgement for
    /// `packet`.
    fn is_acknowledged(&self, handle: ConnectionHandle, packet: PacketNumber) -> bool;

    /// Number of additional reliable packets the connection's send queue
    /// currently has room for.
    fn free_send_slots(&self, handle: ConnectionHandle) -> usize;

    /// `true` if the connection's congestion control considers itself at
    /// its ceiling (the file-chunk driver treats this like a full queue).
    fn is_congested(&self, handle: ConnectionHandle) -> bool;
}
