/*! The friend-request authorization layer: out of scope here,
named only as the collaborator the Messenger hands outgoing requests to
and receives inbound ones from.
*/

use crypto::PublicKey;

/// Errors the friend-request subsystem can hand back when asked to send
/// a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum FriendRequestSendError {
    /// The subsystem's outbound queue has no room right now; the
    /// lifecycle driver retries on a later tick.
    #[fail(display = "friend request queue full")]
    QueueFull,
}

/// The friend-request subsystem, consumed by the lifecycle driver to (re)send outgoing requests, and by the application to
/// learn about inbound ones via [`FriendRequestHandler::on_request`].
pub trait FriendRequestSubsystem {
    /// Send (or resend) a friend request to `pk` carrying `payload`.
    fn send_request(&mut self, pk: PublicKey, payload: &[u8]) -> Result<(), FriendRequestSendError>;
}

/// Receives inbound friend requests accepted by the subsystem's own
/// duplicate filter (the Messenger supplies that filter at construction
/// time).
pub trait FriendRequestHandler {
    /// Called once per inbound request that passed the duplicate filter.
    fn on_request(&mut self, pk: PublicKey, payload: &[u8]);
}
