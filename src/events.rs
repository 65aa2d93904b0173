/*! Application callbacks.

One `Events` struct holding an optional boxed closure per callback,
registered once and invoked synchronously from inside the API call or
`tick()` that triggered them. There is no channel and no second thread:
callbacks run inline, on the caller's stack.
*/

use identity::UserStatus;
use packet::MessageKind;
use transport::ConnectionKind;

/// A single `file_control` operation, as surfaced to the application
/// (direction-agnostic; the friend/file_number pair already say whose
/// transfer it is).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileControlKind {
    /// Start or resume.
    Accept,
    /// Pause.
    Pause,
    /// Terminate.
    Kill,
}

/// Application callbacks registered once on a `Messenger`.
///
/// Every field is `Option<Box<dyn FnMut(...)>>`; unset callbacks are
/// simply skipped.
#[derive(Default)]
pub struct Events {
    /// Inbound friend request, already past the duplicate filter.
    pub friend_request: Option<Box<FnMut(&[u8], &[u8])>>,
    /// Inbound chat message or action.
    pub friend_message: Option<Box<FnMut(usize, MessageKind, &[u8])>>,
    /// Friend's nickname changed.
    pub name_change: Option<Box<FnMut(usize, &[u8])>>,
    /// Friend's status message changed.
    pub status_message_change: Option<Box<FnMut(usize, &[u8])>>,
    /// Friend's user status changed.
    pub user_status_change: Option<Box<FnMut(usize, UserStatus)>>,
    /// Friend's typing flag changed.
    pub typing_change: Option<Box<FnMut(usize, bool)>>,
    /// A previously sent message has been acknowledged.
    pub read_receipt: Option<Box<FnMut(usize, u32)>>,
    /// A friend's externally visible connection kind changed.
    pub connection_status_change: Option<Box<FnMut(usize, ConnectionKind)>>,
    /// The Messenger's own aggregate connection kind changed.
    pub core_connection_change: Option<Box<FnMut(ConnectionKind)>>,
    /// Inbound `FileSendRequest`.
    pub file_sendrequest: Option<Box<FnMut(usize, u32, u32, u64, &[u8])>>,
    /// Inbound `FileControl`.
    pub file_control: Option<Box<FnMut(usize, u32, FileControlKind)>>,
    /// Inbound `FileData`; `bytes.is_empty()` signals end-of-stream.
    pub file_data: Option<Box<FnMut(usize, u32, u64, &[u8])>>,
    /// The chunk-request upcall driving an outgoing transfer;
    /// `len == 0` signals end-of-stream.
    pub file_reqchunk: Option<Box<FnMut(usize, u32, u64, usize)>>,
    /// Inbound A/V signalling payload.
    pub msi_packet: Option<Box<FnMut(usize, &[u8])>>,
    /// Inbound lossy (unreliable) custom packet.
    pub lossy_packet: Option<Box<FnMut(usize, u8, &[u8])>>,
    /// Inbound lossless (reliable) custom packet.
    pub lossless_packet: Option<Box<FnMut(usize, u8, &[u8])>>,
}

impl Events {
    /// A fresh `Events` with nothing registered.
    pub fn new() -> Self {
        Events::default()
    }
}
