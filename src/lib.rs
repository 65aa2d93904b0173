/*! Messenger core of a decentralized peer-to-peer instant-messaging
stack: friend roster, contact lifecycle, per-friend sub-protocol and
file transfer, built on top of an external encrypted transport.

This crate owns everything above the wire: it does not speak DHT,
perform key exchange or manage UDP/TCP sockets itself. It is handed a
[`transport::Transport`] that already delivers and acknowledges
encrypted, de-duplicated bytes to a peer, and a
[`friend_request::FriendRequestSubsystem`] that already authenticates
and de-duplicates inbound friend requests. See [`messenger::Messenger`]
for the crate's single entry point.
*/

#![warn(missing_docs)]

#[macro_use]
extern crate cookie_factory;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate nom;

extern crate sodiumoxide;

pub mod binary_io;
pub mod config;
pub mod crypto;
mod dispatcher;
pub mod error;
pub mod events;
pub mod friend;
pub mod friend_request;
pub mod identity;
pub mod messenger;
pub mod packet;
pub mod state;
pub mod transport;

pub use error::{
    FileControlError, FileDataError, FileSeekError, FileSendError, FriendAddError,
    FriendAddOutcome, InvalidFileNumber, InvalidFriend, LoadStateError, MessageSendError,
    PresenceSetError,
};
pub use events::{Events, FileControlKind};
pub use identity::{FriendAddress, NoSpam, SelfIdentity, UserStatus};
pub use messenger::Messenger;
pub use packet::{FileControlOp, FileDirection, MessageKind};
pub use transport::{ConnectionHandle, ConnectionKind, ConnectionStatus, PacketNumber, Transport, TransportError};
