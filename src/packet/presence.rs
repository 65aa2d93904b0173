/*! Presence packets: `Online`, `Offline`, `Nickname`, `StatusMessage`,
`UserStatus`, `Typing`.

Length limits on `Nickname`/`StatusMessage` bodies are enforced by
`friend::Friend::set_name`/`set_status_message`, which truncate
defensively; the wire parser itself only needs to consume "the rest of
the packet", the transport framer having already bounded the total
length.
*/

use binary_io::*;
use identity::UserStatus;
use nom::{be_u8, rest};

/// Zero-payload ping marking the sending device online.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Online;

/// Zero-payload clean-disconnect notice.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Offline;

/// 0..128 byte UTF-8 nickname.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Nickname(pub Vec<u8>);

impl Nickname {
    pub(crate) fn parse_body(input: &[u8]) -> IResult<&[u8], Nickname> {
        map!(input, rest, |b: &[u8]| Nickname(b.to_vec()))
    }
}

/// 0..1007 byte UTF-8 status message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusMessage(pub Vec<u8>);

impl StatusMessage {
    pub(crate) fn parse_body(input: &[u8]) -> IResult<&[u8], StatusMessage> {
        map!(input, rest, |b: &[u8]| StatusMessage(b.to_vec()))
    }
}

/// 1-byte user-status enum.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UserStatusPacket(pub UserStatus);

impl UserStatusPacket {
    pub(crate) fn parse_body(input: &[u8]) -> IResult<&[u8], UserStatusPacket> {
        map!(input, be_u8, |b| UserStatusPacket(UserStatus::from_byte(b)))
    }
}

/// 1-byte boolean typing indicator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Typing(pub bool);

impl Typing {
    pub(crate) fn parse_body(input: &[u8]) -> IResult<&[u8], Typing> {
        map!(input, be_u8, |b| Typing(b != 0))
    }
}
