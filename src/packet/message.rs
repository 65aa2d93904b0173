/*! `Message`/`Action` packets: `Action` is simply `Message + 1` on
the wire, so both share one payload shape and are told apart only by
which packet id they were framed with.
*/

use binary_io::*;
use nom::rest;

/// Which of the two message-shaped packets this is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    /// A plain chat message.
    Normal,
    /// A `/me`-style action.
    Action,
}

/// 1..1016 byte UTF-8 message or action body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// Whether this was framed as `Message` or `Action`.
    pub kind: MessageKind,
    /// Raw UTF-8 bytes.
    pub bytes: Vec<u8>,
}

impl Message {
    pub(crate) fn parse_body_with_kind(input: &[u8], kind: MessageKind) -> IResult<&[u8], Message> {
        do_parse!(input,
            bytes: rest >>
            (Message { kind, bytes: bytes.to_vec() })
        )
    }
}
