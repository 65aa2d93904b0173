/*! The per-friend sub-protocol: one leading `packet_id` byte,
followed by an ID-specific payload, carried inside whatever reliable or
unreliable frame the transport hands the dispatcher.

An enum of payload structs, each implementing `FromBytes`/`ToBytes`
itself, glued together here with `nom`'s `alt!`/`switch!` and a manual
`ToBytes` dispatch.
*/

mod file;
mod message;
mod misc;
mod presence;

pub use self::file::{FileControl, FileControlOp, FileData, FileDirection, FileSendRequest};
pub use self::message::{Message, MessageKind};
pub use self::misc::{Custom, CustomChannel, Msi};
pub use self::presence::{Nickname, Offline, Online, StatusMessage, Typing, UserStatusPacket};

use binary_io::*;
use nom::be_u8;

/// Leading byte of every per-friend packet.
///
/// Values follow the ones the historical Tox wire protocol settled on;
/// a deployment only needs to fix *some* consistent set of values.
pub mod id {
    /// [`Online`](../struct.Online.html).
    pub const ONLINE: u8 = 0x18;
    /// [`Offline`](../struct.Offline.html).
    pub const OFFLINE: u8 = 0x19;
    /// [`Nickname`](../struct.Nickname.html).
    pub const NICKNAME: u8 = 0x30;
    /// [`StatusMessage`](../struct.StatusMessage.html).
    pub const STATUS_MESSAGE: u8 = 0x31;
    /// [`UserStatusPacket`](../struct.UserStatusPacket.html).
    pub const USER_STATUS: u8 = 0x32;
    /// [`Typing`](../struct.Typing.html).
    pub const TYPING: u8 = 0x33;
    /// [`Message`](../struct.Message.html) with `kind = Normal`.
    pub const MESSAGE: u8 = 0x40;
    /// [`Message`](../struct.Message.html) with `kind = Action`.
    pub const ACTION: u8 = 0x41;
    /// A/V signalling, opaque to this crate.
    pub const MSI: u8 = 0x45;
    /// [`FileSendRequest`](../struct.FileSendRequest.html).
    pub const FILE_SENDREQUEST: u8 = 0x50;
    /// [`FileControl`](../struct.FileControl.html).
    pub const FILE_CONTROL: u8 = 0x51;
    /// [`FileData`](../struct.FileData.html).
    pub const FILE_DATA: u8 = 0x52;
    /// Opaque group chat invite payload.
    pub const INVITE_GROUPCHAT: u8 = 0x60;
    /// First id of the reserved reliable (lossless) custom-packet range.
    pub const LOSSLESS_RANGE_START: u8 = 0xA0;
    /// Last id of the reserved reliable (lossless) custom-packet range.
    pub const LOSSLESS_RANGE_END: u8 = 0xBF;
    /// First id of the reserved unreliable (lossy) custom-packet range.
    pub const LOSSY_RANGE_START: u8 = 0xC8;
    /// Last id of the reserved unreliable (lossy) custom-packet range.
    pub const LOSSY_RANGE_END: u8 = 0xFE;
}

/// One decoded per-friend packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Packet {
    /// Zero-payload ping marking the sending device online.
    Online(Online),
    /// Zero-payload clean-disconnect notice.
    Offline(Offline),
    /// Observed nickname.
    Nickname(Nickname),
    /// Observed status message.
    StatusMessage(StatusMessage),
    /// Observed user status.
    UserStatus(UserStatusPacket),
    /// Observed typing flag.
    Typing(Typing),
    /// A chat message or action.
    Message(Message),
    /// Opaque group chat invite.
    InviteGroupchat(Vec<u8>),
    /// Announce a new outgoing file transfer.
    FileSendRequest(FileSendRequest),
    /// Control an existing file transfer.
    FileControl(FileControl),
    /// A chunk of file data.
    FileData(FileData),
    /// A/V signalling payload, opaque to this crate.
    Msi(Msi),
    /// An application-defined custom packet in the lossy or lossless range.
    Custom(Custom),
}

impl Packet {
    /// This packet's wire id.
    pub fn id(&self) -> u8 {
        match *self {
            Packet::Online(_) => id::ONLINE,
            Packet::Offline(_) => id::OFFLINE,
            Packet::Nickname(_) => id::NICKNAME,
            Packet::StatusMessage(_) => id::STATUS_MESSAGE,
            Packet::UserStatus(_) => id::USER_STATUS,
            Packet::Typing(_) => id::TYPING,
            Packet::Message(ref m) => match m.kind {
                MessageKind::Normal => id::MESSAGE,
                MessageKind::Action => id::ACTION,
            },
            Packet::InviteGroupchat(_) => id::INVITE_GROUPCHAT,
            Packet::FileSendRequest(_) => id::FILE_SENDREQUEST,
            Packet::FileControl(_) => id::FILE_CONTROL,
            Packet::FileData(_) => id::FILE_DATA,
            Packet::Msi(_) => id::MSI,
            Packet::Custom(ref c) => c.id,
        }
    }
}

impl FromBytes for Packet {
    named!(from_bytes<Packet>, do_parse!(
        packet_id: be_u8 >>
        packet: switch!(value!(packet_id),
            id::ONLINE => value!(Packet::Online(Online)) |
            id::OFFLINE => value!(Packet::Offline(Offline)) |
            id::NICKNAME => map!(call!(Nickname::parse_body), Packet::Nickname) |
            id::STATUS_MESSAGE => map!(call!(StatusMessage::parse_body), Packet::StatusMessage) |
            id::USER_STATUS => map!(call!(UserStatusPacket::parse_body), Packet::UserStatus) |
            id::TYPING => map!(call!(Typing::parse_body), Packet::Typing) |
            id::MESSAGE => map!(call!(Message::parse_body_with_kind, MessageKind::Normal), Packet::Message) |
            id::ACTION => map!(call!(Message::parse_body_with_kind, MessageKind::Action), Packet::Message) |
            id::INVITE_GROUPCHAT => map!(nom::rest, |b: &[u8]| Packet::InviteGroupchat(b.to_vec())) |
            id::FILE_SENDREQUEST => map!(call!(FileSendRequest::parse_body), Packet::FileSendRequest) |
            id::FILE_CONTROL => map!(call!(FileControl::parse_body), Packet::FileControl) |
            id::FILE_DATA => map!(call!(FileData::parse_body), Packet::FileData) |
            id::MSI => map!(nom::rest, |b: &[u8]| Packet::Msi(Msi(b.to_vec()))) |
            _ => map!(call!(Custom::parse_body, packet_id), Packet::Custom)
        ) >>
        (packet)
    ));
}

impl ToBytes for Packet {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        match *self {
            Packet::Online(_) => do_gen!(buf, gen_be_u8!(id::ONLINE)),
            Packet::Offline(_) => do_gen!(buf, gen_be_u8!(id::OFFLINE)),
            Packet::Nickname(ref p) => do_gen!(buf, gen_be_u8!(id::NICKNAME) >> gen_slice!(p.0)),
            Packet::StatusMessage(ref p) => do_gen!(buf, gen_be_u8!(id::STATUS_MESSAGE) >> gen_slice!(p.0)),
            Packet::UserStatus(ref p) => do_gen!(buf, gen_be_u8!(id::USER_STATUS) >> gen_be_u8!(p.0.to_byte())),
            Packet::Typing(ref p) => do_gen!(buf, gen_be_u8!(id::TYPING) >> gen_be_u8!(if p.0 { 1 } else { 0 })),
            Packet::Message(ref p) => {
                let packet_id = match p.kind { MessageKind::Normal => id::MESSAGE, MessageKind::Action => id::ACTION };
                do_gen!(buf, gen_be_u8!(packet_id) >> gen_slice!(p.bytes))
            }
            Packet::InviteGroupchat(ref bytes) => do_gen!(buf, gen_be_u8!(id::INVITE_GROUPCHAT) >> gen_slice!(bytes)),
            Packet::FileSendRequest(ref p) => do_gen!(buf, gen_be_u8!(id::FILE_SENDREQUEST) >> gen_call!(|b, p: &FileSendRequest| p.to_bytes(b), p)),
            Packet::FileControl(ref p) => do_gen!(buf, gen_be_u8!(id::FILE_CONTROL) >> gen_call!(|b, p: &FileControl| p.to_bytes(b), p)),
            Packet::FileData(ref p) => do_gen!(buf, gen_be_u8!(id::FILE_DATA) >> gen_call!(|b, p: &FileData| p.to_bytes(b), p)),
            Packet::Msi(ref p) => do_gen!(buf, gen_be_u8!(id::MSI) >> gen_slice!(p.0)),
            Packet::Custom(ref p) => do_gen!(buf, gen_be_u8!(p.id) >> gen_slice!(p.data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: &Packet, capacity: usize) {
        let bytes = to_bytes_vec(packet, capacity);
        let (rest, parsed) = Packet::from_bytes(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(&parsed, packet);
    }

    #[test]
    fn online_offline_round_trip() {
        round_trip(&Packet::Online(Online), 1);
        round_trip(&Packet::Offline(Offline), 1);
    }

    #[test]
    fn message_and_action_keep_distinct_ids() {
        let message = Packet::Message(Message { kind: MessageKind::Normal, bytes: b"hi".to_vec() });
        let action = Packet::Message(Message { kind: MessageKind::Action, bytes: b"hi".to_vec() });
        assert_ne!(message.id(), action.id());
        round_trip(&message, 16);
        round_trip(&action, 16);
    }

    #[test]
    fn custom_lossy_and_lossless_preserve_id() {
        let lossy = Packet::Custom(Custom { id: id::LOSSY_RANGE_START, data: vec![1, 2, 3], channel: CustomChannel::Lossy });
        let lossless = Packet::Custom(Custom { id: id::LOSSLESS_RANGE_START, data: vec![4, 5], channel: CustomChannel::Lossless });
        round_trip(&lossy, 8);
        round_trip(&lossless, 8);
    }
}
