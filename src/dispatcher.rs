/*! Demultiplex one inbound per-friend packet to the matching sub-handler.

This module only decides *which* roster mutation and upcall a packet
causes; the roster mutation itself lives on `Friend` and the upcall
plumbing lives on `Messenger`. One function per packet kind, each a
straight line from wire bytes to state change.
*/

use friend::{Friend, FriendStatus};
use packet::{self, Packet};

/// Outcome of dispatching one packet, telling the caller (`Messenger`)
/// what upcall, if any, to fire. Kept as plain data so `Messenger`
/// remains the only place that touches `Events`.
pub enum Dispatched {
    /// Nothing for the application to see (e.g. an `Online` packet).
    None,
    /// The friend's first device came online this packet.
    WentOnline,
    /// Observed nickname changed.
    NameChanged,
    /// Observed status message changed.
    StatusMessageChanged,
    /// Observed user status changed.
    UserStatusChanged,
    /// Observed typing flag changed.
    TypingChanged,
    /// A chat message or action arrived.
    Message(packet::MessageKind, Vec<u8>),
    /// An inbound file-send request landed in `slot`.
    FileSendRequest {
        /// Receive-side slot index.
        slot: usize,
        /// Application-defined file type.
        file_type: u32,
        /// Announced size.
        size: u64,
        /// File name.
        name: Vec<u8>,
    },
    /// An inbound `FileControl` was applied (or silently rejected, in
    /// which case no callback fires at all).
    FileControlApplied {
        /// The affected slot.
        slot: usize,
        /// Which direction the control addressed.
        direction: packet::FileDirection,
        /// The parsed operation.
        op: packet::FileControlOp,
    },
    /// A chunk of file data arrived on `slot`, already clamped to the
    /// transfer's remaining size; `terminal` marks end-of-stream.
    FileData {
        /// Receive-side slot index.
        slot: usize,
        /// Byte offset the chunk starts at.
        position: u64,
        /// Clamped chunk bytes.
        bytes: Vec<u8>,
        /// Whether this was the terminal (possibly empty) chunk.
        terminal: bool,
    },
    /// Opaque A/V signalling payload.
    Msi(Vec<u8>),
    /// An application-defined custom packet.
    Custom {
        /// The packet's wire id.
        id: u8,
        /// Raw payload.
        data: Vec<u8>,
        /// Which reserved range it fell in.
        channel: packet::CustomChannel,
    },
}

/// Parse and dispatch one raw packet against `friend`, whose device
/// `device_index` it arrived on.
///
/// Returns `None` for anything malformed (bad parse, or a non-`Online`
/// packet while the friend isn't `Online` yet) — the caller drops these
/// silently: "malformed packets are dropped silently (no
/// disconnect)".
pub fn dispatch(friend: &mut Friend, device_index: usize, raw: &[u8]) -> Option<Dispatched> {
    use binary_io::FromBytes;

    let (rest, packet) = match Packet::from_bytes(raw) {
        ::nom::IResult::Done(rest, packet) => (rest, packet),
        _ => {
            warn!("dropping malformed packet from friend (device {})", device_index);
            return None;
        }
    };
    if !rest.is_empty() {
        warn!("dropping packet with trailing garbage from friend (device {})", device_index);
        return None;
    }

    let was_online = friend.is_online();
    if !was_online {
        return match packet {
            Packet::Online(_) => {
                friend.mark_device_online(device_index);
                Some(Dispatched::WentOnline)
            }
            _ => {
                warn!("dropping non-Online packet from not-yet-online friend (device {})", device_index);
                None
            }
        };
    }

    Some(match packet {
        Packet::Online(_) => {
            friend.mark_device_online(device_index);
            Dispatched::None
        }
        Packet::Offline(_) => {
            friend.mark_device_offline(device_index);
            Dispatched::None
        }
        Packet::Nickname(packet::Nickname(bytes)) => {
            friend.set_name(bytes);
            Dispatched::NameChanged
        }
        Packet::StatusMessage(packet::StatusMessage(bytes)) => {
            friend.set_status_message(bytes);
            Dispatched::StatusMessageChanged
        }
        Packet::UserStatus(packet::UserStatusPacket(status)) => {
            friend.set_user_status(status);
            Dispatched::UserStatusChanged
        }
        Packet::Typing(packet::Typing(typing)) => {
            friend.set_typing(typing);
            Dispatched::TypingChanged
        }
        Packet::Message(msg) => Dispatched::Message(msg.kind, msg.bytes),
        Packet::InviteGroupchat(_) => Dispatched::None,
        Packet::FileSendRequest(req) => dispatch_file_send_request(friend, req),
        Packet::FileControl(control) => dispatch_file_control(friend, control),
        Packet::FileData(data) => dispatch_file_data(friend, data),
        Packet::Msi(packet::Msi(bytes)) => Dispatched::Msi(bytes),
        Packet::Custom(c) => Dispatched::Custom { id: c.id, data: c.data, channel: c.channel },
    })
}

fn dispatch_file_send_request(friend: &mut Friend, req: packet::FileSendRequest) -> Dispatched {
    let slot_index = req.slot as usize;
    match friend.incoming_files_mut().get_mut(slot_index) {
        Some(slot) if slot.is_free() => {
            slot.start_incoming(req.size, req.file_type, req.id, req.name.clone());
            Dispatched::FileSendRequest { slot: slot_index, file_type: req.file_type, size: req.size, name: req.name }
        }
        _ => {
            warn!("dropping FileSendRequest for occupied or out-of-range slot {}", req.slot);
            Dispatched::None
        }
    }
}

fn dispatch_file_control(friend: &mut Friend, control: packet::FileControl) -> Dispatched {
    let slot_index = control.slot as usize;
    let result = match control.direction {
        // The packet's sender is sending the file: it addresses one of
        // *our* incoming slots.
        packet::FileDirection::Send => friend.incoming_files_mut().get_mut(slot_index).map(|slot| {
            apply_peer_control(slot, control.op)
        }),
        // The packet's sender is receiving the file: it addresses one of
        // *our* outgoing slots. A `Kill` here frees an outgoing slot, so
        // the roster's `num_sending_files` count needs to follow it down.
        packet::FileDirection::Receive => friend.outgoing_files_mut().get_mut(slot_index).map(|slot| {
            apply_peer_control(slot, control.op)
        }),
    };
    match result {
        Some((true, freed_outgoing)) => {
            if freed_outgoing && control.direction == packet::FileDirection::Receive {
                friend.note_outgoing_slot_freed();
            }
            Dispatched::FileControlApplied { slot: slot_index, direction: control.direction, op: control.op }
        }
        _ => {
            warn!("dropping FileControl for slot {} (no such slot, or op rejected)", control.slot);
            Dispatched::None
        }
    }
}

/// Apply a control op received from the peer to one of our own slots.
///
/// Returns `(applied, freed_occupied_slot)`: whether the op was accepted,
/// and whether it moved a previously-occupied slot to `None` (only
/// `Kill` can do that, and only if the slot wasn't already free).
fn apply_peer_control(slot: &mut ::friend::file_transfer::FileTransferSlot, op: packet::FileControlOp) -> (bool, bool) {
    match op {
        packet::FileControlOp::Accept => (slot.accept_incoming(false).is_ok(), false),
        packet::FileControlOp::Pause => (slot.pause(false).is_ok(), false),
        packet::FileControlOp::Kill => {
            let was_occupied = !slot.is_free();
            slot.kill();
            (true, was_occupied)
        }
        packet::FileControlOp::Seek { position } => (slot.seek(position).is_ok(), false),
    }
}

fn dispatch_file_data(friend: &mut Friend, data: packet::FileData) -> Dispatched {
    let slot_index = data.slot as usize;
    match friend.incoming_files_mut().get_mut(slot_index) {
        Some(slot) => match slot.receive_chunk(&data.chunk) {
            Some((position, bytes, terminal)) => Dispatched::FileData { slot: slot_index, position, bytes, terminal },
            None => {
                warn!("dropping FileData for slot {} not in Transferring state", data.slot);
                Dispatched::None
            }
        },
        None => {
            warn!("dropping FileData for out-of-range slot {}", data.slot);
            Dispatched::None
        }
    }
}

/// `true` once a friend's status makes it eligible to receive anything
/// beyond an `Online` packet (helper used by tests; `dispatch` inlines
/// the equivalent check against the device list directly).
pub fn accepts_full_protocol(status: FriendStatus) -> bool {
    status == FriendStatus::Online
}

#[cfg(test)]
mod tests {
    use super::*;
    use binary_io::{to_bytes_vec, ToBytes};
    use crypto::PublicKey;
    use packet::{Online, Packet as WirePacket};

    fn fresh_friend() -> Friend {
        Friend::new_confirmed(PublicKey([9; ::crypto::PUBLICKEYBYTES]), 8)
    }

    #[test]
    fn non_online_packet_dropped_before_online() {
        let mut friend = fresh_friend();
        let bytes = to_bytes_vec(&WirePacket::Offline(packet::Offline), 1);
        assert!(dispatch(&mut friend, 0, &bytes).is_none());
        assert!(!friend.is_online());
    }

    #[test]
    fn online_packet_brings_friend_online() {
        let mut friend = fresh_friend();
        let bytes = to_bytes_vec(&WirePacket::Online(Online), 1);
        match dispatch(&mut friend, 0, &bytes) {
            Some(Dispatched::WentOnline) => {}
            _ => panic!("expected WentOnline"),
        }
        assert!(friend.is_online());
    }

    #[test]
    fn malformed_packet_is_dropped_silently() {
        let mut friend = fresh_friend();
        friend.mark_device_online(0);
        // FileControl body truncated to nothing: not enough bytes to parse.
        let bytes = vec![packet::id::FILE_CONTROL];
        assert!(dispatch(&mut friend, 0, &bytes).is_none());
    }

    #[test]
    fn peer_kill_of_outgoing_slot_decrements_num_sending_files() {
        let mut friend = fresh_friend();
        friend.mark_device_online(0);
        friend.outgoing_files_mut()[0].start_outgoing(100, 0, [0; ::config::FILE_ID_LENGTH], Vec::new());
        friend.note_outgoing_slot_started();
        assert_eq!(friend.num_sending_files(), 1);

        let control = packet::FileControl { direction: packet::FileDirection::Receive, slot: 0, op: packet::FileControlOp::Kill };
        let bytes = to_bytes_vec(&WirePacket::FileControl(control), 3);
        match dispatch(&mut friend, 0, &bytes) {
            Some(Dispatched::FileControlApplied { slot: 0, direction: packet::FileDirection::Receive, op: packet::FileControlOp::Kill }) => {}
            _ => panic!("expected FileControlApplied"),
        }
        assert_eq!(friend.num_sending_files(), 0);
        assert!(friend.outgoing_files()[0].is_free());
    }
}
