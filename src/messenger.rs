/*! The `Messenger`: owns the friend roster and the local identity, and
drives both the public API and the per-tick lifecycle driver.

One top-level owner holding a `Vec` of per-peer records plus whatever
collaborator handles (here, `Transport` and `FriendRequestSubsystem`)
it needs to act on their behalf.
*/

use std::time::Instant;

use config::{MessengerOptions, FILE_ID_LENGTH, MAX_FILENAME_LENGTH, MAX_FRIEND_REQUEST_LENGTH, MAX_MESSAGE_LENGTH};
use crypto::{random_bytes, PublicKey};
use dispatcher::{self, Dispatched};
use error::*;
use events::{Events, FileControlKind};
use friend::{decode_file_number, encode_file_number, DeviceStatus, Friend, FriendStatus};
use friend_request::{FriendRequestHandler, FriendRequestSubsystem};
use identity::{FriendAddress, SelfIdentity, UserStatus};
use packet::{self, FileControlOp, FileDirection, MessageKind, Packet};
use transport::{ConnectionHandle, ConnectionKind, ConnectionStatus, Transport};

/// Owns the roster, the local identity and the two external
/// collaborators: a `Transport` and a `FriendRequestSubsystem`.
/// Generic over both rather than boxed as trait objects, since the
/// receipt queue (`friend::receipts::ReceiptQueue::drain_acknowledged`)
/// needs a concretely sized `Transport` to hand to its own generic
/// parameter, rather than boxing it as a trait object.
pub struct Messenger<T: Transport, R: FriendRequestSubsystem> {
    identity: SelfIdentity,
    options: MessengerOptions,
    friends: Vec<Option<Friend>>,
    events: Events,
    transport: T,
    friend_requests: R,
}

impl<T: Transport, R: FriendRequestSubsystem> Messenger<T, R> {
    /// Build a Messenger for a fresh identity.
    pub fn new(transport: T, friend_requests: R, options: MessengerOptions) -> Self {
        Messenger {
            identity: SelfIdentity::new(),
            options,
            friends: Vec::new(),
            events: Events::new(),
            transport,
            friend_requests,
        }
    }

    /// Build a Messenger restoring a previously saved identity (used by
    /// `state::load`).
    pub fn with_identity(identity: SelfIdentity, transport: T, friend_requests: R, options: MessengerOptions) -> Self {
        Messenger { identity, options, friends: Vec::new(), events: Events::new(), transport, friend_requests }
    }

    /// The local identity.
    pub fn identity(&self) -> &SelfIdentity {
        &self.identity
    }

    /// The local identity, mutable (nickname/status message/user status edits).
    pub fn identity_mut(&mut self) -> &mut SelfIdentity {
        &mut self.identity
    }

    /// Application callback slots.
    pub fn events_mut(&mut self) -> &mut Events {
        &mut self.events
    }

    /// `numfriends`: one past the highest occupied slot.
    pub fn num_friends(&self) -> usize {
        self.friends.iter().rposition(Option::is_some).map_or(0, |i| i + 1)
    }

    /// Friend record at `index`, if any.
    pub fn friend(&self, index: usize) -> Option<&Friend> {
        self.friends.get(index).and_then(|f| f.as_ref())
    }

    /// Raw friend slots, including empty ones, for `state::save`.
    pub(crate) fn friends_raw(&self) -> &[Option<Friend>] {
        &self.friends
    }

    /// Friend record at `index`, mutable, for `state::load` to fill in
    /// fields no public setter reaches (e.g. restoring an observed name
    /// before the friend has ever sent a `Nickname` packet).
    pub(crate) fn friend_mut_for_state(&mut self, index: usize) -> Option<&mut Friend> {
        self.friends.get_mut(index).and_then(|f| f.as_mut())
    }

    fn friend_mut(&mut self, index: usize) -> Result<&mut Friend, InvalidFriend> {
        self.friends
            .get_mut(index)
            .and_then(|f| f.as_mut())
            .ok_or(InvalidFriend::NotFound { index })
    }

    fn find_by_key(&self, pk: PublicKey) -> Option<usize> {
        self.friends
            .iter()
            .position(|f| f.as_ref().map_or(false, |f| f.primary_public_key() == pk))
    }

    fn allocate_slot(&mut self) -> usize {
        match self.friends.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                self.friends.push(None);
                self.friends.len() - 1
            }
        }
    }

    // ---- 4.1 Roster management ------------------------------------------------

    /// `add_friend(address, payload)`.
    pub fn add_friend(&mut self, address: FriendAddress, payload: Vec<u8>) -> Result<FriendAddOutcome, FriendAddError> {
        if payload.is_empty() {
            return Err(FriendAddError::NoMessage);
        }
        if payload.len() > MAX_FRIEND_REQUEST_LENGTH {
            return Err(FriendAddError::TooLong { length: payload.len() });
        }
        if !address.checksum_matches() {
            return Err(FriendAddError::BadChecksum);
        }
        let pk = address.public_key();
        if pk == self.identity.public_key() {
            return Err(FriendAddError::OwnKey);
        }

        if let Some(index) = self.find_by_key(pk) {
            let friend = self.friends[index].as_mut().expect("find_by_key returned an occupied index");
            if friend.status() >= FriendStatus::Confirmed {
                return Err(FriendAddError::AlreadySent);
            }
            if friend.request_nospam() != *address.nospam() {
                friend.set_request_nospam(*address.nospam());
                return Ok(FriendAddOutcome::SetNewNospam(index));
            }
            return Err(FriendAddError::AlreadySent);
        }

        let index = self.allocate_slot();
        let mut friend = Friend::new_added(
            pk,
            *address.nospam(),
            payload,
            self.options.friend_request_timeout.as_secs(),
            self.options.max_concurrent_file_pipes,
        );
        let handle = self.transport.connect(pk);
        friend.devices_mut()[0].set_connection(handle);
        self.friends[index] = Some(friend);
        Ok(FriendAddOutcome::Added(index))
    }

    /// `add_friend_norequest(pk)`.
    pub fn add_friend_norequest(&mut self, pk: PublicKey) -> Result<usize, FriendAddError> {
        if pk == self.identity.public_key() {
            return Err(FriendAddError::OwnKey);
        }
        if let Some(index) = self.find_by_key(pk) {
            let friend = self.friends[index].as_ref().expect("find_by_key returned an occupied index");
            if friend.status() >= FriendStatus::Confirmed {
                return Err(FriendAddError::AlreadySent);
            }
        }

        let index = match self.find_by_key(pk) {
            Some(index) => index,
            None => self.allocate_slot(),
        };
        let mut friend = Friend::new_confirmed(pk, self.options.max_concurrent_file_pipes);
        let handle = self.transport.connect(pk);
        friend.devices_mut()[0].set_connection(handle);
        self.friends[index] = Some(friend);
        Ok(index)
    }

    /// `delete_friend(n)`.
    pub fn delete_friend(&mut self, index: usize) -> Result<(), InvalidFriend> {
        let mut friend = self
            .friends
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(InvalidFriend::NotFound { index })?;

        if friend.is_online() {
            let packet = to_bytes_vec_packet(&Packet::Offline(packet::Offline));
            for device in friend.devices() {
                if device.status() == DeviceStatus::Online {
                    if let Some(handle) = device.connection() {
                        let _ = self.transport.send_unreliable(handle, &packet);
                    }
                }
            }
        }
        for device in friend.devices_mut() {
            if let Some(handle) = device.connection() {
                self.transport.close(handle);
            }
            device.clear_connection();
        }
        friend.receipts_mut().clear();

        while self.friends.last().map_or(false, Option::is_none) {
            self.friends.pop();
        }
        Ok(())
    }

    /// `get_friend_connection_status(n)`.
    pub fn get_friend_connection_status(&mut self, index: usize) -> Result<ConnectionKind, InvalidFriend> {
        let online_handles: Vec<ConnectionHandle> = {
            let friend = self.friends.get(index).and_then(|f| f.as_ref()).ok_or(InvalidFriend::NotFound { index })?;
            if !friend.is_online() {
                return Ok(ConnectionKind::None);
            }
            friend.devices().iter().filter(|d| d.status() == DeviceStatus::Online).filter_map(|d| d.connection()).collect()
        };
        let observed = online_handles
            .into_iter()
            .map(|handle| self.transport.connection_kind(handle))
            .find(|kind| *kind != ConnectionKind::Unknown)
            .unwrap_or(ConnectionKind::Unknown);
        let friend = self.friend_mut(index)?;
        Ok(friend.observe_connection_kind(observed))
    }

    // ---- Wiring: transport and friend-request callbacks --------------

    /// Record a raw connectivity edge for one friend's device, as reported
    /// by the transport's own per-connection status-change callback, with
    /// friend-index/device-index threaded through.
    ///
    /// `Connected` advances a not-yet-`Confirmed` friend to `Confirmed`
    /// and sends the bootstrap `Online` ping on that device — the
    /// event that lets the peer's dispatcher in turn mark *us* online.
    /// `NotConnected` runs the `Online -> !Online` transition for the
    /// affected device if it was the friend's last one up.
    pub fn notify_connection_status(&mut self, index: usize, device_index: usize, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected => {
                let handle = {
                    let friend = match self.friends.get_mut(index).and_then(|f| f.as_mut()) {
                        Some(friend) if friend.status() != FriendStatus::NoFriend => friend,
                        _ => return,
                    };
                    friend.confirm_device(device_index);
                    friend.devices().get(device_index).and_then(|d| d.connection())
                };
                if let Some(handle) = handle {
                    let packet_bytes = to_bytes_vec_packet(&Packet::Online(packet::Online));
                    let _ = self.transport.send_unreliable(handle, &packet_bytes);
                }
            }
            ConnectionStatus::NotConnected => {
                let dropped_online = {
                    let friend = match self.friends.get_mut(index).and_then(|f| f.as_mut()) {
                        Some(friend) => friend,
                        None => return,
                    };
                    let was_online = friend.is_online();
                    friend.mark_device_offline(device_index);
                    was_online && !friend.is_online()
                };
                if dropped_online {
                    if let Some(cb) = self.events.connection_status_change.as_mut() {
                        cb(index, ConnectionKind::None);
                    }
                }
            }
        }
    }

    /// Duplicate-rejection filter the embedding application hands the
    /// friend-request subsystem at construction: `false` once `pk`
    /// already belongs to a mutually confirmed friend, so a repeat
    /// request from the same key never resurfaces as a new inbound one.
    pub fn accepts_friend_request(&self, pk: PublicKey) -> bool {
        match self.find_by_key(pk) {
            Some(index) => self.friends[index].as_ref().map_or(true, |friend| friend.status() < FriendStatus::Confirmed),
            None => true,
        }
    }

    // ---- 4.2 Outbound presence / messages --------------------------------------

    /// `send_message`/`send_action`.
    pub fn send_message(&mut self, index: usize, kind: MessageKind, bytes: Vec<u8>) -> Result<u32, MessageSendError> {
        if bytes.is_empty() {
            return Err(MessageSendError::NoMessage);
        }
        if bytes.len() > MAX_MESSAGE_LENGTH {
            return Err(MessageSendError::TooLong { length: bytes.len() });
        }
        let friend = self
            .friends
            .get(index)
            .and_then(|f| f.as_ref())
            .ok_or(MessageSendError::InvalidFriend { index })?;
        if !friend.is_online() {
            return Err(MessageSendError::NotOnline { index });
        }

        let packet_bytes = to_bytes_vec_packet(&Packet::Message(packet::Message { kind, bytes: bytes.clone() }));
        let handles: Vec<ConnectionHandle> = friend
            .devices()
            .iter()
            .filter(|d| d.status() == DeviceStatus::Online)
            .filter_map(|d| d.connection())
            .collect();

        let mut last_success = None;
        for handle in handles {
            if let Ok(packet_number) = self.transport.send_reliable(handle, &packet_bytes) {
                last_success = Some(packet_number);
            }
        }
        let packet_number = last_success.ok_or(MessageSendError::SendQueueFull { index })?;

        let friend = self.friend_mut(index).map_err(|_| MessageSendError::InvalidFriend { index })?;
        let message_id = friend.next_message_id();
        friend.receipts_mut().push(packet_number, message_id);
        Ok(message_id)
    }

    /// Set the observed-by-friends nickname (resent on next tick to every
    /// friend via the `sent_flags.name` mechanism).
    pub fn set_name(&mut self, name: String) -> Result<(), PresenceSetError> {
        if name.len() > ::identity::MAX_NAME_LENGTH {
            return Err(PresenceSetError::TooLong { length: name.len() });
        }
        self.identity.nickname = name;
        for friend in self.friends.iter_mut().filter_map(Option::as_mut) {
            friend.sent_flags_mut().name = true;
        }
        Ok(())
    }

    /// Set the status message (resent on next tick).
    pub fn set_status_message(&mut self, message: String) -> Result<(), PresenceSetError> {
        if message.len() > ::identity::MAX_STATUS_MESSAGE_LENGTH {
            return Err(PresenceSetError::TooLong { length: message.len() });
        }
        self.identity.status_message = message;
        for friend in self.friends.iter_mut().filter_map(Option::as_mut) {
            friend.sent_flags_mut().status_message = true;
        }
        Ok(())
    }

    /// Set the user status (resent on next tick).
    pub fn set_user_status(&mut self, status: UserStatus) {
        self.identity.user_status = status;
        for friend in self.friends.iter_mut().filter_map(Option::as_mut) {
            friend.sent_flags_mut().user_status = true;
        }
    }

    /// Set the outgoing typing indicator for one friend (resent on next tick).
    pub fn set_typing(&mut self, index: usize, typing: bool) -> Result<(), InvalidFriend> {
        let friend = self.friend_mut(index)?;
        friend.set_own_typing(typing);
        Ok(())
    }

    // ---- 4.3 File transfer ------------------------------------------------------

    /// `new_filesender`.
    pub fn new_filesender(&mut self, index: usize, size: u64, file_type: u32, name: Vec<u8>) -> Result<u32, FileSendError> {
        if name.len() > MAX_FILENAME_LENGTH {
            return Err(FileSendError::TooLong { length: name.len() });
        }
        let friend = self
            .friends
            .get_mut(index)
            .and_then(|f| f.as_mut())
            .ok_or(FileSendError::InvalidFriend { index })?;
        if !friend.is_online() {
            return Err(FileSendError::NotOnline { index });
        }
        let slot_index = friend.free_outgoing_slot().ok_or(FileSendError::NoSlots { index })?;

        let mut id = [0u8; FILE_ID_LENGTH];
        random_bytes(&mut id);
        friend.outgoing_files_mut()[slot_index].start_outgoing(size, file_type, id, name.clone());
        friend.note_outgoing_slot_started();

        let request = packet::FileSendRequest { slot: slot_index as u8, file_type, size, id, name };
        let packet_bytes = to_bytes_vec_packet(&Packet::FileSendRequest(request));
        self.send_to_online_devices(index, &packet_bytes);

        Ok(encode_file_number(false, slot_index))
    }

    /// `file_control`.
    pub fn file_control(&mut self, index: usize, file_number: u32, op: FileControlOp) -> Result<(), FileControlError> {
        let friend = self
            .friends
            .get_mut(index)
            .and_then(|f| f.as_mut())
            .ok_or(FileControlError::InvalidFileNumber(InvalidFileNumber::InvalidFriend { index }))?;
        if !friend.is_online() {
            return Err(FileControlError::NotOnline { index });
        }
        let max_slots = friend.outgoing_files().len();
        let (incoming, slot_index) = decode_file_number(file_number, max_slots)
            .ok_or(FileControlError::InvalidFileNumber(InvalidFileNumber::NoSuchTransfer { file_number }))?;

        let direction;
        if incoming {
            let slot = &mut friend.incoming_files_mut()[slot_index];
            match op {
                FileControlOp::Accept => slot.accept_incoming(true)?,
                FileControlOp::Pause => slot.pause(true)?,
                FileControlOp::Kill => slot.kill(),
                FileControlOp::Seek { .. } => return Err(FileControlError::BadControl { opcode: 0 }),
            }
            direction = FileDirection::Receive;
        } else {
            let slot = &mut friend.outgoing_files_mut()[slot_index];
            match op {
                FileControlOp::Accept => slot.resume_outgoing()?,
                FileControlOp::Pause => slot.pause(true)?,
                FileControlOp::Kill => {
                    slot.kill();
                    friend.note_outgoing_slot_freed();
                }
                FileControlOp::Seek { .. } => return Err(FileControlError::BadControl { opcode: 0 }),
            }
            direction = FileDirection::Send;
        }

        let wire = packet::FileControl { direction, slot: slot_index as u8, op };
        let packet_bytes = to_bytes_vec_packet(&Packet::FileControl(wire));
        self.send_to_online_devices(index, &packet_bytes);
        Ok(())
    }

    /// `file_seek`.
    pub fn file_seek(&mut self, index: usize, file_number: u32, position: u64) -> Result<(), FileSeekError> {
        let friend = self
            .friends
            .get_mut(index)
            .and_then(|f| f.as_mut())
            .ok_or(FileSeekError::InvalidFileNumber(InvalidFileNumber::InvalidFriend { index }))?;
        let max_slots = friend.incoming_files().len();
        let (incoming, slot_index) = decode_file_number(file_number, max_slots)
            .ok_or(FileSeekError::InvalidFileNumber(InvalidFileNumber::NoSuchTransfer { file_number }))?;
        if !incoming {
            return Err(FileSeekError::BadState);
        }
        friend.incoming_files_mut()[slot_index].seek(position)?;

        let wire = packet::FileControl { direction: FileDirection::Receive, slot: slot_index as u8, op: FileControlOp::Seek { position } };
        let packet_bytes = to_bytes_vec_packet(&Packet::FileControl(wire));
        self.send_to_online_devices(index, &packet_bytes);
        Ok(())
    }

    /// `file_data`.
    pub fn file_data(&mut self, index: usize, file_number: u32, position: u64, bytes: Vec<u8>) -> Result<bool, FileDataError> {
        let min_slots_free = self.options.min_slots_free;
        let friend = self
            .friends
            .get_mut(index)
            .and_then(|f| f.as_mut())
            .ok_or(FileDataError::InvalidFileNumber(InvalidFileNumber::InvalidFriend { index }))?;
        if !friend.is_online() {
            return Err(FileDataError::NotOnline { index });
        }
        let max_slots = friend.outgoing_files().len();
        let (incoming, slot_index) = decode_file_number(file_number, max_slots)
            .ok_or(FileDataError::InvalidFileNumber(InvalidFileNumber::NoSuchTransfer { file_number }))?;
        if incoming {
            return Err(FileDataError::InvalidFileNumber(InvalidFileNumber::NoSuchTransfer { file_number }));
        }

        let handle = friend
            .devices()
            .iter()
            .filter(|d| d.status() == DeviceStatus::Online)
            .filter_map(|d| d.connection())
            .next()
            .ok_or(FileDataError::NotOnline { index })?;
        let free_slots_ok = self.transport.free_send_slots(handle) >= min_slots_free;

        let length = bytes.len();
        let is_last = friend.outgoing_files()[slot_index].validate_chunk(position, length, true, free_slots_ok)?;

        let wire = packet::FileData { slot: slot_index as u8, chunk: bytes };
        let packet_bytes = to_bytes_vec_packet(&Packet::FileData(wire));
        let packet_number = match self.transport.send_reliable(handle, &packet_bytes) {
            Ok(packet_number) => packet_number,
            Err(_) => return Err(FileDataError::SendQueueFull { index }),
        };

        let slot = &mut friend.outgoing_files_mut()[slot_index];
        slot.commit_chunk(length, is_last);
        if is_last {
            slot.set_last_packet_number(packet_number);
        }
        Ok(is_last)
    }

    fn send_to_online_devices(&mut self, index: usize, packet_bytes: &[u8]) {
        let handles: Vec<ConnectionHandle> = match self.friends.get(index).and_then(|f| f.as_ref()) {
            Some(friend) => friend
                .devices()
                .iter()
                .filter(|d| d.status() == DeviceStatus::Online)
                .filter_map(|d| d.connection())
                .collect(),
            None => return,
        };
        for handle in handles {
            let _ = self.transport.send_reliable(handle, packet_bytes);
        }
    }

    // ---- Inbound packets --------------------------------------------------------

    /// Hand one raw inbound packet from `device_index` of friend `index` to
    /// the dispatcher, firing whatever application upcall results.
    pub fn handle_packet(&mut self, index: usize, device_index: usize, raw: &[u8]) {
        let dispatched = match self.friends.get_mut(index).and_then(|f| f.as_mut()) {
            Some(friend) => dispatcher::dispatch(friend, device_index, raw),
            None => return,
        };
        if let Some(event) = dispatched {
            self.fire(index, event);
        }
    }

    fn fire(&mut self, index: usize, event: Dispatched) {
        match event {
            Dispatched::None => {}
            Dispatched::WentOnline => {
                if let Some(cb) = self.events.connection_status_change.as_mut() {
                    cb(index, ConnectionKind::Unknown);
                }
            }
            Dispatched::NameChanged => {
                if let Some(friend) = self.friend(index) {
                    let name = friend.name().to_vec();
                    if let Some(cb) = self.events.name_change.as_mut() {
                        cb(index, &name);
                    }
                }
            }
            Dispatched::StatusMessageChanged => {
                if let Some(friend) = self.friend(index) {
                    let message = friend.status_message().to_vec();
                    if let Some(cb) = self.events.status_message_change.as_mut() {
                        cb(index, &message);
                    }
                }
            }
            Dispatched::UserStatusChanged => {
                if let Some(friend) = self.friend(index) {
                    let status = friend.user_status();
                    if let Some(cb) = self.events.user_status_change.as_mut() {
                        cb(index, status);
                    }
                }
            }
            Dispatched::TypingChanged => {
                if let Some(friend) = self.friend(index) {
                    let typing = friend.is_typing();
                    if let Some(cb) = self.events.typing_change.as_mut() {
                        cb(index, typing);
                    }
                }
            }
            Dispatched::Message(kind, bytes) => {
                if let Some(cb) = self.events.friend_message.as_mut() {
                    cb(index, kind, &bytes);
                }
            }
            Dispatched::FileSendRequest { slot, file_type, size, name } => {
                if let Some(cb) = self.events.file_sendrequest.as_mut() {
                    cb(index, encode_file_number(true, slot), file_type, size, &name);
                }
            }
            Dispatched::FileControlApplied { slot, direction, op } => {
                let file_number = match direction {
                    FileDirection::Send => encode_file_number(true, slot),
                    FileDirection::Receive => encode_file_number(false, slot),
                };
                let kind = match op {
                    FileControlOp::Accept => FileControlKind::Accept,
                    FileControlOp::Pause => FileControlKind::Pause,
                    FileControlOp::Kill => FileControlKind::Kill,
                    FileControlOp::Seek { .. } => return,
                };
                if let Some(cb) = self.events.file_control.as_mut() {
                    cb(index, file_number, kind);
                }
            }
            Dispatched::FileData { slot, position, bytes, terminal } => {
                let file_number = encode_file_number(true, slot);
                if let Some(cb) = self.events.file_data.as_mut() {
                    cb(index, file_number, position, &bytes);
                }
                if terminal {
                    if let Some(cb) = self.events.file_data.as_mut() {
                        cb(index, file_number, position + bytes.len() as u64, &[]);
                    }
                }
            }
            Dispatched::Msi(bytes) => {
                if let Some(cb) = self.events.msi_packet.as_mut() {
                    cb(index, &bytes);
                }
            }
            Dispatched::Custom { id, data, channel } => {
                let cb = match channel {
                    packet::CustomChannel::Lossy => self.events.lossy_packet.as_mut(),
                    packet::CustomChannel::Lossless => self.events.lossless_packet.as_mut(),
                };
                if let Some(cb) = cb {
                    cb(index, id, &data);
                }
            }
        }
    }

    // ---- 4.6 Lifecycle driver ---------------------------------------------------

    /// Run one pass of the lifecycle driver over every friend.
    pub fn tick(&mut self, now: Instant) {
        for index in 0..self.friends.len() {
            self.tick_one(index, now);
        }
    }

    fn tick_one(&mut self, index: usize, now: Instant) {
        let status = match self.friends.get(index).and_then(|f| f.as_ref()) {
            Some(friend) => friend.status(),
            None => return,
        };
        match status {
            FriendStatus::Added => self.tick_request_send(index, now),
            FriendStatus::Requested => self.tick_request_timeout(index, now),
            FriendStatus::Online => self.tick_online(index, now),
            FriendStatus::NoFriend | FriendStatus::Confirmed => {}
        }
    }

    fn tick_request_send(&mut self, index: usize, now: Instant) {
        let (pk, payload) = match self.friends.get(index).and_then(|f| f.as_ref()) {
            Some(friend) => (friend.primary_public_key(), friend.request_payload().to_vec()),
            None => return,
        };
        if self.friend_requests.send_request(pk, &payload).is_ok() {
            if let Some(friend) = self.friends.get_mut(index).and_then(|f| f.as_mut()) {
                friend.record_request_sent(now);
            }
        }
    }

    fn tick_request_timeout(&mut self, index: usize, now: Instant) {
        let friend = match self.friends.get_mut(index).and_then(|f| f.as_mut()) {
            Some(friend) => friend,
            None => return,
        };
        let elapsed_timeout = friend
            .request_last_sent()
            .map_or(false, |sent| now.duration_since(sent).as_secs() > friend.request_timeout_secs());
        if elapsed_timeout {
            friend.revert_request_timeout();
        }
    }

    fn tick_online(&mut self, index: usize, now: Instant) {
        self.tick_resend_presence(index);
        self.tick_debounce_connection(index);
        self.tick_drain_receipts(index);
        self.tick_drive_file_chunks(index);
        if let Some(friend) = self.friends.get_mut(index).and_then(|f| f.as_mut()) {
            friend.touch_last_seen(now);
        }
    }

    fn tick_resend_presence(&mut self, index: usize) {
        let (name, status_message, user_status, own_typing, flags) = {
            let identity = &self.identity;
            let friend = match self.friends.get(index).and_then(|f| f.as_ref()) {
                Some(friend) => friend,
                None => return,
            };
            (
                identity.nickname.clone(),
                identity.status_message.clone(),
                identity.user_status,
                friend.own_typing(),
                friend.sent_flags(),
            )
        };

        if flags.name {
            let bytes = to_bytes_vec_packet(&Packet::Nickname(packet::Nickname(name.into_bytes())));
            self.send_to_online_devices(index, &bytes);
        }
        if flags.status_message {
            let bytes = to_bytes_vec_packet(&Packet::StatusMessage(packet::StatusMessage(status_message.into_bytes())));
            self.send_to_online_devices(index, &bytes);
        }
        if flags.user_status {
            let bytes = to_bytes_vec_packet(&Packet::UserStatus(packet::UserStatusPacket(user_status)));
            self.send_to_online_devices(index, &bytes);
        }
        if flags.typing {
            let bytes = to_bytes_vec_packet(&Packet::Typing(packet::Typing(own_typing)));
            self.send_to_online_devices(index, &bytes);
        }
        if let Some(friend) = self.friends.get_mut(index).and_then(|f| f.as_mut()) {
            *friend.sent_flags_mut() = Default::default();
        }
    }

    fn tick_debounce_connection(&mut self, index: usize) {
        let transport = &self.transport;
        let friend = match self.friends.get_mut(index).and_then(|f| f.as_mut()) {
            Some(friend) => friend,
            None => return,
        };
        let observed = friend
            .devices()
            .iter()
            .filter(|d| d.status() == DeviceStatus::Online)
            .filter_map(|d| d.connection())
            .map(|handle| transport.connection_kind(handle))
            .find(|kind| *kind != ConnectionKind::Unknown)
            .unwrap_or(ConnectionKind::Unknown);
        friend.observe_connection_kind(observed);
    }

    fn tick_drain_receipts(&mut self, index: usize) {
        let transport = &self.transport;
        let handle = match self.friends.get(index).and_then(|f| f.as_ref()) {
            Some(friend) => friend
                .devices()
                .iter()
                .filter(|d| d.status() == DeviceStatus::Online)
                .filter_map(|d| d.connection())
                .next(),
            None => return,
        };
        let handle = match handle {
            Some(handle) => handle,
            None => return,
        };
        let mut acknowledged = Vec::new();
        if let Some(friend) = self.friends.get_mut(index).and_then(|f| f.as_mut()) {
            friend.receipts_mut().drain_acknowledged(transport, handle, |message_id| acknowledged.push(message_id));
        }
        for message_id in acknowledged {
            if let Some(cb) = self.events.read_receipt.as_mut() {
                cb(index, message_id);
            }
        }
    }

    fn tick_drive_file_chunks(&mut self, index: usize) {
        let handle = match self.friends.get(index).and_then(|f| f.as_ref()) {
            Some(friend) => friend
                .devices()
                .iter()
                .filter(|d| d.status() == DeviceStatus::Online)
                .filter_map(|d| d.connection())
                .next(),
            None => return,
        };
        let handle = match handle {
            Some(handle) => handle,
            None => return,
        };
        if self.friends.get(index).and_then(|f| f.as_ref()).map_or(true, |f| f.num_sending_files() == 0) {
            return;
        }

        let free_slots = self.transport.free_send_slots(handle);
        let mut budget = free_slots.saturating_sub(self.options.min_slots_free);
        let congested = self.transport.is_congested(handle);

        let slot_count = self
            .friends
            .get(index)
            .and_then(|f| f.as_ref())
            .map_or(0, |f| f.outgoing_files().len());

        for slot_index in 0..slot_count {
            let friend = match self.friends.get_mut(index).and_then(|f| f.as_mut()) {
                Some(friend) => friend,
                None => return,
            };
            let slot_status = friend.outgoing_files()[slot_index].status();
            if slot_status == ::friend::file_transfer::FileStatus::Finished {
                let last_packet = friend.outgoing_files()[slot_index].last_packet_number();
                let acked = match last_packet {
                    Some(packet) => self.transport.is_acknowledged(handle, packet),
                    None => false,
                };
                if acked {
                    let file_number = encode_file_number(false, slot_index);
                    friend.outgoing_files_mut()[slot_index].kill();
                    friend.note_outgoing_slot_freed();
                    if let Some(cb) = self.events.file_reqchunk.as_mut() {
                        cb(index, file_number, 0, 0);
                    }
                }
                continue;
            }

            while budget > 0 && !congested {
                let friend = match self.friends.get_mut(index).and_then(|f| f.as_mut()) {
                    Some(friend) => friend,
                    None => return,
                };
                match friend.outgoing_files_mut()[slot_index].next_chunk_request() {
                    Some((position, length)) => {
                        budget -= 1;
                        let file_number = encode_file_number(false, slot_index);
                        if let Some(cb) = self.events.file_reqchunk.as_mut() {
                            cb(index, file_number, position, length);
                        }
                        if length == 0 {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

impl<T: Transport, R: FriendRequestSubsystem> FriendRequestHandler for Messenger<T, R> {
    /// Forward an inbound request, already past the subsystem's own
    /// `accepts_friend_request` filter, to the application.
    fn on_request(&mut self, pk: PublicKey, payload: &[u8]) {
        if let Some(cb) = self.events.friend_request.as_mut() {
            cb(pk.as_ref(), payload);
        }
    }
}

fn to_bytes_vec_packet(packet: &Packet) -> Vec<u8> {
    ::binary_io::to_bytes_vec(packet, packet_capacity(packet))
}

fn packet_capacity(packet: &Packet) -> usize {
    // Generous fixed upper bound per packet kind; avoids a second pass to
    // compute an exact length before encoding.
    match *packet {
        Packet::Online(_) | Packet::Offline(_) => 1,
        Packet::Nickname(ref p) => 1 + p.0.len(),
        Packet::StatusMessage(ref p) => 1 + p.0.len(),
        Packet::UserStatus(_) => 2,
        Packet::Typing(_) => 2,
        Packet::Message(ref p) => 1 + p.bytes.len(),
        Packet::InviteGroupchat(ref b) => 1 + b.len(),
        Packet::FileSendRequest(ref p) => 1 + 1 + 4 + 8 + FILE_ID_LENGTH + p.name.len(),
        Packet::FileControl(_) => 1 + 1 + 1 + 1 + 8,
        Packet::FileData(ref p) => 1 + 1 + p.chunk.len(),
        Packet::Msi(ref p) => 1 + p.0.len(),
        Packet::Custom(ref p) => 1 + p.data.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::time::Duration;

    use binary_io::FromBytes;
    use crypto::gen_keypair;
    use friend_request::FriendRequestSendError;
    use identity::{FriendAddress, FRIEND_ADDRESS_BYTES};
    use transport::{ConnectionKind, PacketNumber, TransportError};

    struct RecordingTransport {
        next_handle: Cell<u64>,
        next_packet: Cell<u64>,
        sent: RefCell<Vec<(u64, Vec<u8>, bool)>>,
        acked: RefCell<HashMap<u64, bool>>,
        fail_reliable_sends: Cell<bool>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            RecordingTransport {
                next_handle: Cell::new(0),
                next_packet: Cell::new(0),
                sent: RefCell::new(Vec::new()),
                acked: RefCell::new(HashMap::new()),
                fail_reliable_sends: Cell::new(false),
            }
        }

        fn sent_ids(&self) -> Vec<u8> {
            self.sent.borrow().iter().map(|(_, bytes, _)| bytes[0]).collect()
        }
    }

    impl Transport for RecordingTransport {
        fn connect(&mut self, _pk: PublicKey) -> u64 {
            let handle = self.next_handle.get();
            self.next_handle.set(handle + 1);
            handle
        }
        fn close(&mut self, _handle: u64) {}
        fn status(&self, _handle: u64) -> ConnectionStatus {
            ConnectionStatus::Connected
        }
        fn connection_kind(&self, _handle: u64) -> ConnectionKind {
            ConnectionKind::Udp
        }
        fn send_reliable(&mut self, handle: u64, data: &[u8]) -> Result<PacketNumber, TransportError> {
            if self.fail_reliable_sends.get() {
                return Err(TransportError::QueueFull);
            }
            let n = self.next_packet.get();
            self.next_packet.set(n + 1);
            self.sent.borrow_mut().push((handle, data.to_vec(), true));
            Ok(PacketNumber(n))
        }
        fn send_unreliable(&mut self, handle: u64, data: &[u8]) -> Result<(), TransportError> {
            self.sent.borrow_mut().push((handle, data.to_vec(), false));
            Ok(())
        }
        fn is_acknowledged(&self, _handle: u64, packet: PacketNumber) -> bool {
            self.acked.borrow().get(&packet.0).cloned().unwrap_or(false)
        }
        fn free_send_slots(&self, _handle: u64) -> usize {
            100
        }
        fn is_congested(&self, _handle: u64) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct FakeFriendRequests {
        sent: Vec<(PublicKey, Vec<u8>)>,
        fail: bool,
    }

    impl FriendRequestSubsystem for FakeFriendRequests {
        fn send_request(&mut self, pk: PublicKey, payload: &[u8]) -> Result<(), FriendRequestSendError> {
            if self.fail {
                return Err(FriendRequestSendError::QueueFull);
            }
            self.sent.push((pk, payload.to_vec()));
            Ok(())
        }
    }

    fn messenger() -> Messenger<RecordingTransport, FakeFriendRequests> {
        Messenger::new(RecordingTransport::new(), FakeFriendRequests::default(), MessengerOptions::default())
    }

    fn bring_online(m: &mut Messenger<RecordingTransport, FakeFriendRequests>, index: usize) {
        m.notify_connection_status(index, 0, ConnectionStatus::Connected);
        let bytes = to_bytes_vec_packet(&Packet::Online(packet::Online));
        m.handle_packet(index, 0, &bytes);
    }

    #[test]
    fn add_friend_rejects_bad_payload_and_own_key() {
        let mut m = messenger();
        let (pk, _) = gen_keypair();
        let address = FriendAddress::new(pk);

        assert_eq!(m.add_friend(address, Vec::new()).unwrap_err(), FriendAddError::NoMessage);
        assert_eq!(
            m.add_friend(address, vec![0u8; MAX_FRIEND_REQUEST_LENGTH + 1]).unwrap_err(),
            FriendAddError::TooLong { length: MAX_FRIEND_REQUEST_LENGTH + 1 }
        );

        let own_address = FriendAddress::new(m.identity().public_key());
        assert_eq!(m.add_friend(own_address, b"hi".to_vec()).unwrap_err(), FriendAddError::OwnKey);

        let mut bytes = ::binary_io::to_bytes_vec(&address, FRIEND_ADDRESS_BYTES);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let (_, corrupted) = FriendAddress::from_bytes(&bytes).unwrap();
        assert_eq!(m.add_friend(corrupted, b"hi".to_vec()).unwrap_err(), FriendAddError::BadChecksum);
    }

    #[test]
    fn add_friend_key_collision_updates_nospam_scenario_1() {
        let mut m = messenger();
        let (pk, _) = gen_keypair();
        let address1 = FriendAddress::new(pk);
        let index = match m.add_friend(address1, b"hi".to_vec()).unwrap() {
            FriendAddOutcome::Added(index) => index,
            other => panic!("expected Added, got {:?}", other),
        };

        let mut address2 = address1;
        address2.set_nospam(::identity::NoSpam::new());
        let outcome = m.add_friend(address2, b"hi again".to_vec()).unwrap();
        assert_eq!(outcome, FriendAddOutcome::SetNewNospam(index));
        assert_eq!(m.friend(index).unwrap().request_nospam(), *address2.nospam());

        // Re-adding with the nospam now on file is a plain repeat, not
        // another collision.
        assert_eq!(m.add_friend(address2, b"hi a third time".to_vec()).unwrap_err(), FriendAddError::AlreadySent);
    }

    #[test]
    fn friend_request_retries_and_doubles_timeout_scenario_2() {
        let options = MessengerOptions { friend_request_timeout: Duration::from_secs(1), ..MessengerOptions::default() };
        let mut m = Messenger::new(RecordingTransport::new(), FakeFriendRequests::default(), options);
        let (pk, _) = gen_keypair();
        let address = FriendAddress::new(pk);
        let index = match m.add_friend(address, b"hi".to_vec()).unwrap() {
            FriendAddOutcome::Added(index) => index,
            other => panic!("expected Added, got {:?}", other),
        };

        let t0 = Instant::now();
        m.tick(t0);
        assert_eq!(m.friend(index).unwrap().status(), FriendStatus::Requested);

        m.tick(t0 + Duration::from_millis(500));
        assert_eq!(m.friend(index).unwrap().status(), FriendStatus::Requested, "not yet timed out");

        m.tick(t0 + Duration::from_secs(2));
        assert_eq!(m.friend(index).unwrap().status(), FriendStatus::Added, "reverts after timeout");
        assert_eq!(m.friend(index).unwrap().request_timeout_secs(), 2, "timeout doubled");

        m.tick(t0 + Duration::from_secs(2));
        assert_eq!(m.friend(index).unwrap().status(), FriendStatus::Requested, "second attempt sent");
    }

    #[test]
    fn notify_connection_status_confirms_and_sends_online_ping() {
        let mut m = messenger();
        let (pk, _) = gen_keypair();
        let address = FriendAddress::new(pk);
        let index = match m.add_friend(address, b"hi".to_vec()).unwrap() {
            FriendAddOutcome::Added(index) => index,
            other => panic!("expected Added, got {:?}", other),
        };

        m.notify_connection_status(index, 0, ConnectionStatus::Connected);
        assert_eq!(m.friend(index).unwrap().status(), FriendStatus::Confirmed);
        assert_eq!(m.friend(index).unwrap().devices()[0].status(), DeviceStatus::Confirmed);
        assert_eq!(m.transport.sent_ids(), vec![::packet::id::ONLINE]);

        // Receiving the peer's own Online packet on the same device now
        // completes the handshake on our side too.
        let online_bytes = to_bytes_vec_packet(&Packet::Online(packet::Online));
        m.handle_packet(index, 0, &online_bytes);
        assert_eq!(m.friend(index).unwrap().status(), FriendStatus::Online);

        // The transport reporting the device down again drops us back to
        // Confirmed and fires the connection-status-change upcall with None.
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        m.events_mut().connection_status_change = Some(Box::new(move |idx, kind| seen2.borrow_mut().push((idx, kind))));
        m.notify_connection_status(index, 0, ConnectionStatus::NotConnected);
        assert_eq!(m.friend(index).unwrap().status(), FriendStatus::Confirmed);
        assert_eq!(*seen.borrow(), vec![(index, ConnectionKind::None)]);
    }

    #[test]
    fn accepts_friend_request_rejects_confirmed_duplicates() {
        let mut m = messenger();
        let (pk, _) = gen_keypair();
        assert!(m.accepts_friend_request(pk));

        m.add_friend_norequest(pk).unwrap();
        assert!(!m.accepts_friend_request(pk));
    }

    #[test]
    fn on_request_forwards_to_application_callback() {
        let mut m = messenger();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        m.events_mut().friend_request = Some(Box::new(move |pk: &[u8], payload: &[u8]| {
            seen2.borrow_mut().push((pk.to_vec(), payload.to_vec()));
        }));

        let (pk, _) = gen_keypair();
        FriendRequestHandler::on_request(&mut m, pk, b"hello there");
        assert_eq!(*seen.borrow(), vec![(pk.as_ref().to_vec(), b"hello there".to_vec())]);
    }

    #[test]
    fn send_message_while_offline_is_rejected() {
        let mut m = messenger();
        let (pk, _) = gen_keypair();
        let index = m.add_friend_norequest(pk).unwrap();
        assert_eq!(
            m.send_message(index, MessageKind::Normal, b"hi".to_vec()).unwrap_err(),
            MessageSendError::NotOnline { index }
        );
    }

    #[test]
    fn message_receipts_drain_in_order_scenario_6() {
        let mut m = messenger();
        let (pk, _) = gen_keypair();
        let index = m.add_friend_norequest(pk).unwrap();
        bring_online(&mut m, index);

        let m1 = m.send_message(index, MessageKind::Normal, b"one".to_vec()).unwrap();
        let m2 = m.send_message(index, MessageKind::Normal, b"two".to_vec()).unwrap();
        let m3 = m.send_message(index, MessageKind::Normal, b"three".to_vec()).unwrap();
        assert_eq!(m.friend(index).unwrap().receipts().len(), 3);

        // Transport acks out of order: m2 then m1 then m3. The packet
        // numbers are 0, 1, 2 respectively since they're the first three
        // reliable sends on this connection (after the Online ack itself,
        // which is unreliable and consumes no packet number).
        m.transport.acked.borrow_mut().insert(1, true);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        m.events_mut().read_receipt = Some(Box::new(move |idx, id| seen2.borrow_mut().push((idx, id))));
        m.tick(Instant::now());
        assert!(seen.borrow().is_empty(), "m1 still head-of-line");

        m.transport.acked.borrow_mut().insert(0, true);
        m.tick(Instant::now());
        assert_eq!(*seen.borrow(), vec![(index, m1), (index, m2)]);

        m.transport.acked.borrow_mut().insert(2, true);
        m.tick(Instant::now());
        assert_eq!(*seen.borrow(), vec![(index, m1), (index, m2), (index, m3)]);
        assert!(m.friend(index).unwrap().receipts().is_empty());
    }

    #[test]
    fn zero_length_file_transfer_completes_and_frees_slot() {
        let mut m = messenger();
        let (pk, _) = gen_keypair();
        let index = m.add_friend_norequest(pk).unwrap();
        bring_online(&mut m, index);

        let file_number = m.new_filesender(index, 0, 0, b"empty.bin".to_vec()).unwrap();
        assert_eq!(m.friend(index).unwrap().num_sending_files(), 1);

        // Simulate the peer accepting: a FileControl{Receive, Accept} wire
        // packet addressing our outgoing slot, as the peer's own
        // `file_control(Accept)` call would send us.
        let accept = packet::FileControl { direction: FileDirection::Receive, slot: 0, op: FileControlOp::Accept };
        let accept_bytes = to_bytes_vec_packet(&Packet::FileControl(accept));
        m.handle_packet(index, 0, &accept_bytes);

        let requests = Rc::new(RefCell::new(Vec::new()));
        let requests2 = requests.clone();
        m.events_mut().file_reqchunk = Some(Box::new(move |idx, num, pos, len| requests2.borrow_mut().push((idx, num, pos, len))));
        m.tick(Instant::now());
        assert_eq!(*requests.borrow(), vec![(index, file_number, 0, 0)]);

        let is_last = m.file_data(index, file_number, 0, Vec::new()).unwrap();
        assert!(is_last);

        // Tick again: the Finished slot's last packet is acked immediately
        // by this fake transport, so the driver fires the end-of-stream
        // upcall and frees the slot.
        m.transport.acked.borrow_mut().insert(
            m.transport.next_packet.get() - 1,
            true,
        );
        m.tick(Instant::now());
        assert_eq!(requests.borrow().len(), 2);
        assert_eq!(requests.borrow()[1], (index, file_number, 0, 0));
        assert_eq!(m.friend(index).unwrap().num_sending_files(), 0);
    }

    #[test]
    fn file_data_does_not_mutate_slot_when_send_fails() {
        let mut m = messenger();
        let (pk, _) = gen_keypair();
        let index = m.add_friend_norequest(pk).unwrap();
        bring_online(&mut m, index);

        let file_number = m.new_filesender(index, 10, 0, b"f.bin".to_vec()).unwrap();
        let accept = packet::FileControl { direction: FileDirection::Receive, slot: 0, op: FileControlOp::Accept };
        let accept_bytes = to_bytes_vec_packet(&Packet::FileControl(accept));
        m.handle_packet(index, 0, &accept_bytes);

        let before = m.friend(index).unwrap().outgoing_files()[0].clone();

        m.transport.fail_reliable_sends.set(true);
        let err = m.file_data(index, file_number, 0, vec![1, 2, 3]).unwrap_err();
        assert_eq!(err, FileDataError::SendQueueFull { index });

        let after = m.friend(index).unwrap().outgoing_files()[0].clone();
        assert_eq!(before, after);

        m.transport.fail_reliable_sends.set(false);
        let is_last = m.file_data(index, file_number, 0, vec![1, 2, 3]).unwrap();
        assert!(!is_last);
        assert_eq!(m.friend(index).unwrap().outgoing_files()[0].transferred(), 3);
    }
}
