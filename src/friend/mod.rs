/*! The per-contact roster entry and its devices.

A `Friend` is a per-peer record carrying both identity and
per-connection bookkeeping, owning potentially several `Device`s.
*/

pub mod file_transfer;
pub mod receipts;

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use config::{MAX_STATUS_MESSAGE_LENGTH, MAX_NAME_LENGTH};
use crypto::PublicKey;
use identity::UserStatus;
use transport::{ConnectionHandle, ConnectionKind};

use self::file_transfer::FileTransferSlot;
use self::receipts::ReceiptQueue;

/// Friend-level lifecycle state. Strictly nondecreasing except for
/// the `Confirmed <-> Online` oscillation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum FriendStatus {
    /// Slot is unused.
    NoFriend = 0,
    /// Locally added, request not yet (successfully) sent.
    Added = 1,
    /// Request sent, awaiting the friend's acceptance.
    Requested = 2,
    /// Mutually known, but no device is currently connected.
    Confirmed = 3,
    /// At least one device is connected.
    Online = 4,
}

/// Per-device connection state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceStatus {
    /// No device recorded in this slot.
    NoDev = 0,
    /// A connection attempt is in flight.
    Pending = 1,
    /// Mutually known, but this device isn't connected right now.
    Confirmed = 2,
    /// This device's connection is up and has exchanged an `Online` packet.
    Online = 3,
}

/// One of possibly several connections under a single friend identity.
#[derive(Clone, Debug)]
pub struct Device {
    pk: PublicKey,
    status: DeviceStatus,
    connection: Option<ConnectionHandle>,
}

impl Device {
    /// A new device record, not yet connected.
    pub fn new(pk: PublicKey, status: DeviceStatus) -> Self {
        Device { pk, status, connection: None }
    }

    /// This device's public key.
    pub fn public_key(&self) -> PublicKey {
        self.pk
    }

    /// This device's connection status.
    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    /// The transport handle for this device's connection, if one is open.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    /// Record a freshly opened transport connection.
    pub fn set_connection(&mut self, handle: ConnectionHandle) {
        self.connection = Some(handle);
    }

    /// Clear the connection handle (e.g. on deletion; the transport is
    /// asked to release it separately).
    pub fn clear_connection(&mut self) {
        self.connection = None;
    }

    /// Move this device to `status`.
    pub fn set_status(&mut self, status: DeviceStatus) {
        self.status = status;
    }
}

/// Which per-friend presence field a "needs resend" flag tracks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SentFlags {
    /// Nickname still needs to be (re)sent.
    pub name: bool,
    /// Status message still needs to be (re)sent.
    pub status_message: bool,
    /// User status still needs to be (re)sent.
    pub user_status: bool,
    /// Typing indicator still needs to be (re)sent.
    pub typing: bool,
}

impl SentFlags {
    /// Mark every field as needing a resend.
    pub fn mark_all_dirty(&mut self) {
        *self = SentFlags { name: true, status_message: true, user_status: true, typing: true };
    }
}

/// Fold a `(direction, slot)` pair into the public 32-bit `file_number`
///: outgoing is the bare slot, incoming is
/// `(slot + 1) << 16`.
pub fn encode_file_number(incoming: bool, slot: usize) -> u32 {
    if incoming {
        ((slot as u32) + 1) << 16
    } else {
        slot as u32
    }
}

/// Inverse of [`encode_file_number`](./fn.encode_file_number.html).
/// Returns `None` if the encoded slot index is out of range.
pub fn decode_file_number(file_number: u32, max_slots: usize) -> Option<(bool, usize)> {
    if file_number >> 16 != 0 {
        let slot = ((file_number >> 16) - 1) as usize;
        if slot < max_slots { Some((true, slot)) } else { None }
    } else {
        let slot = file_number as usize;
        if slot < max_slots { Some((false, slot)) } else { None }
    }
}

/// A friend roster entry: identity, devices, presence, receipts and file
/// transfers.
pub struct Friend {
    status: FriendStatus,
    devices: Vec<Device>,

    /// Payload passed to `add_friend`, re-sent until `Requested`/timeout.
    request_payload: Vec<u8>,
    request_nospam: [u8; 4],
    request_last_sent: Option<Instant>,
    request_timeout_secs: u64,

    name: Vec<u8>,
    status_message: Vec<u8>,
    user_status: UserStatus,
    typing: bool,
    own_typing: bool,
    sent_flags: SentFlags,

    next_message_id: u32,
    receipts: ReceiptQueue,

    outgoing_files: Vec<FileTransferSlot>,
    incoming_files: Vec<FileTransferSlot>,
    num_sending_files: usize,

    last_connection_kind: ConnectionKind,
    last_seen: Option<Instant>,
    /// Wall-clock mirror of `last_seen`, in seconds since the Unix epoch.
    /// `Instant` has no epoch to persist; the save format needs one, so
    /// `touch_last_seen` stamps this alongside it.
    last_seen_epoch: u64,
}

impl Friend {
    /// Create a friend in `Added` status with a pending outgoing request.
    /// `num_pipes` sizes both file-slot vectors (`MessengerOptions::max_concurrent_file_pipes`).
    pub fn new_added(pk: PublicKey, nospam: [u8; 4], payload: Vec<u8>, request_timeout_secs: u64, num_pipes: usize) -> Self {
        Friend {
            status: FriendStatus::Added,
            devices: vec![Device::new(pk, DeviceStatus::Pending)],
            request_payload: payload,
            request_nospam: nospam,
            request_last_sent: None,
            request_timeout_secs,
            name: Vec::new(),
            status_message: Vec::new(),
            user_status: UserStatus::None,
            typing: false,
            own_typing: false,
            sent_flags: SentFlags::default(),
            next_message_id: 0,
            receipts: ReceiptQueue::new(),
            outgoing_files: vec![FileTransferSlot::default(); num_pipes],
            incoming_files: vec![FileTransferSlot::default(); num_pipes],
            num_sending_files: 0,
            last_connection_kind: ConnectionKind::None,
            last_seen: None,
            last_seen_epoch: 0,
        }
    }

    /// Create a friend directly in `Confirmed` status (`add_friend_norequest`,
    /// and the state-restore path for already-confirmed friends). `num_pipes`
    /// sizes both file-slot vectors (`MessengerOptions::max_concurrent_file_pipes`).
    pub fn new_confirmed(pk: PublicKey, num_pipes: usize) -> Self {
        Friend {
            status: FriendStatus::Confirmed,
            devices: vec![Device::new(pk, DeviceStatus::Confirmed)],
            request_payload: Vec::new(),
            request_nospam: [0; 4],
            request_last_sent: None,
            request_timeout_secs: 0,
            name: Vec::new(),
            status_message: Vec::new(),
            user_status: UserStatus::None,
            typing: false,
            own_typing: false,
            sent_flags: SentFlags::default(),
            next_message_id: 0,
            receipts: ReceiptQueue::new(),
            outgoing_files: vec![FileTransferSlot::default(); num_pipes],
            incoming_files: vec![FileTransferSlot::default(); num_pipes],
            num_sending_files: 0,
            last_connection_kind: ConnectionKind::None,
            last_seen: None,
            last_seen_epoch: 0,
        }
    }

    /// Current friend-level status.
    pub fn status(&self) -> FriendStatus {
        self.status
    }

    /// `true` iff at least one device is `Online`.
    pub fn is_online(&self) -> bool {
        self.devices.iter().any(|d| d.status() == DeviceStatus::Online)
    }

    /// All devices under this friend.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// All devices under this friend, mutable.
    pub fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    /// Add another device under this (already-known) friend identity.
    pub fn add_device(&mut self, pk: PublicKey, status: DeviceStatus) {
        self.devices.push(Device::new(pk, status));
    }

    /// Primary device's public key (the one `add_friend`/`add_friend_norequest`
    /// was called with).
    pub fn primary_public_key(&self) -> PublicKey {
        self.devices[0].public_key()
    }

    /// Move one device to `Online`, and if this is the friend's first
    /// online device, run the `!Online -> Online` transition:
    /// mark every sent flag dirty so the lifecycle driver republishes
    /// presence.
    pub fn mark_device_online(&mut self, device_index: usize) {
        let was_online = self.is_online();
        if let Some(device) = self.devices.get_mut(device_index) {
            device.set_status(DeviceStatus::Online);
        }
        if !was_online && self.is_online() {
            self.status = FriendStatus::Online;
            self.sent_flags.mark_all_dirty();
        }
    }

    /// Record that the transport reports `device_index`'s connection
    /// usable, advancing a not-yet-`Confirmed` friend to `Confirmed`.
    /// Never downgrades a friend or device that is already further along.
    pub fn confirm_device(&mut self, device_index: usize) {
        if self.status < FriendStatus::Confirmed {
            self.status = FriendStatus::Confirmed;
        }
        if let Some(device) = self.devices.get_mut(device_index) {
            if device.status() == DeviceStatus::Pending || device.status() == DeviceStatus::NoDev {
                device.set_status(DeviceStatus::Confirmed);
            }
        }
    }

    /// Move one device off `Online`. If this was the friend's last online
    /// device, runs the `Online -> !Online` transition: cancels file transfers and receipts.
    pub fn mark_device_offline(&mut self, device_index: usize) {
        if let Some(device) = self.devices.get_mut(device_index) {
            if device.status() == DeviceStatus::Online {
                device.set_status(DeviceStatus::Confirmed);
            }
        }
        if !self.is_online() {
            if self.status == FriendStatus::Online {
                self.status = FriendStatus::Confirmed;
            }
            self.cancel_all_file_transfers();
            self.receipts.clear();
        }
    }

    /// Force every file slot (both directions) back to `None` without
    /// firing terminal upcalls.
    pub fn cancel_all_file_transfers(&mut self) {
        for slot in self.outgoing_files.iter_mut() {
            slot.kill();
        }
        for slot in self.incoming_files.iter_mut() {
            slot.kill();
        }
        self.num_sending_files = 0;
    }

    /// Outgoing (sender-side) file slots.
    pub fn outgoing_files(&self) -> &[FileTransferSlot] {
        &self.outgoing_files
    }

    /// Outgoing (sender-side) file slots, mutable.
    pub fn outgoing_files_mut(&mut self) -> &mut [FileTransferSlot] {
        &mut self.outgoing_files
    }

    /// Incoming (receiver-side) file slots.
    pub fn incoming_files(&self) -> &[FileTransferSlot] {
        &self.incoming_files
    }

    /// Incoming (receiver-side) file slots, mutable.
    pub fn incoming_files_mut(&mut self) -> &mut [FileTransferSlot] {
        &mut self.incoming_files
    }

    /// First free outgoing slot index, if any.
    pub fn free_outgoing_slot(&self) -> Option<usize> {
        self.outgoing_files.iter().position(FileTransferSlot::is_free)
    }

    /// Number of outgoing slots whose status is not `None`.
    pub fn count_sending_files(&self) -> usize {
        self.outgoing_files.iter().filter(|s| !s.is_free()).count()
    }

    /// Cached `num_sending_files` counter, kept in sync by
    /// `note_outgoing_slot_started`/`note_outgoing_slot_freed`.
    pub fn num_sending_files(&self) -> usize {
        self.num_sending_files
    }

    /// Call after starting a new outgoing transfer in a slot.
    pub fn note_outgoing_slot_started(&mut self) {
        self.num_sending_files += 1;
    }

    /// Call after an outgoing slot returns to `None`.
    pub fn note_outgoing_slot_freed(&mut self) {
        self.num_sending_files = self.num_sending_files.saturating_sub(1);
    }

    /// Observed nickname.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Set the observed nickname from an inbound `Nickname` packet,
    /// clamped defensively to the wire limit.
    pub fn set_name(&mut self, mut name: Vec<u8>) {
        name.truncate(MAX_NAME_LENGTH);
        self.name = name;
    }

    /// Observed status message.
    pub fn status_message(&self) -> &[u8] {
        &self.status_message
    }

    /// Set the observed status message from an inbound `StatusMessage` packet.
    pub fn set_status_message(&mut self, mut message: Vec<u8>) {
        message.truncate(MAX_STATUS_MESSAGE_LENGTH);
        self.status_message = message;
    }

    /// Observed user status.
    pub fn user_status(&self) -> UserStatus {
        self.user_status
    }

    /// Set the observed user status from an inbound `UserStatus` packet.
    pub fn set_user_status(&mut self, status: UserStatus) {
        self.user_status = status;
    }

    /// Observed typing flag.
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Set the observed typing flag from an inbound `Typing` packet.
    pub fn set_typing(&mut self, typing: bool) {
        self.typing = typing;
    }

    /// Our own outgoing typing indicator towards this friend.
    pub fn own_typing(&self) -> bool {
        self.own_typing
    }

    /// Set our own outgoing typing indicator, marking it for resend.
    pub fn set_own_typing(&mut self, typing: bool) {
        self.own_typing = typing;
        self.sent_flags.typing = true;
    }

    /// Nospam the outstanding friend request was sent with, replaced (e.g.
    /// after `add_friend` observes a `SetNewNospam` collision).
    pub fn set_request_nospam(&mut self, nospam: [u8; 4]) {
        self.request_nospam = nospam;
    }

    /// Sent flags (what the lifecycle driver still owes this friend).
    pub fn sent_flags(&self) -> SentFlags {
        self.sent_flags
    }

    /// Sent flags, mutable.
    pub fn sent_flags_mut(&mut self) -> &mut SentFlags {
        &mut self.sent_flags
    }

    /// Allocate the next outgoing message id.
    pub fn next_message_id(&mut self) -> u32 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }

    /// This friend's receipt queue.
    pub fn receipts(&self) -> &ReceiptQueue {
        &self.receipts
    }

    /// This friend's receipt queue, mutable.
    pub fn receipts_mut(&mut self) -> &mut ReceiptQueue {
        &mut self.receipts
    }

    /// Friend-request payload stored by `add_friend`.
    pub fn request_payload(&self) -> &[u8] {
        &self.request_payload
    }

    /// Nospam the outstanding friend request was sent with.
    pub fn request_nospam(&self) -> [u8; 4] {
        self.request_nospam
    }

    /// Last time a request was sent, if any.
    pub fn request_last_sent(&self) -> Option<Instant> {
        self.request_last_sent
    }

    /// Current request timeout, doubling on every unacknowledged resend.
    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
    }

    /// Record a request send attempt, advancing to `Requested`.
    pub fn record_request_sent(&mut self, now: Instant) {
        self.status = FriendStatus::Requested;
        self.request_last_sent = Some(now);
    }

    /// Revert to `Added` after a request timeout, doubling the timeout
    /// for the next attempt.
    pub fn revert_request_timeout(&mut self) {
        self.status = FriendStatus::Added;
        self.request_timeout_secs = self.request_timeout_secs.saturating_mul(2);
    }

    /// Cached last-reported connection kind, used to debounce flapping
    ///.
    pub fn last_connection_kind(&self) -> ConnectionKind {
        self.last_connection_kind
    }

    /// Coalesce a freshly observed connection kind with the cached one:
    /// a momentary `Unknown` does not overwrite a previously observed
    /// `Udp`/`Tcp`.
    pub fn observe_connection_kind(&mut self, observed: ConnectionKind) -> ConnectionKind {
        if observed != ConnectionKind::Unknown {
            self.last_connection_kind = observed;
        } else if self.last_connection_kind == ConnectionKind::None {
            self.last_connection_kind = ConnectionKind::Unknown;
        }
        self.last_connection_kind
    }

    /// Last time this friend was observed online.
    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Update the last-seen timestamp (tick driver, while Online).
    pub fn touch_last_seen(&mut self, now: Instant) {
        self.last_seen = Some(now);
        self.last_seen_epoch = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    }

    /// Wall-clock last-seen time, in seconds since the Unix epoch, for the
    /// save format's `SAVED_FRIEND.last_seen_time` field.
    pub fn last_seen_epoch(&self) -> u64 {
        self.last_seen_epoch
    }

    /// Restore the wall-clock last-seen time from a loaded save file.
    pub fn set_last_seen_epoch(&mut self, secs: u64) {
        self.last_seen_epoch = secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_number_round_trips() {
        for slot in [0usize, 1, 255].iter().cloned() {
            assert_eq!(decode_file_number(encode_file_number(false, slot), 256), Some((false, slot)));
            assert_eq!(decode_file_number(encode_file_number(true, slot), 256), Some((true, slot)));
        }
    }

    #[test]
    fn online_iff_any_device_online() {
        let pk = PublicKey([1; ::crypto::PUBLICKEYBYTES]);
        let mut friend = Friend::new_confirmed(pk, 8);
        assert!(!friend.is_online());

        friend.mark_device_online(0);
        assert!(friend.is_online());
        assert_eq!(friend.status(), FriendStatus::Online);
        assert!(friend.sent_flags().name);

        friend.mark_device_offline(0);
        assert!(!friend.is_online());
        assert_eq!(friend.status(), FriendStatus::Confirmed);
    }

    #[test]
    fn confirm_device_advances_added_but_not_online() {
        let pk = PublicKey([2; ::crypto::PUBLICKEYBYTES]);
        let mut friend = Friend::new_added(pk, [0; 4], b"hi".to_vec(), 5, 8);
        assert_eq!(friend.status(), FriendStatus::Added);

        friend.confirm_device(0);
        assert_eq!(friend.status(), FriendStatus::Confirmed);
        assert_eq!(friend.devices()[0].status(), DeviceStatus::Confirmed);

        // Already-online friend is never downgraded by a later confirm.
        friend.mark_device_online(0);
        friend.confirm_device(0);
        assert_eq!(friend.status(), FriendStatus::Online);
        assert_eq!(friend.devices()[0].status(), DeviceStatus::Online);
    }

    #[test]
    fn connection_kind_debounces_unknown() {
        let pk = PublicKey([1; ::crypto::PUBLICKEYBYTES]);
        let mut friend = Friend::new_confirmed(pk, 8);
        assert_eq!(friend.observe_connection_kind(ConnectionKind::Udp), ConnectionKind::Udp);
        // A momentary Unknown right after Udp must not downgrade.
        assert_eq!(friend.observe_connection_kind(ConnectionKind::Unknown), ConnectionKind::Udp);
        assert_eq!(friend.observe_connection_kind(ConnectionKind::Tcp), ConnectionKind::Tcp);
    }
}
