/*! One `Fail`-deriving error enum per operation family: every variant
names the failure mode precisely and carries whatever data helps a
caller or a log line explain it, rather than collapsing everything into
a single flat error.
*/

/// `add_friend` / `add_friend_norequest` failures.
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum FriendAddError {
    /// Request payload is longer than `MAX_FRIEND_REQUEST_LENGTH`.
    #[fail(display = "friend request payload too long: {} bytes", length)]
    TooLong {
        /// The offending payload length.
        length: usize,
    },
    /// Request payload is empty.
    #[fail(display = "friend request payload is empty")]
    NoMessage,
    /// Address's checksum does not match its key and nospam.
    #[fail(display = "friend address checksum mismatch")]
    BadChecksum,
    /// Address names the local identity's own public key.
    #[fail(display = "cannot add self as a friend")]
    OwnKey,
    /// Key already belongs to a confirmed friend.
    #[fail(display = "friend request already sent/confirmed for this key")]
    AlreadySent,
    /// Friend list has no room for another record.
    #[fail(display = "no memory available for a new friend record")]
    NoMem,
}

/// Outcome of a successful `add_friend` call that did not create a new
/// record outright.
#[derive(Debug, Eq, PartialEq)]
pub enum FriendAddOutcome {
    /// A new friend record was created at this index.
    Added(usize),
    /// The key was already known with a different nospam; the existing
    /// friend's nospam was updated and its index returned.
    SetNewNospam(usize),
}

/// Errors returned by operations that take a friend index.
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum InvalidFriend {
    /// No friend record exists at this index.
    #[fail(display = "no friend at index {}", index)]
    NotFound {
        /// The offending index.
        index: usize,
    },
}

/// `send_message` / `send_action` failures.
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum MessageSendError {
    /// No friend record exists at this index.
    #[fail(display = "no friend at index {}", index)]
    InvalidFriend {
        /// The offending index.
        index: usize,
    },
    /// Friend is not currently online.
    #[fail(display = "friend {} is not online", index)]
    NotOnline {
        /// The offending index.
        index: usize,
    },
    /// Message payload is empty.
    #[fail(display = "message payload is empty")]
    NoMessage,
    /// Message payload is longer than `MAX_MESSAGE_LENGTH`.
    #[fail(display = "message payload too long: {} bytes", length)]
    TooLong {
        /// The offending payload length.
        length: usize,
    },
    /// Transport refused the packet because its send queue is full.
    #[fail(display = "send queue full for friend {}", index)]
    SendQueueFull {
        /// The offending index.
        index: usize,
    },
}

/// Errors returned by `set_name`/`set_status_message`/`set_user_status`/`set_typing`.
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum PresenceSetError {
    /// No friend record exists at this index (only relevant to the
    /// friend-facing getters; self-facing setters use this for symmetry).
    #[fail(display = "no friend at index {}", index)]
    InvalidFriend {
        /// The offending index.
        index: usize,
    },
    /// Payload is longer than the field's wire limit.
    #[fail(display = "value too long: {} bytes", length)]
    TooLong {
        /// The offending payload length.
        length: usize,
    },
}

/// Errors from starting an outgoing file transfer (`new_filesender`).
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum FileSendError {
    /// No friend record exists at this index.
    #[fail(display = "no friend at index {}", index)]
    InvalidFriend {
        /// The offending index.
        index: usize,
    },
    /// Friend is not currently online.
    #[fail(display = "friend {} is not online", index)]
    NotOnline {
        /// The offending index.
        index: usize,
    },
    /// No free outgoing slot remains.
    #[fail(display = "no free file-transfer slots for friend {}", index)]
    NoSlots {
        /// The offending index.
        index: usize,
    },
    /// File name is longer than `MAX_FILENAME_LENGTH`.
    #[fail(display = "file name too long: {} bytes", length)]
    TooLong {
        /// The offending file name length.
        length: usize,
    },
}

/// Errors returned while locating a file-transfer slot by `file_number`.
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum InvalidFileNumber {
    /// No friend record exists at this index.
    #[fail(display = "no friend at index {}", index)]
    InvalidFriend {
        /// The offending index.
        index: usize,
    },
    /// `file_number` does not decode to a slot currently in use.
    #[fail(display = "no such file transfer: {:#x}", file_number)]
    NoSuchTransfer {
        /// The raw `file_number` that failed to resolve.
        file_number: u32,
    },
}

/// Errors from `file_control` (pause/resume/kill/accept).
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum FileControlError {
    /// No friend record, or no such transfer, at this index/file_number.
    #[fail(display = "{}", _0)]
    InvalidFileNumber(#[cause] InvalidFileNumber),
    /// Friend is not currently online.
    #[fail(display = "friend {} is not online", index)]
    NotOnline {
        /// The offending index.
        index: usize,
    },
    /// Control requires the slot to be `Transferring`, but it is not.
    #[fail(display = "file transfer is not in progress")]
    NotTransferring,
    /// `Pause` on an already-paused-by-us slot, or `Accept`-to-resume on a
    /// slot that was never paused.
    #[fail(display = "file transfer is not paused")]
    NotPaused,
    /// `Pause` requested but the slot is already paused by us.
    #[fail(display = "file transfer is already paused")]
    AlreadyPaused,
    /// `Accept`-to-resume requested but the slot is only paused by the peer.
    #[fail(display = "file transfer is paused by the other side")]
    PausedByOther,
    /// Control byte does not name a known operation.
    #[fail(display = "unrecognized file control opcode: {}", opcode)]
    BadControl {
        /// The offending opcode.
        opcode: u8,
    },
}

impl From<InvalidFileNumber> for FileControlError {
    fn from(err: InvalidFileNumber) -> Self {
        FileControlError::InvalidFileNumber(err)
    }
}

/// Errors from `file_seek` (receiver-only).
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum FileSeekError {
    /// No friend record, or no such transfer, at this index/file_number.
    #[fail(display = "{}", _0)]
    InvalidFileNumber(#[cause] InvalidFileNumber),
    /// Seek is only legal while the slot is `NotAccepted`.
    #[fail(display = "cannot seek a file transfer that is already accepted")]
    BadState,
    /// Requested position is not less than the announced file size.
    #[fail(display = "seek position {} is not less than file size {}", position, size)]
    BadPosition {
        /// The requested position.
        position: u64,
        /// The transfer's announced size.
        size: u64,
    },
}

impl From<InvalidFileNumber> for FileSeekError {
    fn from(err: InvalidFileNumber) -> Self {
        FileSeekError::InvalidFileNumber(err)
    }
}

/// Errors from `file_data` (sender pushing a chunk in response to `file_reqchunk`).
#[derive(Debug, Fail, Eq, PartialEq)]
pub enum FileDataError {
    /// No friend record, or no such transfer, at this index/file_number.
    #[fail(display = "{}", _0)]
    InvalidFileNumber(#[cause] InvalidFileNumber),
    /// Friend is not currently online.
    #[fail(display = "friend {} is not online", index)]
    NotOnline {
        /// The offending index.
        index: usize,
    },
    /// Slot is not `Transferring`.
    #[fail(display = "file transfer is not in progress")]
    NotTransferring,
    /// Chunk is longer than `MAX_FILE_CHUNK_LENGTH`, or longer than the
    /// remaining bytes of a known-size transfer.
    #[fail(display = "chunk too long: {} bytes", length)]
    TooLong {
        /// The offending chunk length.
        length: usize,
    },
    /// `position` does not equal the slot's current `transferred` count.
    #[fail(display = "expected position {}, got {}", expected, got)]
    BadPosition {
        /// The position the slot expected next.
        expected: u64,
        /// The position the caller supplied.
        got: u64,
    },
    /// Transport has fewer than `min_slots_free` queue slots available.
    #[fail(display = "send queue full for friend {}", index)]
    SendQueueFull {
        /// The offending index.
        index: usize,
    },
}

impl From<InvalidFileNumber> for FileDataError {
    fn from(err: InvalidFileNumber) -> Self {
        FileDataError::InvalidFileNumber(err)
    }
}

/// Failures deserializing a persisted Messenger state.
///
/// A variant for a clean parse failure and one for "not enough bytes
/// yet", each carrying the raw bytes that failed to help diagnose a
/// corrupt save file.
#[derive(Debug, Fail)]
pub enum LoadStateError {
    /// A section's `type`/`len`/`cookie` header did not parse.
    #[fail(display = "malformed section header at offset {}", offset)]
    BadSectionHeader {
        /// Byte offset of the section that failed to parse.
        offset: usize,
    },
    /// A section claimed more bytes than remain in the save file.
    #[fail(display = "section at offset {} claims {} bytes but only {} remain", offset, claimed, remaining)]
    TruncatedSection {
        /// Byte offset of the section header.
        offset: usize,
        /// Bytes the section header claimed.
        claimed: usize,
        /// Bytes actually remaining in the buffer.
        remaining: usize,
    },
    /// A `FRIENDS` section was tagged with an unsupported version byte.
    #[fail(display = "unsupported FRIENDS section version: {}", version)]
    UnsupportedFriendsVersion {
        /// The offending version byte.
        version: u8,
    },
    /// The `NOSPAM_KEYS` section failed to parse.
    #[fail(display = "malformed identity (NOSPAM_KEYS) section")]
    MalformedIdentity,
    /// A friend record within a `FRIENDS` section failed to parse.
    #[fail(display = "malformed friend record at index {}", index)]
    BadFriendRecord {
        /// Index, within the section, of the record that failed.
        index: usize,
    },
    /// Re-inserting a loaded friend into the roster failed.
    #[fail(display = "{}", _0)]
    FriendAdd(#[cause] FriendAddError),
}

impl From<FriendAddError> for LoadStateError {
    fn from(err: FriendAddError) -> Self {
        LoadStateError::FriendAdd(err)
    }
}
