/*! Per-slot file-transfer state machine.

A transfer is addressed, at the wire and at the friend record, by a
`(direction, slot)` pair; the public API instead exposes a single 32-bit
`file_number` that folds direction into its high bit. That folding lives in `friend::mod` alongside the slot arrays;
this module only knows about one direction's slot at a time.
*/

use config::{FILE_ID_LENGTH, MAX_FILE_CHUNK_LENGTH};
use error::{FileControlError, FileDataError, FileSeekError};
use transport::PacketNumber;

/// A transfer's lifecycle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileStatus {
    /// Slot is free.
    None,
    /// Announced (outgoing) or requested (incoming), not yet accepted.
    NotAccepted,
    /// Actively exchanging chunks (possibly paused; see `paused_mask`).
    Transferring,
    /// All bytes have been sent; waiting for the final packet's ACK
    /// before reporting completion and freeing the slot (sender side only).
    Finished,
}

/// Pause bit owned by the local side.
pub const PAUSE_US: u8 = 0b01;
/// Pause bit owned by the remote side.
pub const PAUSE_OTHER: u8 = 0b10;

/// One slot of the fixed-size per-friend, per-direction file-transfer array.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileTransferSlot {
    status: FileStatus,
    /// Total size, or `FILE_SIZE_UNKNOWN` for a streaming transfer of
    /// unannounced length.
    size: u64,
    /// Bytes the receiver has consumed / the sender has pushed onto the wire.
    transferred: u64,
    /// Bytes the sender has been asked for (>= transferred, <= size).
    requested: u64,
    paused_mask: u8,
    /// Outstanding chunk-request upcalls not yet answered by `file_data`.
    slots_allocated: usize,
    id: [u8; FILE_ID_LENGTH],
    file_type: u32,
    name: Vec<u8>,
    last_packet_number: Option<PacketNumber>,
}

impl Default for FileTransferSlot {
    fn default() -> Self {
        FileTransferSlot {
            status: FileStatus::None,
            size: 0,
            transferred: 0,
            requested: 0,
            paused_mask: 0,
            slots_allocated: 0,
            id: [0; FILE_ID_LENGTH],
            file_type: 0,
            name: Vec::new(),
            last_packet_number: None,
        }
    }
}

impl FileTransferSlot {
    /// Current lifecycle state.
    pub fn status(&self) -> FileStatus {
        self.status
    }

    /// `true` if the slot is free.
    pub fn is_free(&self) -> bool {
        self.status == FileStatus::None
    }

    /// Announced total size (`FILE_SIZE_UNKNOWN` if streaming).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes transferred so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Bytes requested so far (sender side: bytes already asked for via a
    /// chunk-request upcall, whether or not `file_data` has answered yet).
    pub fn requested(&self) -> u64 {
        self.requested
    }

    /// File-transfer id, as announced in `FileSendRequest`.
    pub fn id(&self) -> [u8; FILE_ID_LENGTH] {
        self.id
    }

    /// Application-defined file type, as announced in `FileSendRequest`.
    pub fn file_type(&self) -> u32 {
        self.file_type
    }

    /// File name, as announced in `FileSendRequest`.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    fn assert_invariants(&self) {
        debug_assert!(self.transferred <= self.requested || self.size == ::config::FILE_SIZE_UNKNOWN);
        if self.size != ::config::FILE_SIZE_UNKNOWN {
            debug_assert!(self.requested <= self.size);
        }
    }

    /// Start a new outgoing transfer (sender side of `new_filesender`).
    pub fn start_outgoing(&mut self, size: u64, file_type: u32, id: [u8; FILE_ID_LENGTH], name: Vec<u8>) {
        *self = FileTransferSlot {
            status: FileStatus::NotAccepted,
            size,
            file_type,
            id,
            name,
            ..FileTransferSlot::default()
        };
    }

    /// Record an inbound `FileSendRequest` (receiver side).
    pub fn start_incoming(&mut self, size: u64, file_type: u32, id: [u8; FILE_ID_LENGTH], name: Vec<u8>) {
        self.start_outgoing(size, file_type, id, name);
    }

    /// Receiver's one-time initial accept (`NotAccepted -> Transferring`),
    /// or a resume of an already-`Transferring`, paused slot — applied
    /// either to our own incoming slot (`by_us = true`, a local
    /// `file_control(Accept)` call) or to our own outgoing slot on behalf
    /// of a peer-sent `Accept` packet (`by_us = false`; see
    /// `dispatcher::apply_peer_control`).
    ///
    /// The resume branch honors the pause-ownership rule: only the side whose bit is set may clear it, and a
    /// pause held by the other side is reported as `PausedByOther` rather
    /// than `NotPaused`.
    pub fn accept_incoming(&mut self, by_us: bool) -> Result<(), FileControlError> {
        match self.status {
            FileStatus::NotAccepted => {
                self.status = FileStatus::Transferring;
                Ok(())
            }
            FileStatus::Transferring => self.resume(by_us),
            _ => Err(FileControlError::NotTransferring),
        }
    }

    /// Sender: resume a slot we had previously paused ourselves.
    ///
    /// Rejects resuming a slot paused only by the peer (`PausedByOther`)
    /// or not paused at all (`NotPaused`),.
    /// Unlike `accept_incoming`, this never performs the one-time initial
    /// accept: a sender cannot unilaterally accept its own outgoing slot.
    pub fn resume_outgoing(&mut self) -> Result<(), FileControlError> {
        if self.status != FileStatus::Transferring {
            return Err(FileControlError::NotTransferring);
        }
        self.resume(true)
    }

    /// Shared pause-bit-clearing logic for both `accept_incoming` and
    /// `resume_outgoing`, parameterized by which side's bit this resume
    /// represents clearing.
    fn resume(&mut self, by_us: bool) -> Result<(), FileControlError> {
        let bit = if by_us { PAUSE_US } else { PAUSE_OTHER };
        let other_bit = if by_us { PAUSE_OTHER } else { PAUSE_US };
        if self.paused_mask & bit != 0 {
            self.paused_mask &= !bit;
            Ok(())
        } else if self.paused_mask & other_bit != 0 {
            Err(FileControlError::PausedByOther)
        } else {
            Err(FileControlError::NotPaused)
        }
    }

    /// Pause the transfer. `by_us` selects which side's pause bit is set.
    pub fn pause(&mut self, by_us: bool) -> Result<(), FileControlError> {
        if self.status != FileStatus::Transferring {
            return Err(FileControlError::NotTransferring);
        }
        let bit = if by_us { PAUSE_US } else { PAUSE_OTHER };
        if self.paused_mask & bit != 0 {
            return Err(FileControlError::AlreadyPaused);
        }
        self.paused_mask |= bit;
        Ok(())
    }

    /// Unconditionally free the slot (kill, or friend going offline).
    pub fn kill(&mut self) {
        *self = FileTransferSlot::default();
    }

    /// Receiver-only: reposition before accepting.
    pub fn seek(&mut self, position: u64) -> Result<(), FileSeekError> {
        if self.status != FileStatus::NotAccepted {
            return Err(FileSeekError::BadState);
        }
        if position >= self.size {
            return Err(FileSeekError::BadPosition { position, size: self.size });
        }
        self.transferred = position;
        self.requested = position;
        Ok(())
    }

    /// Sender: whether the chunk-request driver should keep requesting
    /// more chunks for this slot right now.
    pub fn wants_more_chunks(&self) -> bool {
        self.status == FileStatus::Transferring
            && self.paused_mask == 0
            && if self.size == 0 { self.slots_allocated == 0 } else { self.requested < self.size }
    }

    /// Sender: pick the next chunk length to request, advancing `requested`
    /// and `slots_allocated`. Returns `None` once nothing more should be
    /// requested right now (size known and fully requested).
    pub fn next_chunk_request(&mut self) -> Option<(u64, usize)> {
        if !self.wants_more_chunks() {
            return None;
        }
        let position = self.requested;
        let length = if self.size == 0 {
            0
        } else {
            let remaining = self.size - self.requested;
            ::std::cmp::min(MAX_FILE_CHUNK_LENGTH as u64, remaining) as usize
        };
        self.requested += length as u64;
        self.slots_allocated += 1;
        Some((position, length))
    }

    /// Sender: apply a `file_data(position, bytes)` call, validating the
    /// preconditions from . `online` and
    /// `free_slots_ok` are supplied by the caller since they depend on
    /// the transport, not the slot itself.
    /// Check every precondition on a `file_data` chunk without mutating
    /// the slot, returning whether it would be the final chunk. Callers
    /// that still need to hand the chunk to a fallible transport (as
    /// `Messenger::file_data` does) should validate first and only call
    /// [`commit_chunk`](#method.commit_chunk) once the send is known to
    /// have been accepted, so a rejected send leaves the slot untouched.
    pub fn validate_chunk(
        &self,
        position: u64,
        length: usize,
        online: bool,
        free_slots_ok: bool,
    ) -> Result<bool, FileDataError> {
        if !online {
            return Err(FileDataError::NotOnline { index: 0 });
        }
        if self.status != FileStatus::Transferring {
            return Err(FileDataError::NotTransferring);
        }
        if length > MAX_FILE_CHUNK_LENGTH {
            return Err(FileDataError::TooLong { length });
        }
        if self.size != 0 {
            let remaining = self.size.saturating_sub(self.transferred);
            if (length as u64) > remaining {
                return Err(FileDataError::TooLong { length });
            }
        }
        if position != self.transferred {
            return Err(FileDataError::BadPosition { expected: self.transferred, got: position });
        }
        if !free_slots_ok {
            return Err(FileDataError::SendQueueFull { index: 0 });
        }
        Ok(self.size == 0 || self.transferred + length as u64 >= self.size)
    }

    /// Advance the slot by `length` bytes, assuming a prior
    /// [`validate_chunk`](#method.validate_chunk) call accepted them.
    pub fn commit_chunk(&mut self, length: usize, is_last: bool) {
        self.transferred += length as u64;
        if self.slots_allocated > 0 {
            self.slots_allocated -= 1;
        }
        self.assert_invariants();
        if is_last {
            self.status = FileStatus::Finished;
        }
    }

    /// Validate and immediately commit a chunk in one step. Kept for
    /// callers (and tests) that don't need to interleave a fallible send
    /// between the two.
    pub fn push_chunk(
        &mut self,
        position: u64,
        length: usize,
        online: bool,
        free_slots_ok: bool,
    ) -> Result<bool, FileDataError> {
        let is_last = self.validate_chunk(position, length, online, free_slots_ok)?;
        self.commit_chunk(length, is_last);
        Ok(is_last)
    }

    /// Sender: record the packet number of the final `FileData` packet,
    /// used by the tick driver to wait for its ACK before freeing the slot.
    pub fn set_last_packet_number(&mut self, packet: PacketNumber) {
        self.last_packet_number = Some(packet);
    }

    /// Sender: packet number awaiting ACK before the slot can be freed.
    pub fn last_packet_number(&self) -> Option<PacketNumber> {
        self.last_packet_number
    }

    /// Receiver: apply an inbound `FileData` packet. Returns
    /// `(position, clamped_length, is_terminal)`.
    pub fn receive_chunk(&mut self, chunk: &[u8]) -> Option<(u64, Vec<u8>, bool)> {
        if self.status != FileStatus::Transferring {
            return None;
        }
        let position = self.transferred;
        let max_len = if self.size == 0 { 0 } else { (self.size - self.transferred) as usize };
        let len = ::std::cmp::min(chunk.len(), max_len);
        let bytes = chunk[..len].to_vec();

        self.transferred += len as u64;
        let terminal = chunk.is_empty() || (self.size != 0 && self.transferred >= self.size) || self.size == 0;
        if terminal {
            self.status = FileStatus::None;
        }
        Some((position, bytes, terminal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_file_completes_in_one_round() {
        let mut slot = FileTransferSlot::default();
        slot.start_outgoing(0, 0, [0; FILE_ID_LENGTH], Vec::new());
        slot.status = FileStatus::Transferring;

        let (position, length) = slot.next_chunk_request().expect("zero length file still requests one chunk");
        assert_eq!((position, length), (0, 0));
        assert_eq!(slot.next_chunk_request(), None);

        let is_last = slot.push_chunk(0, 0, true, true).unwrap();
        assert!(is_last);
        assert_eq!(slot.status(), FileStatus::Finished);
    }

    #[test]
    fn pause_contention_matches_scenario_5() {
        let mut slot = FileTransferSlot::default();
        slot.start_outgoing(100, 0, [0; FILE_ID_LENGTH], Vec::new());
        slot.status = FileStatus::Transferring;

        slot.pause(true).unwrap(); // A (us) pauses
        assert_eq!(slot.resume_outgoing(), Ok(()));

        slot.pause(false).unwrap(); // B (other) pauses
        assert_eq!(slot.resume_outgoing(), Err(FileControlError::PausedByOther));
    }

    #[test]
    fn receiver_cannot_locally_resume_a_slot_the_peer_paused() {
        // Mirrors `pause_contention_matches_scenario_5` from the receiver's
        // own side: the peer pausing our incoming slot sets PAUSE_OTHER,
        // and our own local `Accept` must report PausedByOther rather than
        // silently resuming or claiming NotPaused.
        let mut slot = FileTransferSlot::default();
        slot.start_incoming(100, 0, [0; FILE_ID_LENGTH], Vec::new());
        slot.status = FileStatus::Transferring;

        slot.pause(false).unwrap(); // peer paused it
        assert_eq!(slot.accept_incoming(true), Err(FileControlError::PausedByOther));

        // The peer resuming (by_us = false, as dispatcher::apply_peer_control
        // applies it) clears their own bit and the transfer continues.
        assert_eq!(slot.accept_incoming(false), Ok(()));
        assert_eq!(slot.status(), FileStatus::Transferring);
    }

    #[test]
    fn seek_only_legal_before_accept() {
        let mut slot = FileTransferSlot::default();
        slot.start_incoming(10 * 1024 * 1024, 0, [0; FILE_ID_LENGTH], Vec::new());
        slot.seek(1_048_576).unwrap();
        assert_eq!(slot.transferred(), 1_048_576);
        assert_eq!(slot.requested(), 1_048_576);

        slot.accept_incoming(true).unwrap();
        assert_eq!(slot.seek(2_000_000), Err(FileSeekError::BadState));
    }

    #[test]
    fn chunk_request_respects_remaining_size() {
        let mut slot = FileTransferSlot::default();
        let size = (MAX_FILE_CHUNK_LENGTH as u64) + 100;
        slot.start_outgoing(size, 0, [0; FILE_ID_LENGTH], Vec::new());
        slot.status = FileStatus::Transferring;

        let (pos1, len1) = slot.next_chunk_request().unwrap();
        assert_eq!((pos1, len1), (0, MAX_FILE_CHUNK_LENGTH));
        let (pos2, len2) = slot.next_chunk_request().unwrap();
        assert_eq!((pos2, len2), (MAX_FILE_CHUNK_LENGTH as u64, 100));
        assert_eq!(slot.next_chunk_request(), None);
    }

    #[test]
    fn bad_position_is_rejected() {
        let mut slot = FileTransferSlot::default();
        slot.start_outgoing(10, 0, [0; FILE_ID_LENGTH], Vec::new());
        slot.status = FileStatus::Transferring;
        slot.next_chunk_request();

        assert_eq!(
            slot.push_chunk(5, 5, true, true),
            Err(FileDataError::BadPosition { expected: 0, got: 5 })
        );
    }
}
