/*! File-transfer wire packets: `FileSendRequest`,
`FileControl`, `FileData`.
*/

use binary_io::*;
use config::FILE_ID_LENGTH;
use nom::{be_u8, be_u32, be_u64, rest};

/// `slot(1) || type(4 BE) || size(8 BE) || file_id(32) || name(0..255)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileSendRequest {
    /// Slot the new transfer will occupy.
    pub slot: u8,
    /// Application-defined file type.
    pub file_type: u32,
    /// Total size, or `FILE_SIZE_UNKNOWN` for a streaming transfer.
    pub size: u64,
    /// File-transfer id, used to de-duplicate resumed transfers.
    pub id: [u8; FILE_ID_LENGTH],
    /// File name, at most `MAX_FILENAME_LENGTH` bytes.
    pub name: Vec<u8>,
}

impl FileSendRequest {
    pub(crate) fn parse_body(input: &[u8]) -> IResult<&[u8], FileSendRequest> {
        do_parse!(input,
            slot: be_u8 >>
            file_type: be_u32 >>
            size: be_u64 >>
            id: count_fixed!(u8, call!(be_u8), FILE_ID_LENGTH) >>
            name: rest >>
            (FileSendRequest { slot, file_type, size, id, name: name.to_vec() })
        )
    }
}

impl ToBytes for FileSendRequest {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_be_u8!(self.slot) >>
            gen_be_u32!(self.file_type) >>
            gen_be_u64!(self.size) >>
            gen_slice!(self.id) >>
            gen_slice!(self.name)
        )
    }
}

/// Whose outgoing transfer a `FileControl` packet addresses, from the
/// point of view of the packet's sender.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileDirection {
    /// The packet's sender is the one sending the file.
    Send,
    /// The packet's sender is the one receiving the file.
    Receive,
}

/// `FileControl` operation byte plus any operation-specific extra bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileControlOp {
    /// Start (receiver) or resume (sender) a transfer.
    Accept,
    /// Pause a transfer.
    Pause,
    /// Unconditionally terminate a transfer.
    Kill,
    /// Receiver-only: reposition before accepting. `position` is 64-bit
    /// big-endian on the wire.
    Seek {
        /// Requested position.
        position: u64,
    },
}

const OP_ACCEPT: u8 = 0;
const OP_PAUSE: u8 = 1;
const OP_KILL: u8 = 2;
const OP_SEEK: u8 = 3;

/// `direction(1) || slot(1) || op(1) || extra(0..)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileControl {
    /// Which side's transfer this addresses.
    pub direction: FileDirection,
    /// Slot index.
    pub slot: u8,
    /// Requested operation.
    pub op: FileControlOp,
}

impl FileControl {
    pub(crate) fn parse_body(input: &[u8]) -> IResult<&[u8], FileControl> {
        do_parse!(input,
            direction_byte: be_u8 >>
            slot: be_u8 >>
            op: switch!(be_u8,
                OP_ACCEPT => value!(FileControlOp::Accept) |
                OP_PAUSE => value!(FileControlOp::Pause) |
                OP_KILL => value!(FileControlOp::Kill) |
                OP_SEEK => map!(be_u64, |position| FileControlOp::Seek { position })
            ) >>
            (FileControl {
                direction: if direction_byte == 0 { FileDirection::Send } else { FileDirection::Receive },
                slot,
                op,
            })
        )
    }
}

impl ToBytes for FileControl {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        let direction_byte = if self.direction == FileDirection::Send { 0 } else { 1 };
        match self.op {
            FileControlOp::Accept => do_gen!(buf,
                gen_be_u8!(direction_byte) >> gen_be_u8!(self.slot) >> gen_be_u8!(OP_ACCEPT)
            ),
            FileControlOp::Pause => do_gen!(buf,
                gen_be_u8!(direction_byte) >> gen_be_u8!(self.slot) >> gen_be_u8!(OP_PAUSE)
            ),
            FileControlOp::Kill => do_gen!(buf,
                gen_be_u8!(direction_byte) >> gen_be_u8!(self.slot) >> gen_be_u8!(OP_KILL)
            ),
            FileControlOp::Seek { position } => do_gen!(buf,
                gen_be_u8!(direction_byte) >> gen_be_u8!(self.slot) >> gen_be_u8!(OP_SEEK) >> gen_be_u64!(position)
            ),
        }
    }
}

/// `slot(1) || chunk(0..1015)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileData {
    /// Slot index.
    pub slot: u8,
    /// Chunk bytes; empty signals end-of-stream.
    pub chunk: Vec<u8>,
}

impl FileData {
    pub(crate) fn parse_body(input: &[u8]) -> IResult<&[u8], FileData> {
        do_parse!(input,
            slot: be_u8 >>
            chunk: rest >>
            (FileData { slot, chunk: chunk.to_vec() })
        )
    }
}

impl ToBytes for FileData {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf, gen_be_u8!(self.slot) >> gen_slice!(self.chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_round_trips() {
        let request = FileSendRequest {
            slot: 3,
            file_type: 0,
            size: 123_456,
            id: [7; FILE_ID_LENGTH],
            name: b"photo.png".to_vec(),
        };
        let bytes = to_bytes_vec(&request, 1 + 4 + 8 + FILE_ID_LENGTH + request.name.len());
        let (rest, parsed) = FileSendRequest::parse_body(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, request);
    }

    #[test]
    fn seek_control_round_trips() {
        let control = FileControl { direction: FileDirection::Receive, slot: 9, op: FileControlOp::Seek { position: 1_048_576 } };
        let bytes = to_bytes_vec(&control, 11);
        let (rest, parsed) = FileControl::parse_body(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, control);
    }
}
