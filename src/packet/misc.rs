/*! A/V signalling and the reserved custom-packet ranges. Both ranges are opaque to this crate —
their payloads are handed to whichever application callback is
registered for that channel, never interpreted here.
*/

use binary_io::*;
use packet::id;

/// Opaque A/V signalling payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Msi(pub Vec<u8>);

/// Which reserved range a [`Custom`](./struct.Custom.html) packet fell in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CustomChannel {
    /// `LossyRange`: delivered over the transport's unreliable channel.
    Lossy,
    /// `LosslessRange`: delivered over the transport's reliable channel.
    Lossless,
}

/// An application-defined packet outside the ids this crate itself
/// interprets, but inside one of the two reserved ranges.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Custom {
    /// The packet's wire id, within `LOSSY_RANGE_*`/`LOSSLESS_RANGE_*`.
    pub id: u8,
    /// Raw payload, handed to the application verbatim.
    pub data: Vec<u8>,
    /// Which range `id` fell in.
    pub channel: CustomChannel,
}

impl Custom {
    /// Parses `input` as a custom packet body, but only if `packet_id`
    /// actually falls in one of the two reserved ranges — an id outside
    /// both is not a valid packet at all and the dispatcher drops it like any other malformed
    /// packet.
    pub(crate) fn parse_body(input: &[u8], packet_id: u8) -> IResult<&[u8], Custom> {
        let channel = if packet_id >= id::LOSSY_RANGE_START && packet_id <= id::LOSSY_RANGE_END {
            CustomChannel::Lossy
        } else if packet_id >= id::LOSSLESS_RANGE_START && packet_id <= id::LOSSLESS_RANGE_END {
            CustomChannel::Lossless
        } else {
            return IResult::Error(nom::ErrorKind::Custom(0));
        };
        map!(input, nom::rest, move |b: &[u8]| Custom { id: packet_id, data: b.to_vec(), channel })
    }
}
