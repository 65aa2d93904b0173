/*! Runtime-tunable constants.

Grouped into one `Default`-able struct so an embedding application can
override a knob (e.g. for tests that want a short friend request
timeout) without recompiling, rather than leaving them as free floating
`const`s.
*/

use std::time::Duration;

/// Maximum length, in bytes, of an `add_friend` request payload.
pub const MAX_FRIEND_REQUEST_LENGTH: usize = 1016;
/// Maximum length, in bytes, of a message or action.
pub const MAX_MESSAGE_LENGTH: usize = 1016;
/// Maximum length, in bytes, of a single file-data chunk.
pub const MAX_FILE_CHUNK_LENGTH: usize = 1015;
/// Maximum length, in bytes, of a file name carried in `FileSendRequest`.
pub const MAX_FILENAME_LENGTH: usize = 255;
/// Length, in bytes, of a file-transfer id.
pub const FILE_ID_LENGTH: usize = 32;
/// Number of concurrent file-transfer slots per friend, per direction.
pub const MAX_CONCURRENT_FILE_PIPES: usize = 256;
/// Sentinel size meaning "streaming / unknown total length".
pub const FILE_SIZE_UNKNOWN: u64 = ::std::u64::MAX;

/// Runtime-tunable knobs for a [`Messenger`](../messenger/struct.Messenger.html).
#[derive(Clone, Debug)]
pub struct MessengerOptions {
    /// Initial timeout before a friend-request send is considered lost and
    /// retried, doubling on every further unacknowledged attempt.
    pub friend_request_timeout: Duration,
    /// Number of transport send-queue slots reserved for non-file traffic;
    /// the file-chunk driver never enqueues below this floor.
    pub min_slots_free: usize,
    /// Number of file-transfer slots per friend, per direction.
    pub max_concurrent_file_pipes: usize,
    /// Cadence the caller is advised to invoke `tick()` at.
    pub tick_interval: Duration,
}

impl Default for MessengerOptions {
    fn default() -> Self {
        MessengerOptions {
            friend_request_timeout: Duration::from_secs(5),
            // CRYPTO_MIN_QUEUE_LENGTH / 4 in the net-crypto layer; we only
            // depend on the floor here, not the transport's own constant.
            min_slots_free: 4,
            max_concurrent_file_pipes: MAX_CONCURRENT_FILE_PIPES,
            tick_interval: Duration::from_millis(50),
        }
    }
}
