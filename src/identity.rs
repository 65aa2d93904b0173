/*! `NoSpam`, the public `FriendAddress` built from it, and the local
`SelfIdentity` the Messenger publishes to the world.

Same checksum scheme and `new_nospam` semantics as a Tox ID, renamed to
match the roles they play here (a Tox ID is this crate's friend address
plus nothing else).
*/

use std::fmt;
use std::ops::Deref;

use binary_io::*;
use crypto::*;
use nom::be_u16;

/// Number of bytes in a [`NoSpam`](./struct.NoSpam.html).
pub const NOSPAMBYTES: usize = 4;

/// Anti-spam cookie appended to a published friend address.
///
/// Rotating it invalidates any cached invite built from the old value,
/// without requiring a new long-term key pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NoSpam(pub [u8; NOSPAMBYTES]);

impl NoSpam {
    /// Generate a random `NoSpam`.
    pub fn new() -> Self {
        let mut bytes = [0; NOSPAMBYTES];
        random_bytes(&mut bytes);
        NoSpam(bytes)
    }
}

impl Default for NoSpam {
    fn default() -> Self {
        NoSpam::new()
    }
}

impl Deref for NoSpam {
    type Target = [u8; NOSPAMBYTES];

    fn deref(&self) -> &[u8; NOSPAMBYTES] {
        &self.0
    }
}

impl FromBytes for NoSpam {
    named!(from_bytes<NoSpam>, map!(nom::take!(NOSPAMBYTES), |b| {
        let mut bytes = [0; NOSPAMBYTES];
        bytes.copy_from_slice(b);
        NoSpam(bytes)
    }));
}

impl ToBytes for NoSpam {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf, gen_slice!(self.0))
    }
}

/// Number of bytes of a serialized [`FriendAddress`](./struct.FriendAddress.html).
pub const FRIEND_ADDRESS_BYTES: usize = PUBLICKEYBYTES + NOSPAMBYTES + 2;

/// The 38-byte address a user publishes so others can `add_friend` them.
///
/// `public_key(32) ‖ nospam(4) ‖ checksum(2)`, checksum being the
/// byte-pairwise XOR of the first 36 bytes read as little-endian `u16`s.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct FriendAddress {
    pk: PublicKey,
    nospam: NoSpam,
    checksum: [u8; 2],
}

impl fmt::Debug for FriendAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FriendAddress({:?}, nospam={:?})", self.pk, self.nospam)
    }
}

impl FriendAddress {
    /// Checksum of a public key and nospam pair, used both to build and to
    /// validate a [`FriendAddress`](./struct.FriendAddress.html).
    pub fn checksum(pk: &PublicKey, nospam: &NoSpam) -> [u8; 2] {
        let mut bytes = Vec::with_capacity(FRIEND_ADDRESS_BYTES - 2);
        bytes.extend_from_slice(pk.as_ref());
        bytes.extend_from_slice(nospam.as_ref());

        let mut checksum = [0; 2];
        for pair in bytes.chunks(2) {
            checksum = xor_checksum(&checksum, &[pair[0], pair[1]]);
        }
        checksum
    }

    /// Build a new address for `pk`, generating a random `NoSpam`.
    pub fn new(pk: PublicKey) -> Self {
        let nospam = NoSpam::new();
        FriendAddress {
            pk,
            checksum: Self::checksum(&pk, &nospam),
            nospam,
        }
    }

    /// Build an address from an explicit key and nospam, recomputing the
    /// checksum. Used to rebuild an address for the v1 save-format loader.
    pub fn from_parts(pk: PublicKey, nospam: NoSpam) -> Self {
        FriendAddress {
            checksum: Self::checksum(&pk, &nospam),
            pk,
            nospam,
        }
    }

    /// The wrapped public key.
    pub fn public_key(&self) -> PublicKey {
        self.pk
    }

    /// The wrapped nospam.
    pub fn nospam(&self) -> NoSpam {
        self.nospam
    }

    /// Replace the nospam (and, implicitly, the checksum) in place.
    pub fn set_nospam(&mut self, nospam: NoSpam) {
        self.nospam = nospam;
        self.checksum = Self::checksum(&self.pk, &nospam);
    }

    /// `true` if `checksum` is the one this address's key and nospam produce.
    pub fn checksum_matches(&self) -> bool {
        self.checksum == Self::checksum(&self.pk, &self.nospam)
    }
}

impl FromBytes for FriendAddress {
    named!(from_bytes<FriendAddress>, do_parse!(
        pk: call!(PublicKey::from_bytes) >>
        nospam: call!(NoSpam::from_bytes) >>
        checksum_hi: be_u16 >>
        (FriendAddress { pk, nospam, checksum: [(checksum_hi >> 8) as u8, (checksum_hi & 0xff) as u8] })
    ));
}

impl ToBytes for FriendAddress {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf,
            gen_call!(|b, pk: &PublicKey| pk.to_bytes(b), &self.pk) >>
            gen_call!(|b, ns: &NoSpam| ns.to_bytes(b), &self.nospam) >>
            gen_slice!(self.checksum)
        )
    }
}

/// User-status enum shared by the local identity and every friend record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserStatus {
    /// No special status set.
    None = 0,
    /// Away.
    Away = 1,
    /// Busy.
    Busy = 2,
}

impl UserStatus {
    /// Decode a wire byte, defaulting unknown values to `None` rather than
    /// failing the whole packet (user-status is advisory, never load-bearing).
    pub fn from_byte(byte: u8) -> UserStatus {
        match byte {
            1 => UserStatus::Away,
            2 => UserStatus::Busy,
            _ => UserStatus::None,
        }
    }

    /// Encode as the wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl Default for UserStatus {
    fn default() -> Self {
        UserStatus::None
    }
}

/// Maximum length, in bytes, of a nickname.
pub const MAX_NAME_LENGTH: usize = 128;
/// Maximum length, in bytes, of a status message.
pub const MAX_STATUS_MESSAGE_LENGTH: usize = 1007;

/// The local user's identity: the long-term key pair, the published
/// nospam, and the presence fields broadcast to every online friend.
#[derive(Clone)]
pub struct SelfIdentity {
    pk: PublicKey,
    sk: SecretKey,
    nospam: NoSpam,
    /// UTF-8 nickname, at most [`MAX_NAME_LENGTH`](./constant.MAX_NAME_LENGTH.html) bytes.
    pub nickname: String,
    /// UTF-8 status message, at most [`MAX_STATUS_MESSAGE_LENGTH`](./constant.MAX_STATUS_MESSAGE_LENGTH.html) bytes.
    pub status_message: String,
    /// Own user-status.
    pub user_status: UserStatus,
}

impl SelfIdentity {
    /// Create a fresh identity with a freshly generated key pair and nospam.
    pub fn new() -> Self {
        let (pk, sk) = gen_keypair();
        SelfIdentity {
            pk,
            sk,
            nospam: NoSpam::new(),
            nickname: String::new(),
            status_message: String::new(),
            user_status: UserStatus::None,
        }
    }

    /// Restore an identity from a previously saved key pair and nospam.
    pub fn from_keys(pk: PublicKey, sk: SecretKey, nospam: NoSpam) -> Self {
        SelfIdentity {
            pk,
            sk,
            nospam,
            nickname: String::new(),
            status_message: String::new(),
            user_status: UserStatus::None,
        }
    }

    /// This identity's long-term public key.
    pub fn public_key(&self) -> PublicKey {
        self.pk
    }

    /// This identity's long-term secret key.
    pub fn secret_key(&self) -> &SecretKey {
        &self.sk
    }

    /// Current nospam.
    pub fn nospam(&self) -> NoSpam {
        self.nospam
    }

    /// Set a specific nospam, or generate a random one if `None`.
    pub fn set_nospam(&mut self, nospam: Option<NoSpam>) {
        self.nospam = nospam.unwrap_or_else(NoSpam::new);
    }

    /// The address this identity currently publishes.
    pub fn address(&self) -> FriendAddress {
        FriendAddress::from_parts(self.pk, self.nospam)
    }
}

impl Default for SelfIdentity {
    fn default() -> Self {
        SelfIdentity::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_known_values() {
        assert_eq!(
            FriendAddress::checksum(&PublicKey([0; PUBLICKEYBYTES]), &NoSpam([0; NOSPAMBYTES])),
            [0, 0]
        );
        assert_eq!(
            FriendAddress::checksum(&PublicKey([0xff; PUBLICKEYBYTES]), &NoSpam([0xff; NOSPAMBYTES])),
            [0, 0]
        );
    }

    #[test]
    fn new_nospam_changes_checksum_keeps_key() {
        let (pk, _) = gen_keypair();
        let addr = FriendAddress::new(pk);
        let mut addr2 = addr;
        addr2.set_nospam(NoSpam::new());

        assert!(addr.checksum_matches());
        assert!(addr2.checksum_matches());
        assert_eq!(addr.public_key(), addr2.public_key());
    }

    #[test]
    fn address_round_trips_through_bytes() {
        let (pk, _) = gen_keypair();
        let addr = FriendAddress::new(pk);
        let bytes = to_bytes_vec(&addr, FRIEND_ADDRESS_BYTES);
        assert_eq!(bytes.len(), FRIEND_ADDRESS_BYTES);

        let (rest, parsed) = FriendAddress::from_bytes(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.public_key(), pk);
        assert!(parsed.checksum_matches());
    }
}
