/*! Long-term key types and the small amount of crypto this crate touches
directly.

Key exchange, packet encryption and the DHT are owned by the net-crypto
and DHT subsystems, out of scope for the Messenger core; this module
only wraps the long-term public/secret key types that the roster and
save format need to name friends and the local identity.
*/

use sodiumoxide::crypto::box_;
use sodiumoxide::randombytes::randombytes_into;
use std::fmt;

use binary_io::*;

/// Number of bytes in a long-term `PublicKey`.
pub const PUBLICKEYBYTES: usize = box_::PUBLICKEYBYTES;
/// Number of bytes in a long-term `SecretKey`.
pub const SECRETKEYBYTES: usize = box_::SECRETKEYBYTES;

/// A friend or self long-term public key.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct PublicKey(pub [u8; PUBLICKEYBYTES]);

/// The matching secret key, held only for the local identity.
#[derive(Clone)]
pub struct SecretKey(pub [u8; SECRETKEYBYTES]);

impl PublicKey {
    /// Build a `PublicKey` from an exactly-sized slice.
    pub fn from_slice(bytes: &[u8]) -> Option<PublicKey> {
        if bytes.len() != PUBLICKEYBYTES {
            return None;
        }
        let mut pk = [0; PUBLICKEYBYTES];
        pk.copy_from_slice(bytes);
        Some(PublicKey(pk))
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl FromBytes for PublicKey {
    named!(from_bytes<PublicKey>, map_opt!(nom::take!(PUBLICKEYBYTES), PublicKey::from_slice));
}

impl ToBytes for PublicKey {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf, gen_slice!(self.0))
    }
}

impl SecretKey {
    /// Build a `SecretKey` from an exactly-sized slice.
    pub fn from_slice(bytes: &[u8]) -> Option<SecretKey> {
        if bytes.len() != SECRETKEYBYTES {
            return None;
        }
        let mut sk = [0; SECRETKEYBYTES];
        sk.copy_from_slice(bytes);
        Some(SecretKey(sk))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

impl FromBytes for SecretKey {
    named!(from_bytes<SecretKey>, map_opt!(nom::take!(SECRETKEYBYTES), SecretKey::from_slice));
}

impl ToBytes for SecretKey {
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
        do_gen!(buf, gen_slice!(self.0))
    }
}

/// Generate a fresh long-term key pair.
///
/// Delegates to `sodiumoxide`'s CSPRNG-backed keypair generator, the same
/// primitive the net-crypto layer uses for session keys.
pub fn gen_keypair() -> (PublicKey, SecretKey) {
    let (box_::PublicKey(pk), box_::SecretKey(sk)) = box_::gen_keypair();
    (PublicKey(pk), SecretKey(sk))
}

/// XOR two 2-byte values together, used by the friend-address checksum.
pub fn xor_checksum(a: &[u8; 2], b: &[u8; 2]) -> [u8; 2] {
    [a[0] ^ b[0], a[1] ^ b[1]]
}

/// Fill `bytes` with cryptographically strong randomness.
pub fn random_bytes(bytes: &mut [u8]) {
    randombytes_into(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_round_trip() {
        let (pk, _sk) = gen_keypair();
        let bytes = to_bytes_vec(&pk, PUBLICKEYBYTES);
        let (rest, parsed) = PublicKey::from_bytes(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(pk, parsed);
    }

    #[test]
    fn xor_checksum_identity() {
        assert_eq!(xor_checksum(&[0, 0], &[0, 0]), [0, 0]);
        assert_eq!(xor_checksum(&[0xff, 0xff], &[0xff, 0xff]), [0, 0]);
    }
}
