/*! Traits and small helpers shared by every wire-format type in this crate.

Every packet and every save-file section implements [`FromBytes`](./trait.FromBytes.html)
and [`ToBytes`](./trait.ToBytes.html) using `nom`'s `named!` and `cookie_factory`'s
`do_gen!` families respectively, so parsers and generators read the same way
throughout the codebase.
*/

pub use cookie_factory::GenError;
pub use nom::IResult;

/// Parse `Self` out of the front of a byte slice.
pub trait FromBytes: Sized {
    /// Attempt to parse an instance of `Self`. Follows `nom`'s usual
    /// convention: returns the unconsumed remainder alongside the value.
    fn from_bytes(input: &[u8]) -> IResult<&[u8], Self>;
}

/// Serialize `Self` into the tail of a `cookie_factory` buffer.
pub trait ToBytes {
    /// Write `self` at the current buffer position, returning the buffer
    /// and the new write offset, or a [`GenError`](./enum.GenError.html) if
    /// the buffer is too small.
    fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError>;
}

/// Serialize `value` into a freshly allocated `Vec<u8>`.
///
/// Convenience used by tests and by the save/restore module, where the
/// final length is not known up front and a fixed-size `cookie_factory`
/// buffer would be awkward to size.
pub fn to_bytes_vec<T: ToBytes>(value: &T, capacity: usize) -> Vec<u8> {
    let mut buf = vec![0u8; capacity];
    let (_, len) = value.to_bytes((&mut buf, 0))
        .expect("buffer passed to to_bytes_vec was undersized");
    buf.truncate(len);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flag(bool);

    impl FromBytes for Flag {
        named!(from_bytes<Flag>, map!(nom::be_u8, |b| Flag(b != 0)));
    }

    impl ToBytes for Flag {
        fn to_bytes<'a>(&self, buf: (&'a mut [u8], usize)) -> Result<(&'a mut [u8], usize), GenError> {
            do_gen!(buf, gen_be_u8!(if self.0 { 1 } else { 0 }))
        }
    }

    #[test]
    fn round_trip() {
        let bytes = to_bytes_vec(&Flag(true), 1);
        assert_eq!(bytes, vec![1]);
        let (rest, Flag(value)) = Flag::from_bytes(&bytes).unwrap();
        assert!(rest.is_empty());
        assert!(value);
    }
}
