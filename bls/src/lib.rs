//! Byte-level BLS types.
//!
//! Containers carry compressed public keys and signatures as plain bytes and
//! only decompress them when they are actually used. Signature verification
//! belongs to the signing client and the state transition; the only operation
//! performed here is aggregation, which the attestation pool needs when
//! combining contributions.

use core::fmt::{Debug, Formatter, Result as FmtResult};

use blst::{min_pk, BLST_ERROR};
use serde::{Deserialize, Serialize};
use ssz::{Decode, DecodeError, Encode};
use thiserror::Error;
use tree_hash::{Hash256, PackedEncoding, TreeHash, TreeHashType};

pub const PUBLIC_KEY_LENGTH: usize = 48;
pub const SIGNATURE_LENGTH: usize = 96;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid compressed signature: {0:?}")]
    InvalidSignature(BLST_ERROR),
    #[error("failed to aggregate signature: {0:?}")]
    AggregationFailed(BLST_ERROR),
}

macro_rules! bytes_newtype {
    ($name:ident, $length:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        pub struct $name(#[serde(with = "serde_arrays")] pub [u8; $length]);

        impl Default for $name {
            fn default() -> Self {
                Self([0; $length])
            }
        }

        impl Debug for $name {
            fn fmt(&self, formatter: &mut Formatter) -> FmtResult {
                write!(formatter, concat!(stringify!($name), "(0x"))?;

                for byte in self.0 {
                    write!(formatter, "{byte:02x}")?;
                }

                write!(formatter, ")")
            }
        }

        impl Encode for $name {
            fn is_ssz_fixed_len() -> bool {
                true
            }

            fn ssz_fixed_len() -> usize {
                $length
            }

            fn ssz_bytes_len(&self) -> usize {
                $length
            }

            fn ssz_append(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.0);
            }
        }

        impl Decode for $name {
            fn is_ssz_fixed_len() -> bool {
                true
            }

            fn ssz_fixed_len() -> usize {
                $length
            }

            fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
                let bytes = bytes.try_into().map_err(|_| DecodeError::InvalidByteLength {
                    len: bytes.len(),
                    expected: $length,
                })?;

                Ok(Self(bytes))
            }
        }

        impl TreeHash for $name {
            fn tree_hash_type() -> TreeHashType {
                TreeHashType::Vector
            }

            fn tree_hash_packed_encoding(&self) -> PackedEncoding {
                unreachable!("byte vectors are not packed")
            }

            fn tree_hash_packing_factor() -> usize {
                unreachable!("byte vectors are not packed")
            }

            fn tree_hash_root(&self) -> Hash256 {
                tree_hash::merkle_root(&self.0, 0)
            }
        }
    };
}

bytes_newtype!(PublicKeyBytes, PUBLIC_KEY_LENGTH);
bytes_newtype!(SignatureBytes, SIGNATURE_LENGTH);
bytes_newtype!(AggregateSignatureBytes, SIGNATURE_LENGTH);

// Large arrays only implement `Serialize` through const generics, which serde
// does not pick up in derives for lengths above 32 on older compilers.
// Serializing through a slice sidesteps the problem entirely.
mod serde_arrays {
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let bytes = <&[u8]>::deserialize(deserializer)?;

        bytes
            .try_into()
            .map_err(|_| D::Error::invalid_length(bytes.len(), &"a fixed-length byte array"))
    }
}

impl From<SignatureBytes> for AggregateSignatureBytes {
    fn from(signature: SignatureBytes) -> Self {
        Self(signature.0)
    }
}

impl SignatureBytes {
    /// The compressed point at infinity, the identity of aggregation.
    #[must_use]
    pub fn infinity() -> Self {
        let mut bytes = [0; SIGNATURE_LENGTH];
        bytes[0] = 0xc0;
        Self(bytes)
    }
}

impl AggregateSignatureBytes {
    #[must_use]
    pub fn infinity() -> Self {
        SignatureBytes::infinity().into()
    }
}

impl AggregateSignatureBytes {
    /// Adds a compressed signature to this aggregate in place.
    ///
    /// Both signatures are decompressed, combined and recompressed. The
    /// aggregate is left unchanged on failure.
    pub fn aggregate_in_place(&mut self, signature: impl Into<Self>) -> Result<(), Error> {
        let current = min_pk::Signature::from_bytes(&self.0).map_err(Error::InvalidSignature)?;
        let addition = min_pk::Signature::from_bytes(&signature.into().0)
            .map_err(Error::InvalidSignature)?;

        let mut aggregate = min_pk::AggregateSignature::from_signature(&current);

        aggregate
            .add_signature(&addition, false)
            .map_err(Error::AggregationFailed)?;

        self.0 = aggregate.to_signature().to_bytes();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_bytes_round_trip_through_ssz() {
        let mut bytes = [0; SIGNATURE_LENGTH];

        for (position, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::try_from(position).expect("SIGNATURE_LENGTH fits in u8");
        }

        let original = SignatureBytes(bytes);
        let encoded = original.as_ssz_bytes();
        let decoded = SignatureBytes::from_ssz_bytes(&encoded).expect("encoding is valid");

        assert_eq!(encoded.len(), SIGNATURE_LENGTH);
        assert_eq!(decoded, original);
    }

    #[test]
    fn default_signature_does_not_decompress() {
        let mut aggregate = AggregateSignatureBytes::default();

        aggregate
            .aggregate_in_place(SignatureBytes::default())
            .expect_err("the zero signature is not a valid compressed point");
    }
}
