// SPDX-License-Identifier: Apache-2.0
// Copyright © 2026 The lm983x Developers

/// Declare a newtype over an integer holding a set of bit flags.
macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident : $repr:ty { $( $(#[$fmeta:meta])* $flag:ident = $value:expr; )* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
        pub struct $name(pub $repr);

        impl $name {
            pub const NONE: Self = Self(0);
            $( $(#[$fmeta])* pub const $flag: Self = Self($value); )*

            pub fn contains(self, other: Self) -> bool {
                other.0 != 0 && (self.0 & other.0) == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

/// This is a very small reimplementation of [bytes::Buf] with just the parts needed for this
/// crate.
///
/// The LM983x transmits every multi-byte value most significant byte first, both in its register
/// file and in 16-bit scan data, so all of the getters here are big-endian.
///
/// [bytes::Buf]: https://docs.rs/bytes/*/bytes/trait.Buf.html
pub(crate) trait Buffer {
    fn advance(&mut self, cnt: usize);
    fn get_u8(&mut self) -> u8;
    fn get_u16(&mut self) -> u16;
}

impl Buffer for &[u8] {
    fn advance(&mut self, cnt: usize) {
        *self = &self[cnt..];
    }

    fn get_u8(&mut self) -> u8 {
        let (byte, rest) = self.split_at(1);
        *self = rest;
        byte[0]
    }

    fn get_u16(&mut self) -> u16 {
        let (bytes, rest) = self.split_at(2);
        *self = rest;
        u16::from_be_bytes([bytes[0], bytes[1]])
    }
}

/// Read the big-endian `u16` sample at sample index `index` of `buf`.
#[inline]
pub(crate) fn be_u16_at(buf: &[u8], index: usize) -> u16 {
    let offset = index * 2;
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Decode a big-endian sample stream into host-order values.
pub(crate) fn be_samples(buf: &[u8]) -> Vec<u16> {
    buf.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Check if the n-th bit is set.
///
/// Bits are 0-indexed, from the LSB.
pub(crate) fn is_bit_set<B>(value: B, index: usize) -> bool
where
    B: num_traits::PrimInt + num_traits::Unsigned,
{
    (value & (B::one() << index)) > B::zero()
}

/// Integer division rounding up.
pub(crate) fn div_ceil<N>(numerator: N, denominator: N) -> N
where
    N: num_traits::PrimInt + num_traits::Unsigned,
{
    if denominator.is_zero() {
        return N::zero();
    }
    let quotient = numerator / denominator;
    if (numerator % denominator).is_zero() {
        quotient
    } else {
        quotient + N::one()
    }
}
