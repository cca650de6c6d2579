//! MSB-first bit packing
//!
//! Raw bits are folded into bytes in acquisition order: the first bit sampled becomes the
//! most significant bit of its byte. Bits that never complete a byte are dropped.

/// Explicit accumulator for the byte currently being assembled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BitPacker {
    partial: u8,
    bits: u8,
}

impl BitPacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one bit into the accumulator
    ///
    /// Only the lowest bit of `bit` is used. Returns the completed byte on every eighth bit.
    pub fn push(&mut self, bit: u8) -> Option<u8> {
        self.partial = (self.partial << 1) | (bit & 1);
        self.bits += 1;

        if self.bits == 8 {
            let byte = self.partial;
            self.reset();
            Some(byte)
        } else {
            None
        }
    }

    /// Number of bits waiting for a byte boundary
    pub fn pending_bits(&self) -> usize {
        self.bits as usize
    }

    /// Drop the incomplete trailing byte, returning how many bits were lost
    pub fn reset(&mut self) -> usize {
        let dropped = self.pending_bits();
        self.partial = 0;
        self.bits = 0;
        dropped
    }
}

/// Pack a sequence of bits, discarding the `len % 8` trailing ones
pub fn pack_bits(bits: &[u8]) -> Vec<u8> {
    let mut packer = BitPacker::new();
    let mut out = Vec::with_capacity(bits.len() / 8);
    for &bit in bits {
        if let Some(byte) = packer.push(bit) {
            out.push(byte);
        }
    }
    out
}

/// Expand bytes back into bits, most significant first
pub fn unpack_bits(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |shift| (byte >> shift) & 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_msb_first() {
        let mut packer = BitPacker::new();
        let bits = [1, 0, 0, 0, 0, 0, 0, 1];
        let mut out = None;
        for bit in bits {
            out = packer.push(bit);
        }
        assert_eq!(out, Some(0x81));
        assert_eq!(packer.pending_bits(), 0);
    }

    #[test]
    fn test_alternating_bits() {
        let bits: Vec<u8> = (0..200).map(|i| if i % 2 == 0 { 1 } else { 0 }).collect();
        let packed = pack_bits(&bits);
        assert_eq!(packed.len(), 25);
        assert!(packed.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_reset_drops_partial_byte() {
        let mut packer = BitPacker::new();
        for _ in 0..5 {
            assert_eq!(packer.push(1), None);
        }
        assert_eq!(packer.reset(), 5);

        // Nothing from the dropped bits leaks into the next byte
        let mut out = None;
        for _ in 0..8 {
            out = packer.push(0);
        }
        assert_eq!(out, Some(0x00));
    }

    #[test]
    fn test_only_low_bit_used() {
        let mut packer = BitPacker::new();
        let mut out = None;
        for _ in 0..8 {
            out = packer.push(0xFE);
        }
        assert_eq!(out, Some(0x00));
    }

    proptest! {
        #[test]
        fn prop_byte_j_packs_bits_8j(bits in prop::collection::vec(0u8..=1, 0..512)) {
            let packed = pack_bits(&bits);
            prop_assert_eq!(packed.len(), bits.len() / 8);

            for (j, byte) in packed.iter().enumerate() {
                let expected = bits[8 * j..8 * j + 8]
                    .iter()
                    .fold(0u8, |acc, &bit| (acc << 1) | bit);
                prop_assert_eq!(*byte, expected);
            }
        }

        #[test]
        fn prop_unpack_restores_truncated_bits(bits in prop::collection::vec(0u8..=1, 0..512)) {
            let restored = unpack_bits(&pack_bits(&bits));
            let kept = bits.len() - bits.len() % 8;
            prop_assert_eq!(&restored[..], &bits[..kept]);
        }
    }
}
