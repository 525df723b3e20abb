use std::fmt::{Debug, Display};

/// An immutable constant bit-vector, stored LSB-first.
///
/// Stands in for a literal driver in a netlist: a [`ValueSlice`] whose bits are known
/// at build time rather than produced by a port.
///
/// [`ValueSlice`]: crate::ValueSlice
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bits {
    bits: Vec<bool>,
}

impl Bits {
    pub fn new(bits: Vec<bool>) -> Self {
        Bits { bits }
    }

    /// Creates a bit-vector from the low `width` bits of `value`.
    pub fn from_u64(value: u64, width: u32) -> Self {
        assert!(width <= 64);
        Bits { bits: (0..width).map(|index| (value >> index) & 1 != 0).collect() }
    }

    pub fn width(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn bit(&self, index: u32) -> bool {
        self.bits[index as usize]
    }

    /// Packs the bits into a word, LSB first. The width must not exceed 64.
    pub fn to_u64(&self) -> u64 {
        assert!(self.width() <= 64);
        self.iter().enumerate().fold(0, |word, (index, bit)| word | (u64::from(bit) << index))
    }

    pub fn concat(&self, other: &Bits) -> Bits {
        Bits { bits: self.iter().chain(other.iter()).collect() }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = bool> + ExactSizeIterator + '_ {
        self.bits.iter().copied()
    }
}

impl From<bool> for Bits {
    fn from(bit: bool) -> Self {
        Bits { bits: vec![bit] }
    }
}

impl From<&[bool]> for Bits {
    fn from(bits: &[bool]) -> Self {
        Bits { bits: bits.to_vec() }
    }
}

impl FromIterator<bool> for Bits {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        Bits { bits: iter.into_iter().collect() }
    }
}

impl Debug for Bits {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Bits({self})")
    }
}

impl Display for Bits {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for bit in self.iter().rev() {
            write!(f, "{}", if bit { '1' } else { '0' })?;
        }
        Ok(())
    }
}
