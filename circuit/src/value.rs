use std::fmt::Display;

use crate::bits::Bits;
use crate::graph::InstId;

/// A named signal produced by a definition or instance output.
///
/// The width is fixed at creation and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    name: String,
    width: u32,
}

impl Value {
    pub(crate) fn new(name: impl Into<String>, width: u32) -> Self {
        assert!(width >= 1);
        Value { name: name.into(), width }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }
}

/// The interface a slice draws its bits from, within one enclosing definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// The enclosing definition's own interface (its outputs are the module's
    /// input ports, seen from inside).
    Own,
    /// The interface of a child instance.
    Inst(InstId),
}

/// Where a [`ValueSlice`]'s bits come from: a literal constant, or a contiguous
/// range of some interface output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceSource {
    Const(Bits),
    Port { endpoint: Endpoint, output: usize },
}

/// A contiguous bit-range view of a signal, or a literal constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSlice {
    source: SliceSource,
    offset: u32,
    width: u32,
    source_width: u32,
}

impl ValueSlice {
    pub fn new(endpoint: Endpoint, output: usize, offset: u32, width: u32, source_width: u32) -> Self {
        assert!(width >= 1);
        assert!(offset.checked_add(width).is_some_and(|end| end <= source_width));
        ValueSlice { source: SliceSource::Port { endpoint, output }, offset, width, source_width }
    }

    pub fn constant(bits: Bits) -> Self {
        assert!(!bits.is_empty());
        let width = bits.width();
        ValueSlice { source: SliceSource::Const(bits), offset: 0, width, source_width: width }
    }

    pub fn source(&self) -> &SliceSource {
        &self.source
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn end(&self) -> u32 {
        self.offset + self.width
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.source, SliceSource::Const(_))
    }

    /// True when the slice covers its source end to end.
    pub fn is_whole(&self) -> bool {
        self.offset == 0 && self.width == self.source_width
    }

    /// Absorbs `other` if it continues this slice: same source, bit-contiguous, in the
    /// same direction. Adjacent constants concatenate. Returns whether a merge happened.
    pub(crate) fn try_extend(&mut self, other: &ValueSlice) -> bool {
        match (&mut self.source, &other.source) {
            (SliceSource::Const(bits), SliceSource::Const(more)) => {
                *bits = bits.concat(more);
                self.width += other.width;
                self.source_width = self.width;
                true
            }
            (
                SliceSource::Port { endpoint, output },
                SliceSource::Port { endpoint: other_endpoint, output: other_output },
            ) => {
                if endpoint == other_endpoint && output == other_output && other.offset == self.end() {
                    self.width += other.width;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

impl Display for ValueSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.source {
            SliceSource::Const(bits) => write!(f, "{bits}"),
            SliceSource::Port { endpoint, output } => {
                match endpoint {
                    Endpoint::Own => write!(f, "own.{output}")?,
                    Endpoint::Inst(inst) => write!(f, "{inst}.{output}")?,
                }
                if !self.is_whole() {
                    write!(f, "[{}+:{}]", self.offset, self.width)?;
                }
                Ok(())
            }
        }
    }
}

/// The full-width driver set for one input: an ordered sequence of slices that
/// concatenate, LSB first, to exactly the input's width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    slices: Vec<ValueSlice>,
}

impl Select {
    /// Creates a select from raw slices, merging adjacent compatible slices.
    pub fn new(slices: Vec<ValueSlice>) -> Self {
        let mut select = Select { slices };
        select.compact();
        select
    }

    pub fn single(slice: ValueSlice) -> Self {
        Select { slices: vec![slice] }
    }

    pub fn slices(&self) -> &[ValueSlice] {
        &self.slices
    }

    pub fn width(&self) -> u32 {
        self.slices.iter().map(ValueSlice::width).sum()
    }

    /// Merges adjacent slices that reference the same source and are bit-contiguous.
    /// Idempotent: compacting an already-compacted select changes nothing.
    pub fn compact(&mut self) {
        let mut compacted: Vec<ValueSlice> = Vec::with_capacity(self.slices.len());
        for slice in self.slices.drain(..) {
            match compacted.last_mut() {
                Some(last) => {
                    if !last.try_extend(&slice) {
                        compacted.push(slice);
                    }
                }
                None => compacted.push(slice),
            }
        }
        self.slices = compacted;
    }

    /// The single whole-source slice, if this select is a plain alias rather than a
    /// bit-gather. Meaningful after compaction, which [`Select::new`] performs.
    pub fn direct_value(&self) -> Option<&ValueSlice> {
        match self.slices.as_slice() {
            [slice] if slice.is_whole() => Some(slice),
            _ => None,
        }
    }
}

impl Display for Select {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let [slice] = self.slices.as_slice() {
            return write!(f, "{slice}");
        }
        write!(f, "{{")?;
        for slice in self.slices.iter().rev() {
            write!(f, " {slice}")?;
        }
        write!(f, " }}")
    }
}
