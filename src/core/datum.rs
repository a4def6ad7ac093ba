// Heap object kinds a reference handle resolves to, and their mutation rules.
use std::fmt;

use bstr::BStr;

use crate::core::handle::Handle;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatumKind {
    String,
    Symbol,
    Frame,
    Array,
    Proxy,
    Map,
}

/// Immutable byte payload; equality is byte equality.
#[derive(Clone, Eq, PartialEq)]
pub struct StringDatum {
    bytes: Box<[u8]>,
}

impl StringDatum {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for StringDatum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(BStr::new(&self.bytes), f)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SymbolDatum {
    pub name: Handle,
    /// Bound value, or the shared proxy while the symbol is unbound.
    pub value: Handle,
    pub next: Handle,
    pub bound: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slot {
    pub name: Handle,
    pub value: Handle,
}

impl Slot {
    pub fn new(name: Handle, value: Handle) -> Self {
        Self { name, value }
    }

    /// Slot without a name, printed as a bare value.
    pub fn unnamed(value: Handle) -> Self {
        Self {
            name: Handle::Nil,
            value,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameDatum {
    slots: Vec<Slot>,
}

impl FrameDatum {
    pub(crate) fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Value of the first slot with `name`.
    pub fn get(&self, name: Handle) -> Option<Handle> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.value)
    }

    pub fn has(&self, name: Handle) -> bool {
        self.slots.iter().any(|slot| slot.name == name)
    }

    pub(crate) fn push(&mut self, slot: Slot) {
        self.slots.push(slot);
    }

    pub(crate) fn set(&mut self, name: Handle, value: Handle) {
        match self.slots.iter_mut().find(|slot| slot.name == name) {
            Some(slot) => slot.value = value,
            None => self.slots.push(Slot::new(name, value)),
        }
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }
}

/// Dense handle sequence; the length is fixed at allocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArrayDatum {
    elements: Box<[Handle]>,
}

impl ArrayDatum {
    pub(crate) fn new(elements: &[Handle]) -> Self {
        Self {
            elements: elements.into(),
        }
    }

    pub fn elements(&self) -> &[Handle] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Handle> {
        self.elements.get(index).copied()
    }

    pub(crate) fn elements_mut(&mut self) -> &mut [Handle] {
        &mut self.elements
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProxyDatum {
    pub symbol: Handle,
}

/// Symbol table: bucket heads, each chaining symbols through `SymbolDatum::next`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MapDatum {
    buckets: Box<[Handle]>,
}

impl MapDatum {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            buckets: vec![Handle::Nil; size.max(1)].into_boxed_slice(),
        }
    }

    pub fn buckets(&self) -> &[Handle] {
        &self.buckets
    }

    pub(crate) fn buckets_mut(&mut self) -> &mut [Handle] {
        &mut self.buckets
    }

    pub fn bucket_for(&self, hash: u32) -> usize {
        hash as usize % self.buckets.len()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Datum {
    String(StringDatum),
    Symbol(SymbolDatum),
    Frame(FrameDatum),
    Array(ArrayDatum),
    Proxy(ProxyDatum),
    Map(MapDatum),
}

impl Datum {
    pub fn kind(&self) -> DatumKind {
        match self {
            Datum::String(_) => DatumKind::String,
            Datum::Symbol(_) => DatumKind::Symbol,
            Datum::Frame(_) => DatumKind::Frame,
            Datum::Array(_) => DatumKind::Array,
            Datum::Proxy(_) => DatumKind::Proxy,
            Datum::Map(_) => DatumKind::Map,
        }
    }

    pub fn as_string(&self) -> Option<&StringDatum> {
        match self {
            Datum::String(string) => Some(string),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&SymbolDatum> {
        match self {
            Datum::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<&FrameDatum> {
        match self {
            Datum::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayDatum> {
        match self {
            Datum::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&ProxyDatum> {
        match self {
            Datum::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapDatum> {
        match self {
            Datum::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Handles held by frames, arrays, and bound symbols; the ones a proxy sweep may rewrite.
    pub(crate) fn links(&self) -> Vec<Handle> {
        match self {
            Datum::Frame(frame) => frame
                .slots()
                .iter()
                .flat_map(|slot| [slot.name, slot.value])
                .collect(),
            Datum::Array(array) => array.elements().to_vec(),
            Datum::Symbol(symbol) if symbol.bound => vec![symbol.value],
            _ => Vec::new(),
        }
    }

    pub(crate) fn links_mut(&mut self) -> Vec<&mut Handle> {
        match self {
            Datum::Frame(frame) => frame
                .slots_mut()
                .iter_mut()
                .flat_map(|slot| [&mut slot.name, &mut slot.value])
                .collect(),
            Datum::Array(array) => array.elements_mut().iter_mut().collect(),
            Datum::Symbol(symbol) if symbol.bound => vec![&mut symbol.value],
            _ => Vec::new(),
        }
    }
}
