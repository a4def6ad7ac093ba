// Store arenas: datum ownership, symbol interning, and the global/local sharing model.
use std::collections::HashMap;

use bstr::ByteSlice;
use tracing::debug;

use crate::core::datum::{
    ArrayDatum, Datum, DatumKind, FrameDatum, MapDatum, ProxyDatum, Slot, StringDatum, SymbolDatum,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::handle::{Handle, ObjectId, StoreId};

pub const GLOBAL_SYMBOL_BUCKETS: usize = 4096;
pub const LOCAL_SYMBOL_BUCKETS: usize = 256;

const MAP_SLOT: usize = 0;

// Symbol chains that bind symbols to proxies which are in turn bound again stop here.
const MAX_PROXY_HOPS: usize = 64;

/// Symbols with structural meaning in frame slots, compared by handle identity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WellKnown {
    pub id: Handle,
    pub isa: Handle,
    pub is: Handle,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotRole {
    Id,
    IsA,
    Is,
    Unnamed,
    Named,
}

impl WellKnown {
    pub fn role(&self, name: Handle) -> SlotRole {
        if name == self.id {
            SlotRole::Id
        } else if name == self.isa {
            SlotRole::IsA
        } else if name == self.is {
            SlotRole::Is
        } else if name.is_nil() {
            SlotRole::Unnamed
        } else {
            SlotRole::Named
        }
    }
}

/// Marks the state of a store before a unit of work that may need to be undone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    datums: usize,
    symbols: usize,
}

/// Arena of datums plus its symbol table.
///
/// A global store has no parent. A local store borrows one frozen global store for its
/// whole lifetime; it may link to global datums but never mutates them, and nothing
/// outside the local store can hold its handles.
#[derive(Debug)]
pub struct Store<'g> {
    id: StoreId,
    globals: Option<&'g Store<'g>>,
    datums: Vec<Datum>,
    well_known: WellKnown,
    frozen: bool,
    num_symbols: usize,
    journal: Option<Vec<(Handle, Datum)>>,
}

impl Store<'static> {
    pub fn new() -> Self {
        Self::with_buckets(GLOBAL_SYMBOL_BUCKETS)
    }

    /// Global store whose symbol table has `buckets` hash buckets.
    pub fn with_buckets(buckets: usize) -> Self {
        let mut store = Store {
            id: StoreId::next(),
            globals: None,
            datums: vec![Datum::Map(MapDatum::new(buckets))],
            well_known: WellKnown {
                id: Handle::Nil,
                isa: Handle::Nil,
                is: Handle::Nil,
            },
            frozen: false,
            num_symbols: 0,
            journal: None,
        };
        store.well_known = store.intern_well_known();
        store
    }
}

impl Default for Store<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'g> Store<'g> {
    /// Local store layered on `globals`, which must be a frozen global store.
    pub fn local(globals: &'g Store<'g>) -> Result<Self, Error> {
        if !globals.is_global() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("local stores must be layered on a global store"));
        }
        if !globals.is_frozen() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("global store is not frozen")
                .with_hint("Call Store::freeze on the global store before creating local stores."));
        }
        let store = Store {
            id: StoreId::next(),
            globals: Some(globals),
            datums: vec![Datum::Map(MapDatum::new(LOCAL_SYMBOL_BUCKETS))],
            well_known: globals.well_known,
            frozen: false,
            num_symbols: 0,
            journal: None,
        };
        debug!(store = store.id.get(), globals = globals.id.get(), "created local store");
        Ok(store)
    }

    fn intern_well_known(&mut self) -> WellKnown {
        WellKnown {
            id: self.bootstrap_symbol("id"),
            isa: self.bootstrap_symbol("isA"),
            is: self.bootstrap_symbol("is"),
        }
    }

    /// Self-bound symbol pushed straight into a fresh, unfrozen arena.
    fn bootstrap_symbol(&mut self, name: &str) -> Handle {
        let bucket = self.map().bucket_for(hash_name(name.as_bytes()));
        let next = self.map().buckets()[bucket];
        let string = self.handle_for(self.datums.len());
        self.datums.push(Datum::String(StringDatum::new(name.as_bytes())));
        let symbol = self.handle_for(self.datums.len());
        self.datums.push(Datum::Symbol(SymbolDatum {
            name: string,
            value: symbol,
            next,
            bound: true,
        }));
        self.map_mut().buckets_mut()[bucket] = symbol;
        self.num_symbols += 1;
        symbol
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn globals(&self) -> Option<&'g Store<'g>> {
        self.globals
    }

    pub fn is_global(&self) -> bool {
        self.globals.is_none()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Makes a global store read-only so local stores can share it.
    pub fn freeze(&mut self) -> Result<(), Error> {
        if !self.is_global() {
            return Err(Error::new(ErrorKind::Usage).with_message("local store cannot be frozen"));
        }
        self.frozen = true;
        debug!(store = self.id.get(), datums = self.datums.len(), "froze global store");
        Ok(())
    }

    pub fn well_known(&self) -> WellKnown {
        self.well_known
    }

    pub fn num_datums(&self) -> usize {
        self.datums.len()
    }

    pub fn num_symbols(&self) -> usize {
        self.num_symbols
    }

    pub fn owns(&self, handle: Handle) -> bool {
        matches!(handle, Handle::Ref(id) if id.store() == self.id)
    }

    /// True when `handle` points into a global store's arena.
    pub fn is_global_ref(&self, handle: Handle) -> bool {
        match self.globals {
            Some(globals) => globals.owns(handle),
            None => self.owns(handle),
        }
    }

    pub fn is_local_ref(&self, handle: Handle) -> bool {
        self.globals.is_some() && self.owns(handle)
    }

    pub fn resolve(&self, handle: Handle) -> Result<&Datum, Error> {
        match handle {
            Handle::Ref(id) if id.store() == self.id => self.slot(id, handle),
            Handle::Ref(id) => match self.globals {
                Some(globals) if id.store() == globals.id => globals.slot(id, handle),
                _ => Err(invalid_reference(handle)
                    .with_message("handle is not owned by this store or its globals")),
            },
            Handle::Index(index) => Err(invalid_reference(handle)
                .with_message(format!("index #{index} is not a store reference"))),
            _ => Err(invalid_reference(handle).with_message("handle does not reference an object")),
        }
    }

    fn slot(&self, id: ObjectId, handle: Handle) -> Result<&Datum, Error> {
        self.datums
            .get(id.slot() as usize)
            .ok_or_else(|| invalid_reference(handle).with_message("object slot out of range"))
    }

    fn resolve_mut(&mut self, handle: Handle) -> Result<&mut Datum, Error> {
        if self.frozen {
            return Err(read_only());
        }
        match handle {
            Handle::Ref(id) if id.store() == self.id => self
                .datums
                .get_mut(id.slot() as usize)
                .ok_or_else(|| invalid_reference(handle).with_message("object slot out of range")),
            _ if self.is_global_ref(handle) => Err(read_only()
                .with_message("global objects are read-only in a local store")),
            _ => Err(match self.resolve(handle) {
                Err(err) => err,
                Ok(_) => invalid_reference(handle),
            }),
        }
    }

    pub fn kind(&self, handle: Handle) -> Option<DatumKind> {
        self.resolve(handle).ok().map(Datum::kind)
    }

    pub fn is_frame(&self, handle: Handle) -> bool {
        self.kind(handle) == Some(DatumKind::Frame)
    }

    pub fn is_proxy(&self, handle: Handle) -> bool {
        self.kind(handle) == Some(DatumKind::Proxy)
    }

    pub fn is_symbol(&self, handle: Handle) -> bool {
        self.kind(handle) == Some(DatumKind::Symbol)
    }

    pub fn frame(&self, handle: Handle) -> Result<&FrameDatum, Error> {
        let datum = self.resolve(handle)?;
        datum.as_frame().ok_or_else(|| wrong_kind(DatumKind::Frame, datum.kind()))
    }

    pub fn symbol(&self, handle: Handle) -> Result<&SymbolDatum, Error> {
        let datum = self.resolve(handle)?;
        datum.as_symbol().ok_or_else(|| wrong_kind(DatumKind::Symbol, datum.kind()))
    }

    pub fn string(&self, handle: Handle) -> Result<&StringDatum, Error> {
        let datum = self.resolve(handle)?;
        datum.as_string().ok_or_else(|| wrong_kind(DatumKind::String, datum.kind()))
    }

    pub fn array(&self, handle: Handle) -> Result<&ArrayDatum, Error> {
        let datum = self.resolve(handle)?;
        datum.as_array().ok_or_else(|| wrong_kind(DatumKind::Array, datum.kind()))
    }

    pub fn proxy(&self, handle: Handle) -> Result<&ProxyDatum, Error> {
        let datum = self.resolve(handle)?;
        datum.as_proxy().ok_or_else(|| wrong_kind(DatumKind::Proxy, datum.kind()))
    }

    pub fn symbol_name(&self, symbol: Handle) -> Result<&[u8], Error> {
        let name = self.symbol(symbol)?.name;
        Ok(self.string(name)?.as_bytes())
    }

    /// The `id` value of a named frame, or `None` for an anonymous one.
    pub fn frame_id(&self, frame: Handle) -> Result<Option<Handle>, Error> {
        Ok(self.frame(frame)?.get(self.well_known.id))
    }

    fn map(&self) -> &MapDatum {
        match &self.datums[MAP_SLOT] {
            Datum::Map(map) => map,
            _ => unreachable!("slot 0 holds the symbol table"),
        }
    }

    fn map_mut(&mut self) -> &mut MapDatum {
        match &mut self.datums[MAP_SLOT] {
            Datum::Map(map) => map,
            _ => unreachable!("slot 0 holds the symbol table"),
        }
    }

    fn handle_for(&self, slot: usize) -> Handle {
        Handle::Ref(ObjectId::new(self.id, slot as u32))
    }

    fn alloc(&mut self, datum: Datum) -> Result<Handle, Error> {
        if self.frozen {
            return Err(read_only());
        }
        let slot = self.datums.len();
        if slot >= u32::MAX as usize {
            return Err(Error::new(ErrorKind::Internal).with_message("store arena is full"));
        }
        self.datums.push(datum);
        Ok(self.handle_for(slot))
    }

    /// Symbol for `name` in this store's own table, if interned.
    fn find_own(&self, name: &[u8]) -> Option<Handle> {
        let map = self.map();
        let mut current = map.buckets()[map.bucket_for(hash_name(name))];
        while let Ok(symbol) = self.symbol(current) {
            if self.string(symbol.name).map(StringDatum::as_bytes).ok() == Some(name) {
                return Some(current);
            }
            current = symbol.next;
        }
        None
    }

    /// Visible symbol for `name`: this store's table first, then the global one.
    pub fn find(&self, name: impl AsRef<[u8]>) -> Option<Handle> {
        let name = name.as_ref();
        self.find_own(name)
            .or_else(|| self.globals.and_then(|globals| globals.find_own(name)))
    }

    pub fn contains(&self, name: impl AsRef<[u8]>) -> bool {
        self.find(name).is_some()
    }

    /// Unique symbol for `name` in this store's own table, created unbound if absent.
    pub fn intern(&mut self, name: impl AsRef<[u8]>) -> Result<Handle, Error> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("symbol names cannot be empty"));
        }
        if let Some(symbol) = self.find_own(name) {
            return Ok(symbol);
        }
        let bucket = self.map().bucket_for(hash_name(name));
        let next = self.map().buckets()[bucket];
        let string = self.alloc(Datum::String(StringDatum::new(name)))?;
        let symbol = self.alloc(Datum::Symbol(SymbolDatum {
            name: string,
            value: Handle::Nil,
            next,
            bound: false,
        }))?;
        self.map_mut().buckets_mut()[bucket] = symbol;
        self.num_symbols += 1;
        Ok(symbol)
    }

    /// Visible symbol for `name`, interned in this store when no store knows it.
    pub fn lookup(&mut self, name: impl AsRef<[u8]>) -> Result<Handle, Error> {
        match self.find(name.as_ref()) {
            Some(symbol) => Ok(symbol),
            None => self.intern(name),
        }
    }

    /// What a bare name denotes: the bound value of its symbol, or the proxy shared by
    /// every forward reference to it.
    pub fn resolve_name(&mut self, name: impl AsRef<[u8]>) -> Result<Handle, Error> {
        let name = name.as_ref();
        if let Some(symbol) = self.find_own(name) {
            let datum = *self.symbol(symbol)?;
            if datum.bound || self.is_proxy(datum.value) {
                return Ok(datum.value);
            }
            return self.attach_proxy(symbol);
        }
        if let Some(globals) = self.globals {
            if let Some(symbol) = globals.find_own(name) {
                let datum = globals.symbol(symbol)?;
                if datum.bound || globals.is_proxy(datum.value) {
                    return Ok(datum.value);
                }
            }
        }
        let symbol = self.intern(name)?;
        self.attach_proxy(symbol)
    }

    fn attach_proxy(&mut self, symbol: Handle) -> Result<Handle, Error> {
        let proxy = self.alloc(Datum::Proxy(ProxyDatum { symbol }))?;
        self.update_symbol(symbol, |datum| datum.value = proxy)?;
        Ok(proxy)
    }

    fn update_symbol(
        &mut self,
        symbol: Handle,
        update: impl FnOnce(&mut SymbolDatum),
    ) -> Result<(), Error> {
        let datum = match self.resolve_mut(symbol)? {
            Datum::Symbol(datum) => datum,
            other => return Err(wrong_kind(DatumKind::Symbol, other.kind())),
        };
        let before = *datum;
        update(datum);
        if let Some(journal) = self.journal.as_mut() {
            journal.push((symbol, Datum::Symbol(before)));
        }
        Ok(())
    }

    /// Binds `symbol` to `value`; proxies for the symbol become resolvable.
    pub fn bind(&mut self, symbol: Handle, value: Handle) -> Result<(), Error> {
        self.check_link(value)?;
        self.update_symbol(symbol, |datum| {
            datum.value = value;
            datum.bound = true;
        })
    }

    /// Fails unless `handle` may be stored inside a datum of this store.
    pub fn check_link(&self, handle: Handle) -> Result<(), Error> {
        match handle {
            Handle::Index(_) => Err(Error::new(ErrorKind::Usage)
                .with_message("index handles cannot be stored in a datum")),
            Handle::Ref(_) => self.resolve(handle).map(|_| ()),
            _ => Ok(()),
        }
    }

    pub fn allocate_string(&mut self, bytes: impl AsRef<[u8]>) -> Result<Handle, Error> {
        self.alloc(Datum::String(StringDatum::new(bytes.as_ref())))
    }

    pub fn allocate_array(&mut self, elements: &[Handle]) -> Result<Handle, Error> {
        for &element in elements {
            self.check_link(element)?;
        }
        self.alloc(Datum::Array(ArrayDatum::new(elements)))
    }

    pub fn allocate_proxy(&mut self, symbol: Handle) -> Result<Handle, Error> {
        self.symbol(symbol)?;
        self.alloc(Datum::Proxy(ProxyDatum { symbol }))
    }

    /// New frame with a copy of `slots`; `id` slots bind their symbols to the frame.
    pub fn allocate_frame(&mut self, slots: &[Slot]) -> Result<Handle, Error> {
        let frame = self.reserve_frame()?;
        self.fill_frame(frame, slots.to_vec())?;
        Ok(frame)
    }

    /// Empty frame whose handle is known before its slots are.
    pub(crate) fn reserve_frame(&mut self) -> Result<Handle, Error> {
        self.alloc(Datum::Frame(FrameDatum::default()))
    }

    pub(crate) fn fill_frame(&mut self, frame: Handle, mut slots: Vec<Slot>) -> Result<(), Error> {
        for slot in &mut slots {
            self.check_link(slot.name)?;
            self.check_link(slot.value)?;
            if slot.name == self.well_known.id {
                slot.value = self.bind_id(frame, slot.value)?;
            }
        }
        let datum = self.frame_mut(frame)?;
        let before = std::mem::replace(datum, FrameDatum::new(slots));
        if let Some(journal) = self.journal.as_mut() {
            journal.push((frame, Datum::Frame(before)));
        }
        Ok(())
    }

    /// Frame of this store that `symbol` already names, unless it is `frame` itself.
    ///
    /// A redefinition refills this frame so links made to it keep their identity.
    pub(crate) fn defined_frame(&self, symbol: Handle, frame: Handle) -> Option<Handle> {
        let datum = self.symbol(symbol).ok()?;
        let value = datum.value;
        (datum.bound && value != frame && self.owns(value) && self.is_frame(value)).then_some(value)
    }

    /// Binds an id symbol to `frame`, shadowing a global symbol with a local one.
    pub(crate) fn bind_id(&mut self, frame: Handle, id: Handle) -> Result<Handle, Error> {
        let name = self.symbol_name(id)?.to_vec();
        let symbol = if self.owns(id) { id } else { self.intern(&name)? };
        let previous = *self.symbol(symbol)?;
        if previous.bound && previous.value != frame {
            debug!(name = %name.as_bstr(), "redefining frame id");
        }
        self.bind(symbol, frame)?;
        Ok(symbol)
    }

    pub fn add_slot(&mut self, frame: Handle, name: Handle, value: Handle) -> Result<(), Error> {
        self.check_link(name)?;
        self.check_link(value)?;
        let value = if name == self.well_known.id {
            self.bind_id(frame, value)?
        } else {
            value
        };
        self.frame_mut(frame)?.push(Slot::new(name, value));
        Ok(())
    }

    /// Replaces the first slot named `name`, or appends one.
    pub fn set_slot(&mut self, frame: Handle, name: Handle, value: Handle) -> Result<(), Error> {
        self.check_link(name)?;
        self.check_link(value)?;
        let value = if name == self.well_known.id {
            self.bind_id(frame, value)?
        } else {
            value
        };
        self.frame_mut(frame)?.set(name, value);
        Ok(())
    }

    pub fn set_element(&mut self, array: Handle, index: usize, value: Handle) -> Result<(), Error> {
        self.check_link(value)?;
        let elements = match self.resolve_mut(array)? {
            Datum::Array(datum) => datum.elements_mut(),
            other => return Err(wrong_kind(DatumKind::Array, other.kind())),
        };
        let len = elements.len();
        let element = elements.get_mut(index).ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("array index {index} out of range (len {len})"))
        })?;
        *element = value;
        Ok(())
    }

    fn frame_mut(&mut self, frame: Handle) -> Result<&mut FrameDatum, Error> {
        match self.resolve_mut(frame)? {
            Datum::Frame(datum) => Ok(datum),
            other => Err(wrong_kind(DatumKind::Frame, other.kind())),
        }
    }

    /// Symbols in this store's own table, bucket by bucket.
    pub fn symbols(&self) -> Vec<Handle> {
        let mut symbols = Vec::with_capacity(self.num_symbols);
        for &head in self.map().buckets() {
            let mut current = head;
            while let Ok(symbol) = self.symbol(current) {
                symbols.push(current);
                current = symbol.next;
            }
        }
        symbols
    }

    /// What `proxy` stands for once its name is bound somewhere visible.
    pub fn proxy_target(&self, proxy: Handle) -> Result<Option<Handle>, Error> {
        let mut current = proxy;
        for _ in 0..MAX_PROXY_HOPS {
            let name = self.symbol_name(self.proxy(current)?.symbol)?;
            let Some(symbol) = self.find(name) else {
                return Ok(None);
            };
            let symbol = self.symbol(symbol)?;
            if !symbol.bound {
                return Ok(None);
            }
            if !self.is_proxy(symbol.value) {
                return Ok(Some(symbol.value));
            }
            current = symbol.value;
        }
        Ok(None)
    }

    /// Rewrites proxy links held by this store's datums to their bound values and
    /// returns the names that are still unresolved, in first-seen order.
    pub fn resolve_proxies(&mut self) -> Result<Vec<String>, Error> {
        if self.frozen {
            return Err(read_only());
        }
        let mut targets: HashMap<Handle, Option<Handle>> = HashMap::new();
        let mut unresolved = Vec::new();
        for index in 0..self.datums.len() {
            for link in self.datums[index].links() {
                if targets.contains_key(&link) || !self.is_proxy(link) {
                    continue;
                }
                let target = self.proxy_target(link)?;
                if target.is_none() {
                    let name = self.symbol_name(self.proxy(link)?.symbol)?;
                    let name = name.to_str_lossy().into_owned();
                    if !unresolved.contains(&name) {
                        unresolved.push(name);
                    }
                }
                targets.insert(link, target);
            }
        }

        let mut replaced = 0usize;
        for datum in &mut self.datums {
            for link in datum.links_mut() {
                if let Some(Some(target)) = targets.get(&*link) {
                    *link = *target;
                    replaced += 1;
                }
            }
        }
        debug!(
            store = self.id.get(),
            replaced,
            unresolved = unresolved.len(),
            "resolved proxies"
        );
        Ok(unresolved)
    }

    /// Starts recording symbol and frame updates so the work after this point can be undone.
    pub fn checkpoint(&mut self) -> Checkpoint {
        self.journal = Some(Vec::new());
        Checkpoint {
            datums: self.datums.len(),
            symbols: self.num_symbols,
        }
    }

    /// Keeps everything done since the checkpoint.
    pub fn commit(&mut self, _checkpoint: Checkpoint) {
        self.journal = None;
    }

    /// Drops every datum allocated since `checkpoint` and restores symbol bindings
    /// and refilled frames.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        for (handle, before) in self.journal.take().unwrap_or_default().into_iter().rev() {
            if let Some(datum) = handle
                .object_id()
                .and_then(|id| self.datums.get_mut(id.slot() as usize))
            {
                *datum = before;
            }
        }

        // New symbols are always pushed at bucket heads, ahead of older ones.
        let is_new = |handle: Handle| {
            matches!(handle, Handle::Ref(id) if id.slot() as usize >= checkpoint.datums)
        };
        let heads: Vec<Handle> = self
            .map()
            .buckets()
            .iter()
            .map(|&head| {
                let mut current = head;
                while is_new(current) {
                    current = self.symbol(current).map(|symbol| symbol.next).unwrap_or_default();
                }
                current
            })
            .collect();
        self.map_mut().buckets_mut().copy_from_slice(&heads);
        self.datums.truncate(checkpoint.datums);
        self.num_symbols = checkpoint.symbols;
    }
}

/// FNV-1a over the name bytes followed by a murmur-style avalanche.
fn hash_name(name: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in name {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    avalanche32(hash)
}

fn avalanche32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

fn invalid_reference(handle: Handle) -> Error {
    let error = Error::new(ErrorKind::InvalidReference);
    match handle.object_id() {
        Some(id) => error.with_hint(format!(
            "object {} of store {} was resolved against a store that does not own it",
            id.slot(),
            id.store().get()
        )),
        None => error,
    }
}

fn read_only() -> Error {
    Error::new(ErrorKind::ReadOnly).with_message("store is read-only")
}

fn wrong_kind(expected: DatumKind, found: DatumKind) -> Error {
    Error::new(ErrorKind::Usage).with_message(format!("expected {expected:?}, found {found:?}"))
}

#[cfg(test)]
mod tests {
    use super::{SlotRole, Store};
    use crate::core::datum::{DatumKind, Slot};
    use crate::core::error::ErrorKind;
    use crate::core::handle::Handle;

    #[test]
    fn intern_returns_one_symbol_per_name() {
        let mut store = Store::with_buckets(2);
        let a = store.intern("alpha").expect("intern");
        let b = store.intern("beta").expect("intern");
        let c = store.intern("gamma").expect("intern");
        assert_eq!(store.intern("alpha").expect("intern"), a);
        assert_ne!(a, b);
        assert_eq!(store.symbol_name(c).expect("name"), b"gamma");
        assert!(!store.symbol(a).expect("symbol").bound);
        // id, isA and is are interned up front.
        assert_eq!(store.num_symbols(), 6);
        assert_eq!(store.symbols().len(), 6);
    }

    #[test]
    fn empty_symbol_names_are_rejected() {
        let mut store = Store::new();
        let err = store.intern("").expect_err("empty name");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn well_known_symbols_are_self_bound() {
        let mut store = Store::new();
        let well_known = store.well_known();
        assert_eq!(store.resolve_name("isA").expect("resolve"), well_known.isa);
        assert_eq!(well_known.role(well_known.id), SlotRole::Id);
        assert_eq!(well_known.role(well_known.is), SlotRole::Is);
        assert_eq!(well_known.role(Handle::Nil), SlotRole::Unnamed);
        assert_eq!(well_known.role(Handle::Int(3)), SlotRole::Named);
    }

    #[test]
    fn allocate_frame_binds_id_symbol() {
        let mut store = Store::new();
        let id = store.well_known().id;
        let foo = store.intern("foo").expect("intern");
        let frame = store
            .allocate_frame(&[Slot::new(id, foo), Slot::unnamed(Handle::Int(1))])
            .expect("frame");
        let symbol = store.symbol(foo).expect("symbol");
        assert!(symbol.bound);
        assert_eq!(symbol.value, frame);
        assert_eq!(store.frame_id(frame).expect("id"), Some(foo));
        assert_eq!(store.resolve_name("foo").expect("resolve"), frame);
    }

    #[test]
    fn forward_reference_shares_one_proxy_until_bound() {
        let mut store = Store::new();
        let first = store.resolve_name("later").expect("resolve");
        let second = store.resolve_name("later").expect("resolve");
        assert_eq!(first, second);
        assert!(store.is_proxy(first));

        let holder = store
            .allocate_frame(&[Slot::unnamed(first)])
            .expect("holder");
        assert_eq!(store.resolve_proxies().expect("sweep"), vec!["later".to_string()]);

        let id = store.well_known().id;
        let later = store.intern("later").expect("intern");
        let target = store.allocate_frame(&[Slot::new(id, later)]).expect("target");
        assert_eq!(store.proxy_target(first).expect("target"), Some(target));
        assert!(store.resolve_proxies().expect("sweep").is_empty());
        assert_eq!(store.frame(holder).expect("frame").slots()[0].value, target);
    }

    #[test]
    fn local_store_requires_frozen_global() {
        let global = Store::new();
        let err = Store::local(&global).expect_err("not frozen");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let mut global = Store::new();
        global.freeze().expect("freeze");
        let local = Store::local(&global).expect("local");
        let err = Store::local(&local).expect_err("local of local");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn frozen_store_rejects_mutation() {
        let mut global = Store::new();
        global.freeze().expect("freeze");
        let err = global.intern("late").expect_err("frozen");
        assert_eq!(err.kind(), ErrorKind::ReadOnly);
    }

    #[test]
    fn local_store_reads_but_never_mutates_globals() {
        let mut global = Store::new();
        let id = global.well_known().id;
        let city = global.intern("city").expect("intern");
        let frame = global.allocate_frame(&[Slot::new(id, city)]).expect("frame");
        global.freeze().expect("freeze");

        let mut local = Store::local(&global).expect("local");
        assert_eq!(local.find("city"), Some(city));
        assert_eq!(local.resolve_name("city").expect("resolve"), frame);
        assert!(local.is_global_ref(frame));
        assert_eq!(local.kind(frame), Some(DatumKind::Frame));

        let err = local.add_slot(frame, Handle::Nil, Handle::Int(1)).expect_err("read-only");
        assert_eq!(err.kind(), ErrorKind::ReadOnly);
        let err = local.bind(city, Handle::Int(1)).expect_err("read-only");
        assert_eq!(err.kind(), ErrorKind::ReadOnly);

        // A local frame reusing a global id gets a local shadow symbol.
        let shadow = local.allocate_frame(&[Slot::new(id, city)]).expect("shadow");
        let local_city = local.frame_id(shadow).expect("id").expect("named");
        assert_ne!(local_city, city);
        assert!(local.is_local_ref(local_city));
        assert_eq!(local.resolve_name("city").expect("resolve"), shadow);
    }

    #[test]
    fn sibling_local_handles_are_invalid_references() {
        let mut global = Store::new();
        global.freeze().expect("freeze");
        let mut a = Store::local(&global).expect("local a");
        let mut b = Store::local(&global).expect("local b");

        let frame = a.allocate_frame(&[]).expect("frame");
        let err = b.resolve(frame).expect_err("cross-local");
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
        let err = b.allocate_array(&[frame]).expect_err("cross-local link");
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
        let err = global.resolve(frame).expect_err("global cannot see local");
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
    }

    #[test]
    fn index_handles_are_not_references() {
        let mut store = Store::new();
        let err = store.resolve(Handle::Index(1)).expect_err("index");
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
        let err = store.allocate_array(&[Handle::Index(1)]).expect_err("index link");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn set_element_keeps_array_length() {
        let mut store = Store::new();
        let array = store.allocate_array(&[Handle::Int(1), Handle::Int(2)]).expect("array");
        store.set_element(array, 1, Handle::Float(2.5)).expect("set");
        assert_eq!(
            store.array(array).expect("array").elements(),
            &[Handle::Int(1), Handle::Float(2.5)]
        );
        let err = store.set_element(array, 2, Handle::Nil).expect_err("out of range");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn rollback_discards_new_symbols_and_bindings() {
        let mut store = Store::with_buckets(1);
        let kept = store.intern("kept").expect("intern");
        let datums = store.num_datums();

        let checkpoint = store.checkpoint();
        store.bind(kept, Handle::Int(7)).expect("bind");
        store.intern("dropped").expect("intern");
        store.allocate_frame(&[]).expect("frame");
        store.rollback(checkpoint);

        assert_eq!(store.num_datums(), datums);
        assert!(!store.contains("dropped"));
        assert!(!store.symbol(kept).expect("symbol").bound);
        assert_eq!(store.intern("kept").expect("intern"), kept);
    }

    #[test]
    fn rollback_restores_refilled_frames() {
        let mut store = Store::new();
        let id = store.well_known().id;
        let a = store.intern("a").expect("intern");
        let frame = store
            .allocate_frame(&[Slot::new(id, a), Slot::unnamed(Handle::Int(1))])
            .expect("frame");
        assert_eq!(store.defined_frame(a, Handle::Nil), Some(frame));
        assert_eq!(store.defined_frame(a, frame), None);

        let checkpoint = store.checkpoint();
        store
            .fill_frame(frame, vec![Slot::new(id, a), Slot::unnamed(Handle::Int(2))])
            .expect("refill");
        store.rollback(checkpoint);

        let slots = store.frame(frame).expect("frame").slots().to_vec();
        assert_eq!(slots, vec![Slot::new(id, a), Slot::unnamed(Handle::Int(1))]);
        assert_eq!(store.symbol(a).expect("symbol").value, frame);
    }

    #[test]
    fn well_known_symbols_exist_in_every_bucket_layout() {
        for buckets in [0, 1, 2, 1024] {
            let store = Store::with_buckets(buckets);
            let well_known = store.well_known();
            for (name, handle) in [("id", well_known.id), ("isA", well_known.isa), ("is", well_known.is)] {
                assert!(!handle.is_nil(), "{name}");
                assert_eq!(store.find(name), Some(handle));
                assert_eq!(store.symbol_name(handle).expect("name"), name.as_bytes());
                let symbol = store.symbol(handle).expect("symbol");
                assert!(symbol.bound);
                assert_eq!(symbol.value, handle);
            }
            assert_eq!(store.num_symbols(), 3);
        }
    }

    #[test]
    fn frozen_global_is_shared_across_threads() {
        let mut global = Store::new();
        let id = global.well_known().id;
        let shared = global.intern("shared").expect("intern");
        let frame = global.allocate_frame(&[Slot::new(id, shared)]).expect("frame");
        global.freeze().expect("freeze");

        std::thread::scope(|scope| {
            for worker in 0..4i64 {
                let global = &global;
                scope.spawn(move || {
                    let mut local = Store::local(global).expect("local");
                    let isa = local.well_known().isa;
                    let doc = local
                        .allocate_frame(&[Slot::new(isa, frame), Slot::unnamed(Handle::Int(worker))])
                        .expect("doc");
                    assert_eq!(local.frame(doc).expect("frame").get(isa), Some(frame));
                });
            }
        });
    }
}
