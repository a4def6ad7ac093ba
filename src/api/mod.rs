//! Purpose: Define the public Rust API boundary for the frame store.
//! Exports: Store and handle types, the text codec, equality, and errors.
//! Role: Additive-only surface used by the CLI, tests, and embedding code.
//! Invariants: Crate-internal construction helpers (frame reservation) stay private.

pub use crate::core::datum::{
    ArrayDatum, Datum, DatumKind, FrameDatum, MapDatum, ProxyDatum, Slot, StringDatum, SymbolDatum,
};
pub use crate::core::equal::equivalent;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::handle::{Handle, ObjectId, StoreId};
pub use crate::core::printer::{PrintOptions, Printer, encode, encode_text};
pub use crate::core::reader::{MAX_NESTING, ParseOutcome, Reader, parse, parse_bytes};
pub use crate::core::store::{
    Checkpoint, GLOBAL_SYMBOL_BUCKETS, LOCAL_SYMBOL_BUCKETS, SlotRole, Store, WellKnown,
};
