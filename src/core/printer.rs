//! Purpose: Encode handles and their reachable frames into canonical text.
//! Exports: `Printer`, `PrintOptions`, `encode`, `encode_text`.
//! Role: Inverse of `core::reader`; output is what the reader accepts.
//! Invariants: Printing never mutates the store; reference state lives in the printer.
//! Invariants: Output is deterministic for fixed options and traversal order.
use std::collections::{HashMap, HashSet};
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::core::datum::{ArrayDatum, Datum, FrameDatum, StringDatum, SymbolDatum};
use crate::core::error::{Error, ErrorKind};
use crate::core::handle::Handle;
use crate::core::reader::MAX_NESTING;
use crate::core::store::{SlotRole, Store};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrintOptions {
    /// Spaces per nesting level; zero prints each frame on one line.
    pub indent: usize,
    /// Print repeated anonymous frames as `#n` index references.
    pub byref: bool,
    /// Print every named frame in link position as its id.
    pub shallow: bool,
    /// Expand named frames owned by a global store instead of linking to them.
    pub global: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            indent: 0,
            byref: true,
            shallow: false,
            global: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Escape {
    None,
    Newline,
    Return,
    Tab,
    Quote,
    Backslash,
    Hex,
}

const ESCAPES: [Escape; 256] = escape_table();

const fn escape_table() -> [Escape; 256] {
    let mut table = [Escape::None; 256];
    let mut byte = 0;
    while byte < 256 {
        if byte < 0x20 || byte >= 0x7f {
            table[byte] = Escape::Hex;
        }
        byte += 1;
    }
    table[b'\n' as usize] = Escape::Newline;
    table[b'\r' as usize] = Escape::Return;
    table[b'\t' as usize] = Escape::Tab;
    table[b'"' as usize] = Escape::Quote;
    table[b'\\' as usize] = Escape::Backslash;
    table
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

pub struct Printer<'a, 'g, W: Write> {
    store: &'a Store<'g>,
    output: W,
    options: PrintOptions,
    references: HashMap<Handle, Handle>,
    expanding: HashSet<Handle>,
    next_index: u32,
    indentation: usize,
    depth: usize,
}

impl<'a, 'g, W: Write> Printer<'a, 'g, W> {
    pub fn new(store: &'a Store<'g>, output: W, options: PrintOptions) -> Self {
        Self {
            store,
            output,
            options,
            references: HashMap::new(),
            expanding: HashSet::new(),
            next_index: 1,
            indentation: 0,
            depth: 0,
        }
    }

    pub fn options(&self) -> PrintOptions {
        self.options
    }

    pub fn into_inner(self) -> W {
        self.output
    }

    /// Prints `handle` in full. A named root is expanded again even if an earlier call
    /// printed it; anonymous frames seen before are only referenced.
    pub fn print(&mut self, handle: Handle) -> Result<(), Error> {
        let store = self.store;
        let named = store
            .frame(handle)
            .is_ok_and(|frame| frame.has(store.well_known().id));
        if named {
            self.references.remove(&handle);
        }
        self.print_value(handle, false)
    }

    /// `print` followed by a newline, for streams of top-level objects.
    pub fn print_line(&mut self, handle: Handle) -> Result<(), Error> {
        self.print(handle)?;
        self.write(b"\n")
    }

    /// Prints every bound symbol value of the store's own table, one per line, in
    /// allocation order.
    pub fn print_all(&mut self) -> Result<(), Error> {
        let store = self.store;
        let mut symbols = store.symbols();
        symbols.sort_by_key(|symbol| symbol.object_id());
        for symbol in symbols {
            let datum = store.symbol(symbol)?;
            if !datum.bound || datum.value == symbol || store.is_proxy(datum.value) {
                continue;
            }
            self.print_line(datum.value)?;
        }
        Ok(())
    }

    fn print_value(&mut self, handle: Handle, reference: bool) -> Result<(), Error> {
        match handle {
            Handle::Nil => self.write(b"nil"),
            Handle::Int(value) => write!(self.output, "{value}").map_err(Error::from),
            Handle::Float(value) => self.print_float(value),
            Handle::Index(index) => write!(self.output, "#{index}").map_err(Error::from),
            Handle::Ref(_) => {
                let store = self.store;
                match store.resolve(handle)? {
                    Datum::String(string) => self.print_string(string),
                    Datum::Symbol(symbol) => self.print_symbol(symbol, reference),
                    Datum::Frame(frame) => self.nested(|printer| printer.print_frame(handle, frame)),
                    Datum::Array(array) => self.nested(|printer| printer.print_array(array)),
                    Datum::Proxy(proxy) => self.print_value(proxy.symbol, true),
                    Datum::Map(_) => Err(Error::new(ErrorKind::Usage)
                        .with_message("symbol tables have no text form")),
                }
            }
        }
    }

    /// Output nested deeper than the reader accepts is refused before the stack runs out.
    fn nested(&mut self, print: impl FnOnce(&mut Self) -> Result<(), Error>) -> Result<(), Error> {
        if self.depth >= MAX_NESTING {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("nesting deeper than {MAX_NESTING} levels cannot be printed"))
                .with_hint("Name deeply nested frames and print with --shallow to link them by id."));
        }
        self.depth += 1;
        let result = print(self);
        self.depth -= 1;
        result
    }

    fn print_float(&mut self, value: f64) -> Result<(), Error> {
        // Debug formatting is the shortest round-trip form and always keeps a `.` or
        // an exponent, so the reader never mistakes it for an integer.
        write!(self.output, "{value:?}").map_err(Error::from)
    }

    fn print_frame(&mut self, handle: Handle, frame: &FrameDatum) -> Result<(), Error> {
        if let Some(&reference) = self.references.get(&handle) {
            if self.options.byref || !reference.is_index() {
                return self.print_value(reference, true);
            }
            if self.expanding.contains(&handle) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("anonymous frame cycle cannot be printed by id")
                    .with_hint("Print with index references (byref) to encode anonymous cycles."));
            }
        }

        self.write(b"{")?;
        self.indentation += self.options.indent;

        let well_known = self.store.well_known();
        match frame.get(well_known.id) {
            Some(id) => {
                self.references.insert(handle, id);
            }
            None => {
                let index = Handle::Index(self.next_index);
                self.next_index += 1;
                self.references.insert(handle, index);
                if self.options.byref {
                    self.write(b"=")?;
                    self.print_value(index, true)?;
                    if self.options.indent == 0 {
                        self.write(b" ")?;
                    }
                }
            }
        }

        self.expanding.insert(handle);
        for (position, slot) in frame.slots().iter().enumerate() {
            if self.options.indent > 0 {
                self.newline()?;
            } else if position > 0 {
                self.write(b" ")?;
            }
            match well_known.role(slot.name) {
                SlotRole::Id => {
                    self.write(b"=")?;
                    self.print_value(slot.value, true)?;
                }
                SlotRole::IsA => {
                    self.write(b":")?;
                    self.print_link(slot.value)?;
                }
                SlotRole::Is => {
                    self.write(b"+")?;
                    self.print_link(slot.value)?;
                }
                SlotRole::Unnamed => self.print_link(slot.value)?,
                SlotRole::Named => {
                    self.print_link(slot.name)?;
                    self.write(b": ")?;
                    self.print_link(slot.value)?;
                }
            }
        }
        self.expanding.remove(&handle);

        self.indentation -= self.options.indent;
        if self.options.indent > 0 && !frame.is_empty() {
            self.newline()?;
        }
        self.write(b"}")
    }

    fn print_array(&mut self, array: &ArrayDatum) -> Result<(), Error> {
        self.write(b"[")?;
        for (position, &element) in array.elements().iter().enumerate() {
            if position > 0 {
                self.write(b", ")?;
            }
            self.print_link(element)?;
        }
        self.write(b"]")
    }

    /// Prints a handle found inside a frame or array, linking instead of expanding
    /// where the options ask for it.
    fn print_link(&mut self, handle: Handle) -> Result<(), Error> {
        if handle.is_ref() {
            let store = self.store;
            match store.resolve(handle)? {
                Datum::Proxy(proxy) => return self.print_value(proxy.symbol, true),
                Datum::Frame(frame) => {
                    if let Some(id) = frame.get(store.well_known().id) {
                        let elide = self.options.shallow
                            || (!self.options.global && store.is_global_ref(handle));
                        if elide {
                            return self.print_value(id, true);
                        }
                    }
                }
                _ => {}
            }
        }
        self.print_value(handle, false)
    }

    fn print_symbol(&mut self, symbol: &SymbolDatum, reference: bool) -> Result<(), Error> {
        if !reference && symbol.bound {
            self.write(b"'")?;
        }
        let store = self.store;
        let name = store.string(symbol.name)?.as_bytes();
        let Some((&first, rest)) = name.split_first() else {
            return Err(Error::new(ErrorKind::Internal).with_message("symbol with empty name"));
        };
        // A bare `nil` would read back as the nil handle.
        if !(first.is_ascii_alphabetic() || first == b'/' || first == b'_') || name == b"nil" {
            self.write(b"\\")?;
        }
        self.write(&[first])?;

        let mut run = 0;
        for (position, &byte) in rest.iter().enumerate() {
            let plain = byte.is_ascii_alphanumeric() || matches!(byte, b'/' | b'_' | b'-');
            if !plain {
                self.write(&rest[run..position])?;
                self.write(&[b'\\', byte])?;
                run = position + 1;
            }
        }
        self.write(&rest[run..])
    }

    fn print_string(&mut self, string: &StringDatum) -> Result<(), Error> {
        self.write(b"\"")?;
        let bytes = string.as_bytes();
        let mut start = 0;
        while start < bytes.len() {
            let run = bytes[start..]
                .iter()
                .position(|&byte| ESCAPES[byte as usize] != Escape::None)
                .map_or(bytes.len(), |offset| start + offset);
            if run > start {
                self.write(&bytes[start..run])?;
            }
            let Some(&byte) = bytes.get(run) else {
                break;
            };
            match ESCAPES[byte as usize] {
                Escape::Newline => self.write(b"\\n")?,
                Escape::Return => self.write(b"\\r")?,
                Escape::Tab => self.write(b"\\t")?,
                Escape::Quote => self.write(b"\\\"")?,
                Escape::Backslash => self.write(b"\\\\")?,
                Escape::Hex => self.write(&[
                    b'\\',
                    b'x',
                    HEX_DIGITS[(byte >> 4) as usize],
                    HEX_DIGITS[(byte & 0x0f) as usize],
                ])?,
                Escape::None => unreachable!("run stops only at escaped bytes"),
            }
            start = run + 1;
        }
        self.write(b"\"")
    }

    fn newline(&mut self) -> Result<(), Error> {
        self.write(b"\n")?;
        for _ in 0..self.indentation {
            self.write(b" ")?;
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.output.write_all(bytes).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write printer output")
                .with_source(err)
        })
    }
}

/// Prints `handle` into a fresh buffer with a one-shot printer.
pub fn encode(store: &Store<'_>, handle: Handle, options: PrintOptions) -> Result<Vec<u8>, Error> {
    let mut printer = Printer::new(store, Vec::new(), options);
    printer.print(handle)?;
    Ok(printer.into_inner())
}

/// Like `encode`, for output known to be UTF-8 (symbol names may carry raw bytes).
pub fn encode_text(store: &Store<'_>, handle: Handle, options: PrintOptions) -> Result<String, Error> {
    String::from_utf8(encode(store, handle, options)?).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("printed text is not valid UTF-8")
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{encode, encode_text, PrintOptions, Printer};
    use crate::core::datum::Slot;
    use crate::core::error::ErrorKind;
    use crate::core::handle::Handle;
    use crate::core::reader::{MAX_NESTING, parse_bytes};
    use crate::core::store::Store;

    fn one_line() -> PrintOptions {
        PrintOptions::default()
    }

    /// `depth` anonymous frames, each holding the next one in a `next` slot.
    fn chain(store: &mut Store<'_>, depth: usize) -> Handle {
        let next = store.resolve_name("next").expect("next");
        let mut head = store.allocate_frame(&[]).expect("tail");
        for _ in 1..depth {
            head = store.allocate_frame(&[Slot::new(next, head)]).expect("link");
        }
        head
    }

    #[test]
    fn nesting_beyond_the_reader_limit_is_refused() {
        let mut store = Store::new();
        let head = chain(&mut store, 200_000);
        let err = encode(&store, head, one_line()).expect_err("too deep");
        assert_eq!(err.kind(), ErrorKind::Usage);

        let array = store.allocate_array(&[head]).expect("array");
        let err = encode(&store, array, one_line()).expect_err("too deep in array");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn nesting_at_the_reader_limit_prints_and_parses_back() {
        let mut store = Store::new();
        let head = chain(&mut store, MAX_NESTING);
        let text = encode(&store, head, one_line()).expect("print");
        assert_eq!(text.iter().filter(|&&byte| byte == b'{').count(), MAX_NESTING);

        let mut copy = Store::new();
        let outcome = parse_bytes(&mut copy, text).expect("parse");
        assert!(outcome.first().is_some());
    }

    #[test]
    fn prints_reserved_slots_with_prefixes() {
        let mut store = Store::new();
        let well_known = store.well_known();
        let foo = store.intern("foo").expect("foo");
        let bar = store.resolve_name("bar").expect("bar");
        let name = store.resolve_name("name").expect("name");
        let hi = store.allocate_string("hi\n").expect("string");
        let frame = store
            .allocate_frame(&[
                Slot::new(well_known.id, foo),
                Slot::new(well_known.isa, bar),
                Slot::new(name, hi),
            ])
            .expect("frame");

        let text = encode_text(&store, frame, one_line()).expect("print");
        assert_eq!(text, r#"{=foo :bar name: "hi\n"}"#);
    }

    #[test]
    fn prints_scalars_and_arrays() {
        let mut store = Store::new();
        let text = store.allocate_string("x").expect("string");
        let array = store
            .allocate_array(&[Handle::Int(-4), Handle::Float(2.5), Handle::Float(3.0), text, Handle::Nil])
            .expect("array");
        assert_eq!(
            encode_text(&store, array, one_line()).expect("print"),
            r#"[-4, 2.5, 3.0, "x", nil]"#
        );
        assert_eq!(encode_text(&store, Handle::Float(1e21), one_line()).expect("print"), "1e21");
    }

    #[test]
    fn escapes_control_and_non_ascii_bytes() {
        let mut store = Store::new();
        let string = store
            .allocate_string(b"a\"b\\c\td\re\x00\x7f\xff ~".as_slice())
            .expect("string");
        let text = encode_text(&store, string, one_line()).expect("print");
        assert_eq!(text, r#""a\"b\\c\td\re\x00\x7f\xff ~""#);

        let empty = store.allocate_string("").expect("empty");
        assert_eq!(encode_text(&store, empty, one_line()).expect("print"), r#""""#);
    }

    #[test]
    fn symbols_escape_unusual_bytes_and_quote_bound_values() {
        let mut store = Store::new();
        let plain = store.intern("/s/person-name_2").expect("intern");
        let odd = store.intern("9 lives:x").expect("intern");
        assert_eq!(
            encode_text(&store, plain, one_line()).expect("print"),
            "/s/person-name_2"
        );
        assert_eq!(encode_text(&store, odd, one_line()).expect("print"), r"\9\ lives\:x");

        store.bind(plain, Handle::Int(1)).expect("bind");
        let holder = store.allocate_frame(&[Slot::unnamed(plain)]).expect("frame");
        assert_eq!(
            encode_text(&store, holder, one_line()).expect("print"),
            "{'/s/person-name_2}"
        );
    }

    #[test]
    fn symbol_named_nil_is_escaped() {
        let mut store = Store::new();
        let nil = store.intern("nil").expect("intern");
        assert_eq!(encode_text(&store, nil, one_line()).expect("print"), r"\nil");
    }

    #[test]
    fn indentation_places_slots_on_lines() {
        let mut store = Store::new();
        let well_known = store.well_known();
        let a = store.intern("a").expect("a");
        let b = store.resolve_name("b").expect("b");
        let c = store.resolve_name("c").expect("c");
        let inner = store.allocate_frame(&[Slot::new(c, Handle::Int(1))]).expect("inner");
        let empty = store.allocate_frame(&[]).expect("empty");
        let outer = store
            .allocate_frame(&[
                Slot::new(well_known.id, a),
                Slot::new(b, inner),
                Slot::unnamed(empty),
            ])
            .expect("outer");

        let options = PrintOptions {
            indent: 2,
            byref: false,
            ..PrintOptions::default()
        };
        let text = encode_text(&store, outer, options).expect("print");
        assert_eq!(text, "{\n  =a\n  b: {\n    c: 1\n  }\n  {}\n}");
    }

    #[test]
    fn shared_anonymous_frame_is_defined_once_by_index() {
        let mut store = Store::new();
        let well_known = store.well_known();
        let root_id = store.intern("root").expect("root");
        let left = store.resolve_name("left").expect("left");
        let right = store.resolve_name("right").expect("right");
        let shared = store.allocate_frame(&[Slot::unnamed(Handle::Int(7))]).expect("shared");
        let root = store
            .allocate_frame(&[
                Slot::new(well_known.id, root_id),
                Slot::new(left, shared),
                Slot::new(right, shared),
            ])
            .expect("root");

        let text = encode_text(&store, root, one_line()).expect("print");
        assert_eq!(text, "{=root left: {=#1 7} right: #1}");

        let by_id = PrintOptions {
            byref: false,
            ..PrintOptions::default()
        };
        let text = encode_text(&store, root, by_id).expect("print");
        assert_eq!(text, "{=root left: {7} right: {7}}");
    }

    #[test]
    fn anonymous_cycle_needs_index_references() {
        let mut store = Store::new();
        let next = store.resolve_name("next").expect("next");
        let node = store.allocate_frame(&[]).expect("node");
        store.add_slot(node, next, node).expect("cycle");

        assert_eq!(encode_text(&store, node, one_line()).expect("print"), "{=#1 next: #1}");

        let by_id = PrintOptions {
            byref: false,
            ..PrintOptions::default()
        };
        let err = encode(&store, node, by_id).expect_err("cycle by id");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn named_cycle_prints_back_reference() {
        let mut global = Store::new();
        global.freeze().expect("freeze");
        let mut store = Store::local(&global).expect("local");
        let well_known = store.well_known();
        let me = store.intern("me").expect("me");
        let next = store.resolve_name("next").expect("next");
        let node = store.allocate_frame(&[Slot::new(well_known.id, me)]).expect("node");
        store.add_slot(node, next, node).expect("cycle");

        assert_eq!(encode_text(&store, node, one_line()).expect("print"), "{=me next: me}");
    }

    #[test]
    fn global_named_frames_are_linked_unless_requested() {
        let mut global = Store::new();
        let well_known = global.well_known();
        let person = global.intern("person").expect("person");
        let kind = global
            .allocate_frame(&[Slot::new(well_known.id, person), Slot::unnamed(Handle::Int(1))])
            .expect("kind");
        global.freeze().expect("freeze");

        let mut store = Store::local(&global).expect("local");
        let doc = store.allocate_frame(&[Slot::new(well_known.isa, kind)]).expect("doc");
        assert_eq!(encode_text(&store, doc, one_line()).expect("print"), "{:person}");

        let expand = PrintOptions {
            global: true,
            ..PrintOptions::default()
        };
        assert_eq!(
            encode_text(&store, doc, expand).expect("print"),
            "{:{=person 1}}"
        );

        let local_kind_id = store.intern("local-kind").expect("id");
        let local_kind = store
            .allocate_frame(&[Slot::new(well_known.id, local_kind_id)])
            .expect("local kind");
        let doc = store.allocate_frame(&[Slot::new(well_known.is, local_kind)]).expect("doc");
        assert_eq!(
            encode_text(&store, doc, one_line()).expect("print"),
            "{+{=local-kind}}"
        );
        let shallow = PrintOptions {
            shallow: true,
            ..PrintOptions::default()
        };
        assert_eq!(encode_text(&store, doc, shallow).expect("print"), "{+local-kind}");
    }

    #[test]
    fn print_all_dumps_bound_values_in_allocation_order() {
        let mut store = Store::new();
        let well_known = store.well_known();
        for name in ["one", "two"] {
            let id = store.intern(name).expect("id");
            store.allocate_frame(&[Slot::new(well_known.id, id)]).expect("frame");
        }
        store.resolve_name("dangling").expect("proxy");

        let mut printer = Printer::new(&store, Vec::new(), PrintOptions::default());
        printer.print_all().expect("print all");
        assert_eq!(printer.into_inner(), b"{=one}\n{=two}\n");
    }
}
