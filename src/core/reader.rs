//! Purpose: Decode canonical frame text into datums of a target store.
//! Exports: `Reader`, `ParseOutcome`, `parse`, `parse_bytes`, `MAX_NESTING`.
//! Role: Inverse of `core::printer`; accepts both reference styles and both layouts.
//! Invariants: A failed top-level object is rolled back; earlier objects stay intact.
//! Invariants: `#n` indices are scoped to one reader; unknown ones are errors.
//! Notes: Unresolved names are reported, not fatal; callers pick the policy.
use std::collections::HashMap;
use std::io::Read;

use bstr::ByteSlice;
use tracing::{debug, warn};

use crate::core::datum::Slot;
use crate::core::error::{Error, ErrorKind};
use crate::core::handle::Handle;
use crate::core::store::Store;

/// Deepest frame/array nesting accepted before the input is rejected.
pub const MAX_NESTING: usize = 512;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParseOutcome {
    pub objects: Vec<Handle>,
    /// Names referenced but never defined anywhere visible, in first-seen order.
    pub unresolved: Vec<String>,
}

impl ParseOutcome {
    pub fn first(&self) -> Option<Handle> {
        self.objects.first().copied()
    }

    pub fn warnings(&self) -> Vec<Error> {
        self.unresolved.iter().map(|name| unresolved_symbol(name)).collect()
    }

    /// Treats unresolved names as a hard failure.
    pub fn strict(self) -> Result<Vec<Handle>, Error> {
        match self.unresolved.first() {
            Some(name) => Err(unresolved_symbol(name)),
            None => Ok(self.objects),
        }
    }
}

fn unresolved_symbol(name: &str) -> Error {
    Error::new(ErrorKind::UnresolvedSymbol).with_message(format!("unresolved symbol `{name}`"))
}

pub struct Reader<'s, 'g> {
    store: &'s mut Store<'g>,
    input: Vec<u8>,
    pos: usize,
    depth: usize,
    indices: HashMap<u32, Handle>,
    unit_indices: Vec<u32>,
    objects: Vec<Handle>,
}

impl<'s, 'g> Reader<'s, 'g> {
    pub fn new(store: &'s mut Store<'g>, input: impl Into<Vec<u8>>) -> Self {
        Self {
            store,
            input: input.into(),
            pos: 0,
            depth: 0,
            indices: HashMap::new(),
            unit_indices: Vec::new(),
            objects: Vec::new(),
        }
    }

    /// Reads the whole byte source up front.
    pub fn from_source(store: &'s mut Store<'g>, mut source: impl Read) -> Result<Self, Error> {
        let mut input = Vec::new();
        source.read_to_end(&mut input).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read frame text")
                .with_source(err)
        })?;
        Ok(Self::new(store, input))
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Parses the next top-level object, or returns `None` at end of input.
    ///
    /// On error the object is rolled back out of the store and the reader stops.
    pub fn next_object(&mut self) -> Result<Option<Handle>, Error> {
        self.skip_whitespace();
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let checkpoint = self.store.checkpoint();
        self.unit_indices.clear();
        match self.parse_object() {
            Ok(handle) => {
                self.store.commit(checkpoint);
                self.objects.push(handle);
                Ok(Some(handle))
            }
            Err(err) => {
                self.store.rollback(checkpoint);
                for index in self.unit_indices.drain(..) {
                    self.indices.remove(&index);
                }
                self.pos = self.input.len();
                debug!(error = %err, "discarded malformed object");
                Err(err)
            }
        }
    }

    /// Resolves forward references across everything read so far.
    pub fn finish(self) -> Result<ParseOutcome, Error> {
        let unresolved = self.store.resolve_proxies()?;
        for name in &unresolved {
            warn!(symbol = %name, "unresolved symbol");
        }
        Ok(ParseOutcome {
            objects: self.objects,
            unresolved,
        })
    }

    fn parse_object(&mut self) -> Result<Handle, Error> {
        self.skip_whitespace();
        let Some(byte) = self.peek() else {
            return Err(self.malformed("unexpected end of input"));
        };
        match byte {
            b'{' => self.nested(Self::parse_frame),
            b'[' => self.nested(Self::parse_array),
            b'"' => {
                let bytes = self.parse_string()?;
                self.store.allocate_string(bytes)
            }
            b'#' => {
                let start = self.pos;
                self.pos += 1;
                let index = self.parse_index()?;
                self.indices.get(&index).copied().ok_or_else(|| {
                    self.error_at(ErrorKind::DanglingIndexReference, start)
                        .with_message(format!("index #{index} referenced before its definition"))
                })
            }
            b'\'' => {
                self.pos += 1;
                let (name, _) = self.parse_symbol_name()?;
                self.store.lookup(name)
            }
            b'-' | b'0'..=b'9' => self.parse_number(),
            byte if is_symbol_start(byte) => {
                let (name, escaped) = self.parse_symbol_name()?;
                if !escaped && name == b"nil" {
                    return Ok(Handle::Nil);
                }
                self.store.resolve_name(name)
            }
            byte => Err(self.malformed(format!("unexpected character {:?}", [byte].as_bstr()))),
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Handle, Error>) -> Result<Handle, Error> {
        if self.depth >= MAX_NESTING {
            return Err(self.malformed(format!("nesting deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_frame(&mut self) -> Result<Handle, Error> {
        let start = self.pos;
        self.pos += 1;
        let mut frame = self.store.reserve_frame()?;
        let well_known = self.store.well_known();
        let mut slots = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(byte) = self.peek() else {
                return Err(self
                    .error_at(ErrorKind::MalformedText, start)
                    .with_message("unterminated frame"));
            };
            match byte {
                b'}' => {
                    self.pos += 1;
                    break;
                }
                b'=' => {
                    self.pos += 1;
                    if self.peek() == Some(b'#') {
                        self.pos += 1;
                        self.define_index(frame)?;
                        continue;
                    }
                    let symbol = self.parse_id(&mut frame, &mut slots)?;
                    slots.push(Slot::new(well_known.id, symbol));
                }
                b':' => {
                    self.pos += 1;
                    let value = self.parse_object()?;
                    slots.push(Slot::new(well_known.isa, value));
                }
                b'+' => {
                    self.pos += 1;
                    let value = self.parse_object()?;
                    slots.push(Slot::new(well_known.is, value));
                }
                _ => {
                    let name = self.parse_object()?;
                    if self.peek() == Some(b':') {
                        self.pos += 1;
                        let value = if name == well_known.id {
                            self.skip_whitespace();
                            self.parse_id(&mut frame, &mut slots)?
                        } else {
                            self.parse_object()?
                        };
                        slots.push(Slot::new(name, value));
                    } else {
                        slots.push(Slot::unnamed(name));
                    }
                }
            }
        }
        self.store.fill_frame(frame, slots)?;
        Ok(frame)
    }

    /// Reads an id symbol and binds it to `frame` right away, so self references
    /// inside the frame resolve to it.
    ///
    /// When the name already denotes a frame of this store, that frame is the one
    /// being defined: `frame` switches to it and it is refilled in place.
    fn parse_id(&mut self, frame: &mut Handle, slots: &mut [Slot]) -> Result<Handle, Error> {
        if !self.peek().is_some_and(is_symbol_start) {
            return Err(self.malformed("expected symbol for frame id"));
        }
        let (name, _) = self.parse_symbol_name()?;
        let symbol = self.store.intern(&name)?;
        if let Some(existing) = self.store.defined_frame(symbol, *frame) {
            debug!(name = %name.as_bstr(), "refilling redefined frame");
            self.retarget(*frame, existing, slots);
            *frame = existing;
        }
        self.store.bind_id(*frame, symbol)
    }

    /// Points indices and slots read so far at `to` instead of the reserved `from`.
    fn retarget(&mut self, from: Handle, to: Handle, slots: &mut [Slot]) {
        for handle in self.indices.values_mut().filter(|handle| **handle == from) {
            *handle = to;
        }
        for slot in slots.iter_mut() {
            if slot.name == from {
                slot.name = to;
            }
            if slot.value == from {
                slot.value = to;
            }
        }
    }

    fn define_index(&mut self, frame: Handle) -> Result<(), Error> {
        let start = self.pos;
        let index = self.parse_index()?;
        if self.indices.contains_key(&index) {
            return Err(self
                .error_at(ErrorKind::MalformedText, start)
                .with_message(format!("index #{index} defined twice")));
        }
        self.indices.insert(index, frame);
        self.unit_indices.push(index);
        Ok(())
    }

    fn parse_index(&mut self) -> Result<u32, Error> {
        let start = self.pos;
        while self.peek().is_some_and(|byte| byte.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = &self.input[start..self.pos];
        if digits.is_empty() {
            return Err(self.malformed("expected digits after '#'"));
        }
        std::str::from_utf8(digits)
            .ok()
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| {
                self.error_at(ErrorKind::MalformedText, start)
                    .with_message("index out of range")
            })
    }

    fn parse_array(&mut self) -> Result<Handle, Error> {
        let start = self.pos;
        self.pos += 1;
        let mut elements = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return self.store.allocate_array(&elements);
        }
        loop {
            elements.push(self.parse_object()?);
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(self.malformed("expected ',' or ']' in array")),
                None => {
                    return Err(self
                        .error_at(ErrorKind::MalformedText, start)
                        .with_message("unterminated array"));
                }
            }
        }
        self.store.allocate_array(&elements)
    }

    fn parse_string(&mut self) -> Result<Vec<u8>, Error> {
        let start = self.pos;
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            let rest = &self.input[self.pos..];
            let Some(stop) = rest.iter().position(|&byte| byte == b'"' || byte == b'\\') else {
                return Err(self
                    .error_at(ErrorKind::MalformedText, start)
                    .with_message("unterminated string"));
            };
            bytes.extend_from_slice(&rest[..stop]);
            self.pos += stop;
            if self.input[self.pos] == b'"' {
                self.pos += 1;
                return Ok(bytes);
            }

            let escape_at = self.pos;
            self.pos += 1;
            let decoded = match self.peek() {
                Some(b'n') => b'\n',
                Some(b'r') => b'\r',
                Some(b't') => b'\t',
                Some(b'"') => b'"',
                Some(b'\\') => b'\\',
                Some(b'x') => {
                    let high = self.input.get(self.pos + 1).copied().and_then(hex_value);
                    let low = self.input.get(self.pos + 2).copied().and_then(hex_value);
                    match (high, low) {
                        (Some(high), Some(low)) => {
                            self.pos += 2;
                            (high << 4) | low
                        }
                        _ => {
                            return Err(self
                                .error_at(ErrorKind::MalformedText, escape_at)
                                .with_message("\\x escape needs two hex digits"));
                        }
                    }
                }
                Some(other) => {
                    return Err(self
                        .error_at(ErrorKind::MalformedText, escape_at)
                        .with_message(format!("bad escape \\{}", [other].as_bstr())));
                }
                None => {
                    return Err(self
                        .error_at(ErrorKind::MalformedText, start)
                        .with_message("unterminated string"));
                }
            };
            self.pos += 1;
            bytes.push(decoded);
        }
    }

    /// Reads a symbol name; the flag reports whether any byte was escaped.
    fn parse_symbol_name(&mut self) -> Result<(Vec<u8>, bool), Error> {
        let mut name = Vec::new();
        let mut escaped = false;
        while let Some(byte) = self.peek() {
            if byte == b'\\' {
                let Some(&literal) = self.input.get(self.pos + 1) else {
                    return Err(self.malformed("dangling '\\' at end of input"));
                };
                name.push(literal);
                escaped = true;
                self.pos += 2;
            } else if is_symbol_byte(byte) && (!name.is_empty() || is_symbol_start(byte)) {
                name.push(byte);
                self.pos += 1;
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.malformed("expected symbol name"));
        }
        Ok((name, escaped))
    }

    fn parse_number(&mut self) -> Result<Handle, Error> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let digits_start = self.pos;
        self.skip_digits();
        if self.pos == digits_start {
            return Err(self.malformed("expected digits"));
        }
        let mut float = false;
        if self.peek() == Some(b'.') {
            float = true;
            self.pos += 1;
            self.skip_digits();
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            let exponent_start = self.pos;
            self.skip_digits();
            if self.pos == exponent_start {
                return Err(self.malformed("expected exponent digits"));
            }
        }

        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|err| self.error_at(ErrorKind::MalformedText, start).with_source(err))?;
        if float {
            text.parse::<f64>().map(Handle::Float).map_err(|err| {
                self.error_at(ErrorKind::MalformedText, start)
                    .with_message(format!("invalid float {text}"))
                    .with_source(err)
            })
        } else {
            text.parse::<i64>().map(Handle::Int).map_err(|err| {
                self.error_at(ErrorKind::MalformedText, start)
                    .with_message(format!("integer {text} out of range"))
                    .with_source(err)
            })
        }
    }

    fn skip_digits(&mut self) {
        while self.peek().is_some_and(|byte| byte.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|byte| byte.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn malformed(&self, message: impl Into<String>) -> Error {
        self.error_at(ErrorKind::MalformedText, self.pos)
            .with_message(message)
    }

    fn error_at(&self, kind: ErrorKind, offset: usize) -> Error {
        let offset = offset.min(self.input.len());
        let before = &self.input[..offset];
        let line = before.iter().filter(|&&byte| byte == b'\n').count() + 1;
        let column = offset - before.iter().rposition(|&byte| byte == b'\n').map_or(0, |nl| nl + 1) + 1;
        Error::new(kind)
            .with_offset(offset as u64)
            .with_position(line as u32, column as u32)
    }
}

fn is_symbol_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'/' || byte == b'_' || byte == b'\\'
}

fn is_symbol_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'/' | b'_' | b'-')
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|digit| digit as u8)
}

/// Parses every object in `bytes` into `store` and resolves forward references.
pub fn parse_bytes(store: &mut Store<'_>, bytes: impl Into<Vec<u8>>) -> Result<ParseOutcome, Error> {
    let mut reader = Reader::new(store, bytes);
    while reader.next_object()?.is_some() {}
    reader.finish()
}

pub fn parse(store: &mut Store<'_>, source: impl Read) -> Result<ParseOutcome, Error> {
    let mut reader = Reader::from_source(store, source)?;
    while reader.next_object()?.is_some() {}
    reader.finish()
}
