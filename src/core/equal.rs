// Deep structural equality between handles that may live in different stores.
use std::collections::HashSet;

use crate::core::datum::Datum;
use crate::core::error::{Error, ErrorKind};
use crate::core::handle::Handle;
use crate::core::store::Store;

/// Whether `a` in `left` and `b` in `right` denote the same graph.
///
/// Frames and arrays compare element-wise in order. Symbols and proxies compare by
/// name, so the well-known symbols of two unrelated global stores match. An unbound
/// symbol matches a proxy of the same name. A pair of
/// objects already under comparison is assumed equal, which makes cycles terminate.
pub fn equivalent(left: &Store<'_>, a: Handle, right: &Store<'_>, b: Handle) -> Result<bool, Error> {
    let mut seen = HashSet::new();
    let mut pending = vec![(a, b)];
    while let Some((a, b)) = pending.pop() {
        let (x, y) = match (a, b) {
            (Handle::Index(_), _) | (_, Handle::Index(_)) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("index handles have no structure to compare"));
            }
            (Handle::Ref(x), Handle::Ref(y)) => (x, y),
            (a, b) => {
                if a != b {
                    return Ok(false);
                }
                continue;
            }
        };
        if !seen.insert((x, y)) {
            continue;
        }

        let same = match (left.resolve(a)?, right.resolve(b)?) {
            (Datum::String(x), Datum::String(y)) => x == y,
            (Datum::Symbol(_), Datum::Symbol(_)) => left.symbol_name(a)? == right.symbol_name(b)?,
            (Datum::Proxy(x), Datum::Proxy(y)) => {
                left.symbol_name(x.symbol)? == right.symbol_name(y.symbol)?
            }
            // An unbound symbol prints as a bare name, which reads back as a proxy.
            (Datum::Symbol(x), Datum::Proxy(y)) => {
                !x.bound && left.symbol_name(a)? == right.symbol_name(y.symbol)?
            }
            (Datum::Proxy(x), Datum::Symbol(y)) => {
                !y.bound && left.symbol_name(x.symbol)? == right.symbol_name(b)?
            }
            (Datum::Frame(x), Datum::Frame(y)) => {
                if x.len() != y.len() {
                    return Ok(false);
                }
                for (p, q) in x.slots().iter().zip(y.slots()) {
                    pending.push((p.name, q.name));
                    pending.push((p.value, q.value));
                }
                true
            }
            (Datum::Array(x), Datum::Array(y)) => {
                if x.len() != y.len() {
                    return Ok(false);
                }
                pending.extend(x.elements().iter().copied().zip(y.elements().iter().copied()));
                true
            }
            _ => false,
        };
        if !same {
            return Ok(false);
        }
    }
    Ok(true)
}
