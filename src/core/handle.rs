// Tagged scalar handles: nil, inline numbers, object references, and serialization indices.
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_STORE_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of one store arena. Every object id is tagged with it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct StoreId(u32);

impl StoreId {
    pub(crate) fn next() -> Self {
        StoreId(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Opaque address of a datum: owning store plus slot in that store's arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    store: StoreId,
    slot: u32,
}

impl ObjectId {
    pub(crate) fn new(store: StoreId, slot: u32) -> Self {
        Self { store, slot }
    }

    pub fn store(self) -> StoreId {
        self.store
    }

    pub fn slot(self) -> u32 {
        self.slot
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub enum Handle {
    #[default]
    Nil,
    Ref(ObjectId),
    Int(i64),
    Float(f64),
    /// Transient reference used while printing; never stored inside a datum.
    Index(u32),
}

impl Handle {
    pub fn is_nil(self) -> bool {
        matches!(self, Handle::Nil)
    }

    pub fn is_ref(self) -> bool {
        matches!(self, Handle::Ref(_))
    }

    pub fn is_int(self) -> bool {
        matches!(self, Handle::Int(_))
    }

    pub fn is_float(self) -> bool {
        matches!(self, Handle::Float(_))
    }

    pub fn is_index(self) -> bool {
        matches!(self, Handle::Index(_))
    }

    pub fn object_id(self) -> Option<ObjectId> {
        match self {
            Handle::Ref(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Handle::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f64> {
        match self {
            Handle::Float(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_index(self) -> Option<u32> {
        match self {
            Handle::Index(value) => Some(value),
            _ => None,
        }
    }
}

// Floats compare by bit pattern so handles can key hash maps.
impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Handle::Nil, Handle::Nil) => true,
            (Handle::Ref(a), Handle::Ref(b)) => a == b,
            (Handle::Int(a), Handle::Int(b)) => a == b,
            (Handle::Float(a), Handle::Float(b)) => a.to_bits() == b.to_bits(),
            (Handle::Index(a), Handle::Index(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Handle::Nil => {}
            Handle::Ref(id) => id.hash(state),
            Handle::Int(value) => value.hash(state),
            Handle::Float(value) => value.to_bits().hash(state),
            Handle::Index(value) => value.hash(state),
        }
    }
}

impl From<i64> for Handle {
    fn from(value: i64) -> Self {
        Handle::Int(value)
    }
}

impl From<f64> for Handle {
    fn from(value: f64) -> Self {
        Handle::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Handle, ObjectId, StoreId};
    use std::collections::HashSet;

    #[test]
    fn discriminant_is_self_describing() {
        let id = ObjectId::new(StoreId::next(), 4);
        assert!(Handle::Nil.is_nil());
        assert_eq!(Handle::Ref(id).object_id(), Some(id));
        assert_eq!(Handle::from(-3i64).as_int(), Some(-3));
        assert_eq!(Handle::from(0.5f64).as_float(), Some(0.5));
        assert_eq!(Handle::Index(2).as_index(), Some(2));
        assert!(!Handle::Index(2).is_ref());
        assert_eq!(Handle::default(), Handle::Nil);
    }

    #[test]
    fn floats_compare_by_bits() {
        assert_eq!(Handle::Float(f64::NAN), Handle::Float(f64::NAN));
        assert_ne!(Handle::Float(0.0), Handle::Float(-0.0));
        assert_ne!(Handle::Int(1), Handle::Float(1.0));

        let set: HashSet<Handle> = [Handle::Int(1), Handle::Int(1), Handle::Index(1)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn store_ids_are_unique() {
        let a = StoreId::next();
        let b = StoreId::next();
        assert_ne!(a, b);
    }
}
