//! The shared ABC constant pool.
//!
//! Method bodies refer to integers, unsigned integers, doubles, strings, namespaces,
//! namespace sets and multinames by index into the constant pool of their container.
//! The pipeline only reads the pool while analyzing and optimizing, and only writes it
//! through [`ConstantPool::get_index`] when emitting constants that were produced by
//! folding and are not yet interned.
//!
//! As in the file format, index `0` of every table is reserved. For multinames and
//! namespaces it stands for "any", for strings it stands for the empty/absent name.
//!
//! # Examples
//!
//! ```rust
//! use abcscope::metadata::{ConstantPool, PoolKind, PoolValue};
//!
//! let mut pool = ConstantPool::new();
//! let index = pool.get_index(PoolValue::Int(100_000));
//! assert_eq!(pool.int(index), Some(100_000));
//!
//! // Interning is idempotent
//! assert_eq!(pool.get_index(PoolValue::Int(100_000)), index);
//! assert_eq!(pool.get(PoolKind::Int, index), Some(PoolValue::Int(100_000)));
//! ```

use rustc_hash::FxHashMap;
use strum::{Display, EnumIter};

/// Kind byte of a namespace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum NamespaceKind {
    /// Private namespace
    Private = 0x05,
    /// Regular namespace
    Namespace = 0x08,
    /// Package namespace
    Package = 0x16,
    /// Package-internal namespace
    PackageInternal = 0x17,
    /// Protected namespace
    Protected = 0x18,
    /// Explicit namespace
    Explicit = 0x19,
    /// Static protected namespace
    StaticProtected = 0x1A,
}

/// A namespace entry: kind plus string index of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Kind of the namespace
    pub kind: NamespaceKind,
    /// String pool index of the namespace name
    pub name: u32,
}

/// A multiname entry.
///
/// Runtime-qualified forms take part of their name from the operand stack; the number
/// of extra stack values is reported by [`Multiname::runtime_arity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Multiname {
    /// Namespace and name both fixed (`QName` / `QNameA`).
    QName {
        /// Namespace pool index
        namespace: u32,
        /// String pool index
        name: u32,
        /// Attribute form
        attribute: bool,
    },
    /// Namespace from the stack, name fixed (`RTQName` / `RTQNameA`).
    RtqName {
        /// String pool index
        name: u32,
        /// Attribute form
        attribute: bool,
    },
    /// Namespace and name from the stack (`RTQNameL` / `RTQNameLA`).
    RtqNameLate {
        /// Attribute form
        attribute: bool,
    },
    /// Fixed name looked up in a namespace set (`Multiname` / `MultinameA`).
    Multiname {
        /// String pool index
        name: u32,
        /// Namespace set pool index
        ns_set: u32,
        /// Attribute form
        attribute: bool,
    },
    /// Name from the stack looked up in a namespace set (`MultinameL` / `MultinameLA`).
    MultinameLate {
        /// Namespace set pool index
        ns_set: u32,
        /// Attribute form
        attribute: bool,
    },
    /// Parameterized type name such as `Vector.<int>`.
    TypeName {
        /// Multiname index of the generic base
        base: u32,
        /// Multiname indices of the type parameters
        parameters: Vec<u32>,
    },
}

impl Multiname {
    /// Number of operand stack values this multiname consumes at run time.
    #[must_use]
    pub fn runtime_arity(&self) -> u32 {
        match self {
            Multiname::RtqName { .. } | Multiname::MultinameLate { .. } => 1,
            Multiname::RtqNameLate { .. } => 2,
            Multiname::QName { .. } | Multiname::Multiname { .. } | Multiname::TypeName { .. } => 0,
        }
    }

    /// String pool index of the fixed name part, if any.
    #[must_use]
    pub fn name(&self) -> Option<u32> {
        match self {
            Multiname::QName { name, .. }
            | Multiname::RtqName { name, .. }
            | Multiname::Multiname { name, .. } => Some(*name),
            _ => None,
        }
    }
}

/// Discriminant used with [`ConstantPool::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum PoolKind {
    /// Signed 32-bit integers
    Int,
    /// Unsigned 32-bit integers
    UInt,
    /// IEEE 754 doubles
    Double,
    /// UTF-8 strings
    String,
    /// Namespaces
    Namespace,
    /// Namespace sets
    NamespaceSet,
    /// Multinames
    Multiname,
}

/// A value that can be stored in or read from the constant pool.
#[derive(Debug, Clone)]
pub enum PoolValue {
    /// Signed 32-bit integer
    Int(i32),
    /// Unsigned 32-bit integer
    UInt(u32),
    /// Double
    Double(f64),
    /// String
    String(String),
    /// Namespace
    Namespace(Namespace),
    /// Namespace set (list of namespace indices)
    NamespaceSet(Vec<u32>),
    /// Multiname
    Multiname(Multiname),
}

impl PoolValue {
    /// The pool table this value lives in.
    #[must_use]
    pub fn kind(&self) -> PoolKind {
        match self {
            PoolValue::Int(_) => PoolKind::Int,
            PoolValue::UInt(_) => PoolKind::UInt,
            PoolValue::Double(_) => PoolKind::Double,
            PoolValue::String(_) => PoolKind::String,
            PoolValue::Namespace(_) => PoolKind::Namespace,
            PoolValue::NamespaceSet(_) => PoolKind::NamespaceSet,
            PoolValue::Multiname(_) => PoolKind::Multiname,
        }
    }
}

impl PartialEq for PoolValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PoolValue::Int(a), PoolValue::Int(b)) => a == b,
            (PoolValue::UInt(a), PoolValue::UInt(b)) => a == b,
            // Bitwise so NaN and -0.0 intern to their own slots
            (PoolValue::Double(a), PoolValue::Double(b)) => a.to_bits() == b.to_bits(),
            (PoolValue::String(a), PoolValue::String(b)) => a == b,
            (PoolValue::Namespace(a), PoolValue::Namespace(b)) => a == b,
            (PoolValue::NamespaceSet(a), PoolValue::NamespaceSet(b)) => a == b,
            (PoolValue::Multiname(a), PoolValue::Multiname(b)) => a == b,
            _ => false,
        }
    }
}

/// The constant pool of an ABC container.
///
/// Every table starts with its reserved slot `0`.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    ints: Vec<i32>,
    uints: Vec<u32>,
    doubles: Vec<f64>,
    strings: Vec<String>,
    string_index: FxHashMap<String, u32>,
    namespaces: Vec<Namespace>,
    namespace_sets: Vec<Vec<u32>>,
    multinames: Vec<Multiname>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Creates a pool containing only the reserved entries.
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            ints: vec![0],
            uints: vec![0],
            doubles: vec![f64::NAN],
            strings: vec![String::new()],
            string_index: FxHashMap::default(),
            namespaces: vec![Namespace {
                kind: NamespaceKind::Namespace,
                name: 0,
            }],
            namespace_sets: vec![Vec::new()],
            multinames: vec![Multiname::QName {
                namespace: 0,
                name: 0,
                attribute: false,
            }],
        }
    }

    /// Returns the index of `value`, interning it first if it is not yet present.
    ///
    /// The returned index is never `0`.
    pub fn get_index(&mut self, value: PoolValue) -> u32 {
        if let Some(index) = self.index_of(&value) {
            return index;
        }

        match value {
            PoolValue::Int(v) => push_entry(&mut self.ints, v),
            PoolValue::UInt(v) => push_entry(&mut self.uints, v),
            PoolValue::Double(v) => push_entry(&mut self.doubles, v),
            PoolValue::String(v) => {
                let index = push_entry(&mut self.strings, v.clone());
                self.string_index.insert(v, index);
                index
            }
            PoolValue::Namespace(v) => push_entry(&mut self.namespaces, v),
            PoolValue::NamespaceSet(v) => push_entry(&mut self.namespace_sets, v),
            PoolValue::Multiname(v) => push_entry(&mut self.multinames, v),
        }
    }

    /// Returns the index of `value` without interning it.
    #[must_use]
    pub fn index_of(&self, value: &PoolValue) -> Option<u32> {
        fn find<T>(entries: &[T], matches: impl Fn(&T) -> bool) -> Option<u32> {
            entries
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, entry)| matches(entry))
                .and_then(|(index, _)| u32::try_from(index).ok())
        }

        match value {
            PoolValue::Int(v) => find(&self.ints, |e| e == v),
            PoolValue::UInt(v) => find(&self.uints, |e| e == v),
            PoolValue::Double(v) => find(&self.doubles, |e| e.to_bits() == v.to_bits()),
            PoolValue::String(v) => self.string_index.get(v).copied(),
            PoolValue::Namespace(v) => find(&self.namespaces, |e| e == v),
            PoolValue::NamespaceSet(v) => find(&self.namespace_sets, |e| e == v),
            PoolValue::Multiname(v) => find(&self.multinames, |e| e == v),
        }
    }

    /// Returns the value stored at `index` in the table selected by `kind`.
    ///
    /// The reserved slot `0` is never returned.
    #[must_use]
    pub fn get(&self, kind: PoolKind, index: u32) -> Option<PoolValue> {
        if index == 0 {
            return None;
        }

        match kind {
            PoolKind::Int => self.int(index).map(PoolValue::Int),
            PoolKind::UInt => self.uint(index).map(PoolValue::UInt),
            PoolKind::Double => self.double(index).map(PoolValue::Double),
            PoolKind::String => self.string(index).map(|s| PoolValue::String(s.to_string())),
            PoolKind::Namespace => self.namespace(index).map(PoolValue::Namespace),
            PoolKind::NamespaceSet => self
                .namespace_sets
                .get(index as usize)
                .cloned()
                .map(PoolValue::NamespaceSet),
            PoolKind::Multiname => self.multiname(index).cloned().map(PoolValue::Multiname),
        }
    }

    /// Integer at `index`.
    #[must_use]
    pub fn int(&self, index: u32) -> Option<i32> {
        entry(&self.ints, index).copied()
    }

    /// Unsigned integer at `index`.
    #[must_use]
    pub fn uint(&self, index: u32) -> Option<u32> {
        entry(&self.uints, index).copied()
    }

    /// Double at `index`.
    #[must_use]
    pub fn double(&self, index: u32) -> Option<f64> {
        entry(&self.doubles, index).copied()
    }

    /// String at `index`.
    #[must_use]
    pub fn string(&self, index: u32) -> Option<&str> {
        entry(&self.strings, index).map(String::as_str)
    }

    /// Namespace at `index`.
    #[must_use]
    pub fn namespace(&self, index: u32) -> Option<Namespace> {
        entry(&self.namespaces, index).copied()
    }

    /// Multiname at `index`.
    #[must_use]
    pub fn multiname(&self, index: u32) -> Option<&Multiname> {
        entry(&self.multinames, index)
    }

    /// Number of stack values the multiname at `index` consumes at run time.
    ///
    /// Returns `None` for an index outside the multiname table. Index `0` (the "any"
    /// name) consumes nothing.
    #[must_use]
    pub fn runtime_arity(&self, index: u32) -> Option<u32> {
        if index == 0 {
            return Some(0);
        }
        self.multiname(index).map(Multiname::runtime_arity)
    }

    /// Human-readable rendering of the multiname at `index`, used in listings.
    #[must_use]
    pub fn display_multiname(&self, index: u32) -> String {
        match self.multiname(index) {
            Some(multiname) => match multiname.name().and_then(|name| self.string(name)) {
                Some(name) => name.to_string(),
                None => format!("{multiname:?}"),
            },
            None => format!("multiname#{index}"),
        }
    }
}

fn entry<T>(entries: &[T], index: u32) -> Option<&T> {
    if index == 0 {
        return None;
    }
    entries.get(index as usize)
}

fn push_entry<T>(entries: &mut Vec<T>, value: T) -> u32 {
    entries.push(value);
    u32::try_from(entries.len() - 1).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_slot_is_never_returned() {
        let pool = ConstantPool::new();
        assert_eq!(pool.int(0), None);
        assert_eq!(pool.get(PoolKind::String, 0), None);
        assert_eq!(pool.runtime_arity(0), Some(0));
    }

    #[test]
    fn test_interning_each_kind() {
        let mut pool = ConstantPool::new();
        let s = pool.get_index(PoolValue::String("hello".into()));
        let d = pool.get_index(PoolValue::Double(1.5));
        let nan = pool.get_index(PoolValue::Double(f64::NAN));
        let u = pool.get_index(PoolValue::UInt(u32::MAX));

        assert_eq!(pool.string(s), Some("hello"));
        assert_eq!(pool.double(d), Some(1.5));
        assert!(pool.double(nan).is_some_and(f64::is_nan));
        assert_eq!(pool.uint(u), Some(u32::MAX));

        assert_eq!(pool.get_index(PoolValue::String("hello".into())), s);
        assert_eq!(pool.get_index(PoolValue::Double(f64::NAN)), nan);
    }

    #[test]
    fn test_runtime_arity() {
        let mut pool = ConstantPool::new();
        let name = pool.get_index(PoolValue::String("x".into()));
        let ns = pool.get_index(PoolValue::Namespace(Namespace {
            kind: NamespaceKind::Package,
            name: 0,
        }));
        let qname = pool.get_index(PoolValue::Multiname(Multiname::QName {
            namespace: ns,
            name,
            attribute: false,
        }));
        let late = pool.get_index(PoolValue::Multiname(Multiname::RtqNameLate {
            attribute: false,
        }));
        let ml = pool.get_index(PoolValue::Multiname(Multiname::MultinameLate {
            ns_set: 1,
            attribute: true,
        }));

        assert_eq!(pool.runtime_arity(qname), Some(0));
        assert_eq!(pool.runtime_arity(late), Some(2));
        assert_eq!(pool.runtime_arity(ml), Some(1));
        assert_eq!(pool.runtime_arity(999), None);
        assert_eq!(pool.display_multiname(qname), "x");
    }
}
