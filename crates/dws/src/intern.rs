//! Case-insensitive symbol interning for identifiers.
//!
//! The language compares every name (variables, types, classes, methods,
//! fields, properties) case-insensitively. The interner stores each distinct
//! *normalized* name once and hands out a compact [`Symbol`] index; the
//! original spelling of the first occurrence is kept for diagnostics only.
//!
//! Symbols `0..count(StaticSymbols)` are pre-interned names the evaluator
//! refers to directly (`Result`, `Self`, `Create`, exception class names, …).

use ahash::AHashMap;
use strum::{EnumString, FromRepr, IntoStaticStr, VariantArray};
use unicode_casefold::UnicodeCaseFold;

/// Index into the symbol interner's storage.
///
/// Two identifiers that differ only in case intern to the same `Symbol`, so
/// symbol equality *is* the language's name equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub(crate) struct Symbol(u32);

impl Symbol {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<StaticSymbols> for Symbol {
    fn from(s: StaticSymbols) -> Self {
        Self(s as u32)
    }
}

/// Normalizes an identifier for case-insensitive comparison.
///
/// Lowercases after Unicode case folding, so names that differ only by case
/// (including non-ASCII letters) compare equal.
pub(crate) fn normalize(name: &str) -> String {
    name.chars().case_fold().collect()
}

/// Names known at compile time that the evaluator needs by identity.
///
/// Their `Symbol` values equal their discriminants, assigned at interner
/// construction in declaration order. Serialized forms are the *normalized*
/// spellings.
#[repr(u32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumString, IntoStaticStr, VariantArray,
    serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum StaticSymbols {
    /// The implicit function result slot.
    Result,
    /// The receiver inside methods.
    #[strum(serialize = "self")]
    SelfName,
    /// Default constructor name.
    Create,
    /// Destructor name.
    Destroy,
    /// `obj.Free` pseudo-method.
    Free,
    /// `obj.ClassName` / `cls.ClassName`.
    ClassName,
    /// `obj.ClassType`.
    ClassType,
    /// Exception `Message` field.
    Message,
    /// Name of the top-level frame in stack traces.
    #[strum(serialize = "<main>")]
    Main,

    // Builtin exception classes, pre-registered in the class registry.
    /// Base class of all exceptions.
    Exception,
    /// Assertion failures (`Assert`).
    EAssertionFailed,
    /// Integer or float division by zero.
    EZeroDivide,
    /// Array or string index outside its bounds.
    EIndexOutOfRange,
    /// Subrange bound violations and invalid array dimensions.
    ERangeError,
    /// Failed `as` downcasts.
    EInvalidCast,
    /// String/number conversion failures.
    EConvertError,
    /// Destructor invoked on an already-destroyed object.
    EObjectDestroyed,
    /// `require` / `ensure` contract failures.
    EContractFailed,
    /// External variable access without a registered accessor.
    EExternalError,
    /// Errors raised by scripts through `raise Exception.Create(...)` with no
    /// more specific class, and internal evaluator faults that are catchable.
    EScriptError,
}

impl StaticSymbols {
    /// Returns the canonical (display) spelling of this name.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Result => "Result",
            Self::SelfName => "Self",
            Self::Create => "Create",
            Self::Destroy => "Destroy",
            Self::Free => "Free",
            Self::ClassName => "ClassName",
            Self::ClassType => "ClassType",
            Self::Message => "Message",
            Self::Main => "<main>",
            Self::Exception => "Exception",
            Self::EAssertionFailed => "EAssertionFailed",
            Self::EZeroDivide => "EZeroDivide",
            Self::EIndexOutOfRange => "EIndexOutOfRange",
            Self::ERangeError => "ERangeError",
            Self::EInvalidCast => "EInvalidCast",
            Self::EConvertError => "EConvertError",
            Self::EObjectDestroyed => "EObjectDestroyed",
            Self::EContractFailed => "EContractFailed",
            Self::EExternalError => "EExternalError",
            Self::EScriptError => "EScriptError",
        }
    }
}

/// One interned name: the normalized key plus the first-seen original spelling.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Entry {
    norm: String,
    original: String,
}

/// Storage for all interned names of a parsed program.
///
/// Populated during parsing and declaration registration, then owned by the
/// `Runner`. During execution, lookups are needed only for error messages and
/// display output.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct Interns {
    entries: Vec<Entry>,
    by_norm: AHashMap<String, Symbol>,
}

impl Interns {
    /// Creates an interner with all [`StaticSymbols`] pre-interned.
    pub fn new() -> Self {
        let mut interns = Self {
            entries: Vec::with_capacity(64),
            by_norm: AHashMap::with_capacity(64),
        };
        for s in StaticSymbols::VARIANTS {
            let sym = interns.intern(s.display_name());
            debug_assert_eq!(sym, Symbol::from(*s));
        }
        interns
    }

    /// Interns a name, returning its symbol.
    ///
    /// The first spelling seen for a normalized name is kept as the display
    /// spelling.
    pub fn intern(&mut self, name: &str) -> Symbol {
        let norm = normalize(name);
        if let Some(&sym) = self.by_norm.get(&norm) {
            return sym;
        }
        let sym = Symbol(u32::try_from(self.entries.len()).expect("symbol table overflow"));
        self.by_norm.insert(norm.clone(), sym);
        self.entries.push(Entry {
            norm,
            original: name.to_owned(),
        });
        sym
    }

    /// Looks up an already-interned name without adding it.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.by_norm.get(&normalize(name)).copied()
    }

    /// Returns the display spelling of a symbol.
    pub fn get(&self, sym: Symbol) -> &str {
        &self.entries[sym.index()].original
    }

    /// Returns the normalized spelling of a symbol.
    pub fn norm(&self, sym: Symbol) -> &str {
        &self.entries[sym.index()].norm
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for Interns {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_identity() {
        let mut interns = Interns::new();
        let a = interns.intern("MyVar");
        let b = interns.intern("MYVAR");
        let c = interns.intern("myvar");
        assert_eq!(a, b);
        assert_eq!(b, c);
        // first spelling wins for display
        assert_eq!(interns.get(a), "MyVar");
    }

    #[test]
    fn statics_have_fixed_ids() {
        let mut interns = Interns::new();
        assert_eq!(interns.intern("RESULT"), Symbol::from(StaticSymbols::Result));
        assert_eq!(interns.intern("Self"), Symbol::from(StaticSymbols::SelfName));
        assert_eq!(interns.intern("create"), Symbol::from(StaticSymbols::Create));
        assert_eq!(
            interns.intern("EZeroDivide"),
            Symbol::from(StaticSymbols::EZeroDivide)
        );
    }

    #[test]
    fn lookup_does_not_intern() {
        let interns = Interns::new();
        assert!(interns.lookup("neverseen").is_none());
        assert_eq!(interns.lookup("Destroy"), Some(Symbol::from(StaticSymbols::Destroy)));
    }
}
