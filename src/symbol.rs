use crate::builtin::BuiltinOp;
use lasso::{Spur, ThreadedRodeo};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// A unique identifier for a constructor/operator symbol.
/// This is an interned string ID for fast equality comparison.
pub type SymId = Spur;

/// Identifier for a declared union type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Identifier for a declared symbol renaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenamingId(u32);

impl RenamingId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// What a declared symbol means to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymKind {
    /// Data constructor with declared arity and optional per-argument domains.
    Con {
        arity: u8,
        domains: Option<SmallVec<[TypeId; 4]>>,
    },
    /// Builtin operator evaluated over ground arguments.
    Builtin(BuiltinOp),
    /// Union type; a nullary application of this symbol is a type term.
    Type(TypeId),
    /// Unary relabeling operator, eliminated by rewriting its argument
    /// through the named renaming.
    Relabel(RenamingId),
    /// Selector constructor; selector applications behave like free terms
    /// during unification.
    Sel,
}

/// A declared union type: member constructor symbols plus optional literal
/// families, precomputed into a single membership bin.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: SymId,
    /// Member symbols, including the `#int`/`#str` family placeholders when
    /// the type admits those literal families.
    pub bin: FxHashSet<SymId>,
}

/// Symbols with reserved meaning, interned once at store construction.
struct Reserved {
    tru: SymId,
    fls: SymId,
    int_family: SymId,
    str_family: SymId,
    bound: SymId,
    free: SymId,
    eq_rel: SymId,
}

/// Thread-safe symbol store: interned names plus the declaration tables the
/// compiler and engine read (constructor arities and argument domains,
/// builtin operators, union types with precomputed bins, relabel renamings,
/// selector constructors).
///
/// Guarantees:
/// - Same string always produces same SymId
/// - Different strings always produce different SymIds
/// - SymId can be resolved back to the original string
pub struct SymbolStore {
    rodeo: ThreadedRodeo,
    kinds: FxHashMap<SymId, SymKind>,
    types: Vec<TypeDef>,
    renamings: Vec<FxHashMap<SymId, SymId>>,
    reserved: Reserved,
}

impl SymbolStore {
    /// Create a new symbol store with the reserved symbols pre-interned.
    pub fn new() -> Self {
        let rodeo = ThreadedRodeo::new();
        let reserved = Reserved {
            tru: rodeo.get_or_intern("#true"),
            fls: rodeo.get_or_intern("#false"),
            int_family: rodeo.get_or_intern("#int"),
            str_family: rodeo.get_or_intern("#str"),
            bound: rodeo.get_or_intern("#bound"),
            free: rodeo.get_or_intern("#free"),
            eq_rel: rodeo.get_or_intern("#eq"),
        };
        let mut kinds = FxHashMap::default();
        kinds.insert(
            reserved.tru,
            SymKind::Con {
                arity: 0,
                domains: None,
            },
        );
        kinds.insert(
            reserved.fls,
            SymKind::Con {
                arity: 0,
                domains: None,
            },
        );
        Self {
            rodeo,
            kinds,
            types: Vec::new(),
            renamings: Vec::new(),
            reserved,
        }
    }

    /// Intern a symbol string, returning its unique SymId.
    /// If the symbol was already interned, returns the existing SymId.
    pub fn intern(&self, name: &str) -> SymId {
        self.rodeo.get_or_intern(name)
    }

    /// Resolve a SymId back to its string representation.
    /// Returns None if the SymId was not created by this store.
    pub fn resolve(&self, id: SymId) -> Option<&str> {
        self.rodeo.try_resolve(&id)
    }

    /// Check if a symbol string has already been interned.
    pub fn contains(&self, name: &str) -> bool {
        self.rodeo.contains(name)
    }

    /// Get the SymId for a symbol if it exists, without interning.
    pub fn get(&self, name: &str) -> Option<SymId> {
        self.rodeo.get(name)
    }

    // ---- declarations (setup-time, before any table is built) ----

    /// Declare a data constructor with the given arity.
    pub fn declare_con(&mut self, name: &str, arity: u8) -> SymId {
        let id = self.intern(name);
        self.kinds.insert(
            id,
            SymKind::Con {
                arity,
                domains: None,
            },
        );
        id
    }

    /// Declare a data constructor whose arguments carry declared domains.
    /// Arity is the number of domains.
    pub fn declare_con_with_domains(&mut self, name: &str, domains: &[TypeId]) -> SymId {
        let id = self.intern(name);
        self.kinds.insert(
            id,
            SymKind::Con {
                arity: domains.len() as u8,
                domains: Some(domains.iter().copied().collect()),
            },
        );
        id
    }

    /// Declare a builtin operator symbol.
    pub fn declare_builtin(&mut self, name: &str, op: BuiltinOp) -> SymId {
        let id = self.intern(name);
        self.kinds.insert(id, SymKind::Builtin(op));
        id
    }

    /// Declare a union type over member constructor symbols, optionally
    /// admitting the integer and/or string literal families. The membership
    /// bin is precomputed here so runtime checks never scan per-value.
    pub fn declare_type(
        &mut self,
        name: &str,
        members: &[SymId],
        int_family: bool,
        str_family: bool,
    ) -> TypeId {
        let id = self.intern(name);
        let mut bin: FxHashSet<SymId> = members.iter().copied().collect();
        if int_family {
            bin.insert(self.reserved.int_family);
        }
        if str_family {
            bin.insert(self.reserved.str_family);
        }
        let tid = TypeId(self.types.len() as u32);
        self.types.push(TypeDef { name: id, bin });
        self.kinds.insert(id, SymKind::Type(tid));
        tid
    }

    /// Declare a unary relabeling operator over a symbol-to-symbol renaming.
    pub fn declare_relabel(&mut self, name: &str, pairs: &[(SymId, SymId)]) -> SymId {
        let id = self.intern(name);
        let rid = RenamingId(self.renamings.len() as u32);
        self.renamings.push(pairs.iter().copied().collect());
        self.kinds.insert(id, SymKind::Relabel(rid));
        id
    }

    /// Declare a selector constructor.
    pub fn declare_sel(&mut self, name: &str) -> SymId {
        let id = self.intern(name);
        self.kinds.insert(id, SymKind::Sel);
        id
    }

    // ---- lookups ----

    /// Get the declared kind of a symbol, if any.
    pub fn kind(&self, id: SymId) -> Option<&SymKind> {
        self.kinds.get(&id)
    }

    /// The TypeId of a symbol declared as a union type.
    pub fn type_of_sym(&self, id: SymId) -> Option<TypeId> {
        match self.kinds.get(&id) {
            Some(SymKind::Type(tid)) => Some(*tid),
            _ => None,
        }
    }

    /// The precomputed membership bin of a declared type.
    pub fn type_bin(&self, tid: TypeId) -> &FxHashSet<SymId> {
        &self.types[tid.0 as usize].bin
    }

    /// The defining record of a declared type.
    pub fn type_def(&self, tid: TypeId) -> &TypeDef {
        &self.types[tid.0 as usize]
    }

    /// The renaming table of a declared relabel operator.
    pub fn renaming(&self, rid: RenamingId) -> &FxHashMap<SymId, SymId> {
        &self.renamings[rid.0 as usize]
    }

    // ---- reserved symbols ----

    /// The `#true` sentinel symbol.
    pub fn tru(&self) -> SymId {
        self.reserved.tru
    }

    /// The `#false` sentinel symbol.
    pub fn fls(&self) -> SymId {
        self.reserved.fls
    }

    /// Placeholder symbol standing for all integer literals in type bins.
    pub fn int_family(&self) -> SymId {
        self.reserved.int_family
    }

    /// Placeholder symbol standing for all string literals in type bins.
    pub fn str_family(&self) -> SymId {
        self.reserved.str_family
    }

    /// Marker symbol for bound positions in canonical trigger patterns.
    pub fn bound_marker(&self) -> SymId {
        self.reserved.bound
    }

    /// Marker symbol for free positions in canonical trigger patterns.
    pub fn free_marker(&self) -> SymId {
        self.reserved.free
    }

    /// The reserved binary equality-relation symbol recognized by the
    /// constraint compiler.
    pub fn eq_rel(&self) -> SymId {
        self.reserved.eq_rel
    }
}

impl Default for SymbolStore {
    fn default() -> Self {
        Self::new()
    }
}
