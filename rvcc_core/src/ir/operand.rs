//! Operands: a tagged sum of five immutable variants, interned so that
//! pointer-equality (here, value-equality on a small `Copy` handle) is value-equality
//! (spec §3.2).

use std::collections::HashMap;
use std::fmt;

use super::types::DataType;

/// Register ids are unique within the owning `Function`, minted by its monotonic
/// counter. `Label` ids are block ids, also scoped to a `Function`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%r{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A single IR operand. `Register` operands additionally carry the type they were
/// defined with, since the IR is not structurally typed and operations need to read
/// an operand's type directly off it rather than re-deriving it from a def map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Register(RegId, DataType),
    ImmI32(i32),
    ImmF32(f32),
    Global(GlobalId),
    Label(BlockId),
}

impl Operand {
    pub fn ty(&self) -> DataType {
        match self {
            Operand::Register(_, ty) => *ty,
            Operand::ImmI32(_) => DataType::I32,
            Operand::ImmF32(_) => DataType::F32,
            Operand::Global(_) => DataType::Ptr,
            Operand::Label(_) => DataType::Void,
        }
    }

    pub fn as_reg(&self) -> Option<RegId> {
        match self {
            Operand::Register(r, _) => Some(*r),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<BlockId> {
        match self {
            Operand::Label(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_const_i32(&self) -> Option<i32> {
        match self {
            Operand::ImmI32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Operand::ImmI32(_) | Operand::ImmF32(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(r, ty) => write!(f, "{ty} {r}"),
            Operand::ImmI32(v) => write!(f, "i32 {v}"),
            Operand::ImmF32(v) => write!(f, "f32 {v}"),
            Operand::Global(g) => write!(f, "@{}", g.0),
            Operand::Label(b) => write!(f, "{b}"),
        }
    }
}

/// Interned symbolic reference to a global (by name). Globals are interned per
/// `Module` so two `Operand::Global` built from the same name compare equal via a
/// cheap integer id instead of a string compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u32);

/// Module-wide interning factory for global-name operands. Float and integer
/// immediates and registers are cheap enough to construct directly as `Copy` values
/// (spec's "interned through a module-wide factory so pointer-equality is
/// value-equality" is satisfied here structurally: two `Operand`s with the same
/// payload are `==` without needing a cache), but global *names* are strings, so
/// interning them keeps `Operand` a small `Copy` type.
#[derive(Debug, Default)]
pub struct GlobalTable {
    names: Vec<String>,
    by_name: HashMap<String, GlobalId>,
}

impl GlobalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: impl Into<String>) -> GlobalId {
        let name = name.into();
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }
        let id = GlobalId(self.names.len() as u32);
        self.names.push(name.clone());
        self.by_name.insert(name, id);
        id
    }

    pub fn name(&self, id: GlobalId) -> &str {
        &self.names[id.0 as usize]
    }
}
