//! `Module`: the compilation unit — global declarations, external declarations, and
//! function definitions (spec §3.4). A `Module` exclusively owns its functions and
//! globals.

use super::function::Function;
use super::operand::GlobalTable;
use super::types::DataType;

/// One scalar slot of a flattened global initializer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VarValue {
    I32(i32),
    F32(f32),
}

/// A global variable declaration. `dims` is empty for a scalar. `init` is the
/// row-major flattening of length `dims.iter().product()`, produced by the builder's
/// `fill(dims, init)` recursive-initializer walk (spec §4.1, "Constants").
#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub elem_ty: DataType,
    pub dims: Vec<u32>,
    pub init: Vec<VarValue>,
}

/// An external function declaration (signature only, no body).
#[derive(Debug, Clone)]
pub struct ExternFunc {
    pub name: String,
    pub ret_ty: DataType,
    pub param_tys: Vec<DataType>,
}

#[derive(Debug, Default)]
pub struct Module {
    pub globals: GlobalTable,
    pub global_vars: Vec<GlobalVar>,
    pub externs: Vec<ExternFunc>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.sig.name == name)
    }

    pub fn find_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.sig.name == name)
    }

    pub fn find_global(&self, name: &str) -> Option<&GlobalVar> {
        self.global_vars.iter().find(|g| g.name == name)
    }

    pub fn is_extern(&self, name: &str) -> bool {
        self.externs.iter().any(|e| e.name == name)
    }
}
