//! Compiles a schema into named instruction listings.
//!
//! Each field is turned into `init`/`read`/`write` fragments by a field
//! generator (scalar, composite, or derived), every fragment is wrapped by
//! the array compiler (every field is conceptually an array, default size
//! 1), and the format compiler stitches the results into per-format
//! functions: `alloc_<T>`, `alloc_and_read_<T>`, `init_<T>`, `read_<T>`,
//! `write_<T>`, plus one dedicated function per field. The schema compiler
//! merges every format's functions into one flat map ready for the linker;
//! names are global, so a format referenced from several places compiles
//! once.

mod array;
mod composite;
mod derived;
mod scalar;

pub(crate) use array::ArrayCompiler;

use indexmap::IndexMap;
use tracing::debug;

use crate::instruction::{Instruction, Operand, Register, Target};
use crate::schema::{FormatSpec, Schema, SchemaError};

/// One named instruction listing, still carrying symbolic targets.
pub type Listing = Vec<Instruction>;

/// Name → listing map; insertion order fixes the link layout.
pub type FunctionMap = IndexMap<String, Listing>;

/// Instruction fragments one field contributes, before array wrapping.
pub(crate) trait FieldGenerator {
    fn init_fragment(&self) -> Listing;
    fn read_fragment(&self) -> Listing;
    fn write_fragment(&self) -> Listing;
}

/// Operand shorthands for the generators.
pub(crate) mod reg {
    use crate::instruction::{Operand, Register};

    pub const A: Operand = Operand::Reg(Register::A);
    pub const B: Operand = Operand::Reg(Register::B);
    pub const C: Operand = Operand::Reg(Register::C);
    pub const D: Operand = Operand::Reg(Register::D);
    pub const E: Operand = Operand::Reg(Register::E);
    pub const F: Operand = Operand::Reg(Register::F);
    pub const PC: Operand = Operand::Reg(Register::Pc);
    pub const DEV: Operand = Operand::Reg(Register::Dev);
}

pub(crate) fn lit(value: i64) -> Operand {
    Operand::Lit(value)
}

pub(crate) fn call(symbol: impl Into<String>) -> Instruction {
    Instruction::Call(Target::Sym(symbol.into()))
}

/// Registers a composite call preserves around a nested invocation: the
/// struct pointer plus the loop registers (index, snapshot, remaining,
/// parked count). There is no automatic preservation across calls, so the
/// generators push and pop these explicitly.
pub(crate) const SAVED_REGISTERS: [Register; 5] = [
    Register::A,
    Register::C,
    Register::D,
    Register::E,
    Register::F,
];

/// Compiles a whole schema into one flat function map.
pub struct Compiler<'a> {
    schema: &'a Schema,
}

impl<'a> Compiler<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    pub fn functions(&self) -> Result<FunctionMap, SchemaError> {
        self.schema.validate()?;

        let mut result = FunctionMap::new();
        for (name, format) in &self.schema.formats {
            for (function, listing) in FormatCompiler::new(name, format).output() {
                result.entry(function).or_insert(listing);
            }
        }
        debug!(functions = result.len(), "schema compiled");
        Ok(result)
    }
}

/// Compiles one format entry into its function listings.
struct FormatCompiler<'a> {
    format_name: &'a str,
    format: &'a FormatSpec,
}

impl<'a> FormatCompiler<'a> {
    fn new(format_name: &'a str, format: &'a FormatSpec) -> Self {
        Self { format_name, format }
    }

    fn output(&self) -> FunctionMap {
        let name = self.format_name;
        let compilers: Vec<ArrayCompiler<'_>> = self
            .format
            .fields
            .iter()
            .map(|field| ArrayCompiler::new(name, self.format, field))
            .collect();

        let mut result = FunctionMap::new();

        result.insert(
            format!("alloc_and_read_{name}"),
            vec![
                call(format!("alloc_{name}")),
                call(format!("init_{name}")),
                call(format!("read_{name}")),
            ],
        );
        result.insert(
            format!("alloc_{name}"),
            vec![Instruction::Alloc(reg::A, name.to_string())],
        );

        for fc in &compilers {
            result.insert(fc.read_func_name(), fc.read_func());
        }
        for fc in &compilers {
            result.insert(fc.write_func_name(), fc.write_func());
        }

        result.insert(
            format!("init_{name}"),
            compilers.iter().flat_map(|fc| fc.init_instrs()).collect(),
        );
        result.insert(
            format!("read_{name}"),
            compilers.iter().map(|fc| call(fc.read_func_name())).collect(),
        );
        result.insert(
            format!("write_{name}"),
            compilers.iter().map(|fc| call(fc.write_func_name())).collect(),
        );

        result
    }
}
