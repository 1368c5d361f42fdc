//! Reading and writing records through the compile → link → interpret
//! pipeline.

use thiserror::Error;
use tracing::debug;

use crate::compiler::{Compiler, FunctionMap};
use crate::device::{Device, StructInstance};
use crate::instruction::{Instruction, Target};
use crate::interpreter::{Interpreter, RuntimeFault};
use crate::linker::{LinkError, Linker, Program};
use crate::schema::{Schema, SchemaError};
use crate::structurize::{Destructurizer, StructureError, Structurizer};
use crate::value::Value;

/// A fault captured during execution, surfaced together with the partial
/// device state produced before the machine halted.
#[derive(Debug, Error)]
#[error("{fault}")]
pub struct ExecutionFault {
    pub fault: RuntimeFault,
    pub bytes: Vec<u8>,
    pub structs: Vec<StructInstance>,
}

/// Facade-level failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("execution faulted: {0}")]
    Execution(#[from] ExecutionFault),

    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// Reads and writes records of a schema's formats.
///
/// The schema is validated and compiled once at construction; every
/// [`read`](Codec::read) and [`write`](Codec::write) links a fresh program
/// from the cached function listings and runs it to completion on its own
/// device.
pub struct Codec {
    schema: Schema,
    functions: FunctionMap,
    step_limit: Option<u64>,
}

impl Codec {
    pub fn new(schema: Schema) -> Result<Self, SchemaError> {
        let functions = Compiler::new(&schema).functions()?;
        Ok(Self {
            schema,
            functions,
            step_limit: None,
        })
    }

    /// Bound every run to at most `limit` interpreter steps. Off by
    /// default; a well-formed schema never needs it.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decode `bytes` as a record of the named format.
    pub fn read(&self, type_name: &str, bytes: &[u8]) -> Result<Value, CodecError> {
        debug!(type_name, len = bytes.len(), "read");
        let program = self.link_main(vec![Instruction::Call(Target::Sym(format!(
            "alloc_and_read_{type_name}"
        )))])?;
        let device = self.execute(program, Device::with_bytes(bytes.to_vec()))?;
        let value = Structurizer::new(&self.schema, device.structs()).structure(0)?;
        Ok(value)
    }

    /// Encode a record of the named format into bytes.
    pub fn write(&self, type_name: &str, record: &Value) -> Result<Vec<u8>, CodecError> {
        debug!(type_name, "write");
        let structs = Destructurizer::new(&self.schema).destructure(type_name, record)?;
        let program = self.link_main(vec![Instruction::Call(Target::Sym(format!(
            "write_{type_name}"
        )))])?;
        let device = self.execute(program, Device::with_structs(structs))?;
        Ok(device.into_bytes())
    }

    /// Link `main` ahead of the cached functions so execution starts at
    /// offset zero.
    fn link_main(&self, main: Vec<Instruction>) -> Result<Program, LinkError> {
        let mut listings = FunctionMap::new();
        listings.insert("main".to_string(), main);
        for (name, listing) in &self.functions {
            listings.insert(name.clone(), listing.clone());
        }
        Linker::new(listings).link()
    }

    fn execute(&self, program: Program, device: Device) -> Result<Device, ExecutionFault> {
        let mut machine = Interpreter::new(program, device);
        if let Some(limit) = self.step_limit {
            machine = machine.with_step_limit(limit);
        }
        machine.run();

        let (device, error) = machine.into_parts();
        match error {
            Some(fault) => Err(ExecutionFault {
                fault,
                bytes: device.bytes().to_vec(),
                structs: device.structs().to_vec(),
            }),
            None => Ok(device),
        }
    }
}
