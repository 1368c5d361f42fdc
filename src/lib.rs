//! binform: declarative binary record layouts executed on a small
//! register VM.
//!
//! A [`Schema`] declares named record formats: fixed-width integers
//! (`int8`..`int64`, `uint8`..`uint64`), fixed and length-prefixed arrays,
//! nested composite records, and fields derived from a sibling. A [`Codec`]
//! turns the declaration into running machinery in three stages:
//!
//! - the **compiler** emits symbolic instruction listings for every field
//!   of every format (`alloc_<T>`, `init_<T>`, `read_<T>`, `write_<T>`,
//!   plus one function per field);
//! - the **linker** collapses labels and lays the listings out into one
//!   flat, absolutely-addressed [`Program`];
//! - the **interpreter** runs that program against a [`Device`], a byte
//!   stream paired with a growable list of typed structure records.
//!
//! The [`Structurizer`] and [`Destructurizer`] convert between the device's
//! flat struct list and the nested [`Value`] records callers see. Byte
//! order is little-endian throughout.
//!
//! ```
//! use binform::{Codec, Schema, Value};
//!
//! let schema: Schema = serde_json::from_value(serde_json::json!({
//!     "formats": {
//!         "somedata": {
//!             "fields": [
//!                 { "name": "count", "type": "int8" },
//!                 { "name": "nums", "type": "int8", "size": "count" }
//!             ]
//!         }
//!     }
//! }))
//! .unwrap();
//!
//! let codec = Codec::new(schema).unwrap();
//! let record = codec.read("somedata", &[3, 5, 6, 7]).unwrap();
//! assert_eq!(
//!     record,
//!     serde_json::from_value::<Value>(serde_json::json!({
//!         "count": 3,
//!         "nums": [5, 6, 7]
//!     }))
//!     .unwrap()
//! );
//!
//! let bytes = codec.write("somedata", &record).unwrap();
//! assert_eq!(bytes, vec![3, 5, 6, 7]);
//! ```
//!
//! Runtime faults deliberately do not abort execution: the interpreter
//! records the last fault, sets the `err` register, and keeps stepping; the
//! codec surfaces the fault after the machine halts, together with whatever
//! partial state was produced (see [`ExecutionFault`]).

pub mod codec;
pub mod compiler;
pub mod device;
pub mod instruction;
pub mod interpreter;
pub mod linker;
pub mod schema;
pub mod structurize;
pub mod value;

pub use codec::{Codec, CodecError, ExecutionFault};
pub use compiler::{Compiler, FunctionMap, Listing};
pub use device::{Device, StructInstance};
pub use instruction::{FieldPath, Instruction, Operand, Register, Target, WireError};
pub use interpreter::{Interpreter, RuntimeFault};
pub use linker::{LinkError, Linker, Program};
pub use schema::{
    primitive_width, DefSpec, FieldSpec, FormatSpec, Schema, SchemaError, SizeSpec,
};
pub use structurize::{Destructurizer, StructureError, Structurizer};
pub use value::Value;
