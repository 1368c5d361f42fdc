//! Generator for fields whose type names another format.
//!
//! Reading a nested record means calling the nested type's
//! `alloc_and_read_*` function and storing the struct index it returns into
//! the current field's slot; writing repoints the struct register at the
//! slot's index and calls the nested type's `write_*`. The machine has no
//! calling convention, so the caller's struct pointer and loop registers
//! are pushed and popped around both.

use crate::instruction::{FieldPath, Instruction, Operand};

use super::{call, lit, reg, FieldGenerator, Listing, SAVED_REGISTERS};

pub(crate) struct CompositeCompiler<'a> {
    format_name: &'a str,
    field_name: &'a str,
    type_name: &'a str,
}

impl<'a> CompositeCompiler<'a> {
    pub fn new(format_name: &'a str, field_name: &'a str, type_name: &'a str) -> Self {
        Self {
            format_name,
            field_name,
            type_name,
        }
    }

    fn path(&self) -> FieldPath {
        FieldPath::new(self.format_name, self.field_name)
    }
}

impl FieldGenerator for CompositeCompiler<'_> {
    fn init_fragment(&self) -> Listing {
        vec![
            Instruction::Index(self.path(), reg::A, reg::E),
            Instruction::Set(reg::DEV, lit(0)),
        ]
    }

    fn read_fragment(&self) -> Listing {
        let mut listing = save_context();
        listing.push(call(format!("alloc_and_read_{}", self.type_name)));
        // the nested struct's index comes back in a; park it in b
        listing.push(Instruction::Set(reg::B, reg::A));
        listing.extend(restore_context());
        listing.push(Instruction::Index(self.path(), reg::A, reg::E));
        listing.push(Instruction::Set(reg::DEV, reg::B));
        listing
    }

    fn write_fragment(&self) -> Listing {
        let mut listing = save_context();
        listing.push(Instruction::Index(self.path(), reg::A, reg::E));
        // repoint the current struct at the nested index held in the slot
        listing.push(Instruction::Set(reg::A, reg::DEV));
        listing.push(call(format!("write_{}", self.type_name)));
        listing.extend(restore_context());
        listing
    }
}

fn save_context() -> Listing {
    SAVED_REGISTERS
        .iter()
        .map(|register| Instruction::Push(Operand::Reg(*register)))
        .collect()
}

fn restore_context() -> Listing {
    SAVED_REGISTERS
        .iter()
        .rev()
        .map(|register| Instruction::Pop(Operand::Reg(*register)))
        .collect()
}
