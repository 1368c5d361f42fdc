//! Generator for primitive-typed fields.

use crate::instruction::{FieldPath, Instruction};

use super::{lit, reg, FieldGenerator, Listing};

pub(crate) struct ScalarCompiler<'a> {
    format_name: &'a str,
    field_name: &'a str,
    width: usize,
}

impl<'a> ScalarCompiler<'a> {
    pub fn new(format_name: &'a str, field_name: &'a str, width: usize) -> Self {
        Self {
            format_name,
            field_name,
            width,
        }
    }

    fn path(&self) -> FieldPath {
        FieldPath::new(self.format_name, self.field_name)
    }
}

impl FieldGenerator for ScalarCompiler<'_> {
    fn init_fragment(&self) -> Listing {
        vec![
            Instruction::Index(self.path(), reg::A, reg::E),
            Instruction::Set(reg::DEV, lit(0)),
        ]
    }

    fn read_fragment(&self) -> Listing {
        vec![
            Instruction::Index(self.path(), reg::A, reg::E),
            Instruction::ReadBytes(reg::DEV, lit(self.width as i64)),
        ]
    }

    fn write_fragment(&self) -> Listing {
        vec![
            Instruction::Index(self.path(), reg::A, reg::E),
            Instruction::WriteBytes(lit(self.width as i64), reg::DEV),
        ]
    }
}
