//! Array wrapper around the per-field generators.
//!
//! Every field is compiled as an array; the default size of 1 keeps the
//! slot index register pinned at 0 and emits no loop. Larger or
//! field-referenced sizes wrap the inner fragment in a counted loop whose
//! trip count is loaded exactly once, before the loop entry snapshot.

use crate::instruction::{FieldPath, Instruction, Register, Target};
use crate::schema::{primitive_width, FieldSpec, FormatSpec, SizeSpec};

use super::composite::CompositeCompiler;
use super::derived;
use super::scalar::ScalarCompiler;
use super::{lit, reg, FieldGenerator, Listing};

pub(crate) struct ArrayCompiler<'a> {
    format_name: &'a str,
    format: &'a FormatSpec,
    field: &'a FieldSpec,
}

impl<'a> ArrayCompiler<'a> {
    pub fn new(format_name: &'a str, format: &'a FormatSpec, field: &'a FieldSpec) -> Self {
        Self {
            format_name,
            format,
            field,
        }
    }

    pub fn read_func_name(&self) -> String {
        format!("read_{}_{}", self.format_name, self.field.name)
    }

    pub fn write_func_name(&self) -> String {
        format!("write_{}_{}", self.format_name, self.field.name)
    }

    pub fn read_func(&self) -> Listing {
        match &self.field.read {
            Some(reference) if self.format.def(reference).is_some() => {
                // def sources are a recorded no-op, not constant evaluation
                Listing::new()
            }
            Some(reference) => self.wrap(derived::copy_read_fragment(
                self.format_name,
                &self.field.name,
                reference,
            )),
            None => self.wrap(self.inner().read_fragment()),
        }
    }

    pub fn write_func(&self) -> Listing {
        match &self.field.write {
            Some(reference) if self.format.def(reference).is_some() => Listing::new(),
            Some(reference) => match self.format.field(reference) {
                // the emitted bytes follow the sibling's declared shape;
                // its own write override is deliberately not chased
                Some(sibling) => {
                    ArrayCompiler::new(self.format_name, self.format, sibling).plain_write_func()
                }
                None => Listing::new(),
            },
            None => self.plain_write_func(),
        }
    }

    pub fn init_instrs(&self) -> Listing {
        self.wrap(self.inner().init_fragment())
    }

    fn plain_write_func(&self) -> Listing {
        self.wrap(self.inner().write_fragment())
    }

    fn inner(&self) -> Box<dyn FieldGenerator + 'a> {
        match primitive_width(&self.field.type_name) {
            Some(width) => Box::new(ScalarCompiler::new(self.format_name, &self.field.name, width)),
            None => Box::new(CompositeCompiler::new(
                self.format_name,
                &self.field.name,
                &self.field.type_name,
            )),
        }
    }

    fn wrap(&self, fragment: Listing) -> Listing {
        let mut listing = self.loop_header();
        listing.extend(fragment);
        listing.extend(self.loop_footer());
        listing
    }

    fn single(&self) -> bool {
        matches!(self.field.size, None | Some(SizeSpec::Fixed(1)))
    }

    fn continue_label(&self) -> String {
        format!("continue_{}", self.field.name)
    }

    fn finish_label(&self) -> String {
        format!("finish_{}", self.field.name)
    }

    /// Trip count into `f`, once, before the loop.
    fn count_load(&self) -> Listing {
        match &self.field.size {
            Some(SizeSpec::Fixed(count)) => vec![Instruction::Set(reg::F, lit(*count))],
            Some(SizeSpec::Field(reference)) => vec![
                Instruction::Index(
                    FieldPath::new(self.format_name, reference.clone()),
                    reg::A,
                    lit(0),
                ),
                Instruction::Set(reg::F, reg::DEV),
            ],
            None => Listing::new(),
        }
    }

    fn loop_header(&self) -> Listing {
        if self.single() {
            return vec![Instruction::Set(reg::E, lit(0))];
        }

        let mut listing = vec![Instruction::Set(reg::E, lit(0))];
        listing.extend(self.count_load());
        listing.extend([
            Instruction::Set(reg::D, reg::PC),
            Instruction::Set(reg::C, reg::F),
            Instruction::Dec(reg::C, reg::E),
            Instruction::Jnz(Target::Sym(self.continue_label()), reg::C),
            Instruction::Jnz(Target::Sym(self.finish_label()), lit(1)),
            Instruction::Label(self.continue_label()),
        ]);
        listing
    }

    fn loop_footer(&self) -> Listing {
        if self.single() {
            return Listing::new();
        }

        vec![
            Instruction::Inc(reg::E, lit(1)),
            Instruction::Jnz(Target::Reg(Register::D), lit(1)),
            Instruction::Label(self.finish_label()),
        ]
    }
}
