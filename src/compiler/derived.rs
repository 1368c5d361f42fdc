//! Fragments for fields whose value derives from a sibling field.

use crate::instruction::{FieldPath, Instruction};

use super::{lit, reg, Listing};

/// Copy the already-decoded value of `source` into the current field's slot.
/// Nothing moves on the byte stream.
pub(crate) fn copy_read_fragment(format_name: &str, field_name: &str, source: &str) -> Listing {
    vec![
        Instruction::Index(FieldPath::new(format_name, source), reg::A, lit(0)),
        Instruction::Set(reg::B, reg::DEV),
        Instruction::Index(FieldPath::new(format_name, field_name), reg::A, reg::E),
        Instruction::Set(reg::DEV, reg::B),
    ]
}
