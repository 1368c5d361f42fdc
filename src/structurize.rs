//! Conversions between the device's flat struct list and nested records.
//!
//! Both directions are plain recursive walks driven by the schema, not the
//! VM: the structurizer follows composite slot values as indices into the
//! struct list, the destructurizer appends structs depth-first so every
//! nested record is assigned the index it lands at.

use indexmap::IndexMap;
use thiserror::Error;

use crate::device::StructInstance;
use crate::schema::{FieldSpec, Schema};
use crate::value::Value;

/// Failures converting between struct lists and nested records
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("unknown format '{0}'")]
    UnknownFormat(String),

    #[error("no struct at index {0}")]
    NoSuchStruct(i64),

    #[error("field '{0}' is missing")]
    MissingField(String),

    #[error("field '{0}' has no value")]
    EmptyField(String),

    #[error("field '{0}' expects an integer")]
    ExpectedInt(String),

    #[error("field '{0}' expects a sequence")]
    ExpectedSeq(String),

    #[error("expected a record for format '{0}'")]
    ExpectedRecord(String),
}

/// Turns a device struct list plus a root index into a nested record.
pub struct Structurizer<'a> {
    schema: &'a Schema,
    structs: &'a [StructInstance],
}

impl<'a> Structurizer<'a> {
    pub fn new(schema: &'a Schema, structs: &'a [StructInstance]) -> Self {
        Self { schema, structs }
    }

    pub fn structure(&self, index: i64) -> Result<Value, StructureError> {
        let entry = usize::try_from(index)
            .ok()
            .and_then(|at| self.structs.get(at))
            .ok_or(StructureError::NoSuchStruct(index))?;
        let format = self
            .schema
            .formats
            .get(&entry.type_name)
            .ok_or_else(|| StructureError::UnknownFormat(entry.type_name.clone()))?;

        let mut record = IndexMap::new();
        for field in &format.fields {
            let slots = entry.fields.get(&field.name);

            let value = if field.size.is_some() {
                // a zero-trip loop never touches its field, so an absent
                // slot vector is an empty sequence
                let slots = slots.map(Vec::as_slice).unwrap_or_default();
                Value::Seq(
                    slots
                        .iter()
                        .map(|&slot| self.project(field, slot))
                        .collect::<Result<_, _>>()?,
                )
            } else {
                let slot = slots
                    .ok_or_else(|| StructureError::MissingField(field.name.clone()))?
                    .first()
                    .copied()
                    .ok_or_else(|| StructureError::EmptyField(field.name.clone()))?;
                self.project(field, slot)?
            };
            record.insert(field.name.clone(), value);
        }
        Ok(Value::Record(record))
    }

    fn project(&self, field: &FieldSpec, slot: i64) -> Result<Value, StructureError> {
        if field.is_composite() {
            self.structure(slot)
        } else {
            Ok(Value::Int(slot))
        }
    }
}

/// Flattens a nested record into the struct list the interpreter would have
/// produced from raw bytes.
pub struct Destructurizer<'a> {
    schema: &'a Schema,
}

impl<'a> Destructurizer<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    pub fn destructure(
        &self,
        type_name: &str,
        value: &Value,
    ) -> Result<Vec<StructInstance>, StructureError> {
        let mut structs = Vec::new();
        self.push_struct(type_name, value, &mut structs)?;
        Ok(structs)
    }

    /// Append the record as a struct, recursing into composite members, and
    /// return the index it landed at.
    fn push_struct(
        &self,
        type_name: &str,
        value: &Value,
        out: &mut Vec<StructInstance>,
    ) -> Result<usize, StructureError> {
        let format = self
            .schema
            .formats
            .get(type_name)
            .ok_or_else(|| StructureError::UnknownFormat(type_name.to_string()))?;
        let record = value
            .as_record()
            .ok_or_else(|| StructureError::ExpectedRecord(type_name.to_string()))?;

        let index = out.len();
        out.push(StructInstance::new(type_name));

        let mut fields = IndexMap::new();
        for field in &format.fields {
            let member = record
                .get(&field.name)
                .ok_or_else(|| StructureError::MissingField(field.name.clone()))?;
            let slots = self.slots_for(field, member, out)?;
            fields.insert(field.name.clone(), slots);
        }
        out[index].fields = fields;
        Ok(index)
    }

    fn slots_for(
        &self,
        field: &FieldSpec,
        member: &Value,
        out: &mut Vec<StructInstance>,
    ) -> Result<Vec<i64>, StructureError> {
        if field.size.is_some() {
            let items = member
                .as_seq()
                .ok_or_else(|| StructureError::ExpectedSeq(field.name.clone()))?;
            items
                .iter()
                .map(|item| self.slot_for(field, item, out))
                .collect()
        } else {
            Ok(vec![self.slot_for(field, member, out)?])
        }
    }

    fn slot_for(
        &self,
        field: &FieldSpec,
        item: &Value,
        out: &mut Vec<StructInstance>,
    ) -> Result<i64, StructureError> {
        if field.is_composite() {
            Ok(self.push_struct(&field.type_name, item, out)? as i64)
        } else {
            item.as_int()
                .ok_or_else(|| StructureError::ExpectedInt(field.name.clone()))
        }
    }
}
