//! The device: the addressable target of a linked program.
//!
//! A device couples a byte stream with an auto-advancing cursor to a
//! growable list of typed structure records. The `index` instruction records
//! an addressing context (member path, struct index, slot index) which the
//! next `dev` register access consumes; validation is deferred until that
//! access happens.

use indexmap::IndexMap;

use crate::instruction::FieldPath;
use crate::interpreter::RuntimeFault;

/// One allocated record: a type name plus per-field slot vectors. Slot
/// values are plain integers; for composite fields they are indices into the
/// owning device's struct list.
#[derive(Debug, Clone, PartialEq)]
pub struct StructInstance {
    pub type_name: String,
    pub fields: IndexMap<String, Vec<i64>>,
}

impl StructInstance {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct AddressContext {
    path: FieldPath,
    struct_index: i64,
    slot_index: i64,
}

/// Byte stream plus struct list plus the current addressing context.
#[derive(Debug, Default)]
pub struct Device {
    bytes: Vec<u8>,
    position: usize,
    structs: Vec<StructInstance>,
    context: Option<AddressContext>,
}

impl Device {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Self::default()
        }
    }

    pub fn with_structs(structs: Vec<StructInstance>) -> Self {
        Self {
            structs,
            ..Self::default()
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn structs(&self) -> &[StructInstance] {
        &self.structs
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Read one byte at the cursor. The cursor advances even when the stream
    /// is exhausted, matching the write cursor's behavior.
    pub fn read_byte(&mut self) -> Result<u8, RuntimeFault> {
        let at = self.position;
        self.position += 1;
        self.bytes
            .get(at)
            .copied()
            .ok_or(RuntimeFault::EndOfStream { position: at })
    }

    /// Write one byte at the cursor, overwriting or appending. Gaps left by
    /// a cursor past the end are zero-filled.
    pub fn write_byte(&mut self, byte: u8) {
        if self.position < self.bytes.len() {
            self.bytes[self.position] = byte;
        } else {
            self.bytes.resize(self.position, 0);
            self.bytes.push(byte);
        }
        self.position += 1;
    }

    /// Append a new empty struct of the given type, returning its index.
    pub fn alloc(&mut self, type_name: &str) -> i64 {
        self.structs.push(StructInstance::new(type_name));
        (self.structs.len() - 1) as i64
    }

    /// Record the addressing context. Nothing is validated until the next
    /// read or write through it.
    pub fn index_struct_value(&mut self, path: FieldPath, struct_index: i64, slot_index: i64) {
        self.context = Some(AddressContext {
            path,
            struct_index,
            slot_index,
        });
    }

    pub fn read_struct_value(&self) -> Result<i64, RuntimeFault> {
        let context = self.context.as_ref().ok_or(RuntimeFault::NoAddressingContext)?;
        let entry = self.struct_at(context)?;
        let slots = entry
            .fields
            .get(&context.path.field)
            .ok_or_else(|| RuntimeFault::NoSuchMember {
                path: context.path.to_string(),
            })?;
        usize::try_from(context.slot_index)
            .ok()
            .and_then(|slot| slots.get(slot).copied())
            .ok_or_else(|| RuntimeFault::NoSuchSlot {
                path: context.path.to_string(),
                slot: context.slot_index,
            })
    }

    pub fn write_struct_value(&mut self, value: i64) -> Result<(), RuntimeFault> {
        let context = self.context.clone().ok_or(RuntimeFault::NoAddressingContext)?;
        self.struct_at(&context)?;

        let slot = usize::try_from(context.slot_index).map_err(|_| RuntimeFault::NoSuchSlot {
            path: context.path.to_string(),
            slot: context.slot_index,
        })?;

        // struct_at validated the index, so the unsigned conversion holds
        let entry = &mut self.structs[context.struct_index as usize];
        let slots = entry.fields.entry(context.path.field.clone()).or_default();
        if slot >= slots.len() {
            slots.resize(slot + 1, 0);
        }
        slots[slot] = value;
        Ok(())
    }

    fn struct_at(&self, context: &AddressContext) -> Result<&StructInstance, RuntimeFault> {
        let entry = usize::try_from(context.struct_index)
            .ok()
            .and_then(|index| self.structs.get(index))
            .ok_or(RuntimeFault::NoSuchStruct {
                index: context.struct_index,
            })?;
        if entry.type_name != context.path.format {
            return Err(RuntimeFault::WrongStructType {
                expected: context.path.format.clone(),
                found: entry.type_name.clone(),
            });
        }
        Ok(entry)
    }
}
