//! Format schema types.
//!
//! A [`Schema`] is the in-memory description of the record layouts a codec
//! can handle: named formats, each an ordered list of fields, plus optional
//! named constants ("defs"). The types derive serde traits so callers can
//! load a schema from whatever description format they keep it in.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors detected while validating a schema, before any code is generated
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown type '{type_name}' for field '{format}.{field}'")]
    UnknownType {
        format: String,
        field: String,
        type_name: String,
    },

    #[error("size of '{format}.{field}' refers to '{reference}', which is not an earlier field")]
    UnresolvedSizeRef {
        format: String,
        field: String,
        reference: String,
    },

    #[error("invalid size {size} for field '{format}.{field}'")]
    InvalidSize {
        format: String,
        field: String,
        size: i64,
    },

    #[error("'{format}.{field}' refers to '{reference}', which is neither a sibling field nor a def")]
    UnknownReference {
        format: String,
        field: String,
        reference: String,
    },

    #[error("unknown format '{0}'")]
    UnknownFormat(String),
}

/// Byte width of a primitive type tag, or `None` if the tag names a format.
pub fn primitive_width(type_name: &str) -> Option<usize> {
    match type_name {
        "int8" | "uint8" => Some(1),
        "int16" | "uint16" => Some(2),
        "int32" | "uint32" => Some(4),
        "int64" | "uint64" => Some(8),
        _ => None,
    }
}

/// A complete set of named formats.
///
/// Map insertion order is significant: it fixes the compile order and hence
/// the layout of the linked program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub formats: IndexMap<String, FormatSpec>,
}

/// One named record type: an ordered list of fields plus optional defs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatSpec {
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defs: Vec<DefSpec>,
}

/// A named constant usable as a derived-field source.
///
/// Def expressions are not evaluated anywhere yet; a `read`/`write` override
/// that names a def compiles to a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefSpec {
    pub name: String,
    pub expr: i64,
}

/// One field of a format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    /// Primitive type tag or the name of another format.
    #[serde(rename = "type")]
    pub type_name: String,

    /// Array size; absent means a single value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeSpec>,

    /// Read override: the value is copied from this sibling field (or, for a
    /// def, nothing happens) instead of being decoded from the stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,

    /// Write override: the emitted bytes come from this sibling field's
    /// declared shape instead of this field's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<String>,
}

/// Array size of a field: a literal element count, or the name of an earlier
/// sibling field holding the decoded count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeSpec {
    Fixed(i64),
    Field(String),
}

impl Schema {
    pub fn format(&self, name: &str) -> Result<&FormatSpec, SchemaError> {
        self.formats
            .get(name)
            .ok_or_else(|| SchemaError::UnknownFormat(name.to_string()))
    }

    /// Check every rule the code generators depend on.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (format_name, format) in &self.formats {
            for (position, field) in format.fields.iter().enumerate() {
                if primitive_width(&field.type_name).is_none()
                    && !self.formats.contains_key(&field.type_name)
                {
                    return Err(SchemaError::UnknownType {
                        format: format_name.clone(),
                        field: field.name.clone(),
                        type_name: field.type_name.clone(),
                    });
                }

                match &field.size {
                    Some(SizeSpec::Fixed(size)) if *size < 0 => {
                        return Err(SchemaError::InvalidSize {
                            format: format_name.clone(),
                            field: field.name.clone(),
                            size: *size,
                        });
                    }
                    Some(SizeSpec::Field(reference)) => {
                        let earlier = format.fields[..position]
                            .iter()
                            .any(|f| f.name == *reference);
                        if !earlier {
                            return Err(SchemaError::UnresolvedSizeRef {
                                format: format_name.clone(),
                                field: field.name.clone(),
                                reference: reference.clone(),
                            });
                        }
                    }
                    _ => {}
                }

                for reference in field.read.iter().chain(field.write.iter()) {
                    let sibling = format
                        .fields
                        .iter()
                        .any(|f| f.name == *reference && f.name != field.name);
                    if !sibling && format.def(reference).is_none() {
                        return Err(SchemaError::UnknownReference {
                            format: format_name.clone(),
                            field: field.name.clone(),
                            reference: reference.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl FormatSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn def(&self, name: &str) -> Option<&DefSpec> {
        self.defs.iter().find(|d| d.name == name)
    }
}

impl FieldSpec {
    /// Whether the type names another format rather than a primitive.
    pub fn is_composite(&self) -> bool {
        primitive_width(&self.type_name).is_none()
    }
}
