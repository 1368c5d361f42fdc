//! VM instruction set and its wire form.
//!
//! Instructions exist in two states. Pre-link listings may carry symbolic
//! call and branch targets plus `label` pseudo-instructions; post-link
//! programs are fully resolved to absolute addresses. The wire form used at
//! the compiler/linker boundary is a single-key map from opcode name to an
//! operand list, with registers written as `reg_`-prefixed strings, struct
//! member paths as plain dotted strings, and literals as plain integers.

use std::fmt;

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Reserved prefix marking a register operand in the wire form.
pub const REG_PREFIX: &str = "reg_";

/// Register names understood by the interpreter.
///
/// `a` through `h` are general purpose. `pc` holds the address of the next
/// operation, `mr` the current memory address, `err` the error flag. `mem`
/// and `dev` are pseudo registers: assigning one routes the value to memory
/// or the device, reading routes back; neither ever stores into the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    Pc,
    Mr,
    Err,
    Mem,
    Dev,
}

impl Register {
    pub const ALL: [Register; 13] = [
        Register::A,
        Register::B,
        Register::C,
        Register::D,
        Register::E,
        Register::F,
        Register::G,
        Register::H,
        Register::Pc,
        Register::Mr,
        Register::Err,
        Register::Mem,
        Register::Dev,
    ];

    /// Parse a bare register name (without the `reg_` prefix).
    pub fn parse(name: &str) -> Option<Register> {
        match name {
            "a" => Some(Register::A),
            "b" => Some(Register::B),
            "c" => Some(Register::C),
            "d" => Some(Register::D),
            "e" => Some(Register::E),
            "f" => Some(Register::F),
            "g" => Some(Register::G),
            "h" => Some(Register::H),
            "pc" => Some(Register::Pc),
            "mr" => Some(Register::Mr),
            "err" => Some(Register::Err),
            "mem" => Some(Register::Mem),
            "dev" => Some(Register::Dev),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Register::A => "a",
            Register::B => "b",
            Register::C => "c",
            Register::D => "d",
            Register::E => "e",
            Register::F => "f",
            Register::G => "g",
            Register::H => "h",
            Register::Pc => "pc",
            Register::Mr => "mr",
            Register::Err => "err",
            Register::Mem => "mem",
            Register::Dev => "dev",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", REG_PREFIX, self.name())
    }
}

/// A register or literal operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Register),
    Lit(i64),
}

/// A call or branch destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Symbolic function or label name; resolved away by the linker.
    Sym(String),
    /// Absolute instruction index.
    Addr(usize),
    /// Destination computed at run time from a register.
    Reg(Register),
}

/// A struct member path ("Type.field"), parsed once at compile time so the
/// interpreter never splits strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub format: String,
    pub field: String,
}

impl FieldPath {
    pub fn new(format: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            field: field.into(),
        }
    }

    /// Parse a dotted "Type.field" path.
    pub fn parse(path: &str) -> Result<Self, WireError> {
        match path.split_once('.') {
            Some((format, field)) if !format.is_empty() && !field.is_empty() => {
                Ok(Self::new(format, field))
            }
            _ => Err(WireError::MalformedPath(path.to_string())),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.format, self.field)
    }
}

/// One VM operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// dst <- src
    Set(Operand, Operand),
    /// dst <- dst + src
    Inc(Operand, Operand),
    /// dst <- dst - src
    Dec(Operand, Operand),
    /// Push the advanced pc, jump to the target.
    Call(Target),
    /// Pop the return address, or halt if the stack is empty.
    Return,
    /// Push a register's value.
    Push(Operand),
    /// Pop into a register.
    Pop(Operand),
    /// Jump to the target when the condition is nonzero.
    Jnz(Target, Operand),
    /// Allocate a device struct of the named type, store its index in dst.
    Alloc(Operand, String),
    /// Set the device addressing context: path, struct index, slot index.
    Index(FieldPath, Operand, Operand),
    /// Assemble `count` stream bytes, little-endian, into dst.
    ReadBytes(Operand, Operand),
    /// Scatter src's low `count` bytes, little-endian, onto the stream.
    WriteBytes(Operand, Operand),
    /// Pre-link marker recording a branch offset; stripped by the linker.
    Label(String),
}

/// Errors converting instructions to or from the wire form
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),

    #[error("invalid register '{0}'")]
    InvalidRegister(String),

    #[error("malformed member path '{0}'")]
    MalformedPath(String),

    #[error("invalid address {0}")]
    InvalidAddress(i64),

    #[error("wrong operand count for '{opcode}': expected {expected}")]
    OperandCount {
        opcode: &'static str,
        expected: usize,
    },

    #[error("bad operand '{0}': expected a register or literal")]
    BadOperand(String),

    #[error("bad operand for '{opcode}': expected a string")]
    ExpectedString { opcode: &'static str },
}

/// Wire-level operand: either a literal or one of the distinguished string
/// forms (register, symbol, member path, type name).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawOperand {
    Int(i64),
    Str(String),
}

fn raw_operand(operand: &Operand) -> RawOperand {
    match operand {
        Operand::Reg(reg) => RawOperand::Str(reg.to_string()),
        Operand::Lit(v) => RawOperand::Int(*v),
    }
}

fn raw_target(target: &Target) -> RawOperand {
    match target {
        Target::Sym(name) => RawOperand::Str(name.clone()),
        Target::Addr(addr) => RawOperand::Int(*addr as i64),
        Target::Reg(reg) => RawOperand::Str(reg.to_string()),
    }
}

fn parse_operand(raw: RawOperand) -> Result<Operand, WireError> {
    match raw {
        RawOperand::Int(v) => Ok(Operand::Lit(v)),
        RawOperand::Str(s) => match s.strip_prefix(REG_PREFIX) {
            Some(name) => match Register::parse(name) {
                Some(reg) => Ok(Operand::Reg(reg)),
                None => Err(WireError::InvalidRegister(s)),
            },
            None => Err(WireError::BadOperand(s)),
        },
    }
}

fn parse_target(raw: RawOperand) -> Result<Target, WireError> {
    match raw {
        RawOperand::Int(v) => usize::try_from(v)
            .map(Target::Addr)
            .map_err(|_| WireError::InvalidAddress(v)),
        RawOperand::Str(s) => match s.strip_prefix(REG_PREFIX) {
            Some(name) => match Register::parse(name) {
                Some(reg) => Ok(Target::Reg(reg)),
                None => Err(WireError::InvalidRegister(s)),
            },
            None => Ok(Target::Sym(s)),
        },
    }
}

fn parse_string(raw: RawOperand, opcode: &'static str) -> Result<String, WireError> {
    match raw {
        RawOperand::Str(s) => Ok(s),
        RawOperand::Int(_) => Err(WireError::ExpectedString { opcode }),
    }
}

fn arity<const N: usize>(
    opcode: &'static str,
    operands: Vec<RawOperand>,
) -> Result<[RawOperand; N], WireError> {
    operands
        .try_into()
        .map_err(|_| WireError::OperandCount { opcode, expected: N })
}

impl Instruction {
    /// Opcode name and operand list in wire order.
    fn to_wire(&self) -> (&'static str, Vec<RawOperand>) {
        match self {
            Instruction::Set(dst, src) => ("set", vec![raw_operand(dst), raw_operand(src)]),
            Instruction::Inc(dst, src) => ("inc", vec![raw_operand(dst), raw_operand(src)]),
            Instruction::Dec(dst, src) => ("dec", vec![raw_operand(dst), raw_operand(src)]),
            Instruction::Call(target) => ("call", vec![raw_target(target)]),
            Instruction::Return => ("return", vec![]),
            Instruction::Push(op) => ("push", vec![raw_operand(op)]),
            Instruction::Pop(op) => ("pop", vec![raw_operand(op)]),
            Instruction::Jnz(target, cond) => ("jnz", vec![raw_target(target), raw_operand(cond)]),
            Instruction::Alloc(dst, type_name) => {
                ("alloc", vec![raw_operand(dst), RawOperand::Str(type_name.clone())])
            }
            Instruction::Index(path, struct_op, slot_op) => (
                "index",
                vec![
                    RawOperand::Str(path.to_string()),
                    raw_operand(struct_op),
                    raw_operand(slot_op),
                ],
            ),
            Instruction::ReadBytes(dst, count) => {
                ("read_bytes", vec![raw_operand(dst), raw_operand(count)])
            }
            Instruction::WriteBytes(count, src) => {
                ("write_bytes", vec![raw_operand(count), raw_operand(src)])
            }
            Instruction::Label(name) => ("label", vec![RawOperand::Str(name.clone())]),
        }
    }

    fn from_wire(opcode: &str, operands: Vec<RawOperand>) -> Result<Instruction, WireError> {
        match opcode {
            "set" => {
                let [dst, src] = arity("set", operands)?;
                Ok(Instruction::Set(parse_operand(dst)?, parse_operand(src)?))
            }
            "inc" => {
                let [dst, src] = arity("inc", operands)?;
                Ok(Instruction::Inc(parse_operand(dst)?, parse_operand(src)?))
            }
            "dec" => {
                let [dst, src] = arity("dec", operands)?;
                Ok(Instruction::Dec(parse_operand(dst)?, parse_operand(src)?))
            }
            "call" => {
                let [target] = arity("call", operands)?;
                Ok(Instruction::Call(parse_target(target)?))
            }
            "return" => {
                let [] = arity("return", operands)?;
                Ok(Instruction::Return)
            }
            "push" => {
                let [op] = arity("push", operands)?;
                Ok(Instruction::Push(parse_operand(op)?))
            }
            "pop" => {
                let [op] = arity("pop", operands)?;
                Ok(Instruction::Pop(parse_operand(op)?))
            }
            "jnz" => {
                let [target, cond] = arity("jnz", operands)?;
                Ok(Instruction::Jnz(parse_target(target)?, parse_operand(cond)?))
            }
            "alloc" => {
                let [dst, type_name] = arity("alloc", operands)?;
                Ok(Instruction::Alloc(
                    parse_operand(dst)?,
                    parse_string(type_name, "alloc")?,
                ))
            }
            "index" => {
                let [path, struct_op, slot_op] = arity("index", operands)?;
                Ok(Instruction::Index(
                    FieldPath::parse(&parse_string(path, "index")?)?,
                    parse_operand(struct_op)?,
                    parse_operand(slot_op)?,
                ))
            }
            "read_bytes" => {
                let [dst, count] = arity("read_bytes", operands)?;
                Ok(Instruction::ReadBytes(parse_operand(dst)?, parse_operand(count)?))
            }
            "write_bytes" => {
                let [count, src] = arity("write_bytes", operands)?;
                Ok(Instruction::WriteBytes(parse_operand(count)?, parse_operand(src)?))
            }
            "label" => {
                let [name] = arity("label", operands)?;
                Ok(Instruction::Label(parse_string(name, "label")?))
            }
            other => Err(WireError::UnknownOpcode(other.to_string())),
        }
    }
}

impl Serialize for Instruction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (opcode, operands) = self.to_wire();
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(opcode, &operands)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Instruction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut raw = IndexMap::<String, Vec<RawOperand>>::deserialize(deserializer)?;
        if raw.len() != 1 {
            return Err(D::Error::custom("instruction must be a single-key map"));
        }
        let (opcode, operands) = raw
            .pop()
            .ok_or_else(|| D::Error::custom("instruction must be a single-key map"))?;
        Instruction::from_wire(&opcode, operands).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_register_names() {
        assert_eq!(Register::parse("a"), Some(Register::A));
        assert_eq!(Register::parse("pc"), Some(Register::Pc));
        assert_eq!(Register::parse("dev"), Some(Register::Dev));
        assert_eq!(Register::parse("zz"), None);
        for reg in Register::ALL {
            assert_eq!(Register::parse(reg.name()), Some(reg));
        }
    }

    #[test]
    fn test_field_path_parse() {
        let path = FieldPath::parse("simple.number").unwrap();
        assert_eq!(path.format, "simple");
        assert_eq!(path.field, "number");
        assert_eq!(path.to_string(), "simple.number");

        assert!(matches!(FieldPath::parse("simple"), Err(WireError::MalformedPath(_))));
        assert!(matches!(FieldPath::parse(".number"), Err(WireError::MalformedPath(_))));
    }

    #[test]
    fn test_wire_round_trip_every_opcode() {
        let instructions = vec![
            Instruction::Set(Operand::Reg(Register::A), Operand::Lit(2)),
            Instruction::Inc(Operand::Reg(Register::E), Operand::Lit(1)),
            Instruction::Dec(Operand::Reg(Register::C), Operand::Reg(Register::E)),
            Instruction::Call(Target::Sym("read_simple".into())),
            Instruction::Call(Target::Addr(4)),
            Instruction::Return,
            Instruction::Push(Operand::Reg(Register::A)),
            Instruction::Pop(Operand::Reg(Register::A)),
            Instruction::Jnz(Target::Sym("finish".into()), Operand::Lit(1)),
            Instruction::Jnz(Target::Reg(Register::D), Operand::Lit(1)),
            Instruction::Jnz(Target::Addr(7), Operand::Reg(Register::C)),
            Instruction::Alloc(Operand::Reg(Register::A), "simple".into()),
            Instruction::Index(
                FieldPath::new("simple", "number"),
                Operand::Reg(Register::A),
                Operand::Reg(Register::E),
            ),
            Instruction::ReadBytes(Operand::Reg(Register::Dev), Operand::Lit(2)),
            Instruction::WriteBytes(Operand::Lit(2), Operand::Reg(Register::Dev)),
            Instruction::Label("finish".into()),
        ];

        for instruction in instructions {
            let json = serde_json::to_value(&instruction).unwrap();
            let back: Instruction = serde_json::from_value(json).unwrap();
            assert_eq!(back, instruction);
        }
    }

    #[test]
    fn test_wire_form_shape() {
        let instruction = Instruction::Index(
            FieldPath::new("simple", "number"),
            Operand::Reg(Register::A),
            Operand::Lit(0),
        );
        assert_eq!(
            serde_json::to_value(&instruction).unwrap(),
            json!({ "index": ["simple.number", "reg_a", 0] })
        );

        let instruction = Instruction::ReadBytes(Operand::Reg(Register::Dev), Operand::Lit(1));
        assert_eq!(
            serde_json::to_value(&instruction).unwrap(),
            json!({ "read_bytes": ["reg_dev", 1] })
        );
    }

    #[test]
    fn test_rejects_invalid_register() {
        let err = serde_json::from_value::<Instruction>(json!({ "set": ["reg_zz", 1] }));
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_unknown_opcode() {
        let err = serde_json::from_value::<Instruction>(json!({ "frobnicate": [] }));
        assert!(err.is_err());
    }

    #[test]
    fn test_call_target_forms() {
        let sym: Instruction = serde_json::from_value(json!({ "call": ["read_simple"] })).unwrap();
        assert_eq!(sym, Instruction::Call(Target::Sym("read_simple".into())));

        let addr: Instruction = serde_json::from_value(json!({ "call": [4] })).unwrap();
        assert_eq!(addr, Instruction::Call(Target::Addr(4)));
    }
}
