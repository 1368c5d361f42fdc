//! The register virtual machine.
//!
//! Executes a linked program against a [`Device`]. Faults do not stop the
//! machine: a failing step stores the fault in the error slot (last fault
//! wins, it never clears itself), sets the `err` register to 1, and the next
//! step carries on at the already-advanced `pc`. The machine halts when `pc`
//! runs off the end of the program or a `return` finds the call stack empty.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::trace;

use crate::device::Device;
use crate::instruction::{Instruction, Operand, Register, Target};
use crate::linker::Program;

/// Failures captured per step into the interpreter's error slot
#[derive(Debug, Error)]
pub enum RuntimeFault {
    #[error("operand must be a register, got literal {0}")]
    NotARegister(i64),

    #[error("pop from an empty stack")]
    StackUnderflow,

    #[error("memory address {0} has not been set")]
    UnsetMemory(i64),

    #[error("end of stream at byte {position}")]
    EndOfStream { position: usize },

    #[error("no addressing context")]
    NoAddressingContext,

    #[error("no such struct {index}")]
    NoSuchStruct { index: i64 },

    #[error("wrong type: expected {expected}, found {found}")]
    WrongStructType { expected: String, found: String },

    #[error("no such member {path}")]
    NoSuchMember { path: String },

    #[error("no such slot {slot} in member {path}")]
    NoSuchSlot { path: String, slot: i64 },

    #[error("program counter {0} out of range")]
    PcOutOfRange(i64),

    #[error("unresolved symbolic target '{0}'")]
    UnresolvedTarget(String),

    #[error("unlinked label '{0}'")]
    UnlinkedLabel(String),

    #[error("byte count {0} outside 1..=8")]
    BadByteCount(i64),

    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u64),
}

/// Register machine state: program, register bank, sparse memory, call
/// stack, and the device the program addresses.
#[derive(Debug)]
pub struct Interpreter {
    rom: Program,
    device: Device,
    memory: HashMap<i64, i64>,
    stack: Vec<i64>,
    registers: [i64; Register::ALL.len()],
    halted: bool,
    error: Option<RuntimeFault>,
    steps: u64,
    step_limit: Option<u64>,
}

impl Interpreter {
    pub fn new(rom: Program, device: Device) -> Self {
        Self {
            rom,
            device,
            memory: HashMap::new(),
            stack: Vec::new(),
            registers: [0; Register::ALL.len()],
            halted: false,
            error: None,
            steps: 0,
            step_limit: None,
        }
    }

    /// Bound the run to at most `limit` steps; exceeding it halts the
    /// machine with a [`RuntimeFault::StepLimitExceeded`] fault.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Last captured fault, if any step failed so far.
    pub fn error(&self) -> Option<&RuntimeFault> {
        self.error.as_ref()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn memory(&self) -> &HashMap<i64, i64> {
        &self.memory
    }

    pub fn stack(&self) -> &[i64] {
        &self.stack
    }

    /// Bank value of a register. `mem` and `dev` slots always read zero
    /// here; their traffic is routed, never stored.
    pub fn register(&self, register: Register) -> i64 {
        self.registers[register as usize]
    }

    /// Tear down into the device and the last captured fault.
    pub fn into_parts(self) -> (Device, Option<RuntimeFault>) {
        (self.device, self.error)
    }

    /// Step until halted.
    pub fn run(&mut self) {
        while !self.halted {
            self.step();
        }
    }

    /// Fetch, advance `pc`, dispatch. A handler failure is captured without
    /// stopping the machine.
    pub fn step(&mut self) {
        if self.halted {
            return;
        }

        if let Some(limit) = self.step_limit {
            if self.steps >= limit {
                self.error = Some(RuntimeFault::StepLimitExceeded(limit));
                self.registers[Register::Err as usize] = 1;
                self.halted = true;
                return;
            }
        }
        self.steps += 1;

        let index = self.registers[Register::Pc as usize];
        self.registers[Register::Pc as usize] += 1;

        if let Err(fault) = self.execute(index) {
            trace!(pc = index, %fault, "step faulted");
            self.error = Some(fault);
            self.registers[Register::Err as usize] = 1;
        }

        if self.registers[Register::Pc as usize] >= self.rom.len() as i64 {
            self.halted = true;
        }
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }

    fn execute(&mut self, index: i64) -> Result<(), RuntimeFault> {
        let at = usize::try_from(index).map_err(|_| RuntimeFault::PcOutOfRange(index))?;
        let instruction = self
            .rom
            .get(at)
            .cloned()
            .ok_or(RuntimeFault::PcOutOfRange(index))?;
        trace!(pc = at, ?instruction, "execute");

        match instruction {
            Instruction::Set(dst, src) => {
                let value = self.operand_value(src)?;
                self.assign(dst, value)
            }
            Instruction::Inc(dst, src) => {
                let value = self.operand_value(src)? + self.operand_read(dst)?;
                self.assign(dst, value)
            }
            Instruction::Dec(dst, src) => {
                let value = self.operand_read(dst)? - self.operand_value(src)?;
                self.assign(dst, value)
            }
            Instruction::Call(target) => {
                let dest = self.target_value(target)?;
                self.stack.push(self.registers[Register::Pc as usize]);
                self.registers[Register::Pc as usize] = dest;
                Ok(())
            }
            Instruction::Return => {
                match self.stack.pop() {
                    Some(address) => self.registers[Register::Pc as usize] = address,
                    None => self.halted = true,
                }
                Ok(())
            }
            Instruction::Push(op) => {
                let register = register_operand(op)?;
                let value = self.load_register(register)?;
                self.stack.push(value);
                Ok(())
            }
            Instruction::Pop(dst) => {
                let value = self.stack.pop().ok_or(RuntimeFault::StackUnderflow)?;
                self.assign(dst, value)
            }
            Instruction::Jnz(target, cond) => {
                if self.operand_value(cond)? != 0 {
                    let dest = self.target_value(target)?;
                    self.registers[Register::Pc as usize] = dest;
                }
                Ok(())
            }
            Instruction::Alloc(dst, type_name) => {
                let index = self.device.alloc(&type_name);
                self.assign(dst, index)
            }
            Instruction::Index(path, struct_op, slot_op) => {
                let struct_index = self.operand_read(struct_op)?;
                let slot_index = self.operand_value(slot_op)?;
                self.device.index_struct_value(path, struct_index, slot_index);
                Ok(())
            }
            Instruction::ReadBytes(dst, count_op) => {
                let count = byte_count(self.operand_value(count_op)?)?;
                let mut buf = [0u8; 8];
                for slot in buf.iter_mut().take(count) {
                    *slot = self.device.read_byte()?;
                }
                let value = LittleEndian::read_uint(&buf, count) as i64;
                self.assign(dst, value)
            }
            Instruction::WriteBytes(count_op, src) => {
                let count = byte_count(self.operand_value(count_op)?)?;
                let value = self.operand_value(src)? as u64;
                let masked = if count == 8 {
                    value
                } else {
                    value & ((1u64 << (count * 8)) - 1)
                };
                let mut buf = [0u8; 8];
                LittleEndian::write_uint(&mut buf, masked, count);
                for &byte in buf.iter().take(count) {
                    self.device.write_byte(byte);
                }
                Ok(())
            }
            Instruction::Label(name) => Err(RuntimeFault::UnlinkedLabel(name)),
        }
    }

    /// Value of a source operand: the literal itself, or the register's
    /// (possibly routed) value.
    fn operand_value(&mut self, op: Operand) -> Result<i64, RuntimeFault> {
        match op {
            Operand::Lit(value) => Ok(value),
            Operand::Reg(register) => self.load_register(register),
        }
    }

    /// Value of an operand that must name a register.
    fn operand_read(&mut self, op: Operand) -> Result<i64, RuntimeFault> {
        let register = register_operand(op)?;
        self.load_register(register)
    }

    fn assign(&mut self, dst: Operand, value: i64) -> Result<(), RuntimeFault> {
        let register = register_operand(dst)?;
        self.store_register(register, value)
    }

    fn target_value(&mut self, target: Target) -> Result<i64, RuntimeFault> {
        match target {
            Target::Addr(address) => Ok(address as i64),
            Target::Reg(register) => self.load_register(register),
            Target::Sym(name) => Err(RuntimeFault::UnresolvedTarget(name)),
        }
    }

    fn load_register(&mut self, register: Register) -> Result<i64, RuntimeFault> {
        match register {
            Register::Mem => {
                let address = self.registers[Register::Mr as usize];
                self.memory
                    .get(&address)
                    .copied()
                    .ok_or(RuntimeFault::UnsetMemory(address))
            }
            Register::Dev => self.device.read_struct_value(),
            other => Ok(self.registers[other as usize]),
        }
    }

    fn store_register(&mut self, register: Register, value: i64) -> Result<(), RuntimeFault> {
        match register {
            Register::Mem => {
                let address = self.registers[Register::Mr as usize];
                self.memory.insert(address, value);
                Ok(())
            }
            Register::Dev => self.device.write_struct_value(value),
            other => {
                self.registers[other as usize] = value;
                Ok(())
            }
        }
    }
}

fn register_operand(op: Operand) -> Result<Register, RuntimeFault> {
    match op {
        Operand::Reg(register) => Ok(register),
        Operand::Lit(value) => Err(RuntimeFault::NotARegister(value)),
    }
}

fn byte_count(count: i64) -> Result<usize, RuntimeFault> {
    if (1..=8).contains(&count) {
        Ok(count as usize)
    } else {
        Err(RuntimeFault::BadByteCount(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::FieldPath;

    fn run(rom: Program, device: Device) -> Interpreter {
        let mut machine = Interpreter::new(rom, device);
        machine.run();
        machine
    }

    fn reg(register: Register) -> Operand {
        Operand::Reg(register)
    }

    #[test]
    fn test_interprets_a_simple_set_of_instructions() {
        let machine = run(
            vec![
                Instruction::Set(reg(Register::A), Operand::Lit(2)),
                Instruction::Set(reg(Register::B), Operand::Lit(3)),
                Instruction::Set(reg(Register::C), Operand::Lit(4)),
            ],
            Device::new(),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), 2);
        assert_eq!(machine.register(Register::B), 3);
        assert_eq!(machine.register(Register::C), 4);
    }

    #[test]
    fn test_interprets_calls_and_returns() {
        // 0 main, 1 call a_function, 2 after, 3 return, 4 a_function, 5 return
        let machine = run(
            vec![
                Instruction::Set(reg(Register::A), Operand::Lit(2)),
                Instruction::Call(Target::Addr(4)),
                Instruction::Inc(reg(Register::A), Operand::Lit(3)),
                Instruction::Return,
                Instruction::Inc(reg(Register::A), Operand::Lit(1)),
                Instruction::Return,
            ],
            Device::new(),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), 6);
    }

    #[test]
    fn test_interprets_memory_set_and_get() {
        let mut machine = Interpreter::new(
            vec![
                Instruction::Set(reg(Register::Mr), Operand::Lit(1)),
                Instruction::Set(reg(Register::Mem), Operand::Lit(10)),
                Instruction::Set(reg(Register::Mr), Operand::Lit(2)),
                Instruction::Set(reg(Register::B), reg(Register::Mem)),
            ],
            Device::new(),
        );
        machine.memory.insert(2, 12);
        machine.run();
        assert!(machine.error.is_none());
        assert_eq!(machine.memory[&1], 10);
        assert_eq!(machine.register(Register::B), 12);
    }

    #[test]
    fn test_reading_unset_memory_faults() {
        let mut machine = Interpreter::new(
            vec![Instruction::Set(reg(Register::B), reg(Register::Mem))],
            Device::new(),
        );
        machine.run();
        assert!(matches!(machine.error, Some(RuntimeFault::UnsetMemory(0))));
        assert_eq!(machine.register(Register::Err), 1);
    }

    #[test]
    fn test_interprets_device_reads() {
        let machine = run(
            vec![Instruction::ReadBytes(reg(Register::B), Operand::Lit(1))],
            Device::with_bytes(vec![22]),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::B), 22);

        let machine = run(
            vec![Instruction::ReadBytes(reg(Register::B), Operand::Lit(2))],
            Device::with_bytes(vec![1, 1]),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::B), 257);
    }

    #[test]
    fn test_interprets_device_writes() {
        let machine = run(
            vec![
                Instruction::Set(reg(Register::B), Operand::Lit(5)),
                Instruction::WriteBytes(Operand::Lit(1), reg(Register::B)),
            ],
            Device::new(),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.device().bytes(), &[5]);

        let machine = run(
            vec![
                Instruction::Set(reg(Register::B), Operand::Lit(258)),
                Instruction::WriteBytes(Operand::Lit(2), reg(Register::B)),
            ],
            Device::new(),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.device().bytes(), &[2, 1]);
    }

    #[test]
    fn test_write_bytes_masks_to_the_low_bytes() {
        let machine = run(
            vec![
                Instruction::Set(reg(Register::B), Operand::Lit(456)),
                Instruction::WriteBytes(Operand::Lit(1), reg(Register::B)),
            ],
            Device::new(),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.device().bytes(), &[200]);
    }

    #[test]
    fn test_interprets_device_alloc() {
        let machine = run(
            vec![
                Instruction::Alloc(reg(Register::A), "woof".into()),
                Instruction::Alloc(reg(Register::A), "meow".into()),
            ],
            Device::new(),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), 1);
        assert_eq!(machine.device().structs()[0].type_name, "woof");
        assert_eq!(machine.device().structs()[1].type_name, "meow");
    }

    #[test]
    fn test_interprets_indexed_device_access() {
        let mut device = Device::new();
        device.alloc("simple");
        device.alloc("simple");
        device.index_struct_value(FieldPath::new("simple", "number"), 1, 0);
        device.write_struct_value(5).unwrap();

        let machine = run(
            vec![
                Instruction::Set(reg(Register::A), Operand::Lit(1)),
                Instruction::Index(FieldPath::new("simple", "number"), reg(Register::A), Operand::Lit(0)),
                Instruction::Set(reg(Register::B), reg(Register::Dev)),
                Instruction::Set(reg(Register::Dev), Operand::Lit(20)),
            ],
            device,
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::B), 5);
        assert_eq!(machine.device().structs()[1].fields["number"], vec![20]);
    }

    #[test]
    fn test_push_rejects_a_literal() {
        let mut machine = Interpreter::new(vec![Instruction::Push(Operand::Lit(5))], Device::new());
        machine.run();
        assert!(matches!(machine.error, Some(RuntimeFault::NotARegister(5))));
    }

    #[test]
    fn test_push_and_pop() {
        let mut machine = Interpreter::new(
            vec![
                Instruction::Set(reg(Register::C), Operand::Lit(15)),
                Instruction::Push(reg(Register::C)),
                Instruction::Pop(reg(Register::A)),
            ],
            Device::new(),
        );
        machine.run();
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), 15);
    }

    #[test]
    fn test_pop_from_an_empty_stack_faults() {
        let mut machine = Interpreter::new(vec![Instruction::Pop(reg(Register::A))], Device::new());
        machine.run();
        assert!(matches!(machine.error, Some(RuntimeFault::StackUnderflow)));
    }

    #[test]
    fn test_jnz_jumps_when_nonzero() {
        let machine = run(
            vec![
                Instruction::Jnz(Target::Addr(2), Operand::Lit(1)),
                Instruction::Set(reg(Register::A), Operand::Lit(1)),
                Instruction::Set(reg(Register::A), Operand::Lit(2)),
            ],
            Device::new(),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), 2);
    }

    #[test]
    fn test_jnz_falls_through_when_zero() {
        let mut machine = Interpreter::new(
            vec![
                Instruction::Jnz(Target::Addr(2), Operand::Lit(0)),
                Instruction::Set(reg(Register::A), Operand::Lit(1)),
                Instruction::Set(reg(Register::A), Operand::Lit(2)),
            ],
            Device::new(),
        );
        machine.step();
        machine.step();
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), 1);
    }

    #[test]
    fn test_jnz_jumps_to_a_register_stored_address() {
        let machine = run(
            vec![
                Instruction::Set(reg(Register::B), Operand::Lit(3)),
                Instruction::Jnz(Target::Reg(Register::B), Operand::Lit(1)),
                Instruction::Set(reg(Register::A), Operand::Lit(1)),
                Instruction::Set(reg(Register::A), Operand::Lit(2)),
            ],
            Device::new(),
        );
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), 2);
    }

    #[test]
    fn test_inc_and_dec_handle_negatives() {
        let mut machine = Interpreter::new(
            vec![Instruction::Inc(reg(Register::A), Operand::Lit(5))],
            Device::new(),
        );
        machine.registers[Register::A as usize] = -3;
        machine.run();
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), 2);

        let mut machine = Interpreter::new(
            vec![Instruction::Dec(reg(Register::A), Operand::Lit(-2))],
            Device::new(),
        );
        machine.registers[Register::A as usize] = -3;
        machine.run();
        assert!(machine.error.is_none());
        assert_eq!(machine.register(Register::A), -1);
    }

    #[test]
    fn test_a_fault_does_not_stop_execution() {
        let mut machine = Interpreter::new(
            vec![
                Instruction::Set(reg(Register::B), reg(Register::Mem)),
                Instruction::Set(reg(Register::A), Operand::Lit(7)),
            ],
            Device::new(),
        );
        machine.run();
        assert!(matches!(machine.error, Some(RuntimeFault::UnsetMemory(0))));
        assert_eq!(machine.register(Register::Err), 1);
        assert_eq!(machine.register(Register::A), 7);
    }

    #[test]
    fn test_the_last_fault_wins() {
        let mut machine = Interpreter::new(
            vec![
                Instruction::Push(Operand::Lit(5)),
                Instruction::Set(reg(Register::Mr), Operand::Lit(9)),
                Instruction::Set(reg(Register::B), reg(Register::Mem)),
            ],
            Device::new(),
        );
        machine.run();
        assert!(matches!(machine.error, Some(RuntimeFault::UnsetMemory(9))));
    }

    #[test]
    fn test_step_limit_halts_a_diverging_program() {
        // jnz 0, 1 forever
        let mut machine = Interpreter::new(
            vec![
                Instruction::Jnz(Target::Addr(0), Operand::Lit(1)),
                Instruction::Return,
            ],
            Device::new(),
        )
        .with_step_limit(100);
        machine.run();
        assert!(machine.halted());
        assert!(matches!(machine.error, Some(RuntimeFault::StepLimitExceeded(100))));
    }

    #[test]
    fn test_read_past_the_end_faults_and_continues() {
        let mut machine = Interpreter::new(
            vec![
                Instruction::ReadBytes(reg(Register::B), Operand::Lit(2)),
                Instruction::Set(reg(Register::C), Operand::Lit(1)),
            ],
            Device::with_bytes(vec![5]),
        );
        machine.run();
        assert!(matches!(machine.error, Some(RuntimeFault::EndOfStream { .. })));
        assert_eq!(machine.register(Register::C), 1);
        // the failed read must not have assigned a partial value
        assert_eq!(machine.register(Register::B), 0);
    }

    #[test]
    fn test_bad_byte_count_faults() {
        let mut machine = Interpreter::new(
            vec![Instruction::ReadBytes(reg(Register::B), Operand::Lit(9))],
            Device::with_bytes(vec![0; 16]),
        );
        machine.run();
        assert!(matches!(machine.error, Some(RuntimeFault::BadByteCount(9))));
    }
}
