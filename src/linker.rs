//! Two-pass assembler: named instruction listings in, one flat program out.
//!
//! The first pass collapses each listing (stripping `label` markers while
//! recording their offsets, then appending the implicit `return`); the
//! second lays the collapsed listings out back to back, in map insertion
//! order, and rewrites every symbolic `call`/`jnz` target to an absolute
//! address.

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::compiler::FunctionMap;
use crate::instruction::{Instruction, Target};

/// A linked, flat instruction array, indexable by absolute position.
pub type Program = Vec<Instruction>;

/// Link-time failures
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("symbol '{0}' not found")]
    UnresolvedSymbol(String),
}

struct Collapsed {
    listing: Vec<Instruction>,
    labels: IndexMap<String, usize>,
}

/// Resolves a map of named listings into a [`Program`].
pub struct Linker {
    asm: FunctionMap,
}

impl Linker {
    pub fn new(asm: FunctionMap) -> Self {
        Self { asm }
    }

    pub fn link(&self) -> Result<Program, LinkError> {
        let collapsed = self.collapsed();
        let positions = positions(&collapsed);

        let mut program = Program::new();
        for (name, info) in &collapsed {
            for instruction in &info.listing {
                program.push(resolve(instruction, name, info, &positions)?);
            }
        }
        debug!(functions = collapsed.len(), instructions = program.len(), "linked");
        Ok(program)
    }

    /// Strip `label` markers, recording each one's offset within its
    /// listing, and terminate every listing with an implicit `return`.
    fn collapsed(&self) -> IndexMap<&str, Collapsed> {
        self.asm
            .iter()
            .map(|(name, source)| {
                let mut listing = Vec::with_capacity(source.len() + 1);
                let mut labels = IndexMap::new();
                for instruction in source {
                    match instruction {
                        Instruction::Label(label) => {
                            labels.insert(label.clone(), listing.len());
                        }
                        other => listing.push(other.clone()),
                    }
                }
                listing.push(Instruction::Return);
                (name.as_str(), Collapsed { listing, labels })
            })
            .collect()
    }
}

/// Absolute start offset of every function: the running sum of all prior
/// collapsed listing lengths.
fn positions<'a>(collapsed: &'a IndexMap<&'a str, Collapsed>) -> IndexMap<&'a str, usize> {
    let mut result = IndexMap::new();
    let mut count = 0;
    for (name, info) in collapsed {
        result.insert(*name, count);
        count += info.listing.len();
    }
    result
}

fn resolve(
    instruction: &Instruction,
    function: &str,
    info: &Collapsed,
    positions: &IndexMap<&str, usize>,
) -> Result<Instruction, LinkError> {
    match instruction {
        Instruction::Call(Target::Sym(symbol)) => {
            let address = positions
                .get(symbol.as_str())
                .ok_or_else(|| LinkError::UnresolvedSymbol(symbol.clone()))?;
            Ok(Instruction::Call(Target::Addr(*address)))
        }
        Instruction::Jnz(Target::Sym(label), cond) => {
            let offset = info
                .labels
                .get(label)
                .ok_or_else(|| LinkError::UnresolvedSymbol(label.clone()))?;
            Ok(Instruction::Jnz(Target::Addr(positions[function] + offset), *cond))
        }
        other => Ok(other.clone()),
    }
}
