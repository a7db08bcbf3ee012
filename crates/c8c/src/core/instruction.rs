//! Instructions of a function's linear stream
//!
//! The passes only ever see an instruction through [`InstructionKind`];
//! concrete kinds live in `ir::inst` and dispatch to the target at code
//! emission time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::anchor::AnchorId;
use super::emit::EmitContext;
use super::operand::Operand;
use super::register::{RegisterCatalog, RegisterId};
use super::target::Target;
use super::variable::{Address, Variable, VariableId};

/// What provably resides in a register
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterContent {
    Integer(i64),
    Symbol { label: String, offset: i64 },
    Variable { variable: VariableId, offset: usize },
}

pub type RegisterContents = BTreeMap<RegisterId, RegisterContent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionClass {
    Copy,
    Binomial,
    Monomial,
    CompareJump,
    Jump,
    Call,
    Return,
    Empty,
}

/// How an instruction uses one of its operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRole {
    Destination,
    Source,
    Left,
    Right,
    /// Pointer variable of an indirect operand
    Pointer,
    Argument(usize),
    Value,
}

pub trait InstructionKind: fmt::Debug + fmt::Display {
    fn class(&self) -> InstructionClass;

    fn is_jump(&self) -> bool {
        false
    }

    fn is_unconditional_jump(&self) -> bool {
        false
    }

    fn jump_target(&self) -> Option<AnchorId> {
        None
    }

    fn destination(&self) -> Option<&Operand> {
        None
    }

    fn sources(&self) -> Vec<&Operand>;

    /// Every operand together with the role it plays
    fn operands(&self) -> Vec<(OperandRole, &Operand)>;

    /// Whether the instruction destroys every register (calls)
    fn clobbers_all_registers(&self) -> bool {
        false
    }

    /// Whether reservations may ignore register variables living through
    /// this instruction
    fn ignores_register_variables(&self) -> bool {
        self.clobbers_all_registers()
    }

    /// Score of keeping `variable` in `register` across this instruction,
    /// `None` when the register is impossible
    fn register_adaptability(
        &self,
        variable: &Variable,
        register: RegisterId,
        target: &dyn Target,
    ) -> Option<i32> {
        let class = self.class();
        let mut score = 0;
        let mut involved = false;
        let mut wide = false;

        for (role, operand) in self.operands() {
            wide |= operand.size() == 2;
            match operand {
                Operand::Variable { variable: id, .. } if *id == variable.id() => {
                    involved = true;
                    score += target.role_adaptability(class, role, operand, register)?;
                }
                Operand::Indirect { pointer, .. } if *pointer == variable.id() => {
                    involved = true;
                    score += target.role_adaptability(class, OperandRole::Pointer, operand, register)?;
                }
                _ => {}
            }
        }

        if !involved {
            score += target.bystander_adaptability(class, wide, register)?;
        }
        Some(score)
    }

    fn build_assembly(&self, cx: &mut EmitContext<'_>);
}

/// Per-instruction register knowledge and code, produced by emission
#[derive(Debug, Clone, Default)]
pub struct InstructionState {
    pub contents: RegisterContents,
    pub changed: BTreeSet<RegisterId>,
    pub codes: Vec<String>,
}

#[derive(Debug)]
pub struct Instruction {
    address: Address,
    kind: Box<dyn InstructionKind>,
    previous: BTreeSet<Address>,
    saving: BTreeSet<VariableId>,
    state: InstructionState,
    built: bool,
}

impl Instruction {
    pub fn new(address: Address, kind: Box<dyn InstructionKind>) -> Self {
        Self {
            address,
            kind,
            previous: BTreeSet::new(),
            saving: BTreeSet::new(),
            state: InstructionState::default(),
            built: false,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn kind(&self) -> &dyn InstructionKind {
        self.kind.as_ref()
    }

    pub fn previous(&self) -> &BTreeSet<Address> {
        &self.previous
    }

    pub fn add_previous(&mut self, address: Address) {
        self.previous.insert(address);
    }

    pub fn clear_previous(&mut self) {
        self.previous.clear();
    }

    pub fn contents(&self) -> &RegisterContents {
        &self.state.contents
    }

    pub fn changed(&self) -> &BTreeSet<RegisterId> {
        &self.state.changed
    }

    pub fn codes(&self) -> &[String] {
        &self.state.codes
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn saving(&self) -> &BTreeSet<VariableId> {
        &self.saving
    }

    pub fn add_saving(&mut self, variable: VariableId) {
        self.saving.insert(variable);
    }

    /// Whether the instruction's code writes anything overlapping `register`
    pub fn is_register_changed(&self, register: RegisterId, catalog: &RegisterCatalog) -> bool {
        self.state
            .changed
            .iter()
            .any(|&changed| catalog.conflicts(changed, register))
    }

    /// Start emission: take the merged knowledge, forget earlier output
    pub(crate) fn begin(&mut self, contents: RegisterContents) -> (&dyn InstructionKind, &mut InstructionState) {
        self.state = InstructionState { contents, ..Default::default() };
        (self.kind.as_ref(), &mut self.state)
    }

    pub(crate) fn mark_built(&mut self) {
        self.built = true;
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4}: {}", self.address, self.kind)
    }
}
