//! Core simulation engine for the antfarm workspace: the instruction set and
//! its fixed-width encoding, compiled ant classes, the toroidal playfield, and
//! the energy-budgeted virtual machine that executes agent programs.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

new_key_type! {
    /// Stable handle for ants backed by a generational slot map.
    pub struct AntId;
}

/// Number of opcodes in the instruction set.
pub const NUM_INSTRUCTIONS: usize = 36;
/// First variable slot that agent programs may write.
pub const FIRST_USER_VAR: i16 = 5;
/// Hard ceiling on program length, in instructions.
pub const MAX_PROGRAM_SIZE: usize = 32_000;
/// Width of one encoded instruction in 16-bit words.
pub const INSTRUCTION_SIZE: usize = 4;
/// Word offset of the opcode (and operand flag bits) within an instruction.
pub const OPCODE_OFFSET: usize = 0;
/// Word offset of the result slot within an instruction.
pub const RESULT_OFFSET: usize = 1;
/// Word offset of the first operand within an instruction.
pub const OP1_OFFSET: usize = 2;
/// Word offset of the second operand within an instruction.
pub const OP2_OFFSET: usize = 3;
/// Flag bit in the opcode word marking the first operand as a literal.
pub const OP1_CONSTANT: i16 = 64;
/// Flag bit in the opcode word marking the second operand as a literal.
pub const OP2_CONSTANT: i16 = 128;
/// Cells reported by the sensing instructions, one bit each.
pub const DIRECTION_BITS: usize = 15;
/// Number of movement directions.
pub const NUM_DIRECTIONS: usize = 8;
/// Upper bound on simultaneous players.
pub const MAX_PLAYERS: usize = 4;
/// Upper bound on playfield width and height.
pub const MAX_PLAYFIELD_SIZE: i32 = 1000;

/// Slot of the read-only `$MyBackpackSize` variable.
pub const VAR_BACKPACK_SIZE: usize = 0;
/// Slot of the `$MyFood` variable.
pub const VAR_FOOD: usize = 1;
/// Slot of the `$MyStones` variable.
pub const VAR_STONES: usize = 2;
/// Slot of the `$MyEnergy` variable.
pub const VAR_ENERGY: usize = 3;
/// Slot of the read-only `$MyTribe` variable.
pub const VAR_TRIBE: usize = 4;

/// Named tribe operand values, including the three filter pseudo-tribes.
pub mod tribe {
    pub const RED: i16 = 0;
    pub const GREEN: i16 = 1;
    pub const BLUE: i16 = 2;
    pub const YELLOW: i16 = 3;
    pub const ANY: i16 = 4;
    pub const OTHER: i16 = 5;
    pub const OUR: i16 = 6;
}

/// Named direction operand values.
pub mod direction {
    pub const NORTH: i16 = 0;
    pub const NORTH_EAST: i16 = 1;
    pub const EAST: i16 = 2;
    pub const SOUTH_EAST: i16 = 3;
    pub const SOUTH: i16 = 4;
    pub const SOUTH_WEST: i16 = 5;
    pub const WEST: i16 = 6;
    pub const NORTH_WEST: i16 = 7;
    pub const HERE: i16 = 8;
}

/// X offsets of the 15 cells scanned by a sensing instruction, indexed by
/// direction and bit. Each row covers a 7x7 diamond facing one direction;
/// consecutive rows are the same diamond rotated by one eighth-turn.
pub const DIRECTION_X: [[i32; DIRECTION_BITS]; NUM_DIRECTIONS] = [
    [-1, 0, 1, -2, -1, 0, 1, 2, -3, -2, -1, 0, 1, 2, 3],
    [0, 1, 1, 0, 1, 2, 2, 2, 0, 1, 2, 3, 3, 3, 3],
    [1, 1, 1, 2, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 3],
    [1, 1, 0, 2, 2, 2, 1, 0, 3, 3, 3, 3, 2, 1, 0],
    [1, 0, -1, 2, 1, 0, -1, -2, 3, 2, 1, 0, -1, -2, -3],
    [0, -1, -1, 0, -1, -2, -2, -2, 0, -1, -2, -3, -3, -3, -3],
    [-1, -1, -1, -2, -2, -2, -2, -2, -3, -3, -3, -3, -3, -3, -3],
    [-1, -1, 0, -2, -2, -2, -1, 0, -3, -3, -3, -3, -2, -1, 0],
];

/// Y offsets matching [`DIRECTION_X`].
pub const DIRECTION_Y: [[i32; DIRECTION_BITS]; NUM_DIRECTIONS] = [
    [-1, -1, -1, -2, -2, -2, -2, -2, -3, -3, -3, -3, -3, -3, -3],
    [-1, -1, 0, -2, -2, -2, -1, 0, -3, -3, -3, -3, -2, -1, 0],
    [-1, 0, 1, -2, -1, 0, 1, 2, -3, -2, -1, 0, 1, 2, 3],
    [0, 1, 1, 0, 1, 2, 2, 2, 0, 1, 2, 3, 3, 3, 3],
    [1, 1, 1, 2, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3, 3],
    [1, 1, 0, 2, 2, 2, 1, 0, 3, 3, 3, 3, 2, 1, 0],
    [1, 0, -1, 2, 1, 0, -1, -2, 3, 2, 1, 0, -1, -2, -3],
    [0, -1, -1, 0, -1, -2, -2, -2, 0, -1, -2, -3, -3, -3, -3],
];

/// X offset of the single adjacent cell, indexed by direction.
pub const NEAR_X: [i32; NUM_DIRECTIONS] = [0, 1, 1, 1, 0, -1, -1, -1];
/// Y offset of the single adjacent cell, indexed by direction.
pub const NEAR_Y: [i32; NUM_DIRECTIONS] = [-1, -1, 0, 1, 1, 1, 0, -1];

/// Reduce an arbitrary direction operand to a table index.
#[must_use]
pub fn direction_index(value: i16) -> usize {
    i32::from(value).rem_euclid(NUM_DIRECTIONS as i32) as usize
}

/// Energy cost of each instruction, indexed by opcode.
pub const ENERGY_COSTS: [i16; NUM_INSTRUCTIONS] = [
    20, // MakeAnt
    1, 1, 1, 1, 1, 1, 1, 1, // sensing and adjacent queries
    8, 8, 8, 8, 8, 8, 8, // Move, Get/Put, SetMark, CleanMark
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, // data ops
    1, 1, // Goto, GotoIf
];

/// Every instruction understood by the virtual machine, in opcode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Opcode {
    MakeAnt = 0,
    Stones = 1,
    Obstacles = 2,
    Food = 3,
    Ants = 4,
    Marks = 5,
    FoodAmount = 6,
    StoneNumber = 7,
    MarkValue = 8,
    Move = 9,
    GetStones = 10,
    GetFood = 11,
    PutStones = 12,
    PutFood = 13,
    SetMark = 14,
    CleanMark = 15,
    Copy = 16,
    Or = 17,
    And = 18,
    Xor = 19,
    Not = 20,
    BitsTrue = 21,
    BitsFalse = 22,
    Add = 23,
    Sub = 24,
    Mult = 25,
    Div = 26,
    Neg = 27,
    Equal = 28,
    NotEqual = 29,
    Less = 30,
    LessEqual = 31,
    Greater = 32,
    GreaterEqual = 33,
    Goto = 34,
    GotoIf = 35,
}

/// Operand/result arity of an instruction, shared by compiler and VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandShape {
    /// One operand, no result.
    Op1,
    /// One operand plus a result slot.
    Op1Result,
    /// Two operands plus a result slot.
    Op1Op2Result,
    /// Two operands, no result.
    Op1Op2,
}

impl Opcode {
    /// All opcodes in numeric order.
    pub const ALL: [Opcode; NUM_INSTRUCTIONS] = [
        Opcode::MakeAnt,
        Opcode::Stones,
        Opcode::Obstacles,
        Opcode::Food,
        Opcode::Ants,
        Opcode::Marks,
        Opcode::FoodAmount,
        Opcode::StoneNumber,
        Opcode::MarkValue,
        Opcode::Move,
        Opcode::GetStones,
        Opcode::GetFood,
        Opcode::PutStones,
        Opcode::PutFood,
        Opcode::SetMark,
        Opcode::CleanMark,
        Opcode::Copy,
        Opcode::Or,
        Opcode::And,
        Opcode::Xor,
        Opcode::Not,
        Opcode::BitsTrue,
        Opcode::BitsFalse,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mult,
        Opcode::Div,
        Opcode::Neg,
        Opcode::Equal,
        Opcode::NotEqual,
        Opcode::Less,
        Opcode::LessEqual,
        Opcode::Greater,
        Opcode::GreaterEqual,
        Opcode::Goto,
        Opcode::GotoIf,
    ];

    /// Look up an opcode by its numeric code with the flag bits already
    /// masked off.
    #[must_use]
    pub fn from_code(code: i16) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|index| Self::ALL.get(index))
            .copied()
    }

    /// Mnemonic used in ant source files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::MakeAnt => "MakeAnt",
            Opcode::Stones => "Stones",
            Opcode::Obstacles => "Obstacles",
            Opcode::Food => "Food",
            Opcode::Ants => "Ants",
            Opcode::Marks => "Marks",
            Opcode::FoodAmount => "FoodAmount",
            Opcode::StoneNumber => "StoneNumber",
            Opcode::MarkValue => "MarkValue",
            Opcode::Move => "Move",
            Opcode::GetStones => "GetStones",
            Opcode::GetFood => "GetFood",
            Opcode::PutStones => "PutStones",
            Opcode::PutFood => "PutFood",
            Opcode::SetMark => "SetMark",
            Opcode::CleanMark => "CleanMark",
            Opcode::Copy => "Copy",
            Opcode::Or => "Or",
            Opcode::And => "And",
            Opcode::Xor => "Xor",
            Opcode::Not => "Not",
            Opcode::BitsTrue => "BitsTrue",
            Opcode::BitsFalse => "BitsFalse",
            Opcode::Add => "Add",
            Opcode::Sub => "Sub",
            Opcode::Mult => "Mult",
            Opcode::Div => "Div",
            Opcode::Neg => "Neg",
            Opcode::Equal => "Equal",
            Opcode::NotEqual => "NotEqual",
            Opcode::Less => "Less",
            Opcode::LessEqual => "LessEqual",
            Opcode::Greater => "Greater",
            Opcode::GreaterEqual => "GreaterEqual",
            Opcode::Goto => "Goto",
            Opcode::GotoIf => "GotoIf",
        }
    }

    /// Look up an opcode by its source mnemonic.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|opcode| opcode.name() == name)
    }

    /// Energy units one execution of this instruction costs.
    #[must_use]
    pub const fn energy_cost(self) -> i16 {
        ENERGY_COSTS[self as usize]
    }

    /// Operand/result shape this instruction is parsed and validated with.
    #[must_use]
    pub const fn shape(self) -> OperandShape {
        match self {
            Opcode::MakeAnt | Opcode::CleanMark | Opcode::Goto => OperandShape::Op1,
            Opcode::Stones
            | Opcode::Obstacles
            | Opcode::Food
            | Opcode::FoodAmount
            | Opcode::StoneNumber
            | Opcode::Move
            | Opcode::Copy
            | Opcode::Not
            | Opcode::BitsTrue
            | Opcode::BitsFalse
            | Opcode::Neg => OperandShape::Op1Result,
            Opcode::Ants
            | Opcode::Marks
            | Opcode::MarkValue
            | Opcode::GetStones
            | Opcode::GetFood
            | Opcode::PutStones
            | Opcode::PutFood
            | Opcode::Or
            | Opcode::And
            | Opcode::Xor
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mult
            | Opcode::Div
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::Less
            | Opcode::LessEqual
            | Opcode::Greater
            | Opcode::GreaterEqual => OperandShape::Op1Op2Result,
            Opcode::SetMark | Opcode::GotoIf => OperandShape::Op1Op2,
        }
    }
}

/// Errors raised when decoding or validating a compiled ant class.
#[derive(Debug, Error)]
pub enum ClassFormatError {
    #[error("class data could not be decoded: {0}")]
    Decode(#[from] postcard::Error),
    #[error("bytecode holds {actual} words, expected {expected} for {instructions} instructions")]
    LengthMismatch {
        instructions: u16,
        expected: usize,
        actual: usize,
    },
    #[error("variable store of size {0} cannot hold the 5 system variables")]
    VariableStoreTooSmall(u16),
    #[error("instruction {index} carries unknown opcode {opcode}")]
    UnknownOpcode { index: usize, opcode: i16 },
    #[error("instruction {index} references variable slot {slot} outside a store of {size}")]
    SlotOutOfRange { index: usize, slot: i16, size: u16 },
}

/// A compiled ant class: the immutable program and metadata shared by every
/// ant of one kind. The field order is the on-disk contract with the
/// compiler; [`AntClass::to_bytes`] and [`AntClass::from_bytes`] round-trip
/// it byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntClass {
    name: String,
    id: i16,
    backpack_size: i16,
    variable_count: u16,
    instruction_count: u16,
    code: Vec<i16>,
}

impl AntClass {
    /// Assemble a class record from compiler output.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        id: i16,
        backpack_size: i16,
        variable_count: u16,
        code: Vec<i16>,
    ) -> Self {
        let instruction_count = (code.len() / INSTRUCTION_SIZE) as u16;
        Self {
            name: name.into(),
            id,
            backpack_size,
            variable_count,
            instruction_count,
            code,
        }
    }

    /// Class name from the `DefineAnt` header.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numeric class id from the `DefineAnt` header.
    #[must_use]
    pub const fn id(&self) -> i16 {
        self.id
    }

    /// Carrying capacity of ants of this class.
    #[must_use]
    pub const fn backpack_size(&self) -> i16 {
        self.backpack_size
    }

    /// Size of the per-ant variable store, system slots included.
    #[must_use]
    pub const fn variable_count(&self) -> u16 {
        self.variable_count
    }

    /// Number of encoded instructions.
    #[must_use]
    pub const fn instruction_count(&self) -> u16 {
        self.instruction_count
    }

    /// The raw bytecode, `4 *` [`AntClass::instruction_count`] words long.
    #[must_use]
    pub fn code(&self) -> &[i16] {
        &self.code
    }

    /// Serialize the class to its binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClassFormatError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Deserialize and structurally validate a class binary.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        let class: Self = postcard::from_bytes(bytes)?;
        class.validate()?;
        Ok(class)
    }

    /// Check the structural invariants the VM relies on: bytecode length,
    /// known opcodes, and variable-slot references inside the store.
    pub fn validate(&self) -> Result<(), ClassFormatError> {
        let expected = usize::from(self.instruction_count) * INSTRUCTION_SIZE;
        if self.code.len() != expected {
            return Err(ClassFormatError::LengthMismatch {
                instructions: self.instruction_count,
                expected,
                actual: self.code.len(),
            });
        }
        if usize::from(self.variable_count) <= VAR_TRIBE {
            return Err(ClassFormatError::VariableStoreTooSmall(self.variable_count));
        }

        let slots = 0..self.variable_count as i16;
        for (index, words) in self.code.chunks_exact(INSTRUCTION_SIZE).enumerate() {
            let word = words[OPCODE_OFFSET];
            let masked = word & !(OP1_CONSTANT | OP2_CONSTANT);
            let Some(opcode) = Opcode::from_code(masked) else {
                return Err(ClassFormatError::UnknownOpcode {
                    index,
                    opcode: masked,
                });
            };

            let shape = opcode.shape();
            let mut check_slot = |slot: i16| {
                if slots.contains(&slot) {
                    Ok(())
                } else {
                    Err(ClassFormatError::SlotOutOfRange {
                        index,
                        slot,
                        size: self.variable_count,
                    })
                }
            };

            if word & OP1_CONSTANT == 0 {
                check_slot(words[OP1_OFFSET])?;
            }
            let uses_op2 = matches!(shape, OperandShape::Op1Op2 | OperandShape::Op1Op2Result);
            if uses_op2 && word & OP2_CONSTANT == 0 {
                check_slot(words[OP2_OFFSET])?;
            }
            let has_result = matches!(shape, OperandShape::Op1Result | OperandShape::Op1Op2Result);
            if has_result {
                check_slot(words[RESULT_OFFSET])?;
            }
        }
        Ok(())
    }
}

/// One cell of the playfield.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayfieldCell {
    /// Whether ants can ever stand on this cell.
    pub passable: bool,
    /// Stones lying on the cell.
    pub stones: i16,
    /// Food items lying on the cell.
    pub food: i16,
    /// Occupying ant, if any.
    pub ant: Option<AntId>,
    /// Per-tribe mark values, one slot per player.
    pub marks: Vec<i16>,
}

impl PlayfieldCell {
    fn new(players: usize) -> Self {
        Self {
            passable: false,
            stones: 0,
            food: 0,
            ant: None,
            marks: vec![0; players],
        }
    }

    /// A cell is empty when it is passable and free of ants, stones, and food.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stones == 0 && self.food == 0 && self.ant.is_none() && self.passable
    }
}

/// Toroidal grid of cells addressed with wraparound on both axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playfield {
    width: i32,
    height: i32,
    cells: Vec<PlayfieldCell>,
}

impl Playfield {
    /// Procedurally seed a playfield from the configured terrain ratios.
    /// Cells receive stones or food, never both.
    #[must_use]
    pub fn generate(config: &SimulationConfig, rng: &mut SmallRng) -> Self {
        let cell_count = (config.playfield_width * config.playfield_height) as usize;
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            let mut cell = PlayfieldCell::new(config.number_of_players);
            if rng.random::<f64>() < config.passable_ratio {
                cell.passable = true;
                if rng.random::<bool>() {
                    if rng.random::<f64>() < config.stones_ratio {
                        cell.stones = rng.random_range(0..config.max_stones_per_cell);
                    }
                } else if rng.random::<f64>() < config.food_ratio {
                    cell.food = rng.random_range(0..config.max_food_per_cell);
                }
            }
            cells.push(cell);
        }
        Self {
            width: config.playfield_width,
            height: config.playfield_height,
            cells,
        }
    }

    /// Width in cells.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.width
    }

    /// Height in cells.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.height
    }

    /// Normalize coordinates onto the grid.
    #[must_use]
    pub const fn wrap(&self, x: i32, y: i32) -> (i32, i32) {
        (x.rem_euclid(self.width), y.rem_euclid(self.height))
    }

    fn offset(&self, x: i32, y: i32) -> usize {
        let (x, y) = self.wrap(x, y);
        (y * self.width + x) as usize
    }

    /// Cell at the given coordinates, wrapping toroidally on both axes.
    #[must_use]
    pub fn cell(&self, x: i32, y: i32) -> &PlayfieldCell {
        let index = self.offset(x, y);
        &self.cells[index]
    }

    /// Mutable cell access, wrapping toroidally on both axes.
    pub fn cell_mut(&mut self, x: i32, y: i32) -> &mut PlayfieldCell {
        let index = self.offset(x, y);
        &mut self.cells[index]
    }

    /// Copy a `w x h` rectangle of cells starting at `(x, y)`, row-major.
    /// The rectangle must lie within the grid.
    pub fn snapshot_rect(
        &self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    ) -> Result<Vec<PlayfieldCell>, WorldError> {
        if x < 0 || y < 0 || w < 0 || h < 0 || x + w > self.width || y + h > self.height {
            return Err(WorldError::SnapshotOutOfBounds {
                x,
                y,
                w,
                h,
                width: self.width,
                height: self.height,
            });
        }
        let mut cells = Vec::with_capacity((w * h) as usize);
        for row in y..y + h {
            for col in x..x + w {
                cells.push(self.cell(col, row).clone());
            }
        }
        Ok(cells)
    }
}

/// Mutable runtime state of a single ant.
#[derive(Debug, Clone)]
pub struct Ant {
    class: Arc<AntClass>,
    x: i32,
    y: i32,
    pc: usize,
    variables: Vec<i16>,
}

impl Ant {
    fn new(class: Arc<AntClass>, x: i32, y: i32, tribe: i16, initial_energy: i16) -> Self {
        let mut variables = vec![0; usize::from(class.variable_count())];
        variables[VAR_BACKPACK_SIZE] = class.backpack_size();
        variables[VAR_ENERGY] = initial_energy;
        variables[VAR_TRIBE] = tribe;
        Self {
            class,
            x,
            y,
            pc: 0,
            variables,
        }
    }

    /// The compiled class this ant executes.
    #[must_use]
    pub fn class(&self) -> &Arc<AntClass> {
        &self.class
    }

    /// Current playfield position.
    #[must_use]
    pub const fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// Current program counter, in words.
    #[must_use]
    pub const fn pc(&self) -> usize {
        self.pc
    }

    /// The ant's full variable store.
    #[must_use]
    pub fn variables(&self) -> &[i16] {
        &self.variables
    }

    /// Tribe (player index) this ant belongs to.
    #[must_use]
    pub fn tribe(&self) -> i16 {
        self.variables[VAR_TRIBE]
    }

    /// Food items carried in the backpack.
    #[must_use]
    pub fn food(&self) -> i16 {
        self.variables[VAR_FOOD]
    }

    /// Overwrite the carried food amount.
    pub fn set_food(&mut self, value: i16) {
        self.variables[VAR_FOOD] = value;
    }

    /// Stones carried in the backpack.
    #[must_use]
    pub fn stones(&self) -> i16 {
        self.variables[VAR_STONES]
    }

    /// Overwrite the carried stone amount.
    pub fn set_stones(&mut self, value: i16) {
        self.variables[VAR_STONES] = value;
    }

    /// Stored energy.
    #[must_use]
    pub fn energy(&self) -> i16 {
        self.variables[VAR_ENERGY]
    }

    /// Overwrite the stored energy.
    pub fn set_energy(&mut self, value: i16) {
        self.variables[VAR_ENERGY] = value;
    }

    /// Free carrying capacity left in the backpack.
    #[must_use]
    pub fn backpack_space(&self) -> i16 {
        self.class.backpack_size() - self.food() - self.stones()
    }
}

/// Errors raised while validating configuration or assembling a world.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("expected {expected} player rosters, got {actual}")]
    RosterCountMismatch { expected: usize, actual: usize },
    #[error("player {player} has no ant classes (the first class is the queen)")]
    EmptyRoster { player: usize },
    #[error("no empty cell left to place the queen of player {player}")]
    NoEmptyCell { player: usize },
    #[error("player index {player} is out of range")]
    UnknownPlayer { player: usize },
    #[error("player {player} has no class at roster index {index}")]
    UnknownClass { player: usize, index: usize },
    #[error("cell ({x}, {y}) is not empty")]
    CellNotEmpty { x: i32, y: i32 },
    #[error("snapshot rectangle {x},{y} {w}x{h} exceeds the {width}x{height} playfield")]
    SnapshotOutOfBounds {
        x: i32,
        y: i32,
        w: i32,
        h: i32,
        width: i32,
        height: i32,
    },
}

/// Unrecoverable faults raised while executing bytecode. These indicate a
/// corrupted class or a jump that escaped the program, never ordinary game
/// events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmFault {
    #[error("program counter {pc} escapes a program of {size} words")]
    ProgramCounterOutOfRange { pc: usize, size: usize },
    #[error("jump to negative instruction address {address}")]
    JumpOutOfProgram { address: i16 },
    #[error("opcode {opcode} at word {pc} is not in the dispatch table")]
    UnknownOpcode { opcode: i16, pc: usize },
    #[error("variable slot {slot} referenced outside a store of {size}")]
    SlotOutOfRange { slot: i16, size: usize },
    #[error("schedule references an ant that no longer exists")]
    DanglingAnt,
}

/// Static configuration for one simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of competing players, 1 to [`MAX_PLAYERS`].
    pub number_of_players: usize,
    /// Playfield width in cells.
    pub playfield_width: i32,
    /// Playfield height in cells.
    pub playfield_height: i32,
    /// Probability that a generated cell is passable.
    pub passable_ratio: f64,
    /// Twice the probability that a generated passable cell holds food.
    pub food_ratio: f64,
    /// Twice the probability that a generated passable cell holds stones.
    pub stones_ratio: f64,
    /// Exclusive upper bound on randomly placed food per cell.
    pub max_food_per_cell: i16,
    /// Exclusive upper bound on randomly placed stones per cell.
    pub max_stones_per_cell: i16,
    /// Milliseconds the worker sleeps after each cycle; 0 disables the delay.
    pub sleep_per_cycle: u64,
    /// Energy a freshly created ant starts with.
    pub initial_energy: i16,
    /// Energy budget one ant may spend per turn.
    pub energy_per_run: i16,
    /// Energy gained by converting one unit of carried food.
    pub energy_per_food: i16,
    /// Per-cycle probability of one random food regrowth event.
    pub food_regrow_rate: f64,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            number_of_players: 1,
            playfield_width: 1000,
            playfield_height: 1000,
            passable_ratio: 0.9,
            food_ratio: 0.3,
            stones_ratio: 0.3,
            max_food_per_cell: 20,
            max_stones_per_cell: 20,
            sleep_per_cycle: 0,
            initial_energy: 10_000,
            energy_per_run: 20,
            energy_per_food: 1_000,
            food_regrow_rate: 0.001,
            rng_seed: None,
        }
    }
}

impl SimulationConfig {
    /// Validate parameter ranges ahead of world construction.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.number_of_players == 0 {
            return Err(WorldError::InvalidConfig("at least one player is required"));
        }
        if self.number_of_players > MAX_PLAYERS {
            return Err(WorldError::InvalidConfig("at most 4 players are supported"));
        }
        if self.playfield_width <= 0 || self.playfield_height <= 0 {
            return Err(WorldError::InvalidConfig(
                "playfield dimensions must be positive",
            ));
        }
        if self.playfield_width > MAX_PLAYFIELD_SIZE || self.playfield_height > MAX_PLAYFIELD_SIZE
        {
            return Err(WorldError::InvalidConfig(
                "playfield dimensions must not exceed 1000",
            ));
        }
        if !(0.0..=1.0).contains(&self.passable_ratio)
            || !(0.0..=1.0).contains(&self.food_ratio)
            || !(0.0..=1.0).contains(&self.stones_ratio)
            || !(0.0..=1.0).contains(&self.food_regrow_rate)
        {
            return Err(WorldError::InvalidConfig(
                "terrain ratios and the regrow rate must lie in [0, 1]",
            ));
        }
        if self.max_food_per_cell < 1 || self.max_stones_per_cell < 1 {
            return Err(WorldError::InvalidConfig(
                "per-cell resource maxima must be at least 1",
            ));
        }
        if self.initial_energy < 0 {
            return Err(WorldError::InvalidConfig(
                "initial energy must be non-negative",
            ));
        }
        if self.energy_per_run <= 0 {
            return Err(WorldError::InvalidConfig("energy per run must be positive"));
        }
        if self.energy_per_food <= 0 {
            return Err(WorldError::InvalidConfig(
                "energy per food must be positive",
            ));
        }
        Ok(())
    }

    /// RNG seeded from the configuration, drawing fresh entropy when unseeded.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Lifecycle states of the virtual machine worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VmState {
    /// Built but not yet started.
    Created = 0,
    /// Executing cycles.
    Running = 1,
    /// Halted between cycles until resumed or stopped.
    Suspended = 2,
    /// Stopped by an external stop request.
    StoppedByCommand = 3,
    /// Stopped because no active ants remain.
    StoppedBySimulation = 4,
    /// The worker hit an unrecoverable fault or was torn down.
    Terminated = 5,
}

impl VmState {
    /// Whether no further transitions can occur.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::StoppedByCommand | Self::StoppedBySimulation | Self::Terminated
        )
    }

    /// Decode the atomic representation published by the worker.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Suspended,
            3 => Self::StoppedByCommand,
            4 => Self::StoppedBySimulation,
            5 => Self::Terminated,
            _ => Self::Created,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::StoppedByCommand => "stopped-by-command",
            Self::StoppedBySimulation => "stopped-by-simulation",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// One player's compiled classes; the first entry is the queen.
#[derive(Debug, Clone)]
pub struct PlayerRoster {
    pub name: String,
    pub classes: Vec<Arc<AntClass>>,
}

/// Events emitted after processing one scheduling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleEvents {
    /// Cycle counter after this cycle.
    pub cycle: u64,
    /// Ant whose turn ran, when the schedule was non-empty.
    pub ran: Option<AntId>,
    /// Instructions executed during the turn.
    pub executed: u32,
    /// Ant removed by starvation this cycle.
    pub starved: Option<AntId>,
    /// Ants created by `MakeAnt` this cycle.
    pub spawned: Vec<AntId>,
    /// Cell that received a food regrowth roll.
    pub food_regrown: Option<(i32, i32)>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    opcode: Opcode,
    word: i16,
    result: i16,
    op1: i16,
    op2: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Survived,
    Starved,
}

type OpHandler = fn(&mut World, AntId, &Frame, &mut CycleEvents) -> Result<(), VmFault>;

/// Handler table indexed directly by masked opcode.
const OP_HANDLERS: [OpHandler; NUM_INSTRUCTIONS] = [
    World::op_make_ant,
    World::op_stones,
    World::op_obstacles,
    World::op_food,
    World::op_ants,
    World::op_marks,
    World::op_food_amount,
    World::op_stone_number,
    World::op_mark_value,
    World::op_move,
    World::op_get_stones,
    World::op_get_food,
    World::op_put_stones,
    World::op_put_food,
    World::op_set_mark,
    World::op_clean_mark,
    World::op_copy,
    World::op_or,
    World::op_and,
    World::op_xor,
    World::op_not,
    World::op_bits_true,
    World::op_bits_false,
    World::op_add,
    World::op_sub,
    World::op_mult,
    World::op_div,
    World::op_neg,
    World::op_equal,
    World::op_not_equal,
    World::op_less,
    World::op_less_equal,
    World::op_greater,
    World::op_greater_equal,
    World::op_goto,
    World::op_goto_if,
];

/// Evaluate a tribe filter operand against an occupant's tribe.
fn tribe_matches(filter: i16, occupant: i16, own: i16) -> bool {
    match filter {
        tribe::ANY => true,
        tribe::OTHER => occupant != own,
        tribe::OUR => occupant == own,
        literal => occupant == literal,
    }
}

/// Full simulation state: playfield, ants, the round-robin schedule, the
/// per-player class rosters, and the world RNG.
#[derive(Debug)]
pub struct World {
    config: SimulationConfig,
    playfield: Playfield,
    ants: SlotMap<AntId, Ant>,
    schedule: VecDeque<AntId>,
    rosters: Vec<PlayerRoster>,
    rng: SmallRng,
    cycle: u64,
}

impl World {
    /// Build a world from a validated configuration and per-player rosters;
    /// the first class of each roster is that player's queen.
    pub fn new(config: SimulationConfig, rosters: Vec<PlayerRoster>) -> Result<Self, WorldError> {
        config.validate()?;
        if rosters.len() != config.number_of_players {
            return Err(WorldError::RosterCountMismatch {
                expected: config.number_of_players,
                actual: rosters.len(),
            });
        }
        for (player, roster) in rosters.iter().enumerate() {
            if roster.classes.is_empty() {
                return Err(WorldError::EmptyRoster { player });
            }
        }
        let mut rng = config.seeded_rng();
        let playfield = Playfield::generate(&config, &mut rng);
        Ok(Self {
            config,
            playfield,
            ants: SlotMap::with_key(),
            schedule: VecDeque::new(),
            rosters,
            rng,
            cycle: 0,
        })
    }

    /// The configuration this world was built from.
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The playfield grid.
    #[must_use]
    pub fn playfield(&self) -> &Playfield {
        &self.playfield
    }

    /// Mutable playfield access for scenario setup.
    pub fn playfield_mut(&mut self) -> &mut Playfield {
        &mut self.playfield
    }

    /// Per-player rosters, queen first.
    #[must_use]
    pub fn rosters(&self) -> &[PlayerRoster] {
        &self.rosters
    }

    /// A player's compiled classes, queen first.
    pub fn player_classes(&self, player: usize) -> Result<&[Arc<AntClass>], WorldError> {
        self.rosters
            .get(player)
            .map(|roster| roster.classes.as_slice())
            .ok_or(WorldError::UnknownPlayer { player })
    }

    /// Number of cycles run so far.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Number of live ants.
    #[must_use]
    pub fn ant_count(&self) -> usize {
        self.ants.len()
    }

    /// A live ant by id.
    #[must_use]
    pub fn ant(&self, id: AntId) -> Option<&Ant> {
        self.ants.get(id)
    }

    /// Mutable access to a live ant for scenario setup.
    pub fn ant_mut(&mut self, id: AntId) -> Option<&mut Ant> {
        self.ants.get_mut(id)
    }

    /// Iterate over all live ants.
    pub fn ants(&self) -> impl Iterator<Item = (AntId, &Ant)> {
        self.ants.iter()
    }

    /// Live ants per player.
    #[must_use]
    pub fn live_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.rosters.len()];
        for (_, ant) in &self.ants {
            if let Some(count) = counts.get_mut(ant.tribe() as usize) {
                *count += 1;
            }
        }
        counts
    }

    /// Copy a rectangle of playfield cells.
    pub fn snapshot_rect(
        &self,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    ) -> Result<Vec<PlayfieldCell>, WorldError> {
        self.playfield.snapshot_rect(x, y, w, h)
    }

    /// Place one queen per player on a uniformly random empty cell and
    /// enqueue it, leaving the world untouched when there is no room.
    pub fn spawn_queens(&mut self) -> Result<Vec<AntId>, WorldError> {
        let mut empties: Vec<(i32, i32)> = Vec::new();
        for y in 0..self.playfield.height() {
            for x in 0..self.playfield.width() {
                if self.playfield.cell(x, y).is_empty() {
                    empties.push((x, y));
                }
            }
        }
        if empties.len() < self.rosters.len() {
            return Err(WorldError::NoEmptyCell {
                player: empties.len(),
            });
        }

        let mut queens = Vec::with_capacity(self.rosters.len());
        for player in 0..self.rosters.len() {
            let index = self.rng.random_range(0..empties.len());
            let (x, y) = empties.swap_remove(index);
            let class = Arc::clone(&self.rosters[player].classes[0]);
            queens.push(self.place_ant(class, x, y, player as i16));
        }
        Ok(queens)
    }

    /// Place an ant of `class_index` from `player`'s roster onto an empty
    /// cell, wrapping the coordinates toroidally.
    pub fn spawn_ant(
        &mut self,
        player: usize,
        class_index: usize,
        x: i32,
        y: i32,
    ) -> Result<AntId, WorldError> {
        let roster = self
            .rosters
            .get(player)
            .ok_or(WorldError::UnknownPlayer { player })?;
        let class = roster
            .classes
            .get(class_index)
            .cloned()
            .ok_or(WorldError::UnknownClass {
                player,
                index: class_index,
            })?;
        let (x, y) = self.playfield.wrap(x, y);
        if !self.playfield.cell(x, y).is_empty() {
            return Err(WorldError::CellNotEmpty { x, y });
        }
        Ok(self.place_ant(class, x, y, player as i16))
    }

    fn place_ant(&mut self, class: Arc<AntClass>, x: i32, y: i32, tribe: i16) -> AntId {
        let initial_energy = self.config.initial_energy;
        let id = self
            .ants
            .insert(Ant::new(class, x, y, tribe, initial_energy));
        self.playfield.cell_mut(x, y).ant = Some(id);
        self.schedule.push_back(id);
        id
    }

    /// Run one scheduling cycle: the head ant's turn followed by one random
    /// food regrowth attempt. With an empty schedule this is a no-op.
    pub fn run_cycle(&mut self) -> Result<CycleEvents, VmFault> {
        let mut events = CycleEvents {
            cycle: self.cycle,
            ..CycleEvents::default()
        };
        let Some(id) = self.schedule.pop_front() else {
            return Ok(events);
        };
        self.cycle += 1;
        events.cycle = self.cycle;
        events.ran = Some(id);

        match self.run_turn(id, &mut events)? {
            TurnOutcome::Survived => self.schedule.push_back(id),
            TurnOutcome::Starved => {
                if let Some(ant) = self.ants.remove(id) {
                    self.playfield.cell_mut(ant.x, ant.y).ant = None;
                }
                events.starved = Some(id);
            }
        }

        self.regrow_food(&mut events);
        Ok(events)
    }

    /// Execute instructions for one ant until its per-turn energy budget is
    /// exhausted or it starves. Starvation strikes before the pending
    /// instruction executes; an exhausted budget keeps the program counter
    /// for the next turn.
    fn run_turn(&mut self, id: AntId, events: &mut CycleEvents) -> Result<TurnOutcome, VmFault> {
        let mut budget = i32::from(self.config.energy_per_run);
        let energy_per_food = i32::from(self.config.energy_per_food);

        loop {
            let (frame, cost) = {
                let ant = self.ants.get(id).ok_or(VmFault::DanglingAnt)?;
                let code = ant.class.code();
                let pc = ant.pc;
                if pc + INSTRUCTION_SIZE > code.len() {
                    return Err(VmFault::ProgramCounterOutOfRange {
                        pc,
                        size: code.len(),
                    });
                }
                let word = code[pc + OPCODE_OFFSET];
                let masked = word & !(OP1_CONSTANT | OP2_CONSTANT);
                let opcode = Opcode::from_code(masked)
                    .ok_or(VmFault::UnknownOpcode { opcode: masked, pc })?;
                let frame = Frame {
                    opcode,
                    word,
                    result: code[pc + RESULT_OFFSET],
                    op1: code[pc + OP1_OFFSET],
                    op2: code[pc + OP2_OFFSET],
                };
                (frame, i32::from(opcode.energy_cost()))
            };

            if budget < cost {
                return Ok(TurnOutcome::Survived);
            }

            {
                let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
                let energy = i32::from(ant.variables[VAR_ENERGY]);
                if energy < cost {
                    let shortfall = cost - energy;
                    let food_needed = (shortfall + energy_per_food - 1) / energy_per_food;
                    let food = i32::from(ant.variables[VAR_FOOD]);
                    if food < food_needed {
                        return Ok(TurnOutcome::Starved);
                    }
                    ant.variables[VAR_FOOD] = (food - food_needed) as i16;
                    ant.variables[VAR_ENERGY] = (energy + food_needed * energy_per_food) as i16;
                }
                budget -= cost;
                let energy = i32::from(ant.variables[VAR_ENERGY]);
                ant.variables[VAR_ENERGY] = (energy - cost) as i16;
            }

            events.executed += 1;
            OP_HANDLERS[frame.opcode as usize](self, id, &frame, events)?;
        }
    }

    fn regrow_food(&mut self, events: &mut CycleEvents) {
        if self.rng.random::<f64>() < self.config.food_regrow_rate {
            let x = self.rng.random_range(0..self.playfield.width());
            let y = self.rng.random_range(0..self.playfield.height());
            let eligible = {
                let cell = self.playfield.cell(x, y);
                cell.is_empty() || cell.food > 0
            };
            if eligible {
                let amount = self.rng.random_range(0..self.config.max_food_per_cell);
                let cell = self.playfield.cell_mut(x, y);
                cell.food = cell.food.wrapping_add(amount);
                events.food_regrown = Some((x, y));
            }
        }
    }

    /// Cross-check the denormalized ant positions against cell occupancy and
    /// the schedule. Returns one message per violation; empty means the
    /// world is consistent.
    #[must_use]
    pub fn consistency_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (id, ant) in &self.ants {
            if self.playfield.cell(ant.x, ant.y).ant != Some(id) {
                errors.push(format!(
                    "ant {id:?} at ({}, {}) is not backed by its cell",
                    ant.x, ant.y
                ));
            }
        }
        for y in 0..self.playfield.height() {
            for x in 0..self.playfield.width() {
                if let Some(occupant) = self.playfield.cell(x, y).ant
                    && self.ants.get(occupant).map(Ant::position) != Some((x, y))
                {
                    errors.push(format!("cell ({x}, {y}) references a stale occupant"));
                }
            }
        }
        for id in &self.schedule {
            if !self.ants.contains_key(*id) {
                errors.push(format!("schedule references dead ant {id:?}"));
            }
        }
        if self.schedule.len() != self.ants.len() {
            errors.push(format!(
                "schedule holds {} entries for {} live ants",
                self.schedule.len(),
                self.ants.len()
            ));
        }
        errors
    }

    fn read_slot(&self, id: AntId, slot: i16) -> Result<i16, VmFault> {
        let ant = self.ants.get(id).ok_or(VmFault::DanglingAnt)?;
        usize::try_from(slot)
            .ok()
            .and_then(|index| ant.variables.get(index).copied())
            .ok_or(VmFault::SlotOutOfRange {
                slot,
                size: ant.variables.len(),
            })
    }

    fn op1_value(&self, id: AntId, frame: &Frame) -> Result<i16, VmFault> {
        if frame.word & OP1_CONSTANT != 0 {
            Ok(frame.op1)
        } else {
            self.read_slot(id, frame.op1)
        }
    }

    fn op2_value(&self, id: AntId, frame: &Frame) -> Result<i16, VmFault> {
        if frame.word & OP2_CONSTANT != 0 {
            Ok(frame.op2)
        } else {
            self.read_slot(id, frame.op2)
        }
    }

    /// Write the result slot, silently dropping writes into the five
    /// read-only system slots.
    fn set_result(&mut self, id: AntId, frame: &Frame, value: i16) -> Result<(), VmFault> {
        if frame.result < FIRST_USER_VAR {
            return Ok(());
        }
        let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
        let size = ant.variables.len();
        let slot = ant
            .variables
            .get_mut(frame.result as usize)
            .ok_or(VmFault::SlotOutOfRange {
                slot: frame.result,
                size,
            })?;
        *slot = value;
        Ok(())
    }

    fn advance(&mut self, id: AntId) -> Result<(), VmFault> {
        let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
        ant.pc += INSTRUCTION_SIZE;
        Ok(())
    }

    fn jump(&mut self, id: AntId, address: i16) -> Result<(), VmFault> {
        let target = i32::from(address) * INSTRUCTION_SIZE as i32;
        let pc = usize::try_from(target).map_err(|_| VmFault::JumpOutOfProgram { address })?;
        let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
        ant.pc = pc;
        Ok(())
    }

    fn near_cell(&self, id: AntId, dir_value: i16) -> Result<(i32, i32), VmFault> {
        let dir = direction_index(dir_value);
        let ant = self.ants.get(id).ok_or(VmFault::DanglingAnt)?;
        Ok(self
            .playfield
            .wrap(ant.x + NEAR_X[dir], ant.y + NEAR_Y[dir]))
    }

    fn sense_mask<P>(&self, id: AntId, frame: &Frame, predicate: P) -> Result<i16, VmFault>
    where
        P: Fn(&PlayfieldCell) -> bool,
    {
        let dir = direction_index(self.op1_value(id, frame)?);
        let ant = self.ants.get(id).ok_or(VmFault::DanglingAnt)?;
        let (x0, y0) = (ant.x, ant.y);
        let mut mask: i16 = 0;
        for bit in 0..DIRECTION_BITS {
            let cell = self
                .playfield
                .cell(x0 + DIRECTION_X[dir][bit], y0 + DIRECTION_Y[dir][bit]);
            if predicate(cell) {
                mask |= 1 << bit;
            }
        }
        Ok(mask)
    }

    fn op_make_ant(&mut self, id: AntId, frame: &Frame, events: &mut CycleEvents) -> Result<(), VmFault> {
        let class_id = self.op1_value(id, frame)?;
        let (x0, y0, tribe, food, is_queen) = {
            let ant = self.ants.get(id).ok_or(VmFault::DanglingAnt)?;
            let player = ant.tribe() as usize;
            let is_queen = Arc::ptr_eq(&ant.class, &self.rosters[player].classes[0]);
            (ant.x, ant.y, ant.tribe(), ant.food(), is_queen)
        };

        if is_queen {
            let mut target = None;
            for dir in 0..NUM_DIRECTIONS {
                let x = x0 + NEAR_X[dir];
                let y = y0 + NEAR_Y[dir];
                if self.playfield.cell(x, y).is_empty() {
                    target = Some(self.playfield.wrap(x, y));
                    break;
                }
            }
            if let Some((x, y)) = target {
                let player = tribe as usize;
                let class = self.rosters[player]
                    .classes
                    .iter()
                    .find(|class| class.id() == class_id && food >= class.backpack_size())
                    .cloned();
                if let Some(class) = class {
                    let cost = class.backpack_size();
                    let child = self.place_ant(class, x, y, tribe);
                    events.spawned.push(child);
                    let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
                    ant.variables[VAR_FOOD] = food.wrapping_sub(cost);
                }
            }
        }

        self.advance(id)
    }

    fn op_stones(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let mask = self.sense_mask(id, frame, |cell| cell.stones > 0)?;
        self.set_result(id, frame, mask)?;
        self.advance(id)
    }

    fn op_obstacles(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let mask = self.sense_mask(id, frame, |cell| !cell.passable)?;
        self.set_result(id, frame, mask)?;
        self.advance(id)
    }

    fn op_food(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let mask = self.sense_mask(id, frame, |cell| cell.food > 0)?;
        self.set_result(id, frame, mask)?;
        self.advance(id)
    }

    fn op_ants(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let filter = self.op2_value(id, frame)?;
        let own = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.tribe();
        let mask = self.sense_mask(id, frame, |cell| {
            cell.ant
                .and_then(|occupant| self.ants.get(occupant))
                .is_some_and(|occupant| tribe_matches(filter, occupant.tribe(), own))
        })?;
        self.set_result(id, frame, mask)?;
        self.advance(id)
    }

    fn op_marks(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let filter = self.op2_value(id, frame)?;
        let own = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.tribe();
        let mask = self.sense_mask(id, frame, |cell| match filter {
            tribe::ANY => cell.marks.iter().any(|&mark| mark != 0),
            tribe::OTHER => cell
                .marks
                .iter()
                .enumerate()
                .any(|(index, &mark)| mark != 0 && index != own as usize),
            tribe::OUR => cell.marks.get(own as usize).copied().unwrap_or(0) != 0,
            literal => usize::try_from(literal)
                .ok()
                .and_then(|index| cell.marks.get(index).copied())
                .unwrap_or(0) != 0,
        })?;
        self.set_result(id, frame, mask)?;
        self.advance(id)
    }

    fn op_food_amount(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let food = self.playfield.cell(x, y).food;
        self.set_result(id, frame, food)?;
        self.advance(id)
    }

    fn op_stone_number(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let stones = self.playfield.cell(x, y).stones;
        self.set_result(id, frame, stones)?;
        self.advance(id)
    }

    fn op_mark_value(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let filter = self.op2_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let own = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.tribe();
        let cell = self.playfield.cell(x, y);
        let value = match filter {
            tribe::OUR => cell.marks.get(own as usize).copied().unwrap_or(0),
            literal => usize::try_from(literal)
                .ok()
                .and_then(|index| cell.marks.get(index).copied())
                .unwrap_or(0),
        };
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_move(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir_value = self.op1_value(id, frame)?;
        let dir = direction_index(dir_value);
        let (x0, y0) = {
            let ant = self.ants.get(id).ok_or(VmFault::DanglingAnt)?;
            (ant.x, ant.y)
        };
        let (x, y) = self.playfield.wrap(x0 + NEAR_X[dir], y0 + NEAR_Y[dir]);

        if self.playfield.cell(x, y).is_empty() {
            self.playfield.cell_mut(x, y).ant = Some(id);
            self.playfield.cell_mut(x0, y0).ant = None;
            let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
            ant.x = x;
            ant.y = y;
            self.set_result(id, frame, 0)?;
        } else {
            self.set_result(id, frame, 1)?;
        }
        self.advance(id)
    }

    fn op_get_stones(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let mut amount = self.op2_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let available = self.playfield.cell(x, y).stones;
        let space = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.backpack_space();

        if amount > available || amount > space {
            amount = available.min(space);
            self.set_result(id, frame, 1)?;
        } else {
            self.set_result(id, frame, 0)?;
        }

        let cell = self.playfield.cell_mut(x, y);
        cell.stones = cell.stones.wrapping_sub(amount);
        let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
        ant.variables[VAR_STONES] = ant.variables[VAR_STONES].wrapping_add(amount);
        self.advance(id)
    }

    fn op_get_food(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let mut amount = self.op2_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let available = self.playfield.cell(x, y).food;
        let space = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.backpack_space();

        if amount > available || amount > space {
            amount = available.min(space);
            self.set_result(id, frame, 1)?;
        } else {
            self.set_result(id, frame, 0)?;
        }

        let cell = self.playfield.cell_mut(x, y);
        cell.food = cell.food.wrapping_sub(amount);
        let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
        ant.variables[VAR_FOOD] = ant.variables[VAR_FOOD].wrapping_add(amount);
        self.advance(id)
    }

    fn op_put_stones(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let mut amount = self.op2_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let accepts = {
            let cell = self.playfield.cell(x, y);
            cell.passable && cell.ant.is_none() && cell.food == 0
        };

        if accepts {
            let held = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.stones();
            if amount > held {
                amount = held;
                self.set_result(id, frame, 1)?;
            } else {
                self.set_result(id, frame, 0)?;
            }
            let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
            ant.variables[VAR_STONES] = ant.variables[VAR_STONES].wrapping_sub(amount);
            let cell = self.playfield.cell_mut(x, y);
            cell.stones = cell.stones.wrapping_add(amount);
        } else {
            self.set_result(id, frame, 1)?;
        }
        self.advance(id)
    }

    fn op_put_food(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let mut amount = self.op2_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let accepts = {
            let cell = self.playfield.cell(x, y);
            cell.passable && cell.ant.is_none() && cell.stones == 0
        };

        if accepts {
            let held = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.food();
            if amount > held {
                amount = held;
                self.set_result(id, frame, 1)?;
            } else {
                self.set_result(id, frame, 0)?;
            }
            let ant = self.ants.get_mut(id).ok_or(VmFault::DanglingAnt)?;
            ant.variables[VAR_FOOD] = ant.variables[VAR_FOOD].wrapping_sub(amount);
            let cell = self.playfield.cell_mut(x, y);
            cell.food = cell.food.wrapping_add(amount);
        } else {
            self.set_result(id, frame, 1)?;
        }
        self.advance(id)
    }

    fn op_set_mark(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let value = self.op2_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let own = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.tribe();
        if let Some(mark) = self.playfield.cell_mut(x, y).marks.get_mut(own as usize) {
            *mark = value;
        }
        self.advance(id)
    }

    fn op_clean_mark(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dir = self.op1_value(id, frame)?;
        let (x, y) = self.near_cell(id, dir)?;
        let own = self.ants.get(id).ok_or(VmFault::DanglingAnt)?.tribe();
        if let Some(mark) = self.playfield.cell_mut(x, y).marks.get_mut(own as usize) {
            *mark = 0;
        }
        self.advance(id)
    }

    fn op_copy(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self.op1_value(id, frame)?;
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_or(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self.op1_value(id, frame)? | self.op2_value(id, frame)?;
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_and(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self.op1_value(id, frame)? & self.op2_value(id, frame)?;
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_xor(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self.op1_value(id, frame)? ^ self.op2_value(id, frame)?;
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_not(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = !self.op1_value(id, frame)?;
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_bits_true(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self.op1_value(id, frame)?.count_ones() as i16;
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_bits_false(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self.op1_value(id, frame)?.count_zeros() as i16;
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_add(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self
            .op1_value(id, frame)?
            .wrapping_add(self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_sub(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self
            .op1_value(id, frame)?
            .wrapping_sub(self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_mult(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self
            .op1_value(id, frame)?
            .wrapping_mul(self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_div(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let dividend = self.op1_value(id, frame)?;
        let divisor = self.op2_value(id, frame)?;
        let value = if divisor == 0 {
            0
        } else {
            dividend.wrapping_div(divisor)
        };
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_neg(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = self.op1_value(id, frame)?.wrapping_neg();
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_equal(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = i16::from(self.op1_value(id, frame)? == self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_not_equal(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = i16::from(self.op1_value(id, frame)? != self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_less(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = i16::from(self.op1_value(id, frame)? < self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_less_equal(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = i16::from(self.op1_value(id, frame)? <= self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_greater(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = i16::from(self.op1_value(id, frame)? > self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_greater_equal(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let value = i16::from(self.op1_value(id, frame)? >= self.op2_value(id, frame)?);
        self.set_result(id, frame, value)?;
        self.advance(id)
    }

    fn op_goto(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let address = self.op1_value(id, frame)?;
        self.jump(id, address)
    }

    fn op_goto_if(&mut self, id: AntId, frame: &Frame, _events: &mut CycleEvents) -> Result<(), VmFault> {
        let address = self.op1_value(id, frame)?;
        let condition = self.op2_value(id, frame)?;
        if condition != 0 {
            self.jump(id, address)
        } else {
            self.advance(id)
        }
    }
}
