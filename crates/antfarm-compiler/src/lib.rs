//! Single-pass compiler from ant assembly source to the fixed-width bytecode
//! executed by `antfarm-core`. The parser is recursive descent and emits
//! directly into the flat code buffer; label references are backpatched in one
//! pass after the whole program has been parsed.

use std::collections::HashMap;

use antfarm_core::{
    AntClass, INSTRUCTION_SIZE, MAX_PROGRAM_SIZE, OP1_CONSTANT, OP1_OFFSET, OP2_CONSTANT,
    OP2_OFFSET, Opcode, OperandShape, VAR_BACKPACK_SIZE, VAR_ENERGY, VAR_FOOD, VAR_STONES,
    VAR_TRIBE, direction, tribe,
};
use thiserror::Error;

pub mod lexer;

pub use lexer::{Lexer, Token};

/// A line-tagged compilation failure. Compilation aborts at the first error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct CompileError {
    /// 1-based source line the error was detected on.
    pub line: usize,
    pub kind: CompileErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("'{0}' must be followed by a letter")]
    MalformedSigil(char),
    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken { found: String, expected: &'static str },
    #[error("unknown instruction '{0}'")]
    UnknownInstruction(String),
    #[error("unknown constant '#{0}'")]
    UnknownConstant(String),
    #[error("label '%{0}' is already defined")]
    DuplicateLabel(String),
    #[error("label '%{0}' is referenced but never defined")]
    UndefinedLabel(String),
    #[error("program exceeds {} instructions", MAX_PROGRAM_SIZE)]
    ProgramTooLong,
    #[error("'${0}' is not a legal configuration setting")]
    IllegalConfigurationKey(String),
    #[error("expected a variable, got {0}")]
    ExpectedVariable(String),
    #[error("no variable slots left for '${0}'")]
    SlotsExhausted(String),
}

/// Compile one ant class source file into its bytecode record.
pub fn compile(source: &str) -> Result<AntClass, CompileError> {
    Compiler::new(source)?.run()
}

/// A parsed operand, before its instruction word placement is known.
enum Operand {
    /// Slot address of a `$variable`; leaves the literal flag clear.
    Variable(i16),
    /// Number or named constant; sets the literal flag.
    Literal(i16),
    /// Label reference; emitted as a 0 placeholder and backpatched.
    Label(String),
}

#[derive(Default)]
struct LabelEntry {
    /// Instruction index of the definition, once seen.
    address: Option<i16>,
    /// Word offsets in the code buffer awaiting the resolved address.
    references: Vec<usize>,
    /// Line of the first reference, for the undefined-label diagnostic.
    first_line: usize,
}

struct Compiler {
    lexer: Lexer,
    current: Token,
    /// Line the current token starts on.
    line: usize,
    /// Line the statement being parsed started on; statement-level errors
    /// and label references are tagged with this.
    statement_line: usize,
    variables: HashMap<String, i16>,
    next_slot: i16,
    labels: HashMap<String, LabelEntry>,
    code: Vec<i16>,
}

impl Compiler {
    fn new(source: &str) -> Result<Self, CompileError> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        let line = lexer.line();
        let variables = HashMap::from([
            ("MyBackpackSize".to_owned(), VAR_BACKPACK_SIZE as i16),
            ("MyFood".to_owned(), VAR_FOOD as i16),
            ("MyStones".to_owned(), VAR_STONES as i16),
            ("MyEnergy".to_owned(), VAR_ENERGY as i16),
            ("MyTribe".to_owned(), VAR_TRIBE as i16),
        ]);
        Ok(Self {
            lexer,
            current,
            line,
            statement_line: line,
            variables,
            next_slot: 5,
            labels: HashMap::new(),
            code: Vec::new(),
        })
    }

    fn run(mut self) -> Result<AntClass, CompileError> {
        let (name, id) = self.header()?;
        let backpack_size = self.configuration()?;
        self.program()?;
        self.backpatch()?;
        Ok(AntClass::new(
            name,
            id,
            backpack_size,
            self.next_slot as u16,
            self.code,
        ))
    }

    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError {
            line: self.line,
            kind,
        }
    }

    fn statement_error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError {
            line: self.statement_line,
            kind,
        }
    }

    fn unexpected(&self, expected: &'static str) -> CompileError {
        self.error(CompileErrorKind::UnexpectedToken {
            found: self.current.to_string(),
            expected,
        })
    }

    fn advance(&mut self) -> Result<Token, CompileError> {
        let next = self.lexer.next_token()?;
        self.line = self.lexer.line();
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), CompileError> {
        if self.current == token {
            self.advance()?;
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    /// `DefineAnt name ( id ) :`
    fn header(&mut self) -> Result<(String, i16), CompileError> {
        self.expect(Token::DefineAnt, "'DefineAnt'")?;
        let name = match self.current.clone() {
            Token::Identifier(name) => {
                self.advance()?;
                name
            }
            _ => return Err(self.unexpected("a class name")),
        };
        self.expect(Token::LeftParen, "'('")?;
        let id = match self.current {
            Token::Number(id) => {
                self.advance()?;
                id
            }
            _ => return Err(self.unexpected("a numeric class id")),
        };
        self.expect(Token::RightParen, "')'")?;
        self.expect(Token::Colon, "':'")?;
        Ok((name, id))
    }

    /// `Configuration : $MyBackpackSize = number` — the backpack size is the
    /// only legal setting.
    fn configuration(&mut self) -> Result<i16, CompileError> {
        self.expect(Token::Configuration, "'Configuration'")?;
        self.expect(Token::Colon, "':'")?;
        match self.current.clone() {
            Token::Variable(name) if name == "MyBackpackSize" => {
                self.advance()?;
            }
            Token::Variable(name) => {
                return Err(self.error(CompileErrorKind::IllegalConfigurationKey(name)));
            }
            _ => return Err(self.unexpected("'$MyBackpackSize'")),
        }
        self.expect(Token::Assign, "'='")?;
        match self.current {
            Token::Number(size) => {
                self.advance()?;
                Ok(size)
            }
            _ => Err(self.unexpected("a backpack size")),
        }
    }

    /// `Program :` followed by label definitions, assignments, and calls
    /// until end of input.
    fn program(&mut self) -> Result<(), CompileError> {
        self.expect(Token::Program, "'Program'")?;
        self.expect(Token::Colon, "':'")?;
        loop {
            self.statement_line = self.line;
            match self.current.clone() {
                Token::Eof => return Ok(()),
                Token::Label(name) => {
                    self.advance()?;
                    self.expect(Token::Colon, "':'")?;
                    self.define_label(name)?;
                }
                Token::Variable(name) => {
                    self.advance()?;
                    self.assignment(name)?;
                }
                Token::Identifier(name) => {
                    self.advance()?;
                    self.call(name)?;
                }
                _ => return Err(self.unexpected("a label, assignment, or instruction")),
            }
        }
    }

    fn define_label(&mut self, name: String) -> Result<(), CompileError> {
        let address = (self.code.len() / INSTRUCTION_SIZE) as i16;
        let entry = self.labels.entry(name.clone()).or_default();
        if entry.address.is_some() {
            let line = self.statement_line;
            return Err(CompileError {
                line,
                kind: CompileErrorKind::DuplicateLabel(name),
            });
        }
        entry.address = Some(address);
        Ok(())
    }

    /// `$x = value`, `$x = value binop value`, or `$x = unop value`.
    fn assignment(&mut self, name: String) -> Result<(), CompileError> {
        let result = self.variable_slot(name)?;
        self.expect(Token::Assign, "'='")?;

        if let Some(opcode) = unary_opcode(&self.current) {
            self.advance()?;
            let op1 = self.operand()?;
            return self.emit(opcode, result, Some(op1), None);
        }

        let op1 = self.operand()?;
        if let Some(opcode) = binary_opcode(&self.current) {
            self.advance()?;
            let op2 = self.operand()?;
            self.emit(opcode, result, Some(op1), Some(op2))
        } else {
            self.emit(Opcode::Copy, result, Some(op1), None)
        }
    }

    /// `Name(op)`, `Name(op, $result)`, `Name(op, op, $result)`, or
    /// `Name(op, op)` depending on the opcode's shape.
    fn call(&mut self, name: String) -> Result<(), CompileError> {
        let Some(opcode) = Opcode::from_name(&name) else {
            return Err(self.statement_error(CompileErrorKind::UnknownInstruction(name)));
        };
        self.expect(Token::LeftParen, "'('")?;
        let op1 = self.operand()?;

        let (op2, result) = match opcode.shape() {
            OperandShape::Op1 => (None, 0),
            OperandShape::Op1Result => {
                self.expect(Token::Comma, "','")?;
                (None, self.result_slot()?)
            }
            OperandShape::Op1Op2Result => {
                self.expect(Token::Comma, "','")?;
                let op2 = self.operand()?;
                self.expect(Token::Comma, "','")?;
                (Some(op2), self.result_slot()?)
            }
            OperandShape::Op1Op2 => {
                self.expect(Token::Comma, "','")?;
                (Some(self.operand()?), 0)
            }
        };
        self.expect(Token::RightParen, "')'")?;
        self.emit(opcode, result, Some(op1), op2)
    }

    /// A result position accepts only a variable.
    fn result_slot(&mut self) -> Result<i16, CompileError> {
        match self.current.clone() {
            Token::Variable(name) => {
                self.advance()?;
                self.variable_slot(name)
            }
            token => Err(self.error(CompileErrorKind::ExpectedVariable(token.to_string()))),
        }
    }

    fn operand(&mut self) -> Result<Operand, CompileError> {
        match self.current.clone() {
            Token::Variable(name) => {
                self.advance()?;
                Ok(Operand::Variable(self.variable_slot(name)?))
            }
            Token::Constant(name) => {
                self.advance()?;
                Ok(Operand::Literal(self.constant_value(name)?))
            }
            Token::Label(name) => {
                self.advance()?;
                Ok(Operand::Label(name))
            }
            Token::Number(value) => {
                self.advance()?;
                Ok(Operand::Literal(value))
            }
            _ => Err(self.unexpected("an operand")),
        }
    }

    /// Slot of a named variable, allocating the next free slot on first use.
    fn variable_slot(&mut self, name: String) -> Result<i16, CompileError> {
        if let Some(&slot) = self.variables.get(&name) {
            return Ok(slot);
        }
        if self.next_slot == i16::MAX {
            return Err(self.error(CompileErrorKind::SlotsExhausted(name)));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.variables.insert(name, slot);
        Ok(slot)
    }

    fn constant_value(&self, name: String) -> Result<i16, CompileError> {
        let value = match name.as_str() {
            "Red" => tribe::RED,
            "Green" => tribe::GREEN,
            "Blue" => tribe::BLUE,
            "Yellow" => tribe::YELLOW,
            "Any" => tribe::ANY,
            "Other" => tribe::OTHER,
            "Our" => tribe::OUR,
            "North" => direction::NORTH,
            "NorthEast" => direction::NORTH_EAST,
            "East" => direction::EAST,
            "SouthEast" => direction::SOUTH_EAST,
            "South" => direction::SOUTH,
            "SouthWest" => direction::SOUTH_WEST,
            "West" => direction::WEST,
            "NorthWest" => direction::NORTH_WEST,
            "Here" => direction::HERE,
            _ => return Err(self.error(CompileErrorKind::UnknownConstant(name))),
        };
        Ok(value)
    }

    /// Append one encoded instruction, setting the literal-flag bits and
    /// recording label references for the backpatch pass.
    fn emit(
        &mut self,
        opcode: Opcode,
        result: i16,
        op1: Option<Operand>,
        op2: Option<Operand>,
    ) -> Result<(), CompileError> {
        if self.code.len() / INSTRUCTION_SIZE >= MAX_PROGRAM_SIZE {
            return Err(self.statement_error(CompileErrorKind::ProgramTooLong));
        }

        let base = self.code.len();
        let mut word = opcode as i16;
        let mut words = [0i16; INSTRUCTION_SIZE];
        words[antfarm_core::RESULT_OFFSET] = result;

        for (operand, offset, flag) in [(op1, OP1_OFFSET, OP1_CONSTANT), (op2, OP2_OFFSET, OP2_CONSTANT)] {
            match operand {
                Some(Operand::Variable(slot)) => words[offset] = slot,
                Some(Operand::Literal(value)) => {
                    word |= flag;
                    words[offset] = value;
                }
                Some(Operand::Label(name)) => {
                    word |= flag;
                    let line = self.statement_line;
                    let entry = self.labels.entry(name).or_default();
                    if entry.references.is_empty() && entry.address.is_none() {
                        entry.first_line = line;
                    }
                    entry.references.push(base + offset);
                }
                None => {}
            }
        }

        words[antfarm_core::OPCODE_OFFSET] = word;
        self.code.extend_from_slice(&words);
        Ok(())
    }

    /// Resolve every recorded label reference. A label that was referenced
    /// but never defined fails compilation with its first reference line.
    fn backpatch(&mut self) -> Result<(), CompileError> {
        for (name, entry) in &self.labels {
            let Some(address) = entry.address else {
                return Err(CompileError {
                    line: entry.first_line,
                    kind: CompileErrorKind::UndefinedLabel(name.clone()),
                });
            };
            for &offset in &entry.references {
                self.code[offset] = address;
            }
        }
        Ok(())
    }
}

fn unary_opcode(token: &Token) -> Option<Opcode> {
    match token {
        Token::Bang => Some(Opcode::Not),
        Token::Minus => Some(Opcode::Neg),
        _ => None,
    }
}

fn binary_opcode(token: &Token) -> Option<Opcode> {
    match token {
        Token::Or => Some(Opcode::Or),
        Token::And => Some(Opcode::And),
        Token::Xor => Some(Opcode::Xor),
        Token::Plus => Some(Opcode::Add),
        Token::Minus => Some(Opcode::Sub),
        Token::Star => Some(Opcode::Mult),
        Token::Slash => Some(Opcode::Div),
        Token::Equal => Some(Opcode::Equal),
        Token::NotEqual => Some(Opcode::NotEqual),
        Token::Less => Some(Opcode::Less),
        Token::LessEqual => Some(Opcode::LessEqual),
        Token::Greater => Some(Opcode::Greater),
        Token::GreaterEqual => Some(Opcode::GreaterEqual),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(class: &AntClass, index: usize) -> [i16; 4] {
        let base = index * INSTRUCTION_SIZE;
        class.code()[base..base + INSTRUCTION_SIZE]
            .try_into()
            .expect("instruction")
    }

    #[test]
    fn compiles_the_minimal_spinner() {
        let class = compile(
            "DefineAnt Spinner(7):\n\
             Configuration:\n\
             $MyBackpackSize = 10\n\
             Program:\n\
             $x = 1 + 2\n\
             %loop:\n\
             Goto(%loop)\n",
        )
        .expect("compile");

        assert_eq!(class.name(), "Spinner");
        assert_eq!(class.id(), 7);
        assert_eq!(class.backpack_size(), 10);
        assert_eq!(class.instruction_count(), 2);
        assert_eq!(class.variable_count(), 6, "five system slots plus $x");
        assert_eq!(
            instruction(&class, 0),
            [Opcode::Add as i16 | OP1_CONSTANT | OP2_CONSTANT, 5, 1, 2],
            "$x lands in the first free slot"
        );
        assert_eq!(
            instruction(&class, 1),
            [Opcode::Goto as i16 | OP1_CONSTANT, 0, 1, 0],
            "%loop resolves to instruction index 1"
        );
        assert!(class.validate().is_ok());
    }

    #[test]
    fn operand_flags_distinguish_variables_from_literals() {
        let class = compile(
            "DefineAnt Flags(1):\n\
             Configuration:\n\
             $MyBackpackSize = 5\n\
             Program:\n\
             $a = $MyFood\n\
             $b = $a + 3\n\
             $c = 3 + $a\n\
             Move(#East, $b)\n\
             GetFood(#North, $a, $c)\n",
        )
        .expect("compile");

        // Copy from a variable: no literal flags at all.
        assert_eq!(instruction(&class, 0), [Opcode::Copy as i16, 5, 1, 0]);
        // Variable + literal and literal + variable set exactly one flag each.
        assert_eq!(
            instruction(&class, 1),
            [Opcode::Add as i16 | OP2_CONSTANT, 6, 5, 3]
        );
        assert_eq!(
            instruction(&class, 2),
            [Opcode::Add as i16 | OP1_CONSTANT, 7, 3, 5]
        );
        // A named constant is a literal; the result slot is never flagged.
        assert_eq!(
            instruction(&class, 3),
            [Opcode::Move as i16 | OP1_CONSTANT, 6, 2, 0]
        );
        assert_eq!(
            instruction(&class, 4),
            [Opcode::GetFood as i16 | OP1_CONSTANT, 7, 0, 5]
        );
    }

    #[test]
    fn unary_assignments_desugar_to_not_and_neg() {
        let class = compile(
            "DefineAnt Unary(1):\n\
             Configuration:\n\
             $MyBackpackSize = 5\n\
             Program:\n\
             $a = ! $MyFood\n\
             $b = - 7\n",
        )
        .expect("compile");
        assert_eq!(instruction(&class, 0), [Opcode::Not as i16, 5, 1, 0]);
        assert_eq!(
            instruction(&class, 1),
            [Opcode::Neg as i16 | OP1_CONSTANT, 6, 7, 0]
        );
    }

    #[test]
    fn every_binary_operator_maps_to_its_opcode() {
        let cases = [
            ("|", Opcode::Or),
            ("&", Opcode::And),
            ("^", Opcode::Xor),
            ("+", Opcode::Add),
            ("-", Opcode::Sub),
            ("*", Opcode::Mult),
            ("/", Opcode::Div),
            ("==", Opcode::Equal),
            ("!=", Opcode::NotEqual),
            ("<", Opcode::Less),
            ("<=", Opcode::LessEqual),
            (">", Opcode::Greater),
            (">=", Opcode::GreaterEqual),
        ];
        for (operator, opcode) in cases {
            let source = format!(
                "DefineAnt Op(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\n$a = 1 {operator} 2\n"
            );
            let class = compile(&source).expect(operator);
            assert_eq!(
                instruction(&class, 0),
                [opcode as i16 | OP1_CONSTANT | OP2_CONSTANT, 5, 1, 2],
                "operator {operator}"
            );
        }
    }

    #[test]
    fn forward_label_references_backpatch() {
        let class = compile(
            "DefineAnt Jumper(1):\n\
             Configuration:\n\
             $MyBackpackSize = 5\n\
             Program:\n\
             Goto(%end)\n\
             %middle:\n\
             GotoIf(%middle, $MyFood)\n\
             %end:\n\
             Goto(%middle)\n",
        )
        .expect("compile");
        assert_eq!(
            instruction(&class, 0),
            [Opcode::Goto as i16 | OP1_CONSTANT, 0, 2, 0],
            "forward reference to %end"
        );
        assert_eq!(
            instruction(&class, 1),
            [Opcode::GotoIf as i16 | OP1_CONSTANT, 0, 1, 1],
            "self reference to %middle with a variable condition"
        );
        assert_eq!(
            instruction(&class, 2),
            [Opcode::Goto as i16 | OP1_CONSTANT, 0, 1, 0],
            "backward reference to %middle"
        );
    }

    #[test]
    fn named_constants_cover_tribes_and_directions() {
        let class = compile(
            "DefineAnt Scout(1):\n\
             Configuration:\n\
             $MyBackpackSize = 5\n\
             Program:\n\
             Ants(#NorthWest, #Other, $foes)\n\
             Marks(#SouthEast, #Any, $trail)\n\
             MarkValue(#Here, #Our, $own)\n",
        )
        .expect("compile");
        assert_eq!(
            instruction(&class, 0),
            [Opcode::Ants as i16 | OP1_CONSTANT | OP2_CONSTANT, 5, 7, 5]
        );
        assert_eq!(
            instruction(&class, 1),
            [Opcode::Marks as i16 | OP1_CONSTANT | OP2_CONSTANT, 6, 3, 4]
        );
        assert_eq!(
            instruction(&class, 2),
            [Opcode::MarkValue as i16 | OP1_CONSTANT | OP2_CONSTANT, 7, 8, 6]
        );
    }

    #[test]
    fn system_variables_resolve_to_reserved_slots() {
        let class = compile(
            "DefineAnt Sys(1):\n\
             Configuration:\n\
             $MyBackpackSize = 5\n\
             Program:\n\
             $a = $MyBackpackSize + $MyTribe\n\
             $b = $MyStones + $MyEnergy\n",
        )
        .expect("compile");
        assert_eq!(instruction(&class, 0), [Opcode::Add as i16, 5, 0, 4]);
        assert_eq!(instruction(&class, 1), [Opcode::Add as i16, 6, 2, 3]);
        assert_eq!(class.variable_count(), 7);
    }

    #[test]
    fn calls_enforce_their_operand_shapes() {
        let shapes = [
            "MakeAnt(3)",
            "CleanMark(#North)",
            "Stones(#North, $mask)",
            "SetMark(#North, 5)",
            "GotoIf(%loop, $cond)",
            "PutStones(#South, 4, $r)",
        ];
        for call in shapes {
            let source = format!(
                "DefineAnt Shape(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\n%loop:\n{call}\n"
            );
            compile(&source).unwrap_or_else(|err| panic!("{call}: {err}"));
        }

        // A result argument where the shape takes none is a syntax error.
        let err = compile(
            "DefineAnt Shape(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\nGoto(0, $r)\n",
        )
        .expect_err("extra argument");
        assert_eq!(err.line, 5);
        assert!(matches!(err.kind, CompileErrorKind::UnexpectedToken { .. }));

        // A missing argument is caught at the closing parenthesis.
        let err = compile(
            "DefineAnt Shape(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\nAdd(1, 2)\n",
        )
        .expect_err("missing result");
        assert!(matches!(err.kind, CompileErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    fn result_positions_require_variables() {
        let err = compile(
            "DefineAnt Bad(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\nMove(#East, 3)\n",
        )
        .expect_err("literal result");
        assert_eq!(err.line, 5);
        assert_eq!(err.kind, CompileErrorKind::ExpectedVariable("'3'".into()));

        let err = compile(
            "DefineAnt Bad(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\n3 = $a\n",
        )
        .expect_err("literal assignment target");
        assert!(matches!(err.kind, CompileErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    fn rejects_unknown_instructions_and_constants() {
        let err = compile(
            "DefineAnt Bad(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\nTeleport(#North)\n",
        )
        .expect_err("unknown instruction");
        assert_eq!(err.line, 5);
        assert_eq!(
            err.kind,
            CompileErrorKind::UnknownInstruction("Teleport".into())
        );

        let err = compile(
            "DefineAnt Bad(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\nCleanMark(#Up)\n",
        )
        .expect_err("unknown constant");
        assert_eq!(err.kind, CompileErrorKind::UnknownConstant("Up".into()));
    }

    #[test]
    fn rejects_duplicate_and_undefined_labels() {
        let err = compile(
            "DefineAnt Bad(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\n%a:\n$x = 1\n%a:\n",
        )
        .expect_err("duplicate label");
        assert_eq!(err.line, 7);
        assert_eq!(err.kind, CompileErrorKind::DuplicateLabel("a".into()));

        let err = compile(
            "DefineAnt Bad(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\nGoto(%nowhere)\n",
        )
        .expect_err("undefined label");
        assert_eq!(err.line, 5, "reported at the first reference");
        assert_eq!(err.kind, CompileErrorKind::UndefinedLabel("nowhere".into()));
    }

    #[test]
    fn configuration_allows_only_the_backpack_size() {
        let err = compile("DefineAnt Bad(1):\nConfiguration:\n$MyEnergy = 5\nProgram:\n")
            .expect_err("illegal key");
        assert_eq!(err.line, 3);
        assert_eq!(
            err.kind,
            CompileErrorKind::IllegalConfigurationKey("MyEnergy".into())
        );

        let err = compile("DefineAnt Bad(1):\nProgram:\n").expect_err("missing configuration");
        assert!(matches!(err.kind, CompileErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    fn oversized_programs_fail_at_the_excess_instruction() {
        let mut source = String::from(
            "DefineAnt Huge(1):\nConfiguration:\n$MyBackpackSize = 5\nProgram:\n",
        );
        for _ in 0..=MAX_PROGRAM_SIZE {
            source.push_str("$x = 1\n");
        }
        let err = compile(&source).expect_err("too long");
        assert_eq!(err.kind, CompileErrorKind::ProgramTooLong);
        assert_eq!(err.line, 4 + MAX_PROGRAM_SIZE + 1, "the first instruction past the cap");
    }

    #[test]
    fn comments_do_not_disturb_parsing_or_lines() {
        let err = compile(
            "; a spinner\nDefineAnt Bad(1): ; header\nConfiguration:\n$MyBackpackSize = 5\nProgram:\n; nothing yet\nOops(#North)\n",
        )
        .expect_err("unknown instruction");
        assert_eq!(err.line, 7);
    }
}
