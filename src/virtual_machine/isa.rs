//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode list and invokes a callback macro for code generation, so the opcode
//! enum, its wire mapping and its mnemonic table never drift apart.
//!
//! This module generates:
//! - The [`Opcode`] enum with wire values
//! - `TryFrom<i32>` for decoding opcodes
//! - Mnemonic lookups in both directions
//!
//! # Instruction Format
//!
//! Every instruction is a fixed 16-byte record of four little-endian `i32`
//! fields: `code`, `dest`, `arg1`, `arg2`. Operands are memory addresses or
//! immediates depending on the opcode. The `code` field is kept raw in
//! [`Instruction`] so a store can hold any record a client sends; it is only
//! decoded when the VM executes it.
//!
//! # Text Syntax
//!
//! `<mnemonic> [dest] [arg1] [arg2]`, mnemonics case-insensitive, missing
//! operands default to zero:
//!
//! ```text
//! movi 1 5
//! subi 1 1 1
//! beqi 6 1 1
//! halt
//! ```

use crate::virtual_machine::errors::VMError;
use rvm_derive::BinaryCodec;
use std::fmt;
use std::str::FromStr;

/// Size in bytes of one encoded [`Instruction`].
pub const INSTRUCTION_SIZE: usize = 16;

/// Invokes a callback macro with the complete opcode definition list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Arithmetic
            // =========================
            /// ADD dest, a1, a2 ; m[dest] = m[a1] + m[a2]
            Add = 0, "ADD",
            /// ADDI dest, a1, imm ; m[dest] = m[a1] + imm
            Addi = 1, "ADDI",
            /// SUB dest, a1, a2 ; m[dest] = m[a1] - m[a2]
            Sub = 2, "SUB",
            /// SUBI dest, a1, imm ; m[dest] = m[a1] - imm
            Subi = 3, "SUBI",
            /// MUL dest, a1, a2 ; m[dest] = m[a1] * m[a2]
            Mul = 4, "MUL",
            /// MULI dest, a1, imm ; m[dest] = m[a1] * imm
            Muli = 5, "MULI",
            /// DIV dest, a1, a2 ; m[dest] = m[a1] / m[a2] (trap on zero)
            Div = 6, "DIV",
            /// DIVI dest, a1, imm ; m[dest] = m[a1] / imm (trap on zero)
            Divi = 7, "DIVI",
            // =========================
            // Moves and stack
            // =========================
            /// MOV dest, a1 ; m[dest] = m[a1]
            Mov = 8, "MOV",
            /// MOVI dest, imm ; m[dest] = imm
            Movi = 9, "MOVI",
            /// PUSH src ; m[m[SP]] = m[src], SP += 1
            Push = 10, "PUSH",
            /// PUSHI imm ; m[m[SP]] = imm, SP += 1
            Pushi = 11, "PUSHI",
            /// POP dest ; SP -= 1, m[dest] = m[m[SP]]
            Pop = 12, "POP",
            // =========================
            // Control flow
            // =========================
            /// B target ; PC = target
            B = 13, "B",
            /// BEQ target, a1, a2 ; if m[a1] == m[a2] then PC = target
            Beq = 14, "BEQ",
            /// BEQI target, a1, imm ; if m[a1] == imm then PC = target
            Beqi = 15, "BEQI",
            /// BNE target, a1, a2 ; if m[a1] != m[a2] then PC = target
            Bne = 16, "BNE",
            /// BNEI target, a1, imm ; if m[a1] != imm then PC = target
            Bnei = 17, "BNEI",
            /// BGE target, a1, a2 ; if m[a1] >= m[a2] then PC = target
            Bge = 18, "BGE",
            /// BGEI target, a1, imm ; if m[a1] >= imm then PC = target
            Bgei = 19, "BGEI",
            /// BLEI target, imm, a2 ; if imm <= m[a2] then PC = target
            Blei = 20, "BLEI",
            /// RET src ; R0 = m[src]
            Ret = 21, "RET",
            /// RETI imm ; R0 = imm
            Reti = 22, "RETI",
            /// HALT ; PC = program size
            Halt = 23, "HALT",
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $code:literal, $mnemonic:literal
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[repr(i32)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $code,
            )*
        }

        impl TryFrom<i32> for Opcode {
            type Error = VMError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $( $code => Ok(Opcode::$name), )*
                    _ => Err(VMError::MalformedInstruction { opcode: value }),
                }
            }
        }

        impl Opcode {
            /// Every opcode in wire-value order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Looks up an opcode by mnemonic, ignoring ASCII case.
            pub fn from_mnemonic(name: &str) -> Option<Self> {
                $(
                    if name.eq_ignore_ascii_case($mnemonic) {
                        return Some(Opcode::$name);
                    }
                )*
                None
            }
        }
    };
}

for_each_opcode!(define_opcodes);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A single VM instruction as stored in the program and sent on the wire.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, BinaryCodec)]
pub struct Instruction {
    /// Raw opcode value, see [`Opcode`].
    pub code: i32,
    pub dest: i32,
    pub arg1: i32,
    pub arg2: i32,
}

impl Instruction {
    /// Builds an instruction from a known opcode.
    pub const fn new(op: Opcode, dest: i32, arg1: i32, arg2: i32) -> Self {
        Self {
            code: op as i32,
            dest,
            arg1,
            arg2,
        }
    }

    /// Decodes the opcode, failing with [`VMError::MalformedInstruction`] for
    /// unknown codes.
    pub fn opcode(&self) -> Result<Opcode, VMError> {
        Opcode::try_from(self.code)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Ok(op) => write!(f, "{op} {} {} {}", self.dest, self.arg1, self.arg2),
            Err(_) => write!(f, "?{} {} {} {}", self.code, self.dest, self.arg1, self.arg2),
        }
    }
}

/// Parses a 32-bit operand, accepting decimal or `0x`-prefixed hex.
fn parse_operand(token: &str) -> Result<i32, VMError> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let parsed = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| VMError::InvalidOperand(token.to_string()))?;

    let value = if negative { parsed.checked_neg() } else { Some(parsed) };
    value
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| VMError::InvalidOperand(token.to_string()))
}

impl FromStr for Instruction {
    type Err = VMError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty());

        let name = tokens
            .next()
            .ok_or_else(|| VMError::InvalidInstructionName(String::new()))?;
        let op = Opcode::from_mnemonic(name)
            .ok_or_else(|| VMError::InvalidInstructionName(name.to_string()))?;

        let mut operands = [0i32; 3];
        for slot in operands.iter_mut() {
            match tokens.next() {
                Some(token) => *slot = parse_operand(token)?,
                None => break,
            }
        }
        if tokens.next().is_some() {
            return Err(VMError::ArityMismatch);
        }

        let [dest, arg1, arg2] = operands;
        Ok(Instruction::new(op, dest, arg1, arg2))
    }
}
