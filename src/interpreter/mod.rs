/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Metered bytecode interpreter for wallet scripts.
//!
//! A [`ScriptInput`] runs the program `wallet.script ++ input.input`. The machine has a stack of
//! byte strings, 256 byte-string registers, an instruction pointer `iptr`, and a data pointer `dptr`
//! that starts at the first byte of the input. A wallet's script typically checks a signature
//! over the input and then [`transfer`](instructions)s control to it.
//!
//! Every instruction costs one unit of the instruction budget plus its own cost from the cost
//! budget. Registers and stack together may not hold more than [`MAX_MEMORY`] bytes.
//!
//! # Outcomes
//!
//! |Outcome|Wallet|Other effects|
//! |---|---|---|
//! |`exit`, or running off the end|saved|kept|
//! |[`Trap::Rejected`]|untouched|undone|
//! |any other [`Trap`]|saved as of the trap|kept up to the trap|

pub mod assembler;
pub mod instructions;

use crate::state::{ScriptInput, State, StateError, Wallet};
use crate::types::{INITIAL_COST_BUDGET, MAX_INSTRUCTIONS, MAX_MEMORY, MAX_STACK_LEN};
use instructions::INSTRUCTIONS;
use std::fmt::{self, Display, Formatter};

/// Why a script stopped before running off the end of its program.
#[derive(Debug)]
pub enum Trap {
    Exit,
    Rejected,
    StackEmpty,
    StackOverflow,
    MemoryExceeded,
    InstructionsExhausted,
    CostExhausted,
    UnknownOpcode(u8),
    MissingArgs,
    OutOfBounds,
    DivideByZero,
    NegativeLength,
    BadArgument(String),
    State(StateError),
}

impl Trap {
    /// Whether the script ended on purpose rather than by fault.
    pub fn is_termination(&self) -> bool {
        matches!(self, Trap::Exit | Trap::Rejected)
    }
}

impl Display for Trap {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Trap::Exit => write!(f, "exit"),
            Trap::Rejected => write!(f, "rejected"),
            Trap::StackEmpty => write!(f, "stack empty"),
            Trap::StackOverflow => write!(f, "stack overflow"),
            Trap::MemoryExceeded => write!(f, "memory limit exceeded"),
            Trap::InstructionsExhausted => write!(f, "instruction budget exhausted"),
            Trap::CostExhausted => write!(f, "cost budget exhausted"),
            Trap::UnknownOpcode(op) => write!(f, "unknown opcode {:02X}", op),
            Trap::MissingArgs => write!(f, "instruction arguments run past the end of the program"),
            Trap::OutOfBounds => write!(f, "pointer out of bounds"),
            Trap::DivideByZero => write!(f, "division by zero"),
            Trap::NegativeLength => write!(f, "negative length"),
            Trap::BadArgument(what) => write!(f, "bad argument: {}", what),
            Trap::State(err) => write!(f, "{}", err),
        }
    }
}

impl From<StateError> for Trap {
    fn from(value: StateError) -> Self {
        Trap::State(value)
    }
}

pub struct Interpreter<'a> {
    pub(crate) state: &'a mut State,
    pub(crate) wallet: Wallet,
    pub(crate) script: Vec<u8>,
    pub(crate) stack: Vec<Vec<u8>>,
    pub(crate) registers: Vec<Vec<u8>>,
    pub(crate) iptr: usize,
    pub(crate) dptr: usize,
    inst_balance: i64,
    cost_balance: i64,
    memory: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(state: &'a mut State, wallet: Wallet, input: &[u8]) -> Interpreter<'a> {
        let mut script = wallet.script.clone();
        let dptr = script.len();
        script.extend_from_slice(input);
        Interpreter {
            state,
            wallet,
            script,
            stack: Vec::new(),
            registers: vec![Vec::new(); 256],
            iptr: 0,
            dptr,
            inst_balance: MAX_INSTRUCTIONS,
            cost_balance: INITIAL_COST_BUDGET,
            memory: 0,
        }
    }

    /// Cost spent so far.
    pub fn cost(&self) -> i64 {
        INITIAL_COST_BUDGET - self.cost_balance
    }

    /// Run until the program ends or traps.
    pub fn run(&mut self) -> Result<(), Trap> {
        loop {
            if self.iptr >= self.script.len() {
                return Ok(());
            }
            let op = self.script[self.iptr];
            let instruction = INSTRUCTIONS[op as usize].ok_or(Trap::UnknownOpcode(op))?;
            let arg_bytes = instruction.arg_bytes;
            if arg_bytes > 0 && self.iptr + arg_bytes >= self.script.len() {
                return Err(Trap::MissingArgs);
            }

            self.inst_balance -= 1;
            if self.inst_balance < 0 {
                return Err(Trap::InstructionsExhausted);
            }
            self.cost_balance -= instruction.cost;
            if self.cost_balance < 0 {
                return Err(Trap::CostExhausted);
            }

            let mut args = [0u8; 2];
            args[..arg_bytes].copy_from_slice(&self.script[self.iptr + 1..=self.iptr + arg_bytes]);
            self.iptr += 1 + arg_bytes;
            (instruction.execute)(self, &args[..arg_bytes])?;

            if self.memory > MAX_MEMORY {
                return Err(Trap::MemoryExceeded);
            }
        }
    }

    pub(crate) fn push(&mut self, value: Vec<u8>) -> Result<(), Trap> {
        if self.stack.len() >= MAX_STACK_LEN {
            return Err(Trap::StackOverflow);
        }
        self.memory += value.len();
        self.stack.push(value);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Vec<u8>, Trap> {
        let value = self.stack.pop().ok_or(Trap::StackEmpty)?;
        self.memory -= value.len();
        Ok(value)
    }

    pub(crate) fn set_register(&mut self, index: u8, value: Vec<u8>) {
        let slot = &mut self.registers[index as usize];
        self.memory = self.memory - slot.len() + value.len();
        *slot = value;
    }

    /// Up to `n` bytes of program starting at `dptr`, zero-padded to `n`. Returns the bytes and
    /// how many of them came from the program.
    pub(crate) fn read_data(&self, n: usize) -> (Vec<u8>, usize) {
        let mut bytes = vec![0u8; n];
        let available = self.script.len().saturating_sub(self.dptr).min(n);
        bytes[..available].copy_from_slice(&self.script[self.dptr..self.dptr + available]);
        (bytes, available)
    }

    fn into_wallet(self) -> Wallet {
        self.wallet
    }
}

/// Run `input` against its wallet. Returns the cost spent and how the script ended.
///
/// `Ok(())` covers both an explicit `exit` and running off the end of the program.
pub fn execute(state: &mut State, input: &ScriptInput) -> (i64, Result<(), Trap>) {
    let wallet = match state.load_wallet(input.wallet_id) {
        Ok(wallet) => wallet,
        Err(err) => return (0, Err(Trap::State(err))),
    };

    state.begin_journal();
    let mut interpreter = Interpreter::new(state, wallet, &input.input);
    let result = interpreter.run();
    let cost = interpreter.cost();
    let wallet = interpreter.into_wallet();

    let result = match result {
        Err(Trap::Rejected) => {
            if let Err(err) = state.rollback_journal() {
                log::error!("rolling back wallet {} failed: {}", input.wallet_id, err);
            }
            return (cost, Err(Trap::Rejected));
        }
        Ok(()) | Err(Trap::Exit) => Ok(()),
        Err(trap) => Err(trap),
    };

    state.commit_journal();
    if let Err(err) = state.save_wallet(&wallet) {
        return (cost, Err(Trap::State(err)));
    }
    (cost, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_utilities::temp_state;
    use crate::state::test_utilities::TempDir;
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use crate::types::{Balance, WalletID};
    use rand_core::OsRng;

    // A wallet that immediately passes control to its input.
    fn setup(name: &str) -> (State, TempDir, ScriptInput) {
        let (mut state, dir) = temp_state(name);
        state
            .insert_wallet(
                Wallet::new(WalletID::new(1), Balance::new(15000), vec![0x38]),
                true,
            )
            .unwrap();
        let input = ScriptInput {
            wallet_id: WalletID::new(1),
            input: Vec::new(),
            deadline: 10,
        };
        (state, dir, input)
    }

    fn run(state: &mut State, input: &mut ScriptInput, program: &[u8]) -> Result<(), Trap> {
        input.input = program.to_vec();
        execute(state, input).1
    }

    #[test]
    fn jumps_registers_and_seeks() {
        let (mut state, _dir, mut input) = setup("interpreter_opcodes");

        // 1. push 2, push 3; if 2 == 3 jump away.
        run(&mut state, &mut input, &[0x01, 0x02, 0x01, 0x03, 0x16, 0x1F, 0x0A, 0x00]).unwrap();

        // 2. Store and load through register 1.
        run(
            &mut state,
            &mut input,
            &[0x01, 0x02, 0x04, 0x30, 0x01, 0x31, 0x01, 0x17, 0x1F, 0x0A, 0x00],
        )
        .unwrap();

        // 3. Seek past three markers, skipping the markers inside the seek instructions.
        run(
            &mut state,
            &mut input,
            &[0xE6, 0xFE, 0xE6, 0xFE, 0xE6, 0xFE, 0x38, 0xFE, 0xFE, 0xFE, 0xFF],
        )
        .unwrap();
    }

    #[test]
    fn invalid_scripts_trap() {
        let (mut state, _dir, mut input) = setup("interpreter_invalid");
        assert!(matches!(
            run(&mut state, &mut input, &[0x01, 0xAA, 0x06]),
            Err(Trap::StackEmpty)
        ));
        assert!(matches!(run(&mut state, &mut input, &[0x11]), Err(Trap::StackEmpty)));
        assert!(matches!(
            run(&mut state, &mut input, &[0x21, 0xFF, 0x7F]),
            Err(Trap::OutOfBounds)
        ));
        assert!(matches!(
            run(&mut state, &mut input, &[0x21, 0x01]),
            Err(Trap::MissingArgs)
        ));
        assert!(matches!(
            run(&mut state, &mut input, &[0x50]),
            Err(Trap::UnknownOpcode(0x50))
        ));
        assert!(matches!(
            run(&mut state, &mut input, &[0x01, 0x00, 0x01, 0x07, 0x0C]),
            Err(Trap::DivideByZero)
        ));
    }

    #[test]
    fn verify_checks_signed_input() {
        let (mut state, _dir, mut input) = setup("interpreter_verify");
        let mut csprg = OsRng {};
        let keypair = Keypair::new(SigningKey::generate(&mut csprg));
        let signature = keypair.sign(b"test");

        // seek past the marker, push the key, push signature and message, verify.
        let mut program = vec![0xE6, 0xFF, 0x34, 0x20, 0xE4, 0x40, 0xE5, 0xFF];
        program.extend_from_slice(&keypair.public_bytes());
        program.extend_from_slice(signature.as_bytes());
        program.extend_from_slice(b"test");
        run(&mut state, &mut input, &program).unwrap();

        let last = program.len() - 1;
        program[last] ^= 1;
        assert!(matches!(
            run(&mut state, &mut input, &program),
            Err(Trap::Rejected)
        ));
    }

    #[test]
    fn budgets_are_enforced() {
        let (mut state, _dir, mut input) = setup("interpreter_exhaustion");

        // 1. goto 1 loops on itself until a budget runs out.
        assert!(matches!(
            run(&mut state, &mut input, &[0x21, 0x01, 0x00, 0xFF]),
            Err(Trap::InstructionsExhausted) | Err(Trap::CostExhausted)
        ));

        // 2. Copying 65535 bytes into a register exceeds memory.
        assert!(matches!(
            run(&mut state, &mut input, &[0x02, 0xFF, 0xFF, 0x36, 0x01, 0xFF]),
            Err(Trap::MemoryExceeded)
        ));
    }

    #[test]
    fn rejection_undoes_transfers() {
        let (mut state, _dir, mut input) = setup("interpreter_reject");
        state
            .insert_wallet(Wallet::new(WalletID::new(2), Balance::new(0), vec![]), true)
            .unwrap();

        // data_move past the code, push id and amount, send, reject.
        let mut program = vec![0x33, 0x09, 0x00, 0x34, 0x08, 0x34, 0x10, 0x43, 0xFE];
        program.extend_from_slice(&2u64.to_le_bytes());
        program.extend_from_slice(&500u128.to_le_bytes());
        assert!(matches!(
            run(&mut state, &mut input, &program),
            Err(Trap::Rejected)
        ));
        assert_eq!(state.load_wallet(WalletID::new(1)).unwrap().balance, Balance::new(15000));
        assert_eq!(state.load_wallet(WalletID::new(2)).unwrap().balance, Balance::new(0));

        // The same send followed by exit sticks.
        program[8] = 0xFF;
        run(&mut state, &mut input, &program).unwrap();
        assert_eq!(state.load_wallet(WalletID::new(1)).unwrap().balance, Balance::new(14500));
        assert_eq!(state.load_wallet(WalletID::new(2)).unwrap().balance, Balance::new(500));
    }
}
