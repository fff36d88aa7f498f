/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Human-readable script text.
//!
//! One instruction per line: the mnemonic followed by decimal arguments. Instructions whose two
//! argument bytes form one 16-bit offset take a single (possibly negative) number. Everything
//! after a `<--data-->` line is raw data written as hex bytes.

use super::instructions::{by_name, INSTRUCTIONS};
use std::fmt::{self, Display, Formatter};

pub const DATA_MARKER: &str = "<--data-->";

#[derive(Debug, PartialEq, Eq)]
pub enum AssemblyError {
    UnknownMnemonic(String),
    UnknownOpcode(u8),
    MissingArgument(String),
    InvalidArgument { mnemonic: String, argument: String },
    InvalidHex(String),
}

impl Display for AssemblyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::UnknownMnemonic(word) => write!(f, "expected opcode, got {}", word),
            AssemblyError::UnknownOpcode(op) => write!(f, "unknown opcode {:02X}", op),
            AssemblyError::MissingArgument(name) => write!(f, "not enough arguments to {}", name),
            AssemblyError::InvalidArgument { mnemonic, argument } => {
                write!(f, "invalid argument \"{}\" to opcode {}", argument, mnemonic)
            }
            AssemblyError::InvalidHex(token) => write!(f, "invalid data byte {}", token),
        }
    }
}

impl std::error::Error for AssemblyError {}

pub fn assemble(text: &str) -> Result<Vec<u8>, AssemblyError> {
    let mut tokens = text.split_whitespace();
    let mut bytes = Vec::new();

    while let Some(word) = tokens.next() {
        if word == DATA_MARKER {
            for token in tokens.by_ref() {
                let byte = u8::from_str_radix(token, 16)
                    .map_err(|_| AssemblyError::InvalidHex(token.to_string()))?;
                bytes.push(byte);
            }
            break;
        }

        let (opcode, instruction) =
            by_name(word).ok_or_else(|| AssemblyError::UnknownMnemonic(word.to_string()))?;
        bytes.push(opcode);

        let mut next_argument = || -> Result<i64, AssemblyError> {
            let argument = tokens
                .next()
                .ok_or_else(|| AssemblyError::MissingArgument(word.to_string()))?;
            let invalid = || AssemblyError::InvalidArgument {
                mnemonic: word.to_string(),
                argument: argument.to_string(),
            };
            let value: i64 = argument.parse().map_err(|_| invalid())?;
            let (min, max) = if instruction.short_arg {
                (i16::MIN as i64, 0xFFFF)
            } else {
                (0, 0xFF)
            };
            if value < min || value > max {
                return Err(invalid());
            }
            Ok(value)
        };

        if instruction.short_arg {
            let value = next_argument()? as u16;
            bytes.extend_from_slice(&value.to_le_bytes());
        } else {
            for _ in 0..instruction.arg_bytes {
                let value = next_argument()?;
                bytes.push(value as u8);
            }
        }
    }

    Ok(bytes)
}

/// Where raw data probably starts: after the last terminating instruction before the bytes stop
/// looking like code.
fn find_data_section(script: &[u8]) -> usize {
    let mut index = script.len();
    let mut i = 0;
    while i < script.len() {
        let byte = script[i];
        if matches!(byte, 0xFF | 0xFE | 0xE5 | 0x38) {
            index = i + 1;
        }
        match INSTRUCTIONS[byte as usize] {
            Some(instruction) if i + instruction.arg_bytes < script.len() => {
                i += 1 + instruction.arg_bytes;
            }
            _ => break,
        }
    }
    index
}

pub fn disassemble(script: &[u8]) -> Result<String, AssemblyError> {
    let data_index = find_data_section(script);
    let mut text = String::new();

    let mut i = 0;
    while i < script.len() {
        if i == data_index {
            text.push_str(DATA_MARKER);
            text.push('\n');
            for row in script[i..].chunks(32) {
                let hex: Vec<String> = row.iter().map(|b| format!("{:02X}", b)).collect();
                text.push_str(&hex.join(" "));
                text.push('\n');
            }
            break;
        }

        let opcode = script[i];
        let instruction = INSTRUCTIONS[opcode as usize].ok_or(AssemblyError::UnknownOpcode(opcode))?;
        if i + instruction.arg_bytes >= script.len() && instruction.arg_bytes > 0 {
            return Err(AssemblyError::MissingArgument(instruction.name.to_string()));
        }
        text.push_str(instruction.name);
        let args = &script[i + 1..=i + instruction.arg_bytes];
        if instruction.short_arg {
            text.push_str(&format!(" {}", i16::from_le_bytes([args[0], args[1]])));
        } else {
            for arg in args {
                text.push_str(&format!(" {}", arg));
            }
        }
        text.push('\n');
        i += 1 + instruction.arg_bytes;
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_words_and_data() {
        let bytes = assemble("data_move 6\npush_rest\nadd_sibling\nexit\n<--data-->\nAB 01").unwrap();
        assert_eq!(bytes, vec![0x33, 0x06, 0x00, 0xE4, 0x41, 0xFF, 0xAB, 0x01]);

        assert_eq!(assemble("move -2").unwrap(), vec![0x22, 0xFE, 0xFF]);
        assert_eq!(assemble("data_store 8 3").unwrap(), vec![0x35, 0x08, 0x03]);
    }

    #[test]
    fn rejects_malformed_text() {
        assert_eq!(
            assemble("jump 4"),
            Err(AssemblyError::UnknownMnemonic("jump".to_string()))
        );
        assert_eq!(
            assemble("push_byte"),
            Err(AssemblyError::MissingArgument("push_byte".to_string()))
        );
        assert!(matches!(
            assemble("push_byte 256"),
            Err(AssemblyError::InvalidArgument { .. })
        ));
        assert!(matches!(assemble("exit <--data--> XZ"), Err(AssemblyError::InvalidHex(_))));
    }

    #[test]
    fn disassembly_separates_data() {
        let script = [0x33, 0x06, 0x00, 0xE4, 0x41, 0xFF, 0x50, 0x51];
        let text = disassemble(&script).unwrap();
        assert_eq!(
            text,
            "data_move 6\npush_rest\nadd_sibling\nexit\n<--data-->\n50 51\n"
        );
        assert_eq!(assemble(&text).unwrap(), script.to_vec());

        assert_eq!(disassemble(&[0x50]), Err(AssemblyError::UnknownOpcode(0x50)));
    }
}
