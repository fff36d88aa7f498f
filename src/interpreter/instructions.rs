/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The opcode table and the implementation of every instruction.
//!
//! Values on the stack are untyped byte strings. Integer instructions read them as little-endian
//! `i64` and float instructions as `f64`, zero-padding short values, and push 8-byte results.
//! Booleans are pushed as a single byte and any nonzero value is true.

use super::{Interpreter, Trap};
use crate::encoding::{decode_f64, decode_i64, decode_u16, decode_u64};
use crate::state::{Sibling, UpdateSectorArgs};
use crate::types::crypto_primitives::verify_signature;
use crate::types::{Balance, SignatureBytes, WalletID};
use borsh::BorshDeserialize;

pub type Execute = fn(&mut Interpreter<'_>, &[u8]) -> Result<(), Trap>;

#[derive(Clone, Copy)]
pub struct Instruction {
    pub name: &'static str,
    pub arg_bytes: usize,
    pub cost: i64,
    /// The two argument bytes form one little-endian 16-bit number in assembly.
    pub short_arg: bool,
    pub execute: Execute,
}

const fn op(name: &'static str, arg_bytes: usize, cost: i64, execute: Execute) -> Option<Instruction> {
    Some(Instruction {
        name,
        arg_bytes,
        cost,
        short_arg: false,
        execute,
    })
}

const fn short_op(name: &'static str, cost: i64, execute: Execute) -> Option<Instruction> {
    Some(Instruction {
        name,
        arg_bytes: 2,
        cost,
        short_arg: true,
        execute,
    })
}

pub static INSTRUCTIONS: [Option<Instruction>; 256] = table();

const fn table() -> [Option<Instruction>; 256] {
    let mut t: [Option<Instruction>; 256] = [None; 256];

    t[0x00] = op("no_op", 0, 1, no_op);
    t[0x01] = op("push_byte", 1, 2, push_byte);
    t[0x02] = short_op("push_short", 2, push_short);
    t[0x03] = op("pop", 0, 1, pop);
    t[0x04] = op("dup", 0, 2, dup);
    t[0x05] = op("swap", 0, 2, swap);
    t[0x06] = op("add_int", 0, 2, add_int);
    t[0x07] = op("add_float", 0, 3, add_float);
    t[0x08] = op("sub_int", 0, 2, sub_int);
    t[0x09] = op("sub_float", 0, 3, sub_float);
    t[0x0A] = op("mul_int", 0, 2, mul_int);
    t[0x0B] = op("mul_float", 0, 3, mul_float);
    t[0x0C] = op("div_int", 0, 2, div_int);
    t[0x0D] = op("div_float", 0, 3, div_float);
    t[0x0E] = op("mod_int", 0, 3, mod_int);
    t[0x0F] = op("neg_int", 0, 2, neg_int);
    t[0x10] = op("neg_float", 0, 3, neg_float);
    t[0x11] = op("binary_or", 0, 2, binary_or);
    t[0x12] = op("binary_and", 0, 2, binary_and);
    t[0x13] = op("binary_xor", 0, 2, binary_xor);
    t[0x14] = op("shift_left", 1, 2, shift_left);
    t[0x15] = op("shift_right", 1, 2, shift_right);
    t[0x16] = op("equal", 0, 2, equal);
    t[0x17] = op("not_equal", 0, 2, not_equal);
    t[0x18] = op("less_int", 0, 2, less_int);
    t[0x19] = op("less_float", 0, 2, less_float);
    t[0x1A] = op("greater_int", 0, 2, greater_int);
    t[0x1B] = op("greater_float", 0, 2, greater_float);
    t[0x1C] = op("logical_not", 0, 2, logical_not);
    t[0x1D] = op("logical_or", 0, 2, logical_or);
    t[0x1E] = op("logical_and", 0, 2, logical_and);
    t[0x1F] = short_op("if_goto", 2, if_goto);
    t[0x20] = short_op("if_move", 2, if_move);
    t[0x21] = short_op("goto", 1, goto);
    t[0x22] = short_op("move", 1, jump_relative);

    t[0x30] = op("store", 1, 2, store);
    t[0x31] = op("load", 1, 2, load);
    t[0x32] = short_op("data_goto", 1, data_goto);
    t[0x33] = short_op("data_move", 1, data_move);
    t[0x34] = op("data_push", 1, 2, data_push);
    t[0x35] = op("data_store", 2, 2, data_store);
    t[0x36] = op("data_copy", 1, 2, data_copy);
    t[0x37] = op("data_paste", 1, 2, data_paste);
    t[0x38] = op("transfer", 0, 1, transfer);

    t[0x40] = op("verify", 0, 9, verify);
    t[0x41] = op("add_sibling", 0, 5, add_sibling);
    t[0x42] = op("add_wallet", 0, 5, add_wallet);
    t[0x43] = op("send", 0, 5, send);
    t[0x44] = op("resize_sec", 1, 9, resize_sec);
    t[0x45] = op("prop_upload", 0, 9, prop_upload);

    t[0xE0] = op("switch", 2, 3, switch);
    t[0xE1] = op("store_prefix", 1, 2, store_prefix);
    t[0xE2] = op("store_rest", 1, 2, store_rest);
    t[0xE3] = op("push_prefix", 0, 2, push_prefix);
    t[0xE4] = op("push_rest", 0, 2, push_rest);
    t[0xE5] = op("cond_reject", 0, 1, cond_reject);
    t[0xE6] = op("data_seek", 1, 3, data_seek);

    t[0xFE] = op("reject", 0, 0, reject);
    t[0xFF] = op("exit", 0, 0, exit);
    t
}

/// Look an instruction up by mnemonic.
pub fn by_name(name: &str) -> Option<(u8, Instruction)> {
    INSTRUCTIONS
        .iter()
        .enumerate()
        .find_map(|(opcode, entry)| match entry {
            Some(instruction) if instruction.name == name => Some((opcode as u8, *instruction)),
            _ => None,
        })
}

/* ↓↓↓ Value conventions ↓↓↓ */

fn v2i(value: &[u8]) -> i64 {
    decode_i64(value)
}

fn i2v(int: i64) -> Vec<u8> {
    int.to_le_bytes().to_vec()
}

fn v2f(value: &[u8]) -> f64 {
    decode_f64(value)
}

fn f2v(float: f64) -> Vec<u8> {
    float.to_le_bytes().to_vec()
}

fn s2i(low: u8, high: u8) -> i64 {
    i16::from_le_bytes([low, high]) as i64
}

fn b2v(b: bool) -> Vec<u8> {
    vec![b as u8]
}

fn v2b(value: &[u8]) -> bool {
    v2i(value) != 0
}

/// Pop `a` (the top), then `b`.
fn pop_pair(vm: &mut Interpreter) -> Result<(Vec<u8>, Vec<u8>), Trap> {
    let a = vm.pop()?;
    let b = vm.pop()?;
    Ok((a, b))
}

fn int_op(vm: &mut Interpreter, f: fn(i64, i64) -> i64) -> Result<(), Trap> {
    let (a, b) = pop_pair(vm)?;
    vm.push(i2v(f(v2i(&a), v2i(&b))))
}

fn float_op(vm: &mut Interpreter, f: fn(f64, f64) -> f64) -> Result<(), Trap> {
    let (a, b) = pop_pair(vm)?;
    vm.push(f2v(f(v2f(&a), v2f(&b))))
}

fn compare(vm: &mut Interpreter, f: fn(&[u8], &[u8]) -> bool) -> Result<(), Trap> {
    let (a, b) = pop_pair(vm)?;
    vm.push(b2v(f(&a, &b)))
}

/* ↓↓↓ General ↓↓↓ */

fn no_op(_: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    Ok(())
}

fn push_byte(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    vm.push(args[..1].to_vec())
}

fn push_short(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    vm.push(args[..2].to_vec())
}

fn pop(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    vm.pop().map(|_| ())
}

fn dup(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    vm.push(a.clone())?;
    vm.push(a)
}

fn swap(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let (a, b) = pop_pair(vm)?;
    vm.push(a)?;
    vm.push(b)
}

fn add_int(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    int_op(vm, i64::wrapping_add)
}

fn add_float(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    float_op(vm, |a, b| a + b)
}

fn sub_int(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    int_op(vm, i64::wrapping_sub)
}

fn sub_float(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    float_op(vm, |a, b| a - b)
}

fn mul_int(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    int_op(vm, i64::wrapping_mul)
}

fn mul_float(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    float_op(vm, |a, b| a * b)
}

fn div_int(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let (a, b) = pop_pair(vm)?;
    let divisor = v2i(&b);
    if divisor == 0 {
        return Err(Trap::DivideByZero);
    }
    vm.push(i2v(v2i(&a).wrapping_div(divisor)))
}

fn div_float(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let (a, b) = pop_pair(vm)?;
    let divisor = v2f(&b);
    if divisor == 0.0 {
        return Err(Trap::DivideByZero);
    }
    vm.push(f2v(v2f(&a) / divisor))
}

fn mod_int(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let (a, b) = pop_pair(vm)?;
    let divisor = v2i(&b);
    if divisor == 0 {
        return Err(Trap::DivideByZero);
    }
    vm.push(i2v(v2i(&a).wrapping_rem(divisor)))
}

fn neg_int(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    vm.push(i2v(v2i(&a).wrapping_neg()))
}

fn neg_float(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    vm.push(f2v(-v2f(&a)))
}

fn binary_or(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    int_op(vm, |a, b| a | b)
}

fn binary_and(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    int_op(vm, |a, b| a & b)
}

fn binary_xor(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    int_op(vm, |a, b| a ^ b)
}

fn shift_left(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let a = v2i(&vm.pop()?);
    let shifted = if args[0] >= 64 { 0 } else { a << args[0] };
    vm.push(i2v(shifted))
}

fn shift_right(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let a = v2i(&vm.pop()?);
    vm.push(i2v(a >> args[0].min(63)))
}

fn equal(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    compare(vm, |a, b| a == b)
}

fn not_equal(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    compare(vm, |a, b| a != b)
}

fn less_int(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    compare(vm, |a, b| v2i(a) < v2i(b))
}

fn less_float(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    compare(vm, |a, b| v2f(a) < v2f(b))
}

fn greater_int(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    compare(vm, |a, b| v2i(a) > v2i(b))
}

fn greater_float(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    compare(vm, |a, b| v2f(a) > v2f(b))
}

fn logical_not(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    vm.push(b2v(!v2b(&a)))
}

fn logical_or(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    compare(vm, |a, b| v2b(a) || v2b(b))
}

fn logical_and(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    compare(vm, |a, b| v2b(a) && v2b(b))
}

/* ↓↓↓ Control flow ↓↓↓ */

fn jump_to(vm: &mut Interpreter, target: i64) -> Result<(), Trap> {
    if target < 0 || target > vm.script.len() as i64 {
        return Err(Trap::OutOfBounds);
    }
    vm.iptr = target as usize;
    Ok(())
}

fn goto(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    jump_to(vm, s2i(args[0], args[1]) - 1)
}

fn jump_relative(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let target = vm.iptr as i64 + s2i(args[0], args[1]) - 1;
    jump_to(vm, target)
}

fn if_goto(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    if v2b(&a) {
        goto(vm, args)
    } else {
        Ok(())
    }
}

fn if_move(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    if v2b(&a) {
        jump_relative(vm, args)
    } else {
        Ok(())
    }
}

fn transfer(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    vm.iptr = vm.dptr;
    Ok(())
}

fn switch(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    if a.first() == Some(&args[0]) {
        jump_to(vm, s2i(args[1], 0) - 1)
    } else {
        vm.push(a)
    }
}

/* ↓↓↓ Registers and the data pointer ↓↓↓ */

fn store(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    vm.set_register(args[0], a);
    Ok(())
}

fn load(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let value = vm.registers[args[0] as usize].clone();
    vm.push(value)
}

fn set_dptr(vm: &mut Interpreter, target: i64) -> Result<(), Trap> {
    if target < 0 || target > vm.script.len() as i64 {
        return Err(Trap::OutOfBounds);
    }
    vm.dptr = target as usize;
    Ok(())
}

fn data_goto(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    set_dptr(vm, s2i(args[0], args[1]))
}

fn data_move(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let target = vm.dptr as i64 + s2i(args[0], args[1]);
    set_dptr(vm, target)
}

/// Take `n` bytes at the data pointer, zero-padded, and advance past the bytes actually read.
fn take_data(vm: &mut Interpreter, n: usize) -> Vec<u8> {
    let (bytes, copied) = vm.read_data(n);
    vm.dptr += copied;
    bytes
}

fn data_push(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let bytes = take_data(vm, args[0] as usize);
    vm.push(bytes)
}

fn data_store(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let bytes = take_data(vm, args[0] as usize);
    vm.set_register(args[1], bytes);
    Ok(())
}

fn data_copy(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let length = decode_u16(&vm.pop()?);
    let bytes = take_data(vm, length as usize);
    vm.set_register(args[0], bytes);
    Ok(())
}

fn data_paste(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let length = v2i(&vm.pop()?) as i16;
    if length < 0 {
        return Err(Trap::NegativeLength);
    }
    let length = length as usize;
    let end = vm.dptr + length;
    if end > vm.script.len() {
        vm.script.resize(end, 0);
    }
    let register = &vm.registers[args[0] as usize];
    let copied = register.len().min(length);
    let dptr = vm.dptr;
    vm.script[dptr..dptr + copied].copy_from_slice(&register[..copied]);
    vm.script[dptr + copied..end].fill(0);
    Ok(())
}

fn store_prefix(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    data_push(vm, &[2])?;
    data_copy(vm, args)
}

fn store_rest(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let rest = vm.script[vm.dptr..].to_vec();
    vm.set_register(args[0], rest);
    Ok(())
}

fn push_prefix(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    if vm.dptr + 2 > vm.script.len() {
        return Err(Trap::OutOfBounds);
    }
    let length = s2i(vm.script[vm.dptr], vm.script[vm.dptr + 1]);
    if length < 0 {
        return Err(Trap::NegativeLength);
    }
    vm.dptr += 2;
    let bytes = take_data(vm, length as usize);
    vm.push(bytes)
}

fn push_rest(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let rest = vm.script[vm.dptr..].to_vec();
    vm.push(rest)
}

fn data_seek(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    loop {
        let offset = vm.script[vm.dptr..]
            .iter()
            .position(|b| *b == args[0])
            .ok_or(Trap::OutOfBounds)?;
        vm.dptr += offset + 1;
        // A marker directly following a data_seek opcode is that instruction's argument.
        if vm.dptr < 2 || vm.script[vm.dptr - 2] != 0xE6 {
            return Ok(());
        }
    }
}

/* ↓↓↓ Transactional ↓↓↓ */

fn verify(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let signed_message = vm.pop()?;
    let public_key = vm.pop()?;
    if signed_message.len() < 64 {
        return vm.push(b2v(false));
    }
    let mut key = [0u8; 32];
    let copied = public_key.len().min(32);
    key[..copied].copy_from_slice(&public_key[..copied]);
    let mut signature = [0u8; 64];
    signature.copy_from_slice(&signed_message[..64]);
    let valid = verify_signature(&key, &signed_message[64..], &SignatureBytes::new(signature));
    vm.push(b2v(valid))
}

fn add_sibling(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let encoded = vm.pop()?;
    let sibling = Sibling::try_from_slice(&encoded)
        .map_err(|err| Trap::BadArgument(format!("sibling: {}", err)))?;
    let index = vm.state.add_sibling(vm.wallet.id, sibling)?;
    log::debug!("wallet {} added a sibling at index {}", vm.wallet.id, index);
    Ok(())
}

fn add_wallet(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let script = vm.pop()?;
    let balance = Balance::from_le_slice(&vm.pop()?);
    let id = WalletID::new(decode_u64(&vm.pop()?));
    vm.state.create_wallet(&mut vm.wallet, id, balance, script)?;
    Ok(())
}

fn send(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let balance = Balance::from_le_slice(&vm.pop()?);
    let destination = WalletID::new(decode_u64(&vm.pop()?));
    vm.state.send_coin(&mut vm.wallet, balance, destination)?;
    Ok(())
}

fn resize_sec(vm: &mut Interpreter, args: &[u8]) -> Result<(), Trap> {
    let atoms = decode_u16(&vm.pop()?);
    vm.state.resize_sector_erase(&mut vm.wallet, atoms, args[0])?;
    Ok(())
}

fn prop_upload(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let encoded = vm.pop()?;
    let update = UpdateSectorArgs::try_from_slice(&encoded)
        .map_err(|err| Trap::BadArgument(format!("sector update: {}", err)))?;
    let counter = vm.state.update_sector(&mut vm.wallet, update)?;
    log::debug!("wallet {} proposed sector update {}", vm.wallet.id, counter);
    Ok(())
}

/* ↓↓↓ Termination ↓↓↓ */

fn cond_reject(vm: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    let a = vm.pop()?;
    if v2b(&a) {
        Ok(())
    } else {
        Err(Trap::Rejected)
    }
}

fn reject(_: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    Err(Trap::Rejected)
}

fn exit(_: &mut Interpreter, _: &[u8]) -> Result<(), Trap> {
    Err(Trap::Exit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_mnemonics() {
        assert_eq!(by_name("transfer").map(|(op, _)| op), Some(0x38));
        assert_eq!(by_name("data_seek").map(|(op, i)| (op, i.cost)), Some((0xE6, 3)));
        assert!(by_name("goto").unwrap().1.short_arg);
        assert!(!by_name("data_store").unwrap().1.short_arg);
        assert!(by_name("jump").is_none());
        assert_eq!(INSTRUCTIONS.iter().filter(|i| i.is_some()).count(), 59);
    }

    #[test]
    fn values_decode_with_padding() {
        assert_eq!(v2i(&[0x02]), 2);
        assert_eq!(v2i(&[]), 0);
        assert_eq!(s2i(0xFF, 0xFF), -1);
        assert_eq!(s2i(0x0A, 0x00), 10);
        assert!(v2b(&[0, 1]));
        assert!(!v2b(&[0, 0, 0]));
        assert_eq!(v2f(&f2v(1.5)), 1.5);
    }
}
