//! Bytecode disassembler, for `CALX_DEBUG` dumps and the
//! `Dasm` builtin.

use std::io::{self, Write};

use crate::vm::chunk::{Instr, Op};

fn name(op: Op) -> &'static str {
    match op {
        Op::LoadConst => "LOAD_CONST",
        Op::LoadLocal => "LOAD_LOCAL",
        Op::LoadAt => "LOAD_AT",
        Op::LoadGlobal => "LOAD_GLOBAL",
        Op::StoreLocal => "STORE_LOCAL",
        Op::StoreAt => "STORE_AT",
        Op::StoreGlobal => "STORE_GLOBAL",
        Op::ModifyLocal => "MODIFY_LOCAL",
        Op::ModifyAt => "MODIFY_AT",
        Op::ModifyGlobal => "MODIFY_GLOBAL",
        Op::Print => "PRINT",
        Op::Return => "RETURN",
        Op::Jump => "JUMP",
        Op::JumpUnless => "JUMP_UNLESS",
        Op::Call => "CALL",
        Op::Function => "FUNCTION",
        Op::Neg => "NEG",
        Op::Not => "NOT",
        Op::Aop => "AOP",
        Op::Cmp2Way => "CMP_2WAY",
        Op::Cmp3Way => "CMP_3WAY",
        Op::List => "LIST",
        Op::Dict => "DICT",
        Op::Len => "LEN",
        Op::LoadSymbolic => "LOAD_SYMBOLIC",
        Op::ModifySymbolic => "MODIFY_SYMBOLIC",
        Op::StoreSymbolic => "STORE_SYMBOLIC",
    }
}

/// Dumps a span of instructions, one per line.
pub fn dump<W: Write>(out: &mut W, code: &[Instr], start: usize, len: usize) -> io::Result<()> {
    for (i, instr) in code.iter().enumerate().skip(start).take(len) {
        writeln!(
            out,
            "{:8} | {:>16}  {}, {}",
            i,
            name(instr.op),
            instr.a,
            instr.c as i32
        )?;
    }
    Ok(())
}
