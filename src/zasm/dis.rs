use std::fmt::Write;

use super::data::DataTables;
use super::{Assembly, Instruction, Op, TOD_DAMPE, TOD_DAY, TOD_NIGHT, Unit};

// ── Disassembler ─────────────────────────────────────────────────────
//
// One line per instruction: hex opcode, the three inline operand bytes,
// mnemonic, and a resolved operand where a data table is referenced.
// Every opcode the assembler can emit round-trips here.

pub fn disassemble(assembly: &Assembly) -> String {
    let mut out = String::new();
    for unit in assembly.units() {
        let _ = writeln!(out, "; unit {:04} {}", unit.id, unit.name);
        out.push_str(&disassemble_unit(unit, &assembly.data));
    }
    out
}

pub fn disassemble_unit(unit: &Unit, data: &DataTables) -> String {
    let mut out = String::new();
    for instruction in &unit.code {
        out.push_str(&disassemble_instruction(*instruction, data));
        out.push('\n');
    }
    out
}

pub fn disassemble_instruction(instruction: Instruction, data: &DataTables) -> String {
    let p = instruction.payload();
    let mut line = format!(
        "  0x{:02X} 0x{:02X} 0x{:02X} 0x{:02X} | ",
        instruction.op_byte(),
        p[0],
        p[1],
        p[2]
    );
    match instruction.op() {
        Some(op) => {
            let _ = write!(line, "{:<5}", op.mnemonic());
            let operand = resolve_operand(op, instruction, data);
            if !operand.is_empty() {
                let _ = write!(line, "| {operand}");
            }
        }
        None => {
            let _ = write!(line, "??? (0x{:02X})", instruction.op_byte());
        }
    }
    line
}

fn resolve_operand(op: Op, instruction: Instruction, data: &DataTables) -> String {
    match op {
        Op::LoadConst => {
            let h = instruction.u24();
            match data.consts.get(super::ConstHandle(h)) {
                Some(v) => format!("#consts[{h}] = {v}"),
                None => format!("#consts[{h}] = <missing>"),
            }
        }
        Op::LoadStr => {
            let h = instruction.u24();
            match data.strings.get(super::StrHandle(h)) {
                Some(s) => format!("#strs[{h}] = {s:?}"),
                None => format!("#strs[{h}] = <missing>"),
            }
        }
        Op::LoadName | Op::Call0 | Op::Call1 | Op::Call2 => {
            let h = instruction.u24();
            format!("#names[{h}] = {}", name_text(data, h))
        }
        Op::LoadImm8 => format!("{}", instruction.imm8()),
        Op::LoadImm16 => format!("{}", instruction.u16operand()),
        Op::HasQty => {
            let h = instruction.u16operand() as u32;
            format!("{} x{}", name_text(data, h), instruction.payload()[2])
        }
        Op::ChkSetting | Op::ChkTrick => {
            let h = instruction.u16operand() as u32;
            format!("#names[{h}] = {}", name_text(data, h))
        }
        Op::ChkSetting2 => {
            let (block, name) = instruction.setting2_operands();
            format!("{}[{}]", name_text(data, block as u32), name_text(data, name as u32))
        }
        Op::ChkTod => {
            let mask = instruction.imm8();
            let mut parts = Vec::new();
            if mask & TOD_DAY != 0 {
                parts.push("day");
            }
            if mask & TOD_NIGHT != 0 {
                parts.push("night");
            }
            if mask & TOD_DAMPE != 0 {
                parts.push("dampe");
            }
            parts.join("|")
        }
        Op::LoadTrue
        | Op::LoadFalse
        | Op::CmpEq
        | Op::CmpNq
        | Op::CmpLt
        | Op::BoolAnd
        | Op::BoolOr
        | Op::BoolNeg
        | Op::ReduceAll
        | Op::ReduceAny
        | Op::HasAll
        | Op::HasAny
        | Op::IsChild
        | Op::IsAdult
        | Op::HasBottle => String::new(),
    }
}

fn name_text(data: &DataTables, handle: u32) -> String {
    match data.names.text(super::NameHandle(handle)) {
        Some(text) => format!("{text:?}"),
        None => "<missing>".to_owned(),
    }
}
