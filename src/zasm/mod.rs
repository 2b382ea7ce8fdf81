pub mod assemble;
pub mod data;
pub mod dis;

pub use assemble::{AssembleError, Assembler};
pub use data::{ConstHandle, DataTables, NameHandle, NameKind, StrHandle};

// ── Instruction encoding (32-bit packed instructions) ────────────────
//
// [OP:8 | payload:24]
//
// The opcode byte is the high byte. Payload layouts by op:
//   u24 handle/immediate — low 24 bits
//   u16 handle           — bytes 1..2, low byte first
//   HAS_QTY              — [handle lo, handle hi, qty]
//   CHK_SETTING2         — two 12-bit handles, block high, name low
//
// Opcode space partitions by leading nibble: 0x2_ loads, 0x3_
// comparisons, 0x4_ boolean/reductions, 0x5_ generic calls, 0x6_ fast
// calls.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    LoadConst = 0x21,
    LoadStr = 0x22,
    LoadName = 0x23,
    LoadTrue = 0x24,
    LoadFalse = 0x25,
    LoadImm8 = 0x26,
    LoadImm16 = 0x27,

    CmpEq = 0x31,
    CmpNq = 0x32,
    CmpLt = 0x33,

    BoolAnd = 0x41,
    BoolOr = 0x42,
    BoolNeg = 0x43,
    ReduceAll = 0x44,
    ReduceAny = 0x45,

    Call0 = 0x51,
    Call1 = 0x52,
    Call2 = 0x53,

    HasQty = 0x61,
    HasAll = 0x62,
    HasAny = 0x63,
    IsChild = 0x64,
    IsAdult = 0x65,
    HasBottle = 0x66,
    ChkTod = 0x67,
    ChkSetting = 0x68,
    ChkSetting2 = 0x69,
    ChkTrick = 0x6A,
}

impl Op {
    /// Every opcode the assembler can emit, in listing order.
    pub const ALL: [Op; 28] = [
        Op::LoadConst,
        Op::LoadStr,
        Op::LoadName,
        Op::LoadTrue,
        Op::LoadFalse,
        Op::LoadImm8,
        Op::LoadImm16,
        Op::CmpEq,
        Op::CmpNq,
        Op::CmpLt,
        Op::BoolAnd,
        Op::BoolOr,
        Op::BoolNeg,
        Op::ReduceAll,
        Op::ReduceAny,
        Op::Call0,
        Op::Call1,
        Op::Call2,
        Op::HasQty,
        Op::HasAll,
        Op::HasAny,
        Op::IsChild,
        Op::IsAdult,
        Op::HasBottle,
        Op::ChkTod,
        Op::ChkSetting,
        Op::ChkSetting2,
        Op::ChkTrick,
    ];

    pub fn from_byte(byte: u8) -> Option<Op> {
        Op::ALL.into_iter().find(|op| *op as u8 == byte)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::LoadConst => "ldc",
            Op::LoadStr => "lds",
            Op::LoadName => "ldn",
            Op::LoadTrue => "ldt",
            Op::LoadFalse => "ldf",
            Op::LoadImm8 => "im8",
            Op::LoadImm16 => "im16",
            Op::CmpEq => "ceq",
            Op::CmpNq => "cnq",
            Op::CmpLt => "clt",
            Op::BoolAnd => "and",
            Op::BoolOr => "orr",
            Op::BoolNeg => "neg",
            Op::ReduceAll => "rda",
            Op::ReduceAny => "rdo",
            Op::Call0 => "cl0",
            Op::Call1 => "cl1",
            Op::Call2 => "cl2",
            Op::HasQty => "has",
            Op::HasAll => "hall",
            Op::HasAny => "hany",
            Op::IsChild => "chld",
            Op::IsAdult => "adlt",
            Op::HasBottle => "botl",
            Op::ChkTod => "tod",
            Op::ChkSetting => "cset",
            Op::ChkSetting2 => "cst2",
            Op::ChkTrick => "ctrk",
        }
    }
}

/// Time-of-day mask bits carried by `ChkTod`.
pub const TOD_DAY: u8 = 0x01;
pub const TOD_NIGHT: u8 = 0x02;
pub const TOD_DAMPE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn op_only(op: Op) -> Instruction {
        Instruction((op as u32) << 24)
    }

    pub fn with_u24(op: Op, value: u32) -> Instruction {
        debug_assert!(value <= 0x00FF_FFFF, "u24 overflow: {value}");
        Instruction((op as u32) << 24 | (value & 0x00FF_FFFF))
    }

    /// u16 operands sit in payload bytes 1..2, low byte first.
    pub fn with_u16(op: Op, value: u16) -> Instruction {
        let lo = (value & 0x00FF) as u32;
        let hi = (value >> 8) as u32;
        Instruction((op as u32) << 24 | lo << 16 | hi << 8)
    }

    pub fn with_imm8(op: Op, value: u8) -> Instruction {
        Instruction((op as u32) << 24 | (value as u32) << 16)
    }

    /// `HasQty` packs a 16-bit token handle (low byte first) and an
    /// 8-bit quantity into one quad.
    pub fn has_qty(handle: u16, qty: u8) -> Instruction {
        let lo = (handle & 0x00FF) as u32;
        let hi = (handle >> 8) as u32;
        Instruction((Op::HasQty as u32) << 24 | lo << 16 | hi << 8 | qty as u32)
    }

    /// `ChkSetting2` packs two 12-bit name handles: block high, name low.
    pub fn setting2(block: u16, name: u16) -> Instruction {
        debug_assert!(block <= 0x0FFF && name <= 0x0FFF);
        Instruction::with_u24(Op::ChkSetting2, (block as u32) << 12 | name as u32)
    }

    pub fn op_byte(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn op(self) -> Option<Op> {
        Op::from_byte(self.op_byte())
    }

    pub fn payload(self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }

    pub fn u24(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub fn u16operand(self) -> u16 {
        let p = self.payload();
        (p[1] as u16) << 8 | p[0] as u16
    }

    pub fn imm8(self) -> u8 {
        self.payload()[0]
    }

    pub fn setting2_operands(self) -> (u16, u16) {
        let u = self.u24();
        ((u >> 12) as u16, (u & 0x0FFF) as u16)
    }
}

/// One compiled rule: a named, ordered instruction sequence.
#[derive(Debug, Clone)]
pub struct Unit {
    pub name: String,
    pub id: u16,
    pub code: Vec<Instruction>,
}

/// The full compiled output for a session: every unit plus the shared
/// interned data tables.
#[derive(Debug, Default)]
pub struct Assembly {
    units: Vec<Unit>,
    pub data: DataTables,
}

impl Assembly {
    pub fn include(&mut self, unit: Unit) {
        self.units.push(unit);
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
