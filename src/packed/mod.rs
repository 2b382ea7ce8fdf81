// ── Packed rule values ───────────────────────────────────────────────
//
// Everything a rule can produce or compare fits in 64 bits: either an
// ordinary IEEE double, or a tagged payload hidden in a quiet NaN. The
// enum is the working representation; `bits`/`from_bits` is the storage
// codec used by the constant table and anything that wants the raw
// pattern. An ordinary float can never alias a tag: every tagged
// pattern carries the quiet-NaN prefix plus a nonzero tag byte, and
// packing an actual NaN canonicalizes it to the untagged quiet NaN.

const QNAN: u64 = 0x7FF8_0000_0000_0000;
const TAG_MASK: u64 = 0x0000_FF00_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_0000_FFFF_FFFF;
const TAG_SHIFT: u64 = 40;

const TAG_BOOL: u8 = 0x01;
const TAG_UINT: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_STR: u8 = 0x04;
const TAG_FUNC: u8 = 0x05;
const TAG_TOKEN: u8 = 0x06;
const TAG_TRICK: u8 = 0x07;
const TAG_SETTING: u8 = 0x08;
const TAG_VAR: u8 = 0x09;

/// One rule value. Handle-bearing variants (`Str` through `Var`) carry an
/// index into the matching interned data table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packed {
    Number(f64),
    Bool(bool),
    Uint(u32),
    Int(i32),
    Str(u32),
    Func(u32),
    Token(u32),
    Trick(u32),
    Setting(u32),
    Var(u32),
}

impl Packed {
    /// The NaN-boxed bit pattern. Stable across sessions for the same value.
    pub fn bits(self) -> u64 {
        match self {
            Packed::Number(n) if n.is_nan() => QNAN,
            Packed::Number(n) => n.to_bits(),
            Packed::Bool(b) => tagged(TAG_BOOL, b as u32),
            Packed::Uint(u) => tagged(TAG_UINT, u),
            Packed::Int(i) => tagged(TAG_INT, i as u32),
            Packed::Str(h) => tagged(TAG_STR, h),
            Packed::Func(h) => tagged(TAG_FUNC, h),
            Packed::Token(h) => tagged(TAG_TOKEN, h),
            Packed::Trick(h) => tagged(TAG_TRICK, h),
            Packed::Setting(h) => tagged(TAG_SETTING, h),
            Packed::Var(h) => tagged(TAG_VAR, h),
        }
    }

    pub fn from_bits(bits: u64) -> Packed {
        if bits & QNAN != QNAN {
            return Packed::Number(f64::from_bits(bits));
        }
        let payload = (bits & PAYLOAD_MASK) as u32;
        match ((bits & TAG_MASK) >> TAG_SHIFT) as u8 {
            0x00 => Packed::Number(f64::NAN),
            TAG_BOOL => Packed::Bool(payload != 0),
            TAG_UINT => Packed::Uint(payload),
            TAG_INT => Packed::Int(payload as i32),
            TAG_STR => Packed::Str(payload),
            TAG_FUNC => Packed::Func(payload),
            TAG_TOKEN => Packed::Token(payload),
            TAG_TRICK => Packed::Trick(payload),
            TAG_SETTING => Packed::Setting(payload),
            TAG_VAR => Packed::Var(payload),
            tag => unreachable!("unassigned packed tag 0x{tag:02X}"),
        }
    }

    /// Bit-level equality; `Number(NaN)` equals itself here, unlike IEEE.
    pub fn same_bits(self, other: Packed) -> bool {
        self.bits() == other.bits()
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Packed::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_uint(self) -> Option<u32> {
        match self {
            Packed::Uint(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_token(self) -> Option<u32> {
        match self {
            Packed::Token(h) => Some(h),
            _ => None,
        }
    }

    /// Numeric view used by ordering comparisons: plain numbers and the
    /// small-integer variants order together, everything else does not.
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Packed::Number(n) => Some(n),
            Packed::Uint(u) => Some(u as f64),
            Packed::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Packed::Number(_) => "number",
            Packed::Bool(_) => "bool",
            Packed::Uint(_) => "uint",
            Packed::Int(_) => "int",
            Packed::Str(_) => "string",
            Packed::Func(_) => "function",
            Packed::Token(_) => "token",
            Packed::Trick(_) => "trick",
            Packed::Setting(_) => "setting",
            Packed::Var(_) => "variable",
        }
    }
}

#[inline]
fn tagged(tag: u8, payload: u32) -> u64 {
    QNAN | ((tag as u64) << TAG_SHIFT) | payload as u64
}

impl std::fmt::Display for Packed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Packed::Number(n) => write!(f, "{}", n),
            Packed::Bool(b) => write!(f, "{}", b),
            Packed::Uint(u) => write!(f, "{}", u),
            Packed::Int(i) => write!(f, "{}", i),
            Packed::Str(h) => write!(f, "str#{}", h),
            Packed::Func(h) => write!(f, "fn#{}", h),
            Packed::Token(h) => write!(f, "tok#{}", h),
            Packed::Trick(h) => write!(f, "trk#{}", h),
            Packed::Setting(h) => write!(f, "set#{}", h),
            Packed::Var(h) => write!(f, "var#{}", h),
        }
    }
}
