//! Register-machine bytecode.
//!
//! Instructions are 32 bits wide:
//!
//! ```text,ignore
//!          31       24 23      16 15 14       7 6       0
//! iABC   |    C(8)    |   B(8)   |k|   A(8)    | op(7) |
//! iABx   |          Bx(17)         |   A(8)    | op(7) |
//! iAsBx  |         sBx(17)         |   A(8)    | op(7) |
//! iAx    |                Ax(25)               | op(7) |
//! isJ    |                sJ(25)               | op(7) |
//! ```
//!
//! Signed operands are stored in excess-K notation: `sBx = Bx - 65535`,
//! `sJ = raw - 16777215`, and the 8-bit `sB`/`sC` immediates are
//! `raw - 127`.

pub mod chunk;
pub mod disasm;
pub mod proto;


pub use chunk::Chunk;
pub use proto::{Constant, Prototype, UpvalueDesc};

use serde::{Deserialize, Serialize};

pub const SIZE_OP: u32 = 7;
pub const SIZE_A: u32 = 8;
pub const SIZE_B: u32 = 8;
pub const SIZE_C: u32 = 8;
pub const SIZE_BX: u32 = SIZE_C + SIZE_B + 1;
pub const SIZE_AX: u32 = SIZE_BX + SIZE_A;
pub const SIZE_SJ: u32 = SIZE_BX + SIZE_A;

pub const POS_OP: u32 = 0;
pub const POS_A: u32 = POS_OP + SIZE_OP;
pub const POS_K: u32 = POS_A + SIZE_A;
pub const POS_B: u32 = POS_K + 1;
pub const POS_C: u32 = POS_B + SIZE_B;
pub const POS_BX: u32 = POS_K;
pub const POS_AX: u32 = POS_A;
pub const POS_SJ: u32 = POS_A;

pub const MAXARG_A: u32 = (1 << SIZE_A) - 1;
pub const MAXARG_B: u32 = (1 << SIZE_B) - 1;
pub const MAXARG_C: u32 = (1 << SIZE_C) - 1;
pub const MAXARG_BX: u32 = (1 << SIZE_BX) - 1;
pub const MAXARG_AX: u32 = (1 << SIZE_AX) - 1;
pub const MAXARG_SJ: u32 = (1 << SIZE_SJ) - 1;

pub const OFFSET_SBX: i32 = (MAXARG_BX >> 1) as i32;
pub const OFFSET_SJ: i32 = (MAXARG_SJ >> 1) as i32;
pub const OFFSET_SC: i32 = (MAXARG_C >> 1) as i32;

/// Smallest and largest displacement an `isJ` jump can encode.
pub const MIN_SJ: i32 = -OFFSET_SJ;
pub const MAX_SJ: i32 = MAXARG_SJ as i32 - OFFSET_SJ;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpMode {
    ABC,
    ABx,
    AsBx,
    Ax,
    SJ,
}

macro_rules! opcodes {
    ($($name:ident = $text:literal $mode:ident $($it:ident)?),* $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum OpCode {
            $($name),*
        }

        impl OpCode {
            pub const ALL: &'static [OpCode] = &[$(OpCode::$name),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$name => $text),*
                }
            }

            pub fn mode(self) -> OpMode {
                match self {
                    $(OpCode::$name => OpMode::$mode),*
                }
            }

            /// Uses the stack top set by the previous instruction when `B == 0`.
            pub fn uses_top(self) -> bool {
                match self {
                    $(OpCode::$name => opcodes!(@it $($it)?)),*
                }
            }
        }
    };
    (@it IT) => { true };
    (@it) => { false };
}

opcodes! {
    Move = "MOVE" ABC,
    LoadI = "LOADI" AsBx,
    LoadF = "LOADF" AsBx,
    LoadK = "LOADK" ABx,
    LoadKX = "LOADKX" ABx,
    LoadFalse = "LOADFALSE" ABC,
    LFalseSkip = "LFALSESKIP" ABC,
    LoadTrue = "LOADTRUE" ABC,
    LoadNil = "LOADNIL" ABC,
    GetUpval = "GETUPVAL" ABC,
    SetUpval = "SETUPVAL" ABC,
    GetTabUp = "GETTABUP" ABC,
    GetTable = "GETTABLE" ABC,
    GetI = "GETI" ABC,
    GetField = "GETFIELD" ABC,
    SetTabUp = "SETTABUP" ABC,
    SetTable = "SETTABLE" ABC,
    SetI = "SETI" ABC,
    SetField = "SETFIELD" ABC,
    NewTable = "NEWTABLE" ABC,
    Self_ = "SELF" ABC,
    AddI = "ADDI" ABC,
    AddK = "ADDK" ABC,
    SubK = "SUBK" ABC,
    MulK = "MULK" ABC,
    ModK = "MODK" ABC,
    PowK = "POWK" ABC,
    DivK = "DIVK" ABC,
    IDivK = "IDIVK" ABC,
    BAndK = "BANDK" ABC,
    BOrK = "BORK" ABC,
    BXorK = "BXORK" ABC,
    ShrI = "SHRI" ABC,
    ShlI = "SHLI" ABC,
    Add = "ADD" ABC,
    Sub = "SUB" ABC,
    Mul = "MUL" ABC,
    Mod = "MOD" ABC,
    Pow = "POW" ABC,
    Div = "DIV" ABC,
    IDiv = "IDIV" ABC,
    BAnd = "BAND" ABC,
    BOr = "BOR" ABC,
    BXor = "BXOR" ABC,
    Shl = "SHL" ABC,
    Shr = "SHR" ABC,
    MmBin = "MMBIN" ABC,
    MmBinI = "MMBINI" ABC,
    MmBinK = "MMBINK" ABC,
    Unm = "UNM" ABC,
    BNot = "BNOT" ABC,
    Not = "NOT" ABC,
    Len = "LEN" ABC,
    Concat = "CONCAT" ABC,
    Close = "CLOSE" ABC,
    Tbc = "TBC" ABC,
    Jmp = "JMP" SJ,
    Eq = "EQ" ABC,
    Lt = "LT" ABC,
    Le = "LE" ABC,
    EqK = "EQK" ABC,
    EqI = "EQI" ABC,
    LtI = "LTI" ABC,
    LeI = "LEI" ABC,
    GtI = "GTI" ABC,
    GeI = "GEI" ABC,
    Test = "TEST" ABC,
    TestSet = "TESTSET" ABC,
    Call = "CALL" ABC IT,
    TailCall = "TAILCALL" ABC IT,
    Return = "RETURN" ABC IT,
    Return0 = "RETURN0" ABC,
    Return1 = "RETURN1" ABC,
    ForLoop = "FORLOOP" ABx,
    ForPrep = "FORPREP" ABx,
    TForPrep = "TFORPREP" ABx,
    TForCall = "TFORCALL" ABC,
    TForLoop = "TFORLOOP" ABx,
    SetList = "SETLIST" ABC IT,
    Closure = "CLOSURE" ABx,
    VarArg = "VARARG" ABC,
    VarArgPrep = "VARARGPREP" ABC,
    ExtraArg = "EXTRAARG" Ax,
}

impl OpCode {
    #[inline]
    pub fn from_u8(op: u8) -> Option<OpCode> {
        Self::ALL.get(op as usize).copied()
    }

    /// Conditional tests that are always followed by a `JMP`.
    pub fn is_test(self) -> bool {
        use OpCode as O;
        matches!(
            self,
            O::Eq
                | O::Lt
                | O::Le
                | O::EqK
                | O::EqI
                | O::LtI
                | O::LeI
                | O::GtI
                | O::GeI
                | O::Test
                | O::TestSet
        )
    }

    /// Arithmetic and bitwise instructions with a fast path that skips
    /// the `MMBIN*` instruction following them.
    pub fn is_arith(self) -> bool {
        (OpCode::AddI as u8..=OpCode::Shr as u8).contains(&(self as u8))
    }
}

/// A single packed instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Instruction(pub u32);

#[inline(always)]
const fn mask(size: u32) -> u32 {
    (1u32 << size) - 1
}

impl Instruction {
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn opcode_raw(self) -> u8 {
        (self.0 & mask(SIZE_OP)) as u8
    }

    #[inline]
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.opcode_raw())
    }

    #[inline]
    pub fn a(self) -> u8 {
        ((self.0 >> POS_A) & mask(SIZE_A)) as u8
    }

    #[inline]
    pub fn b(self) -> u8 {
        ((self.0 >> POS_B) & mask(SIZE_B)) as u8
    }

    #[inline]
    pub fn c(self) -> u8 {
        ((self.0 >> POS_C) & mask(SIZE_C)) as u8
    }

    #[inline]
    pub fn k(self) -> bool {
        (self.0 >> POS_K) & 1 == 1
    }

    #[inline]
    pub fn sb(self) -> i32 {
        self.b() as i32 - OFFSET_SC
    }

    #[inline]
    pub fn sc(self) -> i32 {
        self.c() as i32 - OFFSET_SC
    }

    #[inline]
    pub fn bx(self) -> u32 {
        (self.0 >> POS_BX) & mask(SIZE_BX)
    }

    #[inline]
    pub fn sbx(self) -> i32 {
        self.bx() as i32 - OFFSET_SBX
    }

    #[inline]
    pub fn ax(self) -> u32 {
        (self.0 >> POS_AX) & mask(SIZE_AX)
    }

    #[inline]
    pub fn sj(self) -> i32 {
        ((self.0 >> POS_SJ) & mask(SIZE_SJ)) as i32 - OFFSET_SJ
    }

    pub fn abc(op: OpCode, a: u8, b: u8, c: u8, k: bool) -> Self {
        Self(
            (op as u32) << POS_OP
                | (a as u32) << POS_A
                | (k as u32) << POS_K
                | (b as u32) << POS_B
                | (c as u32) << POS_C,
        )
    }

    pub fn abx(op: OpCode, a: u8, bx: u32) -> Self {
        debug_assert!(bx <= MAXARG_BX);
        Self((op as u32) << POS_OP | (a as u32) << POS_A | (bx & mask(SIZE_BX)) << POS_BX)
    }

    pub fn asbx(op: OpCode, a: u8, sbx: i32) -> Self {
        Self::abx(op, a, (sbx + OFFSET_SBX) as u32)
    }

    pub fn ax_op(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAXARG_AX);
        Self((op as u32) << POS_OP | (ax & mask(SIZE_AX)) << POS_AX)
    }

    pub fn sj_op(op: OpCode, sj: i32) -> Self {
        debug_assert!((MIN_SJ..=MAX_SJ).contains(&sj));
        Self((op as u32) << POS_OP | (((sj + OFFSET_SJ) as u32) & mask(SIZE_SJ)) << POS_SJ)
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            Some(op) => write!(f, "{}({:#010x})", op.name(), self.0),
            None => write!(f, "<invalid {}>({:#010x})", self.opcode_raw(), self.0),
        }
    }
}

/// Encoders for every instruction, named after the opcode.
pub mod asm {
    use super::{Instruction as I, OpCode as O};

    macro_rules! abc {
        ($($f:ident = $op:ident),* $(,)?) => {
            $(
                #[inline]
                pub fn $f(a: u8, b: u8, c: u8) -> I {
                    I::abc(O::$op, a, b, c, false)
                }
            )*
        };
    }

    macro_rules! abck {
        ($($f:ident = $op:ident),* $(,)?) => {
            $(
                #[inline]
                pub fn $f(a: u8, b: u8, c: u8, k: bool) -> I {
                    I::abc(O::$op, a, b, c, k)
                }
            )*
        };
    }

    abc! {
        move_ = Move, getupval = GetUpval, setupval = SetUpval,
        gettabup = GetTabUp, gettable = GetTable, geti = GetI, getfield = GetField,
        unm = Unm, bnot = BNot, not = Not, len = Len, concat = Concat,
        close = Close, tbc = Tbc, call = Call, return0 = Return0, return1 = Return1,
        tforcall = TForCall, vararg = VarArg, varargprep = VarArgPrep,
        add = Add, sub = Sub, mul = Mul, mod_ = Mod, pow = Pow, div = Div, idiv = IDiv,
        band = BAnd, bor = BOr, bxor = BXor, shl = Shl, shr = Shr,
        addk = AddK, subk = SubK, mulk = MulK, modk = ModK, powk = PowK, divk = DivK,
        idivk = IDivK, bandk = BAndK, bork = BOrK, bxork = BXorK,
        mmbin = MmBin,
    }

    abck! {
        settabup = SetTabUp, settable = SetTable, seti = SetI, setfield = SetField,
        self_ = Self_, eq = Eq, lt = Lt, le = Le, eqk = EqK,
        testset = TestSet,
        tailcall = TailCall, return_ = Return, setlist = SetList, mmbink = MmBinK,
    }

    fn sc(v: i32) -> u8 {
        (v + super::OFFSET_SC) as u8
    }

    pub fn loadi(a: u8, v: i32) -> I {
        I::asbx(O::LoadI, a, v)
    }

    pub fn loadf(a: u8, v: i32) -> I {
        I::asbx(O::LoadF, a, v)
    }

    pub fn loadk(a: u8, k: u32) -> I {
        I::abx(O::LoadK, a, k)
    }

    pub fn loadkx(a: u8) -> I {
        I::abx(O::LoadKX, a, 0)
    }

    pub fn loadfalse(a: u8) -> I {
        I::abc(O::LoadFalse, a, 0, 0, false)
    }

    pub fn lfalseskip(a: u8) -> I {
        I::abc(O::LFalseSkip, a, 0, 0, false)
    }

    pub fn loadtrue(a: u8) -> I {
        I::abc(O::LoadTrue, a, 0, 0, false)
    }

    /// `R[a], ..., R[a+n] = nil`
    pub fn loadnil(a: u8, n: u8) -> I {
        I::abc(O::LoadNil, a, n, 0, false)
    }

    /// `b` is `log2(hash size) + 1`, `c` the array size.
    pub fn newtable(a: u8, b: u8, c: u8) -> I {
        I::abc(O::NewTable, a, b, c, false)
    }

    pub fn addi(a: u8, b: u8, imm: i32) -> I {
        I::abc(O::AddI, a, b, sc(imm), false)
    }

    pub fn shri(a: u8, b: u8, imm: i32) -> I {
        I::abc(O::ShrI, a, b, sc(imm), false)
    }

    pub fn shli(a: u8, b: u8, imm: i32) -> I {
        I::abc(O::ShlI, a, b, sc(imm), false)
    }

    pub fn mmbini(a: u8, imm: i32, event: u8, flip: bool) -> I {
        I::abc(O::MmBinI, a, sc(imm), event, flip)
    }

    pub fn jmp(sj: i32) -> I {
        I::sj_op(O::Jmp, sj)
    }

    pub fn eqi(a: u8, imm: i32, k: bool) -> I {
        I::abc(O::EqI, a, sc(imm), 0, k)
    }

    pub fn lti(a: u8, imm: i32, k: bool) -> I {
        I::abc(O::LtI, a, sc(imm), 0, k)
    }

    pub fn lei(a: u8, imm: i32, k: bool) -> I {
        I::abc(O::LeI, a, sc(imm), 0, k)
    }

    pub fn gti(a: u8, imm: i32, k: bool) -> I {
        I::abc(O::GtI, a, sc(imm), 0, k)
    }

    pub fn gei(a: u8, imm: i32, k: bool) -> I {
        I::abc(O::GeI, a, sc(imm), 0, k)
    }

    pub fn test(a: u8, k: bool) -> I {
        I::abc(O::Test, a, 0, 0, k)
    }

    pub fn forprep(a: u8, bx: u32) -> I {
        I::abx(O::ForPrep, a, bx)
    }

    pub fn forloop(a: u8, bx: u32) -> I {
        I::abx(O::ForLoop, a, bx)
    }

    pub fn tforprep(a: u8, bx: u32) -> I {
        I::abx(O::TForPrep, a, bx)
    }

    pub fn tforloop(a: u8, bx: u32) -> I {
        I::abx(O::TForLoop, a, bx)
    }

    pub fn closure(a: u8, bx: u32) -> I {
        I::abx(O::Closure, a, bx)
    }

    pub fn extraarg(ax: u32) -> I {
        I::ax_op(O::ExtraArg, ax)
    }
}
