use crate::bytecode::OpCode;

/// How an operation's slow path interacts with the frame state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protection {
    /// Cannot raise or call back into code.
    None,
    /// Commits pc and `top`, may run arbitrary code, refreshes the trap.
    Full,
    /// Like `Full`, but `top` was already set by the instruction.
    FullNoTop,
    /// Commits pc and `top`; cannot change hooks or move the stack.
    NoTrap,
}

impl Protection {
    pub fn name(self) -> &'static str {
        match self {
            Protection::None => "none",
            Protection::Full => "full",
            Protection::FullNoTop => "full-no-top",
            Protection::NoTrap => "no-trap",
        }
    }

    pub fn may_raise(self) -> bool {
        self != Protection::None
    }
}

/// The protection contract of every opcode, used by both engines and
/// printed in generated code.
pub fn protection(op: OpCode) -> Protection {
    use OpCode as O;
    match op {
        O::Move
        | O::LoadI
        | O::LoadF
        | O::LoadK
        | O::LoadKX
        | O::LoadFalse
        | O::LFalseSkip
        | O::LoadTrue
        | O::LoadNil
        | O::GetUpval
        | O::SetUpval
        | O::Not
        | O::Jmp
        | O::EqK
        | O::EqI
        | O::Test
        | O::TestSet
        | O::ForLoop
        | O::TForLoop
        | O::SetList
        | O::ExtraArg => Protection::None,

        O::AddI
        | O::AddK
        | O::SubK
        | O::MulK
        | O::PowK
        | O::DivK
        | O::BAndK
        | O::BOrK
        | O::BXorK
        | O::ShrI
        | O::ShlI
        | O::Add
        | O::Sub
        | O::Mul
        | O::Pow
        | O::Div
        | O::BAnd
        | O::BOr
        | O::BXor
        | O::Shl
        | O::Shr => Protection::None,

        O::ModK | O::IDivK | O::Mod | O::IDiv => Protection::NoTrap,

        O::GetTabUp
        | O::GetTable
        | O::GetI
        | O::GetField
        | O::SetTabUp
        | O::SetTable
        | O::SetI
        | O::SetField
        | O::Self_
        | O::MmBin
        | O::MmBinI
        | O::MmBinK
        | O::Unm
        | O::BNot
        | O::Len
        | O::Eq
        | O::Lt
        | O::Le
        | O::LtI
        | O::LeI
        | O::GtI
        | O::GeI
        | O::Close
        | O::VarArg
        | O::Return => Protection::Full,

        O::Concat
        | O::Call
        | O::TailCall
        | O::Return0
        | O::Return1
        | O::TForCall
        | O::VarArgPrep => Protection::FullNoTop,

        O::NewTable | O::Tbc | O::ForPrep | O::TForPrep | O::Closure => Protection::NoTrap,
    }
}
