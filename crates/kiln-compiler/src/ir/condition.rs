//! Condition codes
//!
//! Three tables drive every compare: [`ConditionCode::negate`] flips the
//! outcome, [`ConditionCode::mirror`] keeps the outcome when the operands are
//! swapped, and [`ConditionCode::unsigned`] picks the unsigned counterpart.

use std::fmt;

/// Branch and set condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionCode {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    UnsignedLess,
    UnsignedLessOrEqual,
    UnsignedGreater,
    UnsignedGreaterOrEqual,
    Parity,
    NoParity,
    Sign,
    NotSign,
}

impl ConditionCode {
    /// Condition that holds exactly when `self` does not
    pub fn negate(self) -> Self {
        use ConditionCode::*;
        match self {
            Equal => NotEqual,
            NotEqual => Equal,
            Less => GreaterOrEqual,
            GreaterOrEqual => Less,
            LessOrEqual => Greater,
            Greater => LessOrEqual,
            UnsignedLess => UnsignedGreaterOrEqual,
            UnsignedGreaterOrEqual => UnsignedLess,
            UnsignedLessOrEqual => UnsignedGreater,
            UnsignedGreater => UnsignedLessOrEqual,
            Parity => NoParity,
            NoParity => Parity,
            Sign => NotSign,
            NotSign => Sign,
        }
    }

    /// Condition to test after swapping the compared operands
    ///
    /// Flag-only conditions (parity, sign) do not depend on operand order and
    /// are returned unchanged.
    pub fn mirror(self) -> Self {
        use ConditionCode::*;
        match self {
            Less => Greater,
            Greater => Less,
            LessOrEqual => GreaterOrEqual,
            GreaterOrEqual => LessOrEqual,
            UnsignedLess => UnsignedGreater,
            UnsignedGreater => UnsignedLess,
            UnsignedLessOrEqual => UnsignedGreaterOrEqual,
            UnsignedGreaterOrEqual => UnsignedLessOrEqual,
            other => other,
        }
    }

    /// Unsigned counterpart of a signed relation
    pub fn unsigned(self) -> Self {
        use ConditionCode::*;
        match self {
            Less => UnsignedLess,
            LessOrEqual => UnsignedLessOrEqual,
            Greater => UnsignedGreater,
            GreaterOrEqual => UnsignedGreaterOrEqual,
            other => other,
        }
    }

    /// Whether this is one of the unsigned relations
    pub fn is_unsigned(self) -> bool {
        use ConditionCode::*;
        matches!(
            self,
            UnsignedLess | UnsignedLessOrEqual | UnsignedGreater | UnsignedGreaterOrEqual
        )
    }

    /// Low nibble of the `Jcc`/`SETcc` opcode
    pub fn x86_code(self) -> u8 {
        use ConditionCode::*;
        match self {
            UnsignedLess => 0x2,
            UnsignedGreaterOrEqual => 0x3,
            Equal => 0x4,
            NotEqual => 0x5,
            UnsignedLessOrEqual => 0x6,
            UnsignedGreater => 0x7,
            Sign => 0x8,
            NotSign => 0x9,
            Parity => 0xA,
            NoParity => 0xB,
            Less => 0xC,
            GreaterOrEqual => 0xD,
            LessOrEqual => 0xE,
            Greater => 0xF,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        use ConditionCode::*;
        match self {
            Equal => "e",
            NotEqual => "ne",
            Less => "l",
            LessOrEqual => "le",
            Greater => "g",
            GreaterOrEqual => "ge",
            UnsignedLess => "b",
            UnsignedLessOrEqual => "be",
            UnsignedGreater => "a",
            UnsignedGreaterOrEqual => "ae",
            Parity => "p",
            NoParity => "np",
            Sign => "s",
            NotSign => "ns",
        }
    }

    /// Evaluate the relation on two integers
    pub fn evaluate(self, left: i64, right: i64) -> Option<bool> {
        use ConditionCode::*;
        let (ul, ur) = (left as u64, right as u64);
        Some(match self {
            Equal => left == right,
            NotEqual => left != right,
            Less => left < right,
            LessOrEqual => left <= right,
            Greater => left > right,
            GreaterOrEqual => left >= right,
            UnsignedLess => ul < ur,
            UnsignedLessOrEqual => ul <= ur,
            UnsignedGreater => ul > ur,
            UnsignedGreaterOrEqual => ul >= ur,
            Parity | NoParity | Sign | NotSign => return None,
        })
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConditionCode::*;

    const RELATIONS: [ConditionCode; 10] = [
        Equal,
        NotEqual,
        Less,
        LessOrEqual,
        Greater,
        GreaterOrEqual,
        UnsignedLess,
        UnsignedLessOrEqual,
        UnsignedGreater,
        UnsignedGreaterOrEqual,
    ];
    const SAMPLES: [i64; 5] = [-3, -1, 0, 1, 7];

    #[test]
    fn test_negate_inverts_outcome() {
        for cc in RELATIONS {
            assert_eq!(cc.negate().negate(), cc);
            for a in SAMPLES {
                for b in SAMPLES {
                    assert_eq!(cc.evaluate(a, b).map(|r| !r), cc.negate().evaluate(a, b), "{cc}");
                }
            }
        }
    }

    #[test]
    fn test_mirror_preserves_outcome_under_swap() {
        for cc in RELATIONS {
            assert_eq!(cc.mirror().mirror(), cc);
            for a in SAMPLES {
                for b in SAMPLES {
                    assert_eq!(cc.evaluate(a, b), cc.mirror().evaluate(b, a), "{cc}");
                }
            }
        }
        assert_eq!(GreaterOrEqual.mirror(), LessOrEqual);
        assert_eq!(UnsignedGreater.mirror(), UnsignedLess);
        assert_eq!(Equal.mirror(), Equal);
    }

    #[test]
    fn test_unsigned_and_encoding() {
        assert_eq!(Less.unsigned(), UnsignedLess);
        assert_eq!(Equal.unsigned(), Equal);
        assert!(UnsignedGreaterOrEqual.is_unsigned());
        assert_eq!(Equal.x86_code(), 0x4);
        assert_eq!(UnsignedGreater.x86_code(), 0x7);
        assert_eq!(Less.x86_code(), 0xC);
        assert_eq!(NoParity.x86_code(), 0xB);
    }
}
