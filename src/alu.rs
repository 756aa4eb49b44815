//! Bit-serial arithmetic and logic primitives used by the [emulator](crate::emulator).
//!
//! Additions and subtractions walk the operands from the least significant bit to the most
//! significant one and propagate the carry (or borrow) like a ripple-carry adder does. The carry
//! and overflow flags are read off that propagation: the carry flag is the carry leaving the most
//! significant bit and the overflow flag is set when it differs from the carry entering it.

use crate::bits::BitWord;

/// Condition flags produced by an ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArithmeticFlags {
    pub carry: bool,
    pub zero: bool,
    pub sign: bool,
    pub overflow: bool,
}

/// The result of an ALU operation together with the flags it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output<W> {
    pub value: W,
    pub flags: ArithmeticFlags,
}

impl<W: BitWord> Output<W> {
    fn new(value: W, carry: bool, overflow: bool) -> Output<W> {
        Output {
            value,
            flags: ArithmeticFlags {
                carry,
                overflow,
                zero: value.is_zero(),
                sign: value.msb(),
            },
        }
    }
}

/// Computes `a + b + carry`.
pub fn add<W: BitWord>(a: W, b: W, carry: bool) -> Output<W> {
    let mut carry = carry;
    let mut carry_into_msb = false;
    let mut raw = 0u64;

    for i in 0..W::WIDTH {
        if i == W::WIDTH - 1 {
            carry_into_msb = carry;
        }

        let (x, y) = (a.bit(i), b.bit(i));

        if x ^ y ^ carry {
            raw |= 1 << i;
        }

        carry = (x && y) || (carry && (x ^ y));
    }

    Output::new(W::from_raw(raw), carry, carry ^ carry_into_msb)
}

/// Computes `a - b - borrow`. The carry flag of the output holds the borrow.
pub fn sub<W: BitWord>(a: W, b: W, borrow: bool) -> Output<W> {
    let mut borrow = borrow;
    let mut borrow_into_msb = false;
    let mut raw = 0u64;

    for i in 0..W::WIDTH {
        if i == W::WIDTH - 1 {
            borrow_into_msb = borrow;
        }

        let (x, y) = (a.bit(i), b.bit(i));

        if x ^ y ^ borrow {
            raw |= 1 << i;
        }

        borrow = (!x && y) || (borrow && !(x ^ y));
    }

    Output::new(W::from_raw(raw), borrow, borrow ^ borrow_into_msb)
}

pub fn increment<W: BitWord>(a: W) -> Output<W> {
    add(a, W::from_raw(0), true)
}

pub fn decrement<W: BitWord>(a: W) -> Output<W> {
    sub(a, W::from_raw(0), true)
}

/// Two's complement negation, computed as `0 - a`.
pub fn negate<W: BitWord>(a: W) -> Output<W> {
    sub(W::from_raw(0), a, false)
}

fn bitwise<W: BitWord>(value: u64) -> Output<W> {
    Output::new(W::from_raw(value), false, false)
}

pub fn and<W: BitWord>(a: W, b: W) -> Output<W> {
    bitwise(a.raw() & b.raw())
}

pub fn or<W: BitWord>(a: W, b: W) -> Output<W> {
    bitwise(a.raw() | b.raw())
}

pub fn xor<W: BitWord>(a: W, b: W) -> Output<W> {
    bitwise(a.raw() ^ b.raw())
}

/// One's complement. Does not produce flags.
pub fn not<W: BitWord>(a: W) -> W {
    W::from_raw(!a.raw())
}

/// Shifts left by one bit. The shifted out bit goes to the carry flag and the overflow flag is set
/// if the sign of the value changed.
pub fn shift_left<W: BitWord>(a: W) -> Output<W> {
    let value = W::from_raw(a.raw() << 1);
    Output::new(value, a.msb(), value.msb() != a.msb())
}

/// Logical right shift by one bit. The overflow flag holds the original sign bit.
pub fn shift_right<W: BitWord>(a: W) -> Output<W> {
    Output::new(W::from_raw(a.raw() >> 1), a.bit(0), a.msb())
}

/// Arithmetic right shift by one bit, replicating the sign bit.
pub fn shift_right_arithmetic<W: BitWord>(a: W) -> Output<W> {
    let mut raw = a.raw() >> 1;

    if a.msb() {
        raw |= 1 << (W::WIDTH - 1);
    }

    Output::new(W::from_raw(raw), a.bit(0), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::{Byte, Word};

    #[test]
    fn test_add_flags_all_byte_pairs() {
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                let out = add(Byte(a), Byte(b), false);
                let sign = |x: u8| x & 0x80 != 0;

                assert_eq!(out.value, Byte(a.wrapping_add(b)));
                assert_eq!(out.flags.carry, a as u32 + b as u32 >= 256);
                assert_eq!(
                    out.flags.overflow,
                    sign(a) == sign(b) && sign(out.value.0) != sign(a),
                );
                assert_eq!(out.flags.zero, out.value.0 == 0);
                assert_eq!(out.flags.sign, sign(out.value.0));
            }
        }
    }

    #[test]
    fn test_sub_flags_all_byte_pairs() {
        for a in 0..=255u8 {
            for b in 0..=255u8 {
                let out = sub(Byte(a), Byte(b), false);
                let signed = (a as i8 as i32) - (b as i8 as i32);

                assert_eq!(out.value, Byte(a.wrapping_sub(b)));
                assert_eq!(out.flags.carry, a < b);
                assert_eq!(out.flags.overflow, signed < -128 || signed > 127);
            }
        }
    }

    #[test]
    fn test_carry_in() {
        let out = add(Word(0xFFFF), Word(0), true);
        assert_eq!(out.value, Word(0));
        assert!(out.flags.carry);
        assert!(out.flags.zero);
        assert!(!out.flags.overflow);

        let out = sub(Word(0), Word(0), true);
        assert_eq!(out.value, Word(0xFFFF));
        assert!(out.flags.carry);
        assert!(out.flags.sign);
    }

    #[test]
    fn test_increment_decrement_round_trip() {
        for a in 0..=255u8 {
            let up = decrement(increment(Byte(a)).value);
            assert_eq!(up.value, Byte(a));
            assert_eq!(up.flags.zero, a == 0);
            assert_eq!(up.flags.sign, a >= 0x80);

            let down = increment(decrement(Byte(a)).value);
            assert_eq!(down.value, Byte(a));
            assert_eq!(down.flags.zero, a == 0);
            assert_eq!(down.flags.sign, a >= 0x80);
        }

        assert!(increment(Byte(0x7F)).flags.overflow);
        assert!(decrement(Byte(0x80)).flags.overflow);
    }

    #[test]
    fn test_negate() {
        assert_eq!(negate(Byte(5)).value, Byte(0xFB));
        assert!(negate(Byte(5)).flags.carry);
        assert!(!negate(Byte(0)).flags.carry);
        assert!(negate(Byte(0x80)).flags.overflow);
    }

    #[test]
    fn test_shifts() {
        let out = shift_left(Byte(0b1100_0001));
        assert_eq!(out.value, Byte(0b1000_0010));
        assert!(out.flags.carry);
        assert!(!out.flags.overflow);

        let out = shift_right(Word(0x8001));
        assert_eq!(out.value, Word(0x4000));
        assert!(out.flags.carry);

        let out = shift_right_arithmetic(Word(0x8002));
        assert_eq!(out.value, Word(0xC001));
        assert!(!out.flags.carry);
        assert!(out.flags.sign);
    }

    #[test]
    fn test_bitwise_clears_carry() {
        let out = and(Byte(0xF0), Byte(0x0F));
        assert!(out.flags.zero);
        assert!(!out.flags.carry);

        assert_eq!(or(Byte(0xF0), Byte(0x0F)).value, Byte(0xFF));
        assert_eq!(xor(Byte(0xFF), Byte(0x0F)).value, Byte(0xF0));
        assert_eq!(not(Word(0x00FF)), Word(0xFF00));
    }
}
