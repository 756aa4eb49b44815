//! Fixed width binary words shared by the assembler and the emulator.
//!
//! Every value that flows through a PPT machine is exactly 8, 16 or 32 bits wide. The width is
//! part of the type ([Byte], [Word], [DWord]) and conversion from integers wraps modulo 2^width
//! the same way the hardware would overflow.
//!
//! The textual form of a word (used by the object format) is a string of `0` and `1` characters
//! with the most significant bit first.

use std::fmt;
use std::str::FromStr;

/// Common interface of the fixed width word types.
pub trait BitWord: Copy + Eq + fmt::Debug {
    /// Number of bits in the word.
    const WIDTH: u32;

    /// Creates a word from the lowest [WIDTH](BitWord::WIDTH) bits of `raw`.
    fn from_raw(raw: u64) -> Self;

    /// Returns the bits of the word zero-extended into an `u64`.
    fn raw(self) -> u64;

    /// Converts an integer into a word. Values outside of the representable range wrap modulo
    /// 2^width, so both `-1` and `255` become `11111111` as a [Byte].
    fn from_int(value: i64) -> Self {
        Self::from_raw(value as u64)
    }

    /// Interprets the word as an unsigned integer.
    fn unsigned(self) -> i64 {
        self.raw() as i64
    }

    /// Interprets the word as a two's complement signed integer.
    fn signed(self) -> i64 {
        let raw = self.raw() as i64;

        if self.msb() {
            raw - (1i64 << Self::WIDTH)
        } else {
            raw
        }
    }

    /// Returns the bit at `index`, where index 0 is the least significant bit.
    fn bit(self, index: u32) -> bool {
        self.raw() & (1 << index) != 0
    }

    /// Returns the most significant (sign) bit.
    fn msb(self) -> bool {
        self.bit(Self::WIDTH - 1)
    }

    fn is_zero(self) -> bool {
        self.raw() == 0
    }
}

/// Converts `value` into a word of type `W`, wrapping out-of-range values.
pub fn int_to_bits<W: BitWord>(value: i64) -> W {
    W::from_int(value)
}

/// Converts a word back into an integer, either as an unsigned or a two's complement value.
pub fn bits_to_int<W: BitWord>(bits: W, signed: bool) -> i64 {
    match signed {
        true => bits.signed(),
        false => bits.unsigned(),
    }
}

/// An 8-bit word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Byte(pub u8);

/// A 16-bit word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Word(pub u16);

/// A 32-bit word, produced by word multiplication and consumed by word division.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DWord(pub u32);

impl BitWord for Byte {
    const WIDTH: u32 = 8;

    fn from_raw(raw: u64) -> Byte {
        Byte(raw as u8)
    }

    fn raw(self) -> u64 {
        self.0 as u64
    }
}

impl BitWord for Word {
    const WIDTH: u32 = 16;

    fn from_raw(raw: u64) -> Word {
        Word(raw as u16)
    }

    fn raw(self) -> u64 {
        self.0 as u64
    }
}

impl BitWord for DWord {
    const WIDTH: u32 = 32;

    fn from_raw(raw: u64) -> DWord {
        DWord(raw as u32)
    }

    fn raw(self) -> u64 {
        self.0 as u64
    }
}

impl Word {
    pub fn from_halves(high: Byte, low: Byte) -> Word {
        Word(u16::from_be_bytes([high.0, low.0]))
    }

    pub fn high(self) -> Byte {
        Byte(self.0.to_be_bytes()[0])
    }

    pub fn low(self) -> Byte {
        Byte(self.0.to_be_bytes()[1])
    }

    /// Bit-increments the word, wrapping from `0xFFFF` to `0`.
    pub fn increment(self) -> Word {
        Word(self.0.wrapping_add(1))
    }

    /// Bit-decrements the word, wrapping from `0` to `0xFFFF`.
    pub fn decrement(self) -> Word {
        Word(self.0.wrapping_sub(1))
    }
}

impl DWord {
    pub fn from_words(high: Word, low: Word) -> DWord {
        DWord(((high.0 as u32) << 16) | low.0 as u32)
    }

    pub fn high(self) -> Word {
        Word((self.0 >> 16) as u16)
    }

    pub fn low(self) -> Word {
        Word(self.0 as u16)
    }
}

macro_rules! impl_bit_string {
    ( $name:ident ) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{:0width$b}", self.0, width = <$name as BitWord>::WIDTH as usize)
            }
        }

        impl FromStr for $name {
            type Err = BitStringError;

            fn from_str(input: &str) -> Result<$name, BitStringError> {
                let width = <$name as BitWord>::WIDTH as usize;

                if input.len() != width {
                    return Err(BitStringError::Width { expected: width, got: input.len() });
                }

                let mut raw = 0u64;

                for ch in input.chars() {
                    raw <<= 1;

                    match ch {
                        '0' => (),
                        '1' => raw |= 1,
                        other => return Err(BitStringError::Digit(other)),
                    }
                }

                Ok(<$name as BitWord>::from_raw(raw))
            }
        }
    };
}

impl_bit_string!(Byte);
impl_bit_string!(Word);
impl_bit_string!(DWord);

/// Reason why a string of binary digits could not be read as a word.
#[derive(Debug, Clone, PartialEq)]
pub enum BitStringError {
    /// The string did not have exactly as many digits as the word has bits.
    Width { expected: usize, got: usize },

    /// The string contained something other than `0` or `1`.
    Digit(char),
}

impl fmt::Display for BitStringError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BitStringError::Width { expected, got } => {
                write!(f, "expected {} binary digits, got {}", expected, got)
            }
            BitStringError::Digit(ch) => write!(f, "'{}' is not a binary digit", ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_unsigned() {
        let cases = [("00000000", 0), ("10000001", 129), ("11111111", 255), ("00000101", 5)];

        for (bits, value) in cases.iter() {
            assert_eq!(bits_to_int(bits.parse::<Byte>().unwrap(), false), *value);
            assert_eq!(int_to_bits::<Byte>(*value).to_string(), *bits);
        }
    }

    #[test]
    fn test_byte_signed() {
        let cases = [("00000000", 0), ("10000000", -128), ("11111111", -1), ("00000101", 5), ("11111011", -5)];

        for (bits, value) in cases.iter() {
            assert_eq!(bits_to_int(bits.parse::<Byte>().unwrap(), true), *value);
            assert_eq!(int_to_bits::<Byte>(*value).to_string(), *bits);
        }
    }

    #[test]
    fn test_dword_signed() {
        let cases = [
            ("00000000000000000000000000000000", 0),
            ("00000000000000000000000000000101", 5),
            ("11111111111111111111111111111111", -1),
            ("00000000000000010000000000000000", 1 << 16),
        ];

        for (bits, value) in cases.iter() {
            let dword = int_to_bits::<DWord>(*value);
            assert_eq!(dword.to_string(), *bits);
            assert_eq!(bits_to_int(dword, true), *value);
            assert_eq!(DWord::from_words(dword.high(), dword.low()), dword);
        }
    }

    #[test]
    fn test_round_trip_all_widths() {
        for value in 0..=255 {
            let byte: Byte = int_to_bits(value);
            assert_eq!(bits_to_int(byte, false), value);
        }

        for value in -128..=127 {
            let byte: Byte = int_to_bits(value);
            assert_eq!(bits_to_int(byte, true), value);
        }

        for &value in [-32768i64, -1, 0, 1, 0x7FFF, 0x8000, 0xFFFF].iter() {
            let word: Word = int_to_bits(value);
            let expected = if value < 0 { bits_to_int(word, true) } else { bits_to_int(word, false) };
            assert_eq!(expected, value);
        }

        for &value in [i32::min_value() as i64, -7, 0, 7, u32::max_value() as i64].iter() {
            let dword: DWord = int_to_bits(value);
            let signed = value < 0;
            assert_eq!(bits_to_int(dword, signed), value);
        }
    }

    #[test]
    fn test_wrapping() {
        assert_eq!(int_to_bits::<Byte>(256), Byte(0));
        assert_eq!(int_to_bits::<Byte>(-129), Byte(127));
        assert_eq!(int_to_bits::<Word>(0x1_0005), Word(5));
        assert_eq!(Word(0xFFFF).increment(), Word(0));
        assert_eq!(Word(0).decrement(), Word(0xFFFF));
    }

    #[test]
    fn test_halves() {
        let word = Word::from_halves(Byte(0x12), Byte(0x34));
        assert_eq!(word, Word(0x1234));
        assert_eq!(word.high(), Byte(0x12));
        assert_eq!(word.low(), Byte(0x34));
    }

    #[test]
    fn test_invalid_bit_strings() {
        assert_eq!("0101".parse::<Byte>(), Err(BitStringError::Width { expected: 8, got: 4 }));
        assert_eq!("0101010x".parse::<Byte>(), Err(BitStringError::Digit('x')));
    }
}
