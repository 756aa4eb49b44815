//! Tokens and a tokenizer for AT&T syntax operands.

use logos::{Lexer, Logos};

use std::fmt;

/// Enumeration of all tokens that can appear in an instruction operand.
#[derive(Logos, Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Errorneous token that could not be interpreted as any of the other variants.
    #[error]
    #[regex(r"[ \t]+", logos::skip)]
    Error,

    /// Prefix of an immediate operand. (`$5`, `$msg`)
    #[token("$")]
    ImmediatePrefix,

    /// Prefix of a register name. (`%ax`)
    #[token("%")]
    RegisterPrefix,

    /// Marks an indirect jump or call target. (`*%ax`, `*table(%bx)`)
    #[token("*")]
    Indirect,

    /// Start of the base, index and scale part of a memory operand.
    #[token("(")]
    IndexBegin,

    /// End of the base, index and scale part of a memory operand.
    #[token(")")]
    IndexEnd,

    #[token(",")]
    Separator,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    /// An unsigned decimal or hexadecimal (`0x` prefixed) number literal.
    #[regex("0[xX][0-9a-fA-F]+", hex_callback)]
    #[regex("[0-9]+", decimal_callback)]
    Number(i64),

    /// A symbol. Compiler generated labels contain characters like `$` and `@`, so those are
    /// allowed after the first character.
    #[regex(r"[A-Za-z_.@?][A-Za-z0-9_.$@?]*", Lexer::slice)]
    Symbol(&'a str),
}

fn hex_callback<'a>(lex: &mut Lexer<'a, Token<'a>>) -> Result<i64, std::num::ParseIntError> {
    i64::from_str_radix(&lex.slice()[2..], 16)
}

fn decimal_callback<'a>(lex: &mut Lexer<'a, Token<'a>>) -> Result<i64, std::num::ParseIntError> {
    lex.slice().parse()
}

impl<'t> fmt::Display for Token<'t> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Error => write!(f, "<error>"),
            Token::ImmediatePrefix => write!(f, "$"),
            Token::RegisterPrefix => write!(f, "%"),
            Token::Indirect => write!(f, "*"),
            Token::IndexBegin => write!(f, "("),
            Token::IndexEnd => write!(f, ")"),
            Token::Separator => write!(f, ","),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Number(num) => write!(f, "{}", num),
            Token::Symbol(symbol) => write!(f, "{}", symbol),
        }
    }
}

#[test]
fn test_tokenize_memory_operand() {
    let tokens: Vec<_> = Token::lexer("-4(%bp,%si,2)").collect();

    assert_eq!(tokens, vec![
        Token::Minus,
        Token::Number(4),
        Token::IndexBegin,
        Token::RegisterPrefix,
        Token::Symbol("bp"),
        Token::Separator,
        Token::RegisterPrefix,
        Token::Symbol("si"),
        Token::Separator,
        Token::Number(2),
        Token::IndexEnd,
    ]);
}

#[test]
fn test_tokenize_immediates() {
    let tokens: Vec<_> = Token::lexer("$0x1F").collect();
    assert_eq!(tokens, vec![Token::ImmediatePrefix, Token::Number(31)]);

    let tokens: Vec<_> = Token::lexer("$L$12+3").collect();
    assert_eq!(tokens, vec![
        Token::ImmediatePrefix,
        Token::Symbol("L$12"),
        Token::Plus,
        Token::Number(3),
    ]);
}
