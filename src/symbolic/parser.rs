//! nom parsers for the lines of an assembly source file.

use std::fmt;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{take_while1, take_while_m_n},
    character::complete::{char, space0, space1},
    combinator::{map, map_res, opt, value},
    multi::separated_list,
    sequence::{preceded, terminated, tuple},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    UnterminatedString,
    InvalidEscape,
    UnbalancedParentheses,
    EmptyArgument,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::UnterminatedString => write!(f, "unterminated string literal"),
            ErrorKind::InvalidEscape => write!(f, "invalid escape sequence"),
            ErrorKind::UnbalancedParentheses => write!(f, "unbalanced parentheses"),
            ErrorKind::EmptyArgument => write!(f, "empty argument"),
        }
    }
}

pub type ParseError = crate::error::ParseError<ErrorKind>;
type Result<'a, T> = IResult<&'a str, T, ParseError>;

/// A mnemonic or a directive name together with its comma separated arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement<'a> {
    pub name: &'a str,
    pub arguments: Vec<&'a str>,
}

fn failure<T>(input: &str, kind: ErrorKind) -> Result<T> {
    Err(nom::Err::Failure(ParseError::from_kind(input, kind)))
}

fn name(input: &str) -> Result<&str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '.' || c == '_')(input)
}

/// Takes a single argument up to the next comma that is not inside parentheses or a string
/// literal. Trailing spaces are not included in the argument.
fn argument(input: &str) -> Result<&str> {
    use nom::error::ParseError as _;

    if input.is_empty() {
        return Err(nom::Err::Error(ParseError::from_error_kind(input, nom::error::ErrorKind::Eof)));
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = input.len();

    for (i, c) in input.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => (),
            }

            continue;
        }

        match c {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' if depth == 0 => return failure(&input[i..], ErrorKind::UnbalancedParentheses),
            ')' => depth -= 1,
            ',' if depth == 0 => {
                end = i;
                break;
            }
            _ => (),
        }
    }

    if in_string {
        return failure(input, ErrorKind::UnterminatedString);
    }

    if depth != 0 {
        return failure(input, ErrorKind::UnbalancedParentheses);
    }

    let arg = input[..end].trim_end();

    if arg.is_empty() {
        return failure(input, ErrorKind::EmptyArgument);
    }

    Ok((&input[end..], arg))
}

fn arguments(input: &str) -> Result<Vec<&str>> {
    separated_list(preceded(space0, char(',')), preceded(space0, argument))(input)
}

/// Parses a whole statement line such as `movw $5,%ax` or `.byte 1, 2`.
pub fn statement(input: &str) -> Result<Statement> {
    map(
        terminated(
            tuple((preceded(space0, name), opt(preceded(space1, arguments)))),
            space0,
        ),
        |(name, arguments)| Statement {
            name,
            arguments: arguments.unwrap_or_default(),
        },
    )(input)
}

fn unicode_escape(input: &str) -> Result<u32> {
    preceded(
        char('u'),
        map_res(
            take_while_m_n(4, 4, |c: char| c.is_digit(16)),
            |hex| u32::from_str_radix(hex, 16),
        ),
    )(input)
}

fn escape(input: &str) -> Result<u32> {
    alt((
        value('\n' as u32, char('n')),
        value('\t' as u32, char('t')),
        value('\r' as u32, char('r')),
        value(0x08, char('b')),
        value(0x0C, char('f')),
        value('"' as u32, char('"')),
        value('\\' as u32, char('\\')),
        value('/' as u32, char('/')),
        unicode_escape,
    ))(input)
}

/// Parses a double quoted string literal with JSON escapes. Every character becomes one byte,
/// its code point modulo 256.
pub fn string_literal(input: &str) -> Result<Vec<u8>> {
    let (mut rest, _) = char('"')(input)?;
    let mut bytes = Vec::new();

    loop {
        let mut chars = rest.chars();

        match chars.next() {
            None => return failure(input, ErrorKind::UnterminatedString),
            Some('"') => return Ok((chars.as_str(), bytes)),
            Some('\\') => match escape(chars.as_str()) {
                Ok((after, code)) => {
                    bytes.push(code as u8);
                    rest = after;
                }
                Err(_) => return failure(rest, ErrorKind::InvalidEscape),
            },
            Some(c) => {
                bytes.push(c as u32 as u8);
                rest = chars.as_str();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::complete;

    #[test]
    fn test_statement() {
        let stmt = complete(statement, "    movw    $5,%ax").unwrap();
        assert_eq!(stmt, Statement { name: "movw", arguments: vec!["$5", "%ax"] });

        let stmt = complete(statement, "addw -2(%bp,%si,2) , %ax").unwrap();
        assert_eq!(stmt.arguments, vec!["-2(%bp,%si,2)", "%ax"]);

        let stmt = complete(statement, "ret").unwrap();
        assert_eq!(stmt, Statement { name: "ret", arguments: vec![] });

        let stmt = complete(statement, r#".asciiz "a, b", "c""#).unwrap();
        assert_eq!(stmt.name, ".asciiz");
        assert_eq!(stmt.arguments, vec![r#""a, b""#, r#""c""#]);
    }

    #[test]
    fn test_statement_errors() {
        let err = complete(statement, "movw (%bx,%ax").unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::UnbalancedParentheses));

        let err = complete(statement, "movw %ax,,%bx").unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::EmptyArgument));

        let err = complete(statement, r#".ascii "abc"#).unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::UnterminatedString));
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(complete(string_literal, r#""abc""#), Ok(b"abc".to_vec()));
        assert_eq!(
            complete(string_literal, r#""a\n\"\\\u0041\/""#),
            Ok(b"a\n\"\\A/".to_vec()),
        );
        assert_eq!(complete(string_literal, r#""\u0141""#), Ok(vec![0x41]));

        let err = complete(string_literal, r#""\q""#).unwrap_err();
        assert_eq!(err.kind(), Some(&ErrorKind::InvalidEscape));
    }
}
