//! Error type shared by the nom parsers of the source and object formats.

use std::fmt::{self, Display};

use nom::error::ErrorKind;

#[derive(Debug, Clone, PartialEq)]
enum InnerError<Kind> {
    Incomplete,
    Context(&'static str),
    Other(Kind),
    Nom(ErrorKind),
}

impl<Kind: Display> fmt::Display for InnerError<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InnerError::Context(ctx) => write!(f, "invalid {}", ctx),
            InnerError::Nom(_err) => write!(f, "unexpected input"),
            InnerError::Other(kind) => fmt::Display::fmt(kind, f),
            InnerError::Incomplete => write!(f, "expected more input"),
        }
    }
}

/// Error type that contains the reason of the error and the unconsumed input.
///
/// The first entry of the stack is the innermost error. For the column of the error see
/// [ParseError::verbose].
#[derive(Clone, Debug, PartialEq)]
pub struct ParseError<Kind> {
    stack: Vec<(String, InnerError<Kind>)>,
}

impl<Kind> ParseError<Kind> {
    pub(crate) fn from_kind(input: &str, kind: Kind) -> ParseError<Kind> {
        ParseError {
            stack: vec![(input.to_string(), InnerError::Other(kind))],
        }
    }

    pub(crate) fn incomplete() -> ParseError<Kind> {
        ParseError {
            stack: vec![(String::new(), InnerError::Incomplete)],
        }
    }

    /// Returns the custom error kind if the innermost error has one.
    pub fn kind(&self) -> Option<&Kind> {
        match self.stack.first() {
            Some((_, InnerError::Other(kind))) => Some(kind),
            _ => None,
        }
    }

    /// Calculates the position of the error from the [ParseError] and the original input.
    ///
    /// # Parameters
    /// - `input`: The original input buffer or an exact copy of it.
    pub fn verbose(self, input: &str) -> VerboseParseError<Kind> {
        let (rest, kind) = match self.stack.into_iter().next() {
            Some(entry) => entry,
            None => (String::new(), InnerError::Incomplete),
        };

        let start = input.len().saturating_sub(rest.len());
        let column = input[..start].chars().count() + 1;

        let rest = input[start..].chars().take(20).collect();

        VerboseParseError { column, kind, rest }
    }
}

/// Error type containing the column of the error in addition to the reason of the error.
///
/// Created from a [ParseError] with [ParseError::verbose].
#[derive(Clone, Debug)]
pub struct VerboseParseError<Kind> {
    /// The column number of the error location, starting from 1.
    pub column: usize,
    kind: InnerError<Kind>,
    rest: String,
}

impl<Kind: Display> fmt::Display for VerboseParseError<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "at col {}: {}, at '{}'", self.column, self.kind, self.rest)
    }
}

impl<Kind: Display> fmt::Display for ParseError<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (input, kind) = match self.stack.first() {
            Some((input, kind)) => (input, kind),
            None => return write!(f, "unknown error"),
        };

        let rest: String = input.chars().take_while(|c| *c != '\n').take(20).collect();

        if rest.is_empty() {
            write!(f, "{}", kind)
        } else {
            write!(f, "{} at: {}", kind, rest)
        }
    }
}

impl<Kind> nom::error::ParseError<&str> for ParseError<Kind> {
    fn from_error_kind(input: &str, kind: ErrorKind) -> Self {
        ParseError {
            stack: vec![(input.to_string(), InnerError::Nom(kind))],
        }
    }

    fn append(input: &str, kind: ErrorKind, mut other: Self) -> Self {
        other.stack.push((input.to_string(), InnerError::Nom(kind)));
        other
    }

    fn add_context(input: &str, ctx: &'static str, mut other: Self) -> Self {
        other.stack.push((input.to_string(), InnerError::Context(ctx)));
        other
    }
}

/// Runs `parser` on the whole `input`, failing if any input is left unconsumed.
pub(crate) fn complete<'a, O, Kind, P>(parser: P, input: &'a str) -> Result<O, ParseError<Kind>>
where
    P: Fn(&'a str) -> nom::IResult<&'a str, O, ParseError<Kind>>,
{
    match nom::combinator::all_consuming(parser)(input) {
        Ok((_, output)) => Ok(output),
        Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => Err(err),
        Err(nom::Err::Incomplete(_)) => Err(ParseError::incomplete()),
    }
}

#[test]
fn test_verbose_column() {
    use nom::error::ParseError as _;

    let input = "LOAD1H  XYZ";
    let err: ParseError<String> = ParseError::from_error_kind(&input[8..], ErrorKind::Tag);
    let verbose = err.verbose(input);

    assert_eq!(verbose.column, 9);
    assert_eq!(verbose.to_string(), "at col 9: unexpected input, at 'XYZ'");
}
