//! Parsers for the value part of prefixed reply lines, e.g. the `14,0` in
//! `+CSQ: 14,0`.

use nom::{
    bytes::complete::tag,
    character::complete::{char, digit1, space0},
    combinator::{map_res, opt, recognize},
    sequence::{pair, preceded, separated_pair, tuple},
    IResult,
};

use crate::error::Error;

fn integer(input: &[u8]) -> IResult<&[u8], i32> {
    map_res(recognize(pair(opt(tag("-")), digit1)), |s: &[u8]| {
        core::str::from_utf8(s)
            .map_err(drop)
            .and_then(|s| s.parse::<i32>().map_err(drop))
    })(input)
}

/// First integer on the line, leading whitespace tolerated. Anything after
/// the integer is ignored; replies routinely carry trailing fields the
/// caller does not want.
pub(crate) fn int(input: &[u8]) -> Result<i32, Error> {
    preceded(space0, integer)(input)
        .map(|(_, v)| v)
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| Error::Parse)
}

/// `<a>,<b>` with optional whitespace, e.g. `+CSQ: 14,0` or `+CREG: 0,1`.
pub(crate) fn int_pair(input: &[u8]) -> Result<(i32, i32), Error> {
    preceded(
        space0,
        separated_pair(integer, char(','), preceded(space0, integer)),
    )(input)
    .map(|(_, v)| v)
    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| Error::Parse)
}

/// `<a>,<b>,<c>`, e.g. `+HTTPACTION: 0,200,104`.
pub(crate) fn int_triple(input: &[u8]) -> Result<(i32, i32, i32), Error> {
    tuple((
        preceded(space0, integer),
        preceded(char(','), preceded(space0, integer)),
        preceded(char(','), preceded(space0, integer)),
    ))(input)
    .map(|(_, v)| v)
    .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| Error::Parse)
}

/// Numeric error code of a `+CME ERROR:`/`+CMS ERROR:` tail. Text-mode error
/// reports carry no code.
pub(crate) fn error_code(input: &[u8]) -> Option<u16> {
    int(input).ok().and_then(|v| u16::try_from(v).ok())
}
