//! Deserialize data from the bytecode protocol.
use bytes::Bytes;
use nom::{
    IResult,
    bytes::complete::take,
    number::complete::{be_i16, be_i32},
};
use nombytes::NomBytes;

type ParseError = nom::Err<nom::error::Error<NomBytes>>;

fn failure(input: NomBytes, kind: nom::error::ErrorKind) -> ParseError {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

/// Convert bytes to a validated UTF-8 string.
/// Returns an error if the bytes are not valid UTF-8.
pub fn bytes_to_string(bytes: &Bytes) -> Result<String, ParseError> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| failure(NomBytes::from(bytes.as_ref()), nom::error::ErrorKind::Verify))
}

/// STRING: i16 length followed by UTF-8 bytes. Negative lengths are rejected.
pub fn parse_string(s: NomBytes) -> IResult<NomBytes, String> {
    let (s, length) = be_i16(s)?;
    if length < 0 {
        return Err(failure(s, nom::error::ErrorKind::LengthValue));
    }
    let (s, string) = take(length as usize)(s)?;
    let string = bytes_to_string(&string.into_bytes())?;
    Ok((s, string))
}

/// NULLABLE_STRING: like STRING, with `-1` meaning null.
pub fn parse_nullable_string(s: NomBytes) -> IResult<NomBytes, Option<String>> {
    let (rest, length) = be_i16(s.clone())?;
    if length == -1 {
        return Ok((rest, None));
    }
    let (s, string) = parse_string(s)?;
    Ok((s, Some(string)))
}

/// BYTES: i32 length followed by raw bytes. Negative lengths are rejected.
pub fn parse_bytes(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i32(s)?;
    if length < 0 {
        return Err(failure(s, nom::error::ErrorKind::LengthValue));
    }
    let (s, bytes) = take(length as usize)(s)?;
    Ok((s, bytes.into_bytes()))
}

/// NULLABLE_BYTES: like BYTES, with `-1` meaning null.
pub fn parse_nullable_bytes(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (rest, length) = be_i32(s.clone())?;
    if length == -1 {
        return Ok((rest, None));
    }
    let (s, bytes) = parse_bytes(s)?;
    Ok((s, Some(bytes)))
}

/// Parse the length prefix of an array.
///
/// Returns `None` for the null marker (`-1`) and fails for any other negative
/// length or for lengths above `max_len`.
pub fn parse_array_len(s: NomBytes, max_len: i32) -> IResult<NomBytes, Option<usize>> {
    let (s, length) = be_i32(s)?;
    if length == -1 {
        return Ok((s, None));
    }
    if !(0..=max_len).contains(&length) {
        return Err(failure(s, nom::error::ErrorKind::TooLarge));
    }
    Ok((s, Some(length as usize)))
}
