//! TS3 message framing.
//!
//! Request format (ASCII):
//!
//! ```text
//! $LLL;<arg0>;<arg1>;...;<CRC>\r
//! ```
//!
//! - `LLL` is the zero-padded frame length, measured on the placeholder
//!   frame `$000;<args>;0000` (the real frame has the same length).
//! - `CRC` is CRC-16/MODBUS (poly 0x8005 reflected, init 0xFFFF) of the
//!   placeholder frame, written as four hex digits, low byte first.
//!
//! Replies are `;`-separated as well. Field 1 holds the reply code: `1` is
//! a plain ACK, `2` a NACK whose field 2 is the reason, anything else echoes
//! the command id of a query.

use std::fmt;

use crc::{Crc, CRC_16_MODBUS};

use crate::error::{InstrumentError, InstrumentResult};

/// CRC-16/MODBUS engine used for every frame.
pub const TS3_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Reply code of a bare acknowledge.
pub const ACK: &str = "1";

/// Reply code of a negative acknowledge.
pub const NACK: &str = "2";

/// Size of each read while a reply is collected.
pub const RESPONSE_BUFFER_LEN: usize = 512;

/// `LLL` has three digits.
pub const MAX_FRAME_LEN: usize = 999;

const CRC_PLACEHOLDER: &str = "0000";

/// CRC field for `data`: four uppercase hex digits, low byte first.
pub fn checksum_field(data: &[u8]) -> String {
    let crc = TS3_CRC.checksum(data);
    format!("{:02X}{:02X}", crc & 0x00FF, crc >> 8)
}

/// Build the on-wire request for a command id and its arguments.
pub fn encode_command<S: AsRef<str>>(args: &[S]) -> InstrumentResult<Vec<u8>> {
    if args.is_empty() {
        return Err(InstrumentError::InvalidArgument(
            "a TS3 frame needs at least a command id".to_string(),
        ));
    }
    if let Some(bad) = args
        .iter()
        .map(|arg| arg.as_ref())
        .find(|arg| arg.contains(';') || arg.contains('\r'))
    {
        return Err(InstrumentError::InvalidArgument(format!(
            "TS3 argument {:?} contains a field separator",
            bad
        )));
    }

    let body = args.iter().map(|arg| arg.as_ref()).collect::<Vec<_>>().join(";");
    let placeholder = format!("${:03};{};{}", 0, body, CRC_PLACEHOLDER);
    if placeholder.len() > MAX_FRAME_LEN {
        return Err(InstrumentError::InvalidArgument(format!(
            "TS3 frame of {} bytes exceeds {} bytes",
            placeholder.len(),
            MAX_FRAME_LEN
        )));
    }

    let crc = checksum_field(placeholder.as_bytes());
    let mut frame = format!("${:03};{};{}", placeholder.len(), body, crc).into_bytes();
    frame.push(b'\r');
    Ok(frame)
}

/// Reasons the TS3 gives in a NACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackReason {
    /// 1
    UnknownCommand,
    /// 2
    ParameterOutOfRange,
    /// 3
    Busy,
    /// 4
    NotLoggedIn,
    /// 5
    NotImplemented,
    /// 6: bad start or end marker, CRC or length.
    MessageStructure,
    /// 7
    ParameterCount,
    /// 8
    IdNotFound,
    /// 9
    InternalError,
    /// 10
    Booting,
    /// 11
    DutNotPresent,
    /// Any code the firmware documentation does not list.
    Other(String),
}

impl NackReason {
    /// Map the numeric reason field of a NACK.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => Self::UnknownCommand,
            "2" => Self::ParameterOutOfRange,
            "3" => Self::Busy,
            "4" => Self::NotLoggedIn,
            "5" => Self::NotImplemented,
            "6" => Self::MessageStructure,
            "7" => Self::ParameterCount,
            "8" => Self::IdNotFound,
            "9" => Self::InternalError,
            "10" => Self::Booting,
            "11" => Self::DutNotPresent,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand => f.write_str("unknown command"),
            Self::ParameterOutOfRange => {
                f.write_str("parameter out of range, one or more parameters are outside the range")
            }
            Self::Busy => f.write_str("busy, the unit cannot handle communications"),
            Self::NotLoggedIn => {
                f.write_str("not logged in, the command requires a correct login")
            }
            Self::NotImplemented => f.write_str("command known but not yet implemented"),
            Self::MessageStructure => {
                f.write_str("message structure incorrect (BOR, EOR, CRC, length)")
            }
            Self::ParameterCount => f.write_str("incorrect number of parameters for this command"),
            Self::IdNotFound => f.write_str("ID not found"),
            Self::InternalError => {
                f.write_str("internal error, the command could not be executed")
            }
            Self::Booting => f.write_str("booting, the unit cannot handle communications yet"),
            Self::DutNotPresent => f.write_str("DUT not present"),
            Self::Other(code) => write!(f, "error code {}", code),
        }
    }
}

/// A decoded reply. Always has at least the header and code fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ts3Response {
    fields: Vec<String>,
}

impl Ts3Response {
    /// Reply code (field 1).
    pub fn code(&self) -> &str {
        self.fields.get(1).map(String::as_str).unwrap_or_default()
    }

    /// All fields, header and CRC included.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Field `index`, or `MalformedResponse` when the reply is too short.
    pub fn field(&self, index: usize) -> InstrumentResult<&str> {
        self.fields.get(index).map(String::as_str).ok_or_else(|| {
            InstrumentError::MalformedResponse(format!(
                "reply to {} has no field {}: {}",
                self.code(),
                index,
                self.fields.join(";")
            ))
        })
    }

    /// `"1"` is true, anything else false.
    pub fn flag(&self, index: usize) -> InstrumentResult<bool> {
        Ok(self.field(index)? == "1")
    }

    /// Field `index` parsed as `T`.
    pub fn parse_field<T: std::str::FromStr>(&self, index: usize) -> InstrumentResult<T> {
        let raw = self.field(index)?;
        raw.parse().map_err(|_| {
            InstrumentError::MalformedResponse(format!(
                "field {} of reply to {} is not a number: {:?}",
                index,
                self.code(),
                raw
            ))
        })
    }
}

/// Split a raw reply and check it against the expected reply code.
pub fn decode_response(raw: &[u8], expected: &str) -> InstrumentResult<Ts3Response> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches(&['\r', '\n', '\0'][..]).trim();
    let fields: Vec<String> = text.split(';').map(str::to_string).collect();

    if fields.len() < 2 {
        return Err(InstrumentError::MalformedResponse(format!(
            "TS3 reply has no code field: {:?}",
            text
        )));
    }

    let response = Ts3Response { fields };
    if response.code() == NACK && expected != NACK {
        let reason = response
            .fields
            .get(2)
            .map(|code| NackReason::from_code(code))
            .unwrap_or_else(|| NackReason::Other(String::new()));
        return Err(InstrumentError::Ts3Nack(reason));
    }

    if response.code() != expected {
        return Err(InstrumentError::UnexpectedResponse {
            expected: expected.to_string(),
            got: response.code().to_string(),
        });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_is_modbus_byte_swapped() {
        // CRC-16/MODBUS check value for "123456789" is 0x4B37.
        assert_eq!(TS3_CRC.checksum(b"123456789"), 0x4B37);
        assert_eq!(checksum_field(b"123456789"), "374B");
    }

    #[test]
    fn test_encode_poll_frame() {
        let frame = encode_command(&["10"]).unwrap();
        let expected_crc = checksum_field(b"$000;10;0000");
        assert_eq!(frame, format!("$012;10;{}\r", expected_crc).into_bytes());
    }

    #[test]
    fn test_length_counts_placeholder() {
        let frame = encode_command(&["40", "0", "3", "1"]).unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.starts_with("$018;40;0;3;1;"));
        // Length excludes the trailing carriage return.
        assert_eq!(text.trim_end_matches('\r').len(), 18);
    }

    #[test]
    fn test_separator_in_argument_rejected() {
        assert!(encode_command(&["83", "bob;alice"]).is_err());
        assert!(encode_command::<&str>(&[]).is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let line = "A".repeat(1000);
        let result = encode_command(&["200", line.as_str()]);
        assert!(matches!(result, Err(InstrumentError::InvalidArgument(_))));
    }

    #[test]
    fn test_decode_ack() {
        let response = decode_response(b"$011;1;ABCD\r", ACK).unwrap();
        assert_eq!(response.code(), "1");
        assert_eq!(response.fields().len(), 3);
    }

    #[test]
    fn test_decode_query_fields() {
        let response = decode_response(b"$020;43;3.297;ABCD\r", "43").unwrap();
        assert_eq!(response.parse_field::<f64>(2).unwrap(), 3.297);
        assert!(response.field(5).is_err());
    }

    #[test]
    fn test_decode_nack_reasons() {
        let cases = [
            ("1", NackReason::UnknownCommand),
            ("3", NackReason::Busy),
            ("6", NackReason::MessageStructure),
            ("10", NackReason::Booting),
            ("11", NackReason::DutNotPresent),
            ("42", NackReason::Other("42".to_string())),
        ];
        for (code, reason) in cases {
            let raw = format!("$013;2;{};ABCD\r", code);
            match decode_response(raw.as_bytes(), ACK) {
                Err(InstrumentError::Ts3Nack(got)) => assert_eq!(got, reason),
                other => panic!("expected NACK for code {}, got {:?}", code, other),
            }
        }
    }

    #[test]
    fn test_decode_unexpected_code() {
        let result = decode_response(b"$012;13;1;0;x;ABCD\r", "15");
        assert!(matches!(
            result,
            Err(InstrumentError::UnexpectedResponse { ref expected, ref got })
                if expected == "15" && got == "13"
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_response(b"hello\r", ACK),
            Err(InstrumentError::MalformedResponse(_))
        ));
    }
}
