//! Telnet byte stuffing and command stripping (RFC 854)
//!
//! Outgoing payload is escaped with [`escape_iac`]. Incoming bytes go through
//! a [`TelnetDecoder`], which separates payload from protocol commands and
//! carries incomplete sequences over to the next call.

use bytes::BytesMut;

// Telnet protocol constants
pub const IAC: u8 = 255; // Interpret As Command
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250; // Subnegotiation Begin
pub const GA: u8 = 249;
pub const NOP: u8 = 241;
pub const SE: u8 = 240; // Subnegotiation End

// Options this client knows about
pub const OPT_BINARY: u8 = 0;
pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;
pub const OPT_TERMINAL_TYPE: u8 = 24;
pub const OPT_NAWS: u8 = 31; // Negotiate About Window Size

/// TTYPE subnegotiation verbs
pub const TTYPE_IS: u8 = 0;
pub const TTYPE_SEND: u8 = 1;

/// Upper bound for a buffered, unterminated sequence
const MAX_PENDING: usize = 8192;

/// A protocol command pulled out of the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetCommand {
    /// DO / DONT / WILL / WONT with its option byte
    Negotiate {
        /// Verb (one of DO, DONT, WILL, WONT)
        command: u8,
        /// Option code
        option: u8,
    },
    /// `IAC SB <option> <data...> IAC SE`, with doubled IACs in data collapsed
    Subnegotiation {
        /// Option code
        option: u8,
        /// Parameter bytes
        data: Vec<u8>,
    },
    /// Any other two-byte command (NOP, GA, AYT, ...)
    Other(u8),
}

/// Result of decoding one chunk
#[derive(Debug, Default)]
pub struct Decoded {
    /// Payload bytes with every command removed
    pub data: BytesMut,
    /// Commands in arrival order
    pub commands: Vec<TelnetCommand>,
}

/// Double every IAC byte so payload can never be read as a command
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(data.len());
    for &byte in data {
        if byte == IAC {
            escaped.push(IAC);
            escaped.push(IAC);
        } else {
            escaped.push(byte);
        }
    }
    escaped
}

/// Decode a complete buffer in one shot, returning payload only
pub fn unescape_iac(data: &[u8]) -> Vec<u8> {
    TelnetDecoder::new().decode(data).data.to_vec()
}

/// Build an `IAC <command> <option>` triple
pub fn negotiation(command: u8, option: u8) -> [u8; 3] {
    [IAC, command, option]
}

/// Build a subnegotiation frame, escaping IAC inside the parameters
pub fn subnegotiation(option: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = vec![IAC, SB, option];
    frame.extend_from_slice(&escape_iac(data));
    frame.extend_from_slice(&[IAC, SE]);
    frame
}

/// Stateful incoming stream decoder
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    /// Bytes of a command sequence split across reads
    pending: BytesMut,
    /// Inside an oversized subnegotiation whose body is being dropped
    discarding: bool,
}

impl TelnetDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a partial command is waiting for more bytes
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.discarding
    }

    /// Drop any partial command
    pub fn reset(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    /// Decode a chunk of raw bytes
    pub fn decode(&mut self, input: &[u8]) -> Decoded {
        let mut raw = std::mem::take(&mut self.pending);
        raw.extend_from_slice(input);

        let mut out = Decoded::default();
        let mut i = 0;

        if self.discarding {
            match skip_subnegotiation(&raw) {
                Ok(consumed) => {
                    self.discarding = false;
                    i = consumed;
                }
                Err(keep) => {
                    self.pending.extend_from_slice(&raw[keep..]);
                    return out;
                }
            }
        }

        while i < raw.len() {
            if raw[i] != IAC {
                out.data.extend_from_slice(&[raw[i]]);
                i += 1;
                continue;
            }

            if i + 1 >= raw.len() {
                self.stash(&raw[i..]);
                break;
            }

            match raw[i + 1] {
                IAC => {
                    // Escaped IAC (255 255 -> 255)
                    out.data.extend_from_slice(&[IAC]);
                    i += 2;
                }
                DO | DONT | WILL | WONT => {
                    if i + 2 >= raw.len() {
                        self.stash(&raw[i..]);
                        break;
                    }
                    out.commands.push(TelnetCommand::Negotiate {
                        command: raw[i + 1],
                        option: raw[i + 2],
                    });
                    i += 3;
                }
                SB => match scan_subnegotiation(&raw[i + 2..]) {
                    Some((command, consumed)) => {
                        out.commands.push(command);
                        i += 2 + consumed;
                    }
                    None if raw.len() - i > MAX_PENDING => {
                        tracing::warn!(
                            len = raw.len() - i,
                            "discarding oversized telnet subnegotiation"
                        );
                        self.discarding = true;
                        let body = &raw[i + 2..];
                        if let Err(keep) = skip_subnegotiation(body) {
                            self.pending.extend_from_slice(&body[keep..]);
                        }
                        break;
                    }
                    None => {
                        self.stash(&raw[i..]);
                        break;
                    }
                },
                other => {
                    out.commands.push(TelnetCommand::Other(other));
                    i += 2;
                }
            }
        }

        out
    }

    fn stash(&mut self, rest: &[u8]) {
        self.pending.extend_from_slice(rest);
    }
}

/// Find the `IAC SE` ending a subnegotiation body without keeping it.
///
/// `Ok` carries the bytes consumed, terminator included. `Err` carries the
/// offset of a trailing lone IAC (or the body length) that must be kept
/// for the next chunk.
fn skip_subnegotiation(body: &[u8]) -> Result<usize, usize> {
    let mut j = 0;
    while j < body.len() {
        if body[j] != IAC {
            j += 1;
            continue;
        }
        match body.get(j + 1) {
            None => return Err(j),
            Some(&SE) => return Ok(j + 2),
            Some(_) => j += 2,
        }
    }
    Err(body.len())
}

/// Scan a subnegotiation body up to its own `IAC SE`.
///
/// `body` starts right after `IAC SB`. Returns the command and the number of
/// body bytes consumed (terminator included), or `None` if the terminator has
/// not arrived yet.
fn scan_subnegotiation(body: &[u8]) -> Option<(TelnetCommand, usize)> {
    let mut params = Vec::new();
    let mut j = 0;

    while j < body.len() {
        if body[j] != IAC {
            params.push(body[j]);
            j += 1;
            continue;
        }
        let next = *body.get(j + 1)?;
        match next {
            SE => {
                let option = params.first().copied().unwrap_or(0);
                let data = params.get(1..).map(<[u8]>::to_vec).unwrap_or_default();
                return Some((TelnetCommand::Subnegotiation { option, data }, j + 2));
            }
            IAC => {
                params.push(IAC);
                j += 2;
            }
            _ => {
                // Stray command inside SB: ignore it and keep scanning
                j += 2;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_doubles_iac() {
        assert_eq!(escape_iac(&[0xFF]), vec![0xFF, 0xFF]);
        assert_eq!(escape_iac(b"ab"), b"ab".to_vec());
        assert_eq!(escape_iac(&[1, 0xFF, 2, 0xFF]), vec![1, 0xFF, 0xFF, 2, 0xFF, 0xFF]);
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let data: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        assert_eq!(unescape_iac(&escape_iac(&data)), data);
    }

    #[test]
    fn test_escaped_stream_has_no_lone_iac() {
        let escaped = escape_iac(&[0xFF, 0x00, 0xFF, 0xFF]);
        let mut iter = escaped.iter().peekable();
        while let Some(&b) = iter.next() {
            if b == IAC {
                assert_eq!(iter.next(), Some(&IAC));
            }
        }
    }

    #[test]
    fn test_strips_negotiation() {
        let mut decoder = TelnetDecoder::new();
        let out = decoder.decode(&[b'h', IAC, DO, OPT_NAWS, b'i', IAC, WILL, OPT_ECHO]);
        assert_eq!(&out.data[..], b"hi");
        assert_eq!(
            out.commands,
            vec![
                TelnetCommand::Negotiate { command: DO, option: OPT_NAWS },
                TelnetCommand::Negotiate { command: WILL, option: OPT_ECHO },
            ]
        );
    }

    #[test]
    fn test_subnegotiation_is_scanned_to_terminator() {
        let mut decoder = TelnetDecoder::new();
        let input = [
            b'a', IAC, SB, OPT_TERMINAL_TYPE, TTYPE_SEND, IAC, IAC, 7, IAC, SE, b'b',
        ];
        let out = decoder.decode(&input);
        assert_eq!(&out.data[..], b"ab");
        assert_eq!(
            out.commands,
            vec![TelnetCommand::Subnegotiation {
                option: OPT_TERMINAL_TYPE,
                data: vec![TTYPE_SEND, IAC, 7],
            }]
        );
    }

    #[test]
    fn test_split_sequences_carry_over() {
        let mut decoder = TelnetDecoder::new();
        let first = decoder.decode(&[b'x', IAC]);
        assert_eq!(&first.data[..], b"x");
        assert!(decoder.has_pending());

        let second = decoder.decode(&[DO]);
        assert!(second.data.is_empty());
        assert!(second.commands.is_empty());

        let third = decoder.decode(&[OPT_TERMINAL_TYPE, b'y']);
        assert_eq!(&third.data[..], b"y");
        assert_eq!(
            third.commands,
            vec![TelnetCommand::Negotiate { command: DO, option: OPT_TERMINAL_TYPE }]
        );
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_split_escaped_iac() {
        let mut decoder = TelnetDecoder::new();
        assert!(decoder.decode(&[IAC]).data.is_empty());
        assert_eq!(&decoder.decode(&[IAC]).data[..], &[IAC]);
    }

    #[test]
    fn test_unterminated_subnegotiation_waits() {
        let mut decoder = TelnetDecoder::new();
        let out = decoder.decode(&[IAC, SB, OPT_NAWS, 0, 80]);
        assert!(out.data.is_empty());
        assert!(out.commands.is_empty());
        let out = decoder.decode(&[0, 24, IAC, SE, b'z']);
        assert_eq!(&out.data[..], b"z");
        assert_eq!(out.commands.len(), 1);
    }

    #[test]
    fn test_oversized_subnegotiation_never_leaks_into_payload() {
        let mut decoder = TelnetDecoder::new();
        let mut first = vec![b'a', IAC, SB, OPT_TERMINAL_TYPE];
        first.extend(std::iter::repeat(b'Q').take(9000));
        let out = decoder.decode(&first);
        assert_eq!(&out.data[..], b"a");
        assert!(decoder.has_pending());

        // Doubled IAC inside the body is not the terminator
        let out = decoder.decode(&[b'Q', IAC, IAC, b'Q', IAC]);
        assert!(out.data.is_empty());

        let out = decoder.decode(&[SE, b'o', b'k']);
        assert_eq!(&out.data[..], b"ok");
        assert!(out.commands.is_empty());
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_two_byte_commands() {
        let mut decoder = TelnetDecoder::new();
        let out = decoder.decode(&[IAC, NOP, b'o', IAC, GA, b'k']);
        assert_eq!(&out.data[..], b"ok");
        assert_eq!(out.commands, vec![TelnetCommand::Other(NOP), TelnetCommand::Other(GA)]);
    }

    #[test]
    fn test_subnegotiation_frame_escapes_params() {
        let frame = subnegotiation(OPT_NAWS, &[0, 0xFF, 0, 24]);
        assert_eq!(frame, vec![IAC, SB, OPT_NAWS, 0, IAC, IAC, 0, 24, IAC, SE]);
    }
}
