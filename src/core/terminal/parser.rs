//! ANSI escape sequence parser
//!
//! Parses the VT100/ANSI subset BBS software emits. Bytes above 0x7F are
//! decoded as code page 437, the de-facto BBS character set. OSC strings are
//! swallowed; malformed sequences drop back to ground state silently.

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    Csi,
    Osc,
    OscEscape,
}

/// Parsed ANSI event
#[derive(Debug, Clone)]
pub enum AnsiEvent {
    /// Printable character
    Print(char),
    /// C0 control byte
    Control(u8),
    /// `ESC [ ... <action>`
    Csi {
        /// Numeric parameters; empty positions are 0
        params: Vec<u16>,
        /// Private marker such as `?`
        private: Option<u8>,
        /// Intermediate bytes (0x20-0x2F)
        intermediates: Vec<u8>,
        /// Final byte
        action: u8,
    },
    /// `ESC <intermediates> <action>`
    Esc {
        /// Intermediate bytes
        intermediates: Vec<u8>,
        /// Final byte
        action: u8,
    },
}

/// Parameters kept per CSI sequence; extras are ignored
const MAX_PARAMS: usize = 32;
/// Intermediate bytes kept per sequence
const MAX_INTERMEDIATES: usize = 4;

/// ANSI escape sequence parser
#[derive(Debug)]
pub struct AnsiParser {
    state: State,
    params: Vec<u16>,
    current: Option<u16>,
    private: Option<u8>,
    intermediates: Vec<u8>,
}

impl AnsiParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            params: Vec::new(),
            current: None,
            private: None,
            intermediates: Vec::new(),
        }
    }

    /// Parse bytes and return events. Sequences may span calls.
    pub fn parse(&mut self, data: &[u8]) -> Vec<AnsiEvent> {
        data.iter().filter_map(|&byte| self.advance(byte)).collect()
    }

    fn enter(&mut self, state: State) {
        self.state = state;
        self.params.clear();
        self.current = None;
        self.private = None;
        self.intermediates.clear();
    }

    fn advance(&mut self, byte: u8) -> Option<AnsiEvent> {
        match self.state {
            State::Ground => match byte {
                0x1B => {
                    self.enter(State::Escape);
                    None
                }
                0x00..=0x1F => Some(AnsiEvent::Control(byte)),
                0x7F => None,
                _ => Some(AnsiEvent::Print(cp437_char(byte))),
            },
            State::Escape => match byte {
                b'[' => {
                    self.enter(State::Csi);
                    None
                }
                b']' => {
                    self.enter(State::Osc);
                    None
                }
                0x20..=0x2F => {
                    self.push_intermediate(byte);
                    None
                }
                0x30..=0x7E => {
                    let event = AnsiEvent::Esc {
                        intermediates: std::mem::take(&mut self.intermediates),
                        action: byte,
                    };
                    self.enter(State::Ground);
                    Some(event)
                }
                0x1B => {
                    self.enter(State::Escape);
                    None
                }
                0x00..=0x1F => Some(AnsiEvent::Control(byte)),
                _ => {
                    self.enter(State::Ground);
                    None
                }
            },
            State::Csi => self.csi(byte),
            State::Osc => {
                match byte {
                    0x07 => self.enter(State::Ground),
                    0x1B => self.state = State::OscEscape,
                    _ => {}
                }
                None
            }
            State::OscEscape => {
                if byte == b'\\' {
                    self.enter(State::Ground);
                    None
                } else {
                    self.enter(State::Escape);
                    self.advance(byte)
                }
            }
        }
    }

    fn push_param(&mut self, value: u16) {
        if self.params.len() < MAX_PARAMS {
            self.params.push(value);
        }
    }

    fn push_intermediate(&mut self, byte: u8) {
        if self.intermediates.len() < MAX_INTERMEDIATES {
            self.intermediates.push(byte);
        }
    }

    fn csi(&mut self, byte: u8) -> Option<AnsiEvent> {
        match byte {
            b'0'..=b'9' => {
                let digit = u16::from(byte - b'0');
                let value = self.current.unwrap_or(0).saturating_mul(10).saturating_add(digit);
                self.current = Some(value);
                None
            }
            b';' | b':' => {
                let value = self.current.take().unwrap_or(0);
                self.push_param(value);
                None
            }
            b'?' | b'>' | b'<' | b'=' if self.params.is_empty() && self.current.is_none() => {
                self.private = Some(byte);
                None
            }
            0x20..=0x2F => {
                self.push_intermediate(byte);
                None
            }
            0x40..=0x7E => {
                if let Some(last) = self.current.take() {
                    self.push_param(last);
                }
                let event = AnsiEvent::Csi {
                    params: std::mem::take(&mut self.params),
                    private: self.private.take(),
                    intermediates: std::mem::take(&mut self.intermediates),
                    action: byte,
                };
                self.enter(State::Ground);
                Some(event)
            }
            0x1B => {
                self.enter(State::Escape);
                None
            }
            0x00..=0x1F => Some(AnsiEvent::Control(byte)),
            _ => {
                self.enter(State::Ground);
                None
            }
        }
    }
}

/// Code page 437, 0x80..=0xFF
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

/// Decode one CP437 byte
pub fn cp437_char(byte: u8) -> char {
    if byte < 0x80 {
        byte as char
    } else {
        CP437_HIGH[(byte - 0x80) as usize]
    }
}

impl Default for AnsiParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printed(events: &[AnsiEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                AnsiEvent::Print(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_text() {
        let mut parser = AnsiParser::new();
        let events = parser.parse(b"Hello");
        assert_eq!(events.len(), 5);
        assert_eq!(printed(&events), "Hello");
    }

    #[test]
    fn test_parse_csi_cursor_up() {
        let mut parser = AnsiParser::new();
        let events = parser.parse(b"\x1b[5A");
        assert_eq!(events.len(), 1);
        match &events[0] {
            AnsiEvent::Csi { params, action, .. } => {
                assert_eq!(params, &[5]);
                assert_eq!(*action, b'A');
            }
            _ => panic!("Expected CSI dispatch"),
        }
    }

    #[test]
    fn test_long_parameter_run_is_capped() {
        let mut parser = AnsiParser::new();
        let mut seq = b"\x1b[".to_vec();
        seq.extend(std::iter::repeat(b';').take(10_000));
        seq.extend_from_slice(b"7Hok");
        let events = parser.parse(&seq);
        match &events[0] {
            AnsiEvent::Csi { params, action, .. } => {
                assert_eq!(params.len(), MAX_PARAMS);
                assert_eq!(*action, b'H');
            }
            _ => panic!("Expected CSI dispatch"),
        }
        assert_eq!(printed(&events), "ok");
    }

    #[test]
    fn test_parse_sgr() {
        let mut parser = AnsiParser::new();
        let events = parser.parse(b"\x1b[1;31m");
        assert_eq!(events.len(), 1);
        match &events[0] {
            AnsiEvent::Csi { params, action, .. } => {
                assert_eq!(params, &[1, 31]);
                assert_eq!(*action, b'm');
            }
            _ => panic!("Expected CSI dispatch"),
        }
    }

    #[test]
    fn test_split_sequence_across_calls() {
        let mut parser = AnsiParser::new();
        assert!(parser.parse(b"\x1b[1").is_empty());
        let events = parser.parse(b"0;5H");
        match &events[..] {
            [AnsiEvent::Csi { params, action, .. }] => {
                assert_eq!(params, &[10, 5]);
                assert_eq!(*action, b'H');
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cp437_high_bytes() {
        let mut parser = AnsiParser::new();
        let events = parser.parse(&[0xC9, 0xCD, 0xBB, 0xB0]);
        assert_eq!(printed(&events), "╔═╗░");
        assert_eq!(cp437_char(b'A'), 'A');
        assert_eq!(cp437_char(0x80), 'Ç');
    }

    #[test]
    fn test_private_marker() {
        let mut parser = AnsiParser::new();
        match &parser.parse(b"\x1b[?25l")[..] {
            [AnsiEvent::Csi { params, private, action, .. }] => {
                assert_eq!(params, &[25]);
                assert_eq!(*private, Some(b'?'));
                assert_eq!(*action, b'l');
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_control_inside_csi_executes() {
        let mut parser = AnsiParser::new();
        let events = parser.parse(b"\x1b[2\rJ");
        assert!(matches!(events[0], AnsiEvent::Control(b'\r')));
        assert!(matches!(&events[1], AnsiEvent::Csi { action: b'J', .. }));
    }

    #[test]
    fn test_osc_with_st_terminator() {
        let mut parser = AnsiParser::new();
        let events = parser.parse(b"\x1b]2;x\x1b\\A");
        assert_eq!(printed(&events), "A");
    }

    #[test]
    fn test_osc_is_consumed() {
        let mut parser = AnsiParser::new();
        let events = parser.parse(b"\x1b]0;title\x07ok");
        assert_eq!(printed(&events), "ok");
    }
}
