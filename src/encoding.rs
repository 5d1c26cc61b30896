//! Name and comment encodings for archive metadata.
//!
//! ZIP names default to UTF-8 (or are declared UTF-8 via the language
//! encoding flag), while ARJ and many legacy ZIP tools use IBM code page
//! 437. The CP437 table below covers the full 0x80..=0xFF range; bytes
//! 0x00..=0x7F map to ASCII unchanged.

/// Character encoding used to decode raw name/comment bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-8, the platform default
    #[default]
    Utf8,
    /// IBM code page 437 (original PC OEM charset)
    Cp437,
}

impl Encoding {
    /// Canonical name of the encoding, e.g. `"UTF-8"`.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Cp437 => "CP437",
        }
    }

    /// Decodes raw bytes into a string.
    ///
    /// UTF-8 decoding is lossy on invalid sequences; CP437 decoding is
    /// total. Returns the decoded string and whether decoding was lossless.
    pub fn decode(self, bytes: &[u8]) -> (String, bool) {
        match self {
            Encoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(s) => (s.to_string(), true),
                Err(_) => (String::from_utf8_lossy(bytes).into_owned(), false),
            },
            Encoding::Cp437 => {
                let mut out = String::with_capacity(bytes.len());
                for &b in bytes {
                    out.push(cp437_to_char(b));
                }
                (out, true)
            }
        }
    }

    /// Encodes a string into raw bytes, or `None` if some character has no
    /// representation in this encoding.
    pub fn encode(self, s: &str) -> Option<Vec<u8>> {
        match self {
            Encoding::Utf8 => Some(s.as_bytes().to_vec()),
            Encoding::Cp437 => {
                let mut out = Vec::with_capacity(s.len());
                for c in s.chars() {
                    out.push(char_to_cp437(c)?);
                }
                Some(out)
            }
        }
    }

    /// Whether `s` survives an encode/decode round trip unchanged.
    pub fn can_encode(self, s: &str) -> bool {
        self.encode(s).is_some()
    }
}

fn cp437_to_char(b: u8) -> char {
    if b < 0x80 {
        b as char
    } else {
        CP437_HIGH[(b - 0x80) as usize]
    }
}

fn char_to_cp437(c: char) -> Option<u8> {
    if c.is_ascii() {
        return Some(c as u8);
    }
    CP437_HIGH
        .iter()
        .position(|&t| t == c)
        .map(|i| (i + 0x80) as u8)
}

/// Mapping of bytes 0x80..=0xFF to Unicode scalar values.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];
