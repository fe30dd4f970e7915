//! Lexical scans over raw C++ source.
//!
//! Everything here works on byte offsets into UTF-8 text. Only ASCII bytes are
//! ever significant, so multi-byte characters pass through untouched.

/// Identifier characters: `[A-Za-z0-9_]`.
#[must_use]
pub fn is_symbol_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[derive(Clone, Copy)]
enum MaskState {
    Code,
    Quoted { quote: char, escaped: bool },
    LineComment,
    BlockComment,
}

/// Blank out string/char literals and comments in a single forward pass.
///
/// Masked characters become spaces, one per byte, so every offset in the
/// result points at the same place as in `text`. Newlines are kept. An
/// unterminated literal ends at the end of its line.
#[must_use]
pub fn mask_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut state = MaskState::Code;

    let blank = |out: &mut String, c: char| {
        for _ in 0..c.len_utf8() {
            out.push(' ');
        }
    };

    while let Some(c) = chars.next() {
        state = match state {
            MaskState::Code => match c {
                '"' | '\'' => {
                    out.push(' ');
                    MaskState::Quoted {
                        quote: c,
                        escaped: false,
                    }
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    MaskState::LineComment
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    MaskState::BlockComment
                }
                _ => {
                    out.push(c);
                    MaskState::Code
                }
            },
            MaskState::Quoted { quote, escaped } => {
                if c == '\n' {
                    out.push('\n');
                    MaskState::Code
                } else {
                    blank(&mut out, c);
                    if escaped {
                        MaskState::Quoted {
                            quote,
                            escaped: false,
                        }
                    } else if c == '\\' {
                        MaskState::Quoted {
                            quote,
                            escaped: true,
                        }
                    } else if c == quote {
                        MaskState::Code
                    } else {
                        state
                    }
                }
            }
            MaskState::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    MaskState::Code
                } else {
                    blank(&mut out, c);
                    MaskState::LineComment
                }
            }
            MaskState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    MaskState::Code
                } else {
                    if c == '\n' {
                        out.push('\n');
                    } else {
                        blank(&mut out, c);
                    }
                    MaskState::BlockComment
                }
            }
        };
    }

    out
}

/// Whether the function named at `offset` is being defined rather than declared.
///
/// Scans forward tracking parenthesis depth. Once the depth is back to zero
/// after at least one `(`, the next `;` means declaration and the next `{`
/// means definition. Running off the end is a declaration.
#[must_use]
pub fn is_definition_at_point(text: &str, offset: usize) -> bool {
    let masked = mask_literals(text);
    let Some(rest) = masked.as_bytes().get(offset..) else {
        return false;
    };

    let mut depth: i64 = 0;
    let mut seen_paren = false;
    for &b in rest {
        if depth == 0 && seen_paren {
            match b {
                b';' => return false,
                b'{' => return true,
                _ => {}
            }
        }
        match b {
            b'(' => {
                depth += 1;
                seen_paren = true;
            }
            b')' => depth -= 1,
            _ => {}
        }
    }
    false
}

/// Whether the word under `column` is preceded by `::`, ignoring whitespace.
///
/// `column` is a byte offset into `line`; any part of the word left of it is
/// skipped first.
#[must_use]
pub fn preceding_qualifier(line: &str, column: usize) -> bool {
    let bytes = line.as_bytes();
    let mut pos = column.min(bytes.len());

    while pos > 0 && is_symbol_byte(bytes[pos - 1]) {
        pos -= 1;
    }
    while pos > 0 && bytes[pos - 1] <= b' ' {
        pos -= 1;
    }
    pos >= 2 && bytes[pos - 1] == b':' && bytes[pos - 2] == b':'
}

/// The identifier immediately before the word under `column`, or an empty
/// string when there is none.
#[must_use]
pub fn preceding_word(line: &str, column: usize) -> String {
    let bytes = line.as_bytes();
    if column >= bytes.len() {
        return String::new();
    }

    // One past the byte under inspection, so the loops can stop at zero.
    let mut pos = column + 1;
    while pos > 0 && is_symbol_byte(bytes[pos - 1]) {
        pos -= 1;
    }
    while pos > 0 && bytes[pos - 1] <= b' ' {
        pos -= 1;
    }
    let end = pos;
    while pos > 0 && is_symbol_byte(bytes[pos - 1]) {
        pos -= 1;
    }
    String::from_utf8_lossy(&bytes[pos..end]).into_owned()
}

/// The identifier touching `column`, including one that ends right at it.
#[must_use]
pub fn word_at(line: &str, column: usize) -> Option<&str> {
    let bytes = line.as_bytes();
    let column = column.min(bytes.len());

    let mut start = column;
    while start > 0 && is_symbol_byte(bytes[start - 1]) {
        start -= 1;
    }
    let mut end = column;
    while end < bytes.len() && is_symbol_byte(bytes[end]) {
        end += 1;
    }

    if start == end {
        return None;
    }
    line.get(start..end)
}

/// Byte offset within `line` of a UTF-16 column, clamped to the line end.
#[must_use]
pub fn utf16_to_byte(line: &str, character: u32) -> usize {
    let mut units = 0u32;
    for (idx, c) in line.char_indices() {
        if units >= character {
            return idx;
        }
        units += c.len_utf16() as u32;
    }
    line.len()
}

/// Byte offset of the start of `line` (0-based), `None` past the last line.
#[must_use]
pub fn line_start(text: &str, line: u32) -> Option<usize> {
    if line == 0 {
        return Some(0);
    }
    text.match_indices('\n')
        .nth(line as usize - 1)
        .map(|(idx, _)| idx + 1)
}
