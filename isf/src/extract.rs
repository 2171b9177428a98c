//! Locate the JSON metadata block at the top of an ISF fragment shader.
//!
//! The metadata is a single JSON object that is usually wrapped in a block comment.
//! Only block comments are scanned, so braces in line comments or shader code are ignored.

/// Slices of the fragment shader text split around the JSON metadata.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Metadata<'a> {
    /// Text from the start of the file through the closing comment delimiter and line break.
    pub source: &'a str,
    /// The JSON object without the surrounding comment text.
    pub json: &'a str,
    /// The shader code following the metadata.
    pub shader: &'a str,
}

/// Find the JSON metadata object in `text`.
///
/// An unterminated object inside a comment is still returned
/// so that JSON parsing can report a meaningful error.
pub fn extract_metadata(text: &str) -> Option<Metadata<'_>> {
    let mut search_start = 0;
    while let Some(open) = text[search_start..].find("/*").map(|i| i + search_start) {
        let body_start = open + 2;
        let close = text[body_start..].find("*/").map(|i| i + body_start)?;
        let body = &text[body_start..close];

        if let Some(brace) = body.find('{') {
            let json = match balanced_object_end(&body[brace..]) {
                Some(end) => &body[brace..brace + end],
                None => body[brace..].trim_end(),
            };
            let end = skip_line_break(text, close + 2);
            return Some(Metadata {
                source: &text[..end],
                json,
                shader: &text[end..],
            });
        }

        // Skip comments like license headers without any JSON.
        search_start = close + 2;
    }

    // Some tools write the metadata without a comment.
    let brace = text.len() - text.trim_start().len();
    if text[brace..].starts_with('{') {
        let end = brace + balanced_object_end(&text[brace..])?;
        let json = &text[brace..end];
        let end = skip_line_break(text, end);
        return Some(Metadata {
            source: &text[..end],
            json,
            shader: &text[end..],
        });
    }

    None
}

/// Return the byte index just past the `}` that closes the `{` at the start of `text`.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => (),
        }
    }

    None
}

fn skip_line_break(text: &str, index: usize) -> usize {
    let rest = &text[index..];
    if rest.starts_with("\r\n") {
        index + 2
    } else if rest.starts_with('\n') {
        index + 1
    } else {
        index
    }
}
