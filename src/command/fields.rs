//! Quoting-aware command-line tokenizer
//!
//! Splits a command string into an argument vector:
//! - Fields are separated by unescaped whitespace
//! - `'...'` and `"..."` group whitespace into one field; the quotes stay in the field
//! - A backslash escapes the next character and is kept in the output
//! - A leading Windows executable path (`C:\Program Files\app.exe`) is kept whole

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TokenizeError;

/// Matches an absolute Windows executable path at the start of a command line
static WINDOWS_EXECUTABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z]:\\[^\n\r]*?\.(?i:exe|bat|cmd|ps1))(?:\s|$)").unwrap()
});

/// Split a command line into fields
///
/// An empty or all-whitespace command yields an empty vector.
///
/// # Errors
/// * `TokenizeError::UnclosedQuote` - a quote span is still open at end of input
///
/// # Examples
///
/// ```
/// use execrelay::command::tokenize;
///
/// let fields = tokenize(r#"echo "Hello, World!" it\'s"#).unwrap();
/// assert_eq!(fields, vec!["echo", "\"Hello, World!\"", "it\\'s"]);
/// ```
pub fn tokenize(command: &str) -> Result<Vec<String>, TokenizeError> {
    if let Some(caps) = WINDOWS_EXECUTABLE_RE.captures(command) {
        let executable = &caps[1];
        let mut fields = vec![executable.to_string()];
        fields.extend(split_fields(&command[executable.len()..], executable.len())?);
        return Ok(fields);
    }

    split_fields(command, 0)
}

fn split_fields(input: &str, offset: usize) -> Result<Vec<String>, TokenizeError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_field = false;
    // Open quote character and the byte offset where it was opened
    let mut quote: Option<(char, usize)> = None;

    let mut chars = input.char_indices();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => {
                current.push(ch);
                in_field = true;
                if let Some((_, escaped)) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' | '\'' => {
                match quote {
                    None => quote = Some((ch, offset + idx)),
                    Some((open, _)) if open == ch => quote = None,
                    // The other quote kind is literal inside a span
                    Some(_) => {}
                }
                current.push(ch);
                in_field = true;
            }
            c if c.is_whitespace() && quote.is_none() => {
                if in_field {
                    fields.push(std::mem::take(&mut current));
                    in_field = false;
                }
            }
            _ => {
                current.push(ch);
                in_field = true;
            }
        }
    }

    if let Some((quote, position)) = quote {
        return Err(TokenizeError::UnclosedQuote { quote, position });
    }

    if in_field {
        fields.push(current);
    }

    Ok(fields)
}
