use crate::diagnostic::{CompileError, CompileResult};
use crate::lexer::{Token, TokenType};

/// Decodes a literal-bearing token into the string the target format stores.
pub fn literal(token: &Token) -> CompileResult<String> {
    match token.typ {
        TokenType::String => {
            let inner = token
                .value
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .ok_or_else(|| CompileError::span(token.span, "Malformed string literal"))?;
            Ok(unescape(inner))
        }
        TokenType::Number => decode_integer(&token.value)
            .ok_or_else(|| CompileError::span(token.span, format!("Malformed number `{}`", token.value))),
        TokenType::Float => token
            .value
            .replace('_', "")
            .parse::<f64>()
            .map(|v| format!("{:?}", v))
            .map_err(|_| CompileError::span(token.span, format!("Malformed number `{}`", token.value))),
        TokenType::Argument => Ok(token.value.trim_start_matches('$').to_string()),
        TokenType::MacroVar => Ok(token.value.trim_end_matches('!').to_string()),
        TokenType::LComment => {
            let inner = token
                .value
                .strip_prefix("/*")
                .and_then(|s| s.strip_suffix("*/"))
                .unwrap_or(&token.value);
            Ok(inner.trim().to_string())
        }
        TokenType::Keyword if token.value == "true" => Ok("1".to_string()),
        TokenType::Keyword if token.value == "false" => Ok("0".to_string()),
        _ => Err(CompileError::span(token.span, "Expected a literal")),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn decode_integer(text: &str) -> Option<String> {
    let cleaned = text.replace('_', "");
    let (digits, radix) = match cleaned.get(..2) {
        Some("0x") | Some("0X") => (&cleaned[2..], 16),
        Some("0b") | Some("0B") => (&cleaned[2..], 2),
        Some("0o") | Some("0O") => (&cleaned[2..], 8),
        _ => (cleaned.as_str(), 10),
    };
    if digits.is_empty() {
        return None;
    }
    match u128::from_str_radix(digits, radix) {
        Ok(value) => Some(value.to_string()),
        // Too wide for an integer; the target stores numbers as doubles anyway.
        Err(_) if radix == 10 => digits.parse::<f64>().ok().map(|v| format!("{}", v)),
        Err(_) => None,
    }
}
