use crate::ast::Span;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Keyword,
    Ident,
    Number,
    Float,
    String,
    Argument,
    MacroVar,
    LComment,
    Op,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,
    Eof,
}

/// A lexeme. `value` is the raw source text; quoted and prefixed forms are
/// decoded by [`crate::literal::literal`].
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub typ: TokenType,
    pub value: String,
    pub span: Span,
}

impl Token {
    pub fn new(typ: TokenType, value: impl Into<String>, span: Span) -> Self {
        Self {
            typ,
            value: value.into(),
            span,
        }
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.typ == TokenType::Op && self.value == op
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.typ == TokenType::Keyword && self.value == keyword
    }
}

#[derive(Debug, Clone)]
pub struct LexerError {
    pub message: String,
    pub span: Span,
}

impl Display for LexerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.span.line, self.span.column
        )
    }
}

impl Error for LexerError {}

pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    keywords: HashSet<&'static str>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            keywords: keyword_set(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        while !self.at_end() {
            let ch = self.peek();
            if is_ignorable_format_char(ch) || ch.is_whitespace() {
                self.advance();
                continue;
            }
            if ch == '#' || (ch == '/' && self.peek_at(1) == '/') {
                self.skip_line_comment();
                continue;
            }
            if ch == '/' && self.peek_at(1) == '*' {
                tokens.push(self.read_block_comment()?);
                continue;
            }
            if ch == '"' {
                tokens.push(self.read_string()?);
                continue;
            }
            if ch.is_ascii_digit() {
                tokens.push(self.read_number());
                continue;
            }
            if ch == '$' {
                tokens.push(self.read_argument()?);
                continue;
            }
            if ch.is_ascii_alphabetic() || ch == '_' {
                tokens.push(self.read_identifier());
                continue;
            }
            let (line, column) = (self.line, self.column);
            let single = match ch {
                '(' => Some(TokenType::LParen),
                ')' => Some(TokenType::RParen),
                '{' => Some(TokenType::LBrace),
                '}' => Some(TokenType::RBrace),
                '[' => Some(TokenType::LBracket),
                ']' => Some(TokenType::RBracket),
                ',' => Some(TokenType::Comma),
                ';' => Some(TokenType::Semicolon),
                '.' => Some(TokenType::Dot),
                _ => None,
            };
            if let Some(typ) = single {
                self.advance();
                tokens.push(Token::new(typ, ch.to_string(), Span::new(line, column, 1)));
                continue;
            }
            if let Some(op) = self.read_operator() {
                tokens.push(op);
                continue;
            }
            return Err(LexerError {
                message: format!("Unexpected character {:?}", ch),
                span: Span::new(line, column, 1),
            });
        }
        tokens.push(Token::new(
            TokenType::Eof,
            "",
            Span::new(self.line, self.column, 1),
        ));
        Ok(tokens)
    }

    fn read_operator(&mut self) -> Option<Token> {
        const OPERATORS: [&str; 20] = [
            "++=", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "++", "->", "=", "<", ">", "+",
            "-", "*", "/", "%",
        ];
        let (line, column) = (self.line, self.column);
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(offset, expected)| self.peek_at(offset) == expected);
            if matches {
                for _ in 0..op.chars().count() {
                    self.advance();
                }
                return Some(Token::new(
                    TokenType::Op,
                    op,
                    Span::new(line, column, op.chars().count()),
                ));
            }
        }
        None
    }

    fn read_identifier(&mut self) -> Token {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        while !self.at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == '_') {
            text.push(self.advance());
        }
        // `name!` is a macro parameter or macro call, unless it starts `!=`.
        if self.peek() == '!' && self.peek_at(1) != '=' {
            text.push(self.advance());
            let length = text.chars().count();
            return Token::new(TokenType::MacroVar, text, Span::new(line, column, length));
        }
        let length = text.chars().count();
        let typ = if self.keywords.contains(text.as_str()) {
            TokenType::Keyword
        } else {
            TokenType::Ident
        };
        Token::new(typ, text, Span::new(line, column, length))
    }

    fn read_argument(&mut self) -> Result<Token, LexerError> {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        text.push(self.advance());
        while !self.at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == '_') {
            text.push(self.advance());
        }
        if text.len() == 1 {
            return Err(LexerError {
                message: "Expected argument name after '$'".to_string(),
                span: Span::new(line, column, 1),
            });
        }
        let length = text.chars().count();
        Ok(Token::new(TokenType::Argument, text, Span::new(line, column, length)))
    }

    fn read_number(&mut self) -> Token {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        text.push(self.advance());

        if text == "0" && matches!(self.peek(), 'x' | 'X' | 'b' | 'B' | 'o' | 'O') {
            let radix_prefix = self.peek();
            text.push(self.advance());
            while !self.at_end() {
                let ch = self.peek();
                let is_valid = match radix_prefix {
                    'x' | 'X' => ch.is_ascii_hexdigit(),
                    'b' | 'B' => matches!(ch, '0' | '1'),
                    _ => matches!(ch, '0'..='7'),
                };
                if is_valid || ch == '_' {
                    text.push(self.advance());
                } else {
                    break;
                }
            }
            let length = text.chars().count();
            return Token::new(TokenType::Number, text, Span::new(line, column, length));
        }

        let mut typ = TokenType::Number;
        while !self.at_end() {
            let ch = self.peek();
            if ch.is_ascii_digit() || ch == '_' {
                text.push(self.advance());
                continue;
            }
            if ch == '.' && typ == TokenType::Number && self.peek_at(1).is_ascii_digit() {
                typ = TokenType::Float;
                text.push(self.advance());
                continue;
            }
            break;
        }
        let length = text.chars().count();
        Token::new(typ, text, Span::new(line, column, length))
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let (line, column) = (self.line, self.column);
        let mut raw = String::new();
        raw.push(self.advance());
        while !self.at_end() {
            let ch = self.peek();
            if ch == '\n' {
                break;
            }
            raw.push(self.advance());
            if ch == '\\' {
                if !self.at_end() && self.peek() != '\n' {
                    raw.push(self.advance());
                }
                continue;
            }
            if ch == '"' {
                let length = raw.chars().count();
                return Ok(Token::new(TokenType::String, raw, Span::new(line, column, length)));
            }
        }
        Err(LexerError {
            message: "Unterminated string literal".to_string(),
            span: Span::new(line, column, raw.chars().count()),
        })
    }

    fn read_block_comment(&mut self) -> Result<Token, LexerError> {
        let (line, column) = (self.line, self.column);
        let mut raw = String::new();
        raw.push(self.advance());
        raw.push(self.advance());
        while !self.at_end() {
            if self.peek() == '*' && self.peek_at(1) == '/' {
                raw.push(self.advance());
                raw.push(self.advance());
                // Multi-line comments underline only their first line.
                let length = raw.lines().next().map(|l| l.chars().count()).unwrap_or(2);
                return Ok(Token::new(TokenType::LComment, raw, Span::new(line, column, length)));
            }
            raw.push(self.advance());
        }
        Err(LexerError {
            message: "Unterminated comment".to_string(),
            span: Span::new(line, column, 2),
        })
    }

    fn skip_line_comment(&mut self) {
        while !self.at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn at_end(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> char {
        self.chars.get(self.index + offset).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.index];
        self.index += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }
}

fn keyword_set() -> HashSet<&'static str> {
    [
        "add",
        "and",
        "at",
        "costumes",
        "datalist",
        "def",
        "delete",
        "elif",
        "else",
        "false",
        "forever",
        "if",
        "imagelist",
        "in",
        "insert",
        "lists",
        "local",
        "macro",
        "not",
        "nowarp",
        "on",
        "onbackdrop",
        "onclick",
        "onclone",
        "onflag",
        "onkey",
        "onloudness",
        "ontimer",
        "or",
        "repeat",
        "to",
        "true",
        "until",
        "variables",
    ]
    .into_iter()
    .collect()
}

fn is_ignorable_format_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{feff}' // BOM / zero width no-break space
            | '\u{200b}' // zero width space
            | '\u{200c}' // zero width non-joiner
            | '\u{200d}' // zero width joiner
            | '\u{2060}' // word joiner
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(TokenType, String)> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| (t.typ, t.value))
            .collect()
    }

    #[test]
    fn distinguishes_join_increment_and_join_assign() {
        let toks = kinds("x++; y ++= \"a\" ++ b;");
        let ops: Vec<&str> = toks
            .iter()
            .filter(|(t, _)| *t == TokenType::Op)
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(ops, vec!["++", "++=", "++"]);
    }

    #[test]
    fn macro_var_does_not_swallow_not_equal() {
        let toks = kinds("a!=b A!");
        assert_eq!(toks[0], (TokenType::Ident, "a".to_string()));
        assert_eq!(toks[1], (TokenType::Op, "!=".to_string()));
        assert_eq!(toks[3], (TokenType::MacroVar, "A!".to_string()));
    }

    #[test]
    fn spans_track_lines_and_columns() {
        let tokens = Lexer::new("onflag {\n  say \"hi\";\n}").tokenize().unwrap();
        let say = &tokens[2];
        assert_eq!(say.value, "say");
        assert_eq!(say.span, Span::new(2, 3, 3));
        let text = &tokens[3];
        assert_eq!(text.typ, TokenType::String);
        assert_eq!(text.span, Span::new(2, 7, 4));
    }

    #[test]
    fn comments_and_numbers() {
        let toks = kinds("# line\n/* doc */ 0x1F 2.50 7. // tail");
        assert_eq!(toks[0], (TokenType::LComment, "/* doc */".to_string()));
        assert_eq!(toks[1], (TokenType::Number, "0x1F".to_string()));
        assert_eq!(toks[2], (TokenType::Float, "2.50".to_string()));
        assert_eq!(toks[3], (TokenType::Number, "7".to_string()));
        assert_eq!(toks[4].0, TokenType::Dot);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("say \"oops;\n").tokenize().unwrap_err();
        assert_eq!(err.message, "Unterminated string literal");
        assert_eq!(err.span.line, 1);
        assert_eq!(err.span.column, 5);
    }
}
