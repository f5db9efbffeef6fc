use crate::ast::{AssignOp, BinaryOp, Decl, EventKind, Expr, Name, Span, SpriteTree, Stmt, UnaryOp};
use crate::diagnostic::CompileError;
use crate::lexer::{Lexer, LexerError, Token, TokenType};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.span.line, self.span.column
        )
    }
}

impl Error for ParseError {}

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        CompileError::span(err.span, err.message)
    }
}

impl From<LexerError> for CompileError {
    fn from(err: LexerError) -> Self {
        CompileError::span(err.span, err.message)
    }
}

/// Lexes and parses one assembled sprite source.
pub fn parse_source(source: &str) -> Result<SpriteTree, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    Ok(Parser::new(tokens).parse_sprite()?)
}

pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
    /// Block comments on a line of their own, keyed by the index of the
    /// token they precede. Before a declaration they become its doc comment;
    /// inside a body they attach to the call that follows. Any other
    /// placement discards them.
    leading_comments: HashMap<usize, Token>,
    /// Block comments on the same line right after a `;`, keyed by the
    /// index of that `;`.
    trailing_comments: HashMap<usize, Token>,
}

impl Parser {
    pub fn new(raw: Vec<Token>) -> Self {
        let mut tokens: Vec<Token> = Vec::with_capacity(raw.len());
        let mut leading_comments = HashMap::new();
        let mut trailing_comments = HashMap::new();
        for token in raw {
            if token.typ != TokenType::LComment {
                tokens.push(token);
                continue;
            }
            match tokens.last() {
                Some(prev) if prev.typ == TokenType::Semicolon && prev.span.line == token.span.line => {
                    trailing_comments.insert(tokens.len() - 1, token);
                }
                _ => {
                    leading_comments.insert(tokens.len(), token);
                }
            }
        }
        if tokens.last().map(|t| t.typ) != Some(TokenType::Eof) {
            let span = tokens.last().map(|t| t.span).unwrap_or_else(|| Span::new(1, 1, 1));
            tokens.push(Token::new(TokenType::Eof, "", span));
        }
        Self {
            tokens,
            index: 0,
            leading_comments,
            trailing_comments,
        }
    }

    pub fn parse_sprite(&mut self) -> Result<SpriteTree, ParseError> {
        let mut decls = Vec::new();
        loop {
            if let Some(comment) = self.leading_comments.remove(&self.index) {
                decls.push(Decl::DocComment(comment));
            }
            if self.at_end() {
                break;
            }
            decls.push(self.parse_decl()?);
        }
        Ok(SpriteTree { decls })
    }

    fn parse_decl(&mut self) -> Result<Decl, ParseError> {
        if self.match_keyword("costumes") {
            let mut paths = vec![self.consume_type(TokenType::String, "Expected costume path string.")?];
            while self.match_type(TokenType::Comma) {
                paths.push(self.consume_type(TokenType::String, "Expected costume path string.")?);
            }
            self.consume_type(TokenType::Semicolon, "Expected ';' after costumes.")?;
            return Ok(Decl::Costumes(paths));
        }
        if self.match_keyword("variables") {
            let names = self.parse_name_list()?;
            self.consume_type(TokenType::Semicolon, "Expected ';' after variables.")?;
            return Ok(Decl::Variables(names));
        }
        if self.match_keyword("lists") {
            let names = self.parse_name_list()?;
            self.consume_type(TokenType::Semicolon, "Expected ';' after lists.")?;
            return Ok(Decl::Lists(names));
        }
        if self.match_keyword("datalist") {
            let name = self.parse_name("Expected list name after 'datalist'.")?;
            let path = self.consume_type(TokenType::String, "Expected data file path string.")?;
            self.consume_type(TokenType::Semicolon, "Expected ';' after datalist.")?;
            return Ok(Decl::DataList { name, path });
        }
        if self.match_keyword("imagelist") {
            let name = self.parse_name("Expected list name after 'imagelist'.")?;
            let path = self.consume_type(TokenType::String, "Expected image file path string.")?;
            let format = if self.check_type(TokenType::Ident) {
                Some(self.parse_name("Expected image format.")?)
            } else {
                None
            };
            self.consume_type(TokenType::Semicolon, "Expected ';' after imagelist.")?;
            return Ok(Decl::ImageList { name, path, format });
        }
        if self.match_keyword("nowarp") {
            self.consume_keyword("def", "Expected 'def' after 'nowarp'.")?;
            return self.parse_function(false);
        }
        if self.match_keyword("def") {
            return self.parse_function(true);
        }
        if self.match_keyword("macro") {
            return self.parse_macro();
        }
        if let Some(event) = self.parse_event()? {
            return Ok(event);
        }
        self.error_here("Expected a declaration: costumes, variables, lists, def, macro or an event.")
    }

    fn parse_function(&mut self, warp: bool) -> Result<Decl, ParseError> {
        let name = self.parse_name("Expected function name.")?;
        let params = if self.check_type(TokenType::LBrace) {
            Vec::new()
        } else {
            self.parse_name_list()?
        };
        let body = self.parse_block()?;
        Ok(Decl::Function {
            name,
            params,
            body,
            warp,
        })
    }

    fn parse_macro(&mut self) -> Result<Decl, ParseError> {
        let name = self.parse_name("Expected macro name.")?;
        let params = if self.check_type(TokenType::LBrace) || self.check_op("->") {
            Vec::new()
        } else {
            self.parse_name_list()?
        };
        if self.match_op("->") {
            let body = self.parse_expression(1)?;
            self.consume_type(TokenType::Semicolon, "Expected ';' after macro body.")?;
            return Ok(Decl::Macro { name, params, body });
        }
        if self.check_type(TokenType::LBrace) {
            let body = self.parse_block()?;
            return Ok(Decl::BlockMacro { name, params, body });
        }
        self.error_here("Expected '->' or '{' after macro parameters.")
    }

    fn parse_event(&mut self) -> Result<Option<Decl>, ParseError> {
        let token = self.current().clone();
        if token.typ != TokenType::Keyword {
            return Ok(None);
        }
        let kind = match token.value.as_str() {
            "onflag" => {
                self.advance();
                EventKind::Flag
            }
            "onclick" => {
                self.advance();
                EventKind::Click
            }
            "onclone" => {
                self.advance();
                EventKind::Clone
            }
            "on" => {
                self.advance();
                EventKind::Message(self.consume_type(TokenType::String, "Expected message string after 'on'.")?)
            }
            "onkey" => {
                self.advance();
                EventKind::Key(self.consume_type(TokenType::String, "Expected key name string after 'onkey'.")?)
            }
            "onbackdrop" => {
                self.advance();
                EventKind::Backdrop(
                    self.consume_type(TokenType::String, "Expected backdrop name string after 'onbackdrop'.")?,
                )
            }
            "onloudness" => {
                self.advance();
                EventKind::Loudness(self.parse_expression(1)?)
            }
            "ontimer" => {
                self.advance();
                EventKind::Timer(self.parse_expression(1)?)
            }
            _ => return Ok(None),
        };
        let body = self.parse_block()?;
        Ok(Some(Decl::Event {
            span: token.span,
            kind,
            body,
        }))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.consume_type(TokenType::LBrace, "Expected '{'.")?;
        let mut statements = Vec::new();
        while !self.check_type(TokenType::RBrace) {
            if self.at_end() {
                return self.error_here("Unterminated block. Expected '}'.");
            }
            let leading = self.leading_comments.remove(&self.index);
            let mut statement = self.parse_statement()?;
            if let Stmt::Call { comment: comment @ None, .. } = &mut statement {
                *comment = leading;
            }
            statements.push(statement);
        }
        self.advance();
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::Keyword {
            match token.value.as_str() {
                "if" => return self.parse_if(),
                "until" => {
                    self.advance();
                    let condition = self.parse_expression(1)?;
                    let body = self.parse_block()?;
                    return Ok(Stmt::Until {
                        span: token.span,
                        condition,
                        body,
                    });
                }
                "repeat" => {
                    self.advance();
                    let times = self.parse_expression(1)?;
                    let body = self.parse_block()?;
                    return Ok(Stmt::Repeat {
                        span: token.span,
                        times,
                        body,
                    });
                }
                "forever" => {
                    self.advance();
                    let body = self.parse_block()?;
                    return Ok(Stmt::Forever {
                        span: token.span,
                        body,
                    });
                }
                "local" => {
                    self.advance();
                    let name = self.parse_name("Expected variable name after 'local'.")?;
                    self.consume_op("=", "Expected '=' after local variable name.")?;
                    let value = self.parse_expression(1)?;
                    self.end_statement()?;
                    return Ok(Stmt::Local { name, value });
                }
                "add" => {
                    self.advance();
                    let item = self.parse_expression(1)?;
                    self.consume_keyword("to", "Expected 'to' in 'add ... to list'.")?;
                    let list = self.parse_name("Expected list name after 'to'.")?;
                    self.end_statement()?;
                    return Ok(Stmt::ListAdd { list, item });
                }
                "delete" => {
                    self.advance();
                    let list = self.parse_name("Expected list name after 'delete'.")?;
                    if self.match_type(TokenType::LBracket) {
                        let index = self.parse_expression(1)?;
                        self.consume_type(TokenType::RBracket, "Expected ']' after index.")?;
                        self.end_statement()?;
                        return Ok(Stmt::ListDelete { list, index });
                    }
                    self.end_statement()?;
                    return Ok(Stmt::ListDeleteAll { list });
                }
                "insert" => {
                    self.advance();
                    let item = self.parse_expression(1)?;
                    self.consume_keyword("at", "Expected 'at' in 'insert ... at list[index]'.")?;
                    let list = self.parse_name("Expected list name after 'at'.")?;
                    self.consume_type(TokenType::LBracket, "Expected '[' after list name.")?;
                    let index = self.parse_expression(1)?;
                    self.consume_type(TokenType::RBracket, "Expected ']' after index.")?;
                    self.end_statement()?;
                    return Ok(Stmt::ListInsert { list, index, item });
                }
                _ => return self.error_here(format!("Unexpected '{}' at start of statement.", token.value)),
            }
        }

        if token.typ == TokenType::MacroVar && self.peek().typ == TokenType::LParen {
            self.advance();
            let args = self.parse_call_args()?;
            self.end_statement()?;
            return Ok(Stmt::MacroCall {
                name: macro_name(&token),
                args,
            });
        }

        if token.typ != TokenType::Ident {
            return self.error_here("Expected a statement.");
        }
        let name = Name::new(token.value.clone(), token.span);
        let next = self.peek().clone();

        if next.is_op("=") {
            self.index += 2;
            if self.match_type(TokenType::LBracket) {
                let mut items = Vec::new();
                if !self.check_type(TokenType::RBracket) {
                    items.push(self.parse_expression(1)?);
                    while self.match_type(TokenType::Comma) {
                        items.push(self.parse_expression(1)?);
                    }
                }
                self.consume_type(TokenType::RBracket, "Expected ']' to close list literal.")?;
                self.end_statement()?;
                return Ok(Stmt::ListSet { name, items });
            }
            let value = self.parse_expression(1)?;
            self.end_statement()?;
            return Ok(Stmt::Assign { name, value });
        }
        if let Some(op) = assign_op(&next) {
            self.index += 2;
            let value = self.parse_expression(1)?;
            self.end_statement()?;
            return Ok(Stmt::Compound { name, op, value });
        }
        if next.is_op("++") && self.peek_at(2).typ == TokenType::Semicolon {
            self.index += 2;
            self.end_statement()?;
            return Ok(Stmt::Increment { name });
        }
        if next.typ == TokenType::LBracket {
            self.index += 2;
            let index = self.parse_expression(1)?;
            self.consume_type(TokenType::RBracket, "Expected ']' after index.")?;
            let op_token = self.current().clone();
            let op = if op_token.is_op("=") {
                None
            } else if let Some(op) = assign_op(&op_token) {
                Some(op)
            } else {
                return self.error_here("Expected '=' or a compound assignment after list index.");
            };
            self.advance();
            let item = self.parse_expression(1)?;
            self.end_statement()?;
            return Ok(Stmt::ListReplace {
                list: name,
                index,
                op,
                item,
            });
        }
        if (name.text == "show" || name.text == "hide")
            && next.typ == TokenType::Ident
            && self.peek_at(2).typ == TokenType::Semicolon
        {
            self.index += 2;
            let target = Name::new(next.value.clone(), next.span);
            self.end_statement()?;
            return Ok(if name.text == "show" {
                Stmt::Show { name: target }
            } else {
                Stmt::Hide { name: target }
            });
        }

        self.advance();
        let mut args = Vec::new();
        if !self.check_type(TokenType::Semicolon) {
            args.push(self.parse_expression(1)?);
            while self.match_type(TokenType::Comma) {
                args.push(self.parse_expression(1)?);
            }
        }
        let comment = self.end_statement()?;
        Ok(Stmt::Call { name, args, comment })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let span = self.advance().span;
        let mut branches = Vec::new();
        let condition = self.parse_expression(1)?;
        branches.push((condition, self.parse_block()?));
        let mut else_body = None;
        loop {
            if self.match_keyword("elif") {
                let condition = self.parse_expression(1)?;
                branches.push((condition, self.parse_block()?));
                continue;
            }
            if self.match_keyword("else") {
                else_body = Some(self.parse_block()?);
            }
            break;
        }
        Ok(Stmt::If {
            span,
            branches,
            else_body,
        })
    }

    /// Consumes the closing `;` and returns the comment written after it.
    fn end_statement(&mut self) -> Result<Option<Token>, ParseError> {
        let semicolon = self.index;
        self.consume_type(TokenType::Semicolon, "Expected ';' after statement.")?;
        Ok(self.trailing_comments.remove(&semicolon))
    }

    fn parse_expression(&mut self, min_precedence: i32) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let token = self.current().clone();
            let Some(op) = binary_op(&token) else {
                break;
            };
            let precedence = precedence_of(op);
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_expression(precedence + 1)?;
            left = Expr::Binary {
                op,
                span: token.span,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        let op = if token.is_op("-") {
            UnaryOp::Neg
        } else if token.is_keyword("not") {
            UnaryOp::Not
        } else {
            return self.parse_postfix();
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            span: token.span,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.check_type(TokenType::LBracket) {
            let span = self.advance().span;
            let index = self.parse_expression(1)?;
            self.consume_type(TokenType::RBracket, "Expected ']' after index.")?;
            expr = Expr::Index {
                span,
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        match token.typ {
            TokenType::Number | TokenType::Float => {
                self.advance();
                Ok(Expr::Literal(token))
            }
            TokenType::Keyword if token.value == "true" || token.value == "false" => {
                self.advance();
                Ok(Expr::Literal(token))
            }
            TokenType::String => {
                self.advance();
                if self.match_type(TokenType::Dot) {
                    let property = self.parse_name("Expected property name after '.'.")?;
                    return Ok(Expr::SensingOf {
                        object: token,
                        property,
                    });
                }
                Ok(Expr::Literal(token))
            }
            TokenType::Argument => {
                self.advance();
                Ok(Expr::Argument(token))
            }
            TokenType::MacroVar => {
                self.advance();
                if self.check_type(TokenType::LParen) {
                    let args = self.parse_call_args()?;
                    return Ok(Expr::MacroCall {
                        name: macro_name(&token),
                        args,
                    });
                }
                Ok(Expr::MacroVar(macro_name(&token)))
            }
            TokenType::Ident => {
                self.advance();
                let name = Name::new(token.value.clone(), token.span);
                if self.check_type(TokenType::LParen) {
                    let args = self.parse_call_args()?;
                    return Ok(Expr::Reporter { name, args });
                }
                if self.match_type(TokenType::Dot) {
                    return self.parse_list_query(name);
                }
                Ok(Expr::Var(name))
            }
            TokenType::LParen => {
                self.advance();
                let expr = self.parse_expression(1)?;
                self.consume_type(TokenType::RParen, "Expected ')' to close expression.")?;
                Ok(expr)
            }
            _ => self.error_here("Expected an expression."),
        }
    }

    fn parse_list_query(&mut self, list: Name) -> Result<Expr, ParseError> {
        let method = self.consume_type(TokenType::Ident, "Expected 'length', 'index' or 'contains' after '.'.")?;
        match method.value.as_str() {
            "length" => {
                if self.match_type(TokenType::LParen) {
                    self.consume_type(TokenType::RParen, "Expected ')' after 'length('.")?;
                }
                Ok(Expr::ListLength { list })
            }
            "index" | "contains" => {
                self.consume_type(TokenType::LParen, "Expected '(' after list method name.")?;
                let item = Box::new(self.parse_expression(1)?);
                self.consume_type(TokenType::RParen, "Expected ')' after list method argument.")?;
                Ok(if method.value == "index" {
                    Expr::ListIndex { list, item }
                } else {
                    Expr::ListContains { list, item }
                })
            }
            other => Err(ParseError {
                message: format!("Unknown list method '{}'.", other),
                span: method.span,
            }),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.consume_type(TokenType::LParen, "Expected '('.")?;
        let mut args = Vec::new();
        if !self.check_type(TokenType::RParen) {
            args.push(self.parse_expression(1)?);
            while self.match_type(TokenType::Comma) {
                args.push(self.parse_expression(1)?);
            }
        }
        self.consume_type(TokenType::RParen, "Expected ')' after arguments.")?;
        Ok(args)
    }

    fn parse_name_list(&mut self) -> Result<Vec<Name>, ParseError> {
        let mut names = vec![self.parse_name("Expected a name.")?];
        while self.match_type(TokenType::Comma) {
            names.push(self.parse_name("Expected a name after ','.")?);
        }
        Ok(names)
    }

    fn parse_name(&mut self, message: &str) -> Result<Name, ParseError> {
        let token = self.consume_type(TokenType::Ident, message)?;
        Ok(Name::new(token.value, token.span))
    }

    fn consume_keyword(&mut self, keyword: &str, message: &str) -> Result<Token, ParseError> {
        if self.current().is_keyword(keyword) {
            return Ok(self.advance());
        }
        self.error_here(message)
    }

    fn consume_op(&mut self, op: &str, message: &str) -> Result<Token, ParseError> {
        if self.check_op(op) {
            return Ok(self.advance());
        }
        self.error_here(message)
    }

    fn consume_type(&mut self, typ: TokenType, message: &str) -> Result<Token, ParseError> {
        if self.check_type(typ) {
            return Ok(self.advance());
        }
        self.error_here(message)
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.current().is_keyword(keyword) {
            self.advance();
            return true;
        }
        false
    }

    fn match_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            return true;
        }
        false
    }

    fn match_type(&mut self, typ: TokenType) -> bool {
        if self.check_type(typ) {
            self.advance();
            return true;
        }
        false
    }

    fn check_op(&self, op: &str) -> bool {
        self.current().is_op(op)
    }

    fn check_type(&self, typ: TokenType) -> bool {
        self.current().typ == typ
    }

    fn at_end(&self) -> bool {
        self.current().typ == TokenType::Eof
    }

    fn current(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek(&self) -> &Token {
        self.peek_at(1)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.index + offset).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn error_here<T: Into<String>, R>(&self, message: T) -> Result<R, ParseError> {
        Err(ParseError {
            message: message.into(),
            span: self.current().span,
        })
    }
}

fn macro_name(token: &Token) -> Name {
    let text = token.value.trim_end_matches('!');
    Name::new(text, Span::new(token.span.line, token.span.column, text.chars().count()))
}

fn assign_op(token: &Token) -> Option<AssignOp> {
    if token.typ != TokenType::Op {
        return None;
    }
    match token.value.as_str() {
        "+=" => Some(AssignOp::Add),
        "-=" => Some(AssignOp::Sub),
        "*=" => Some(AssignOp::Mul),
        "/=" => Some(AssignOp::Div),
        "%=" => Some(AssignOp::Mod),
        "++=" => Some(AssignOp::Join),
        _ => None,
    }
}

fn binary_op(token: &Token) -> Option<BinaryOp> {
    match token.typ {
        TokenType::Keyword => match token.value.as_str() {
            "or" => Some(BinaryOp::Or),
            "and" => Some(BinaryOp::And),
            "in" => Some(BinaryOp::In),
            _ => None,
        },
        TokenType::Op => match token.value.as_str() {
            "==" => Some(BinaryOp::Eq),
            "!=" => Some(BinaryOp::Ne),
            "<" => Some(BinaryOp::Lt),
            ">" => Some(BinaryOp::Gt),
            "<=" => Some(BinaryOp::Le),
            ">=" => Some(BinaryOp::Ge),
            "++" => Some(BinaryOp::Join),
            "+" => Some(BinaryOp::Add),
            "-" => Some(BinaryOp::Sub),
            "*" => Some(BinaryOp::Mul),
            "/" => Some(BinaryOp::Div),
            "%" => Some(BinaryOp::Mod),
            _ => None,
        },
        _ => None,
    }
}

fn precedence_of(op: BinaryOp) -> i32 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Gt
        | BinaryOp::Le
        | BinaryOp::Ge
        | BinaryOp::In => 3,
        BinaryOp::Join => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
    }
}
