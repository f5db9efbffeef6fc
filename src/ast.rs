use crate::lexer::Token;

/// Location of a lexeme in the assembled token stream. Lines refer to the
/// merged stream and are mapped back to real files by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(line: usize, column: usize, length: usize) -> Self {
        Self {
            line,
            column,
            length,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    pub text: String,
    pub span: Span,
}

impl Name {
    pub fn new(text: impl Into<String>, span: Span) -> Self {
        Self {
            text: text.into(),
            span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Join,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Join,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Token),
    Argument(Token),
    Var(Name),
    MacroVar(Name),
    MacroCall {
        name: Name,
        args: Vec<Expr>,
    },
    Reporter {
        name: Name,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        span: Span,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        span: Span,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Index {
        span: Span,
        target: Box<Expr>,
        index: Box<Expr>,
    },
    ListLength {
        list: Name,
    },
    ListIndex {
        list: Name,
        item: Box<Expr>,
    },
    ListContains {
        list: Name,
        item: Box<Expr>,
    },
    SensingOf {
        object: Token,
        property: Name,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(token) | Expr::Argument(token) => token.span,
            Expr::Var(name) | Expr::MacroVar(name) => name.span,
            Expr::MacroCall { name, .. } | Expr::Reporter { name, .. } => name.span,
            Expr::Unary { span, .. } | Expr::Binary { span, .. } | Expr::Index { span, .. } => *span,
            Expr::ListLength { list } | Expr::ListIndex { list, .. } | Expr::ListContains { list, .. } => {
                list.span
            }
            Expr::SensingOf { object, .. } => object.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Call {
        name: Name,
        args: Vec<Expr>,
        comment: Option<Token>,
    },
    MacroCall {
        name: Name,
        args: Vec<Expr>,
    },
    If {
        span: Span,
        branches: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    Until {
        span: Span,
        condition: Expr,
        body: Vec<Stmt>,
    },
    Repeat {
        span: Span,
        times: Expr,
        body: Vec<Stmt>,
    },
    Forever {
        span: Span,
        body: Vec<Stmt>,
    },
    Local {
        name: Name,
        value: Expr,
    },
    Assign {
        name: Name,
        value: Expr,
    },
    Compound {
        name: Name,
        op: AssignOp,
        value: Expr,
    },
    Increment {
        name: Name,
    },
    ListSet {
        name: Name,
        items: Vec<Expr>,
    },
    ListAdd {
        list: Name,
        item: Expr,
    },
    ListDelete {
        list: Name,
        index: Expr,
    },
    ListDeleteAll {
        list: Name,
    },
    ListInsert {
        list: Name,
        index: Expr,
        item: Expr,
    },
    ListReplace {
        list: Name,
        index: Expr,
        op: Option<AssignOp>,
        item: Expr,
    },
    Show {
        name: Name,
    },
    Hide {
        name: Name,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Flag,
    Click,
    Clone,
    Message(Token),
    Key(Token),
    Backdrop(Token),
    Loudness(Expr),
    Timer(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Costumes(Vec<Token>),
    Variables(Vec<Name>),
    Lists(Vec<Name>),
    DataList {
        name: Name,
        path: Token,
    },
    ImageList {
        name: Name,
        path: Token,
        format: Option<Name>,
    },
    Function {
        name: Name,
        params: Vec<Name>,
        body: Vec<Stmt>,
        warp: bool,
    },
    Macro {
        name: Name,
        params: Vec<Name>,
        body: Expr,
    },
    BlockMacro {
        name: Name,
        params: Vec<Name>,
        body: Vec<Stmt>,
    },
    Event {
        span: Span,
        kind: EventKind,
        body: Vec<Stmt>,
    },
    DocComment(Token),
}

/// Parse tree of one sprite file after include assembly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpriteTree {
    pub decls: Vec<Decl>,
}
