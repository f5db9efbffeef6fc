use crate::ast::Span;
use crate::definitions::{Costume, List, Variable};
use crate::diagnostic::{CompileError, CompileResult};
use crate::prototype::Prototype;
use std::collections::BTreeMap;

/// What an input slot holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Literal(String),
    /// Qualified variable name.
    Variable(String),
    /// Qualified list name.
    List(String),
    Block(Box<Block>),
    Stack(Stack),
}

impl Input {
    pub fn literal(value: impl Into<String>) -> Self {
        Input::Literal(value.into())
    }

    pub fn block(block: Block) -> Self {
        Input::Block(Box::new(block))
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Input::Literal(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Input::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn is_condition(&self) -> bool {
        self.as_block().is_some_and(Block::is_condition)
    }

    /// Blocks reachable from this input, nested ones included.
    pub fn block_count(&self) -> usize {
        match self {
            Input::Block(block) => block.block_count(),
            Input::Stack(stack) => stack.iter().map(Block::block_count).sum(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Literal(String),
    Variable(String),
    List(String),
}

impl Field {
    pub fn literal(value: impl Into<String>) -> Self {
        Field::Literal(value.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Plain,
    /// Reporter with a boolean shape.
    Condition,
    /// Script root owning its body.
    Hat { stack: Stack },
    /// Reads a procedure parameter. Shadowed inside a prototype.
    Argument { shadow: bool },
    ProcCall { proccode: String, warp: bool },
    ProcProto { proccode: String, warp: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub opcode: String,
    pub inputs: Vec<(String, Input)>,
    pub fields: Vec<(String, Field)>,
    pub kind: BlockKind,
    pub comment: Option<String>,
    pub span: Option<Span>,
    /// Canvas position, used by top-level blocks only.
    pub position: (i64, i64),
}

impl Block {
    pub fn new(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            inputs: Vec::new(),
            fields: Vec::new(),
            kind: BlockKind::Plain,
            comment: None,
            span: None,
            position: (0, 0),
        }
    }

    pub fn condition(opcode: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Condition,
            ..Self::new(opcode)
        }
    }

    pub fn hat(opcode: impl Into<String>, stack: Stack) -> Self {
        Self {
            kind: BlockKind::Hat { stack },
            ..Self::new(opcode)
        }
    }

    pub fn argument(name: impl Into<String>, shadow: bool) -> Self {
        Self {
            kind: BlockKind::Argument { shadow },
            ..Self::new("argument_reporter_string_number")
        }
        .with_field("VALUE", Field::literal(name))
    }

    /// A call of a user procedure. Inputs are keyed by parameter name.
    pub fn proc_call(proccode: String, warp: bool, inputs: Vec<(String, Input)>) -> Self {
        Self {
            inputs,
            kind: BlockKind::ProcCall { proccode, warp },
            ..Self::new("procedures_call")
        }
    }

    /// `procedures_definition` hat wrapping its prototype.
    pub fn proc_def(proccode: String, warp: bool, params: &[String], stack: Stack) -> Self {
        let inputs = params
            .iter()
            .map(|param| (param.clone(), Input::block(Block::argument(param.clone(), true))))
            .collect();
        let prototype = Self {
            inputs,
            kind: BlockKind::ProcProto { proccode, warp },
            ..Self::new("procedures_prototype")
        };
        Self::hat("procedures_definition", stack).with_input("custom_block", Input::block(prototype))
    }

    /// Instantiates a table prototype: call arguments first, then the
    /// prototype's fixed inputs and fields.
    pub fn from_prototype(prototype: &Prototype, args: Vec<Input>) -> Self {
        let mut block = if prototype.condition {
            Self::condition(&prototype.opcode)
        } else {
            Self::new(&prototype.opcode)
        };
        block.inputs = prototype.params.iter().cloned().zip(args).collect();
        for (name, value) in &prototype.inputs {
            block.inputs.push((name.clone(), Input::literal(value)));
        }
        for (name, value) in &prototype.fields {
            block.fields.push((name.clone(), Field::literal(value)));
        }
        block
    }

    pub fn with_input(mut self, name: impl Into<String>, input: Input) -> Self {
        self.inputs.push((name.into(), input));
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|(n, _)| n == name).map(|(_, input)| input)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, field)| field)
    }

    /// Moves an input out of the block, leaving the rest in place.
    pub fn take_input(&mut self, name: &str) -> Option<Input> {
        let index = self.inputs.iter().position(|(n, _)| n == name)?;
        Some(self.inputs.remove(index).1)
    }

    pub fn is_condition(&self) -> bool {
        matches!(self.kind, BlockKind::Condition)
    }

    pub fn is_hat(&self) -> bool {
        matches!(self.kind, BlockKind::Hat { .. })
    }

    pub fn stack(&self) -> Option<&Stack> {
        match &self.kind {
            BlockKind::Hat { stack } => Some(stack),
            _ => None,
        }
    }

    pub fn block_count(&self) -> usize {
        let nested: usize = self.inputs.iter().map(|(_, input)| input.block_count()).sum();
        let body: usize = self.stack().map_or(0, |s| s.iter().map(Block::block_count).sum());
        1 + nested + body
    }
}

/// A sequence of blocks linked by `next`. A `control_forever` can only be
/// the last block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stack {
    blocks: Vec<Block>,
}

impl Stack {
    pub fn new(blocks: Vec<Block>) -> CompileResult<Self> {
        let last = blocks.len().saturating_sub(1);
        if let Some(forever) = blocks
            .iter()
            .enumerate()
            .find(|(i, b)| b.opcode == "control_forever" && *i != last)
            .map(|(_, b)| b)
        {
            let message = "forever cannot be preceded by any statements";
            return Err(match forever.span {
                Some(span) => CompileError::span(span, message),
                None => CompileError::file(message),
            });
        }
        Ok(Self { blocks })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn first(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

impl<'a> IntoIterator for &'a Stack {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

/// One compiled target, ready for layout and serialization.
#[derive(Debug, Clone)]
pub struct Sprite {
    pub name: String,
    pub variables: BTreeMap<String, Variable>,
    pub lists: BTreeMap<String, List>,
    /// Script roots.
    pub blocks: Vec<Block>,
    pub costumes: Vec<Costume>,
    pub comment: Option<String>,
}

impl Sprite {
    pub fn is_stage(&self) -> bool {
        self.name == "Stage"
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub stage: Sprite,
    pub sprites: Vec<Sprite>,
}

impl Project {
    /// Stage first, then sprites in build order.
    pub fn targets(&self) -> impl Iterator<Item = &Sprite> {
        std::iter::once(&self.stage).chain(self.sprites.iter())
    }
}
