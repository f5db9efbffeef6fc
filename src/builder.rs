use crate::ast::{AssignOp, BinaryOp, Decl, EventKind, Expr, Name, SpriteTree, Stmt, UnaryOp};
use crate::definitions::{Definitions, Function};
use crate::diagnostic::{num_plural, suggest, CompileError, CompileResult};
use crate::ir::{Block, Field, Input, Sprite, Stack};
use crate::lexer::Token;
use crate::literal::literal;
use crate::optimize::{coerce_condition, fold_binary, fold_sqrt, logical, negate, not, number};
use crate::prototype::{Prototype, PrototypeRegistry};

/// Builds the block IR of one macro-expanded sprite.
pub fn build_sprite(
    name: impl Into<String>,
    tree: &SpriteTree,
    defs: Definitions,
    registry: &PrototypeRegistry,
) -> CompileResult<Sprite> {
    let mut blocks = Vec::new();
    for decl in &tree.decls {
        match decl {
            Decl::Function { name, params, body, .. } => {
                let function = defs
                    .functions
                    .get(&name.text)
                    .ok_or_else(|| CompileError::span(name.span, format!("Unknown function `{}`", name.text)))?;
                let builder = IrBuilder::new(&defs, registry, Some(function));
                let stack = builder.body(body)?;
                let params: Vec<String> = params.iter().map(|p| p.text.clone()).collect();
                blocks.push(Block::proc_def(proccode(function), function.warp, &params, stack).at(name.span));
            }
            Decl::Event { span, kind, body } => {
                let builder = IrBuilder::new(&defs, registry, None);
                blocks.push(builder.event(kind, body)?.at(*span));
            }
            _ => {}
        }
    }
    Ok(Sprite {
        name: name.into(),
        variables: defs.variables,
        lists: defs.lists,
        blocks,
        costumes: defs.costumes,
        comment: defs.comment,
    })
}

/// `name %s %s`, one placeholder per parameter.
pub fn proccode(function: &Function) -> String {
    if let Some(fixed) = &function.fixed_proccode {
        return fixed.clone();
    }
    let placeholders: String = function.params.iter().map(|_| " %s").collect();
    format!("{}{}", function.name.text, placeholders)
}

pub struct IrBuilder<'a> {
    defs: &'a Definitions,
    registry: &'a PrototypeRegistry,
    function: Option<&'a Function>,
}

impl<'a> IrBuilder<'a> {
    pub fn new(defs: &'a Definitions, registry: &'a PrototypeRegistry, function: Option<&'a Function>) -> Self {
        Self {
            defs,
            registry,
            function,
        }
    }

    fn event(&self, kind: &EventKind, body: &[Stmt]) -> CompileResult<Block> {
        let stack = self.body(body)?;
        Ok(match kind {
            EventKind::Flag => Block::hat("event_whenflagclicked", stack),
            EventKind::Click => Block::hat("event_whenthisspriteclicked", stack),
            EventKind::Clone => Block::hat("control_start_as_clone", stack),
            EventKind::Message(token) => Block::hat("event_whenbroadcastreceived", stack)
                .with_field("BROADCAST_OPTION", Field::Variable(literal(token)?)),
            EventKind::Key(token) => {
                Block::hat("event_whenkeypressed", stack).with_field("KEY_OPTION", Field::Literal(literal(token)?))
            }
            EventKind::Backdrop(token) => Block::hat("event_whenbackdropswitchesto", stack)
                .with_field("BACKDROP_OPTION", Field::Literal(literal(token)?)),
            EventKind::Loudness(threshold) => Block::hat("event_whengreaterthan", stack)
                .with_input("VALUE", self.expr(threshold)?)
                .with_field("WHENGREATERTHANMENU", Field::literal("LOUDNESS")),
            EventKind::Timer(threshold) => Block::hat("event_whengreaterthan", stack)
                .with_input("VALUE", self.expr(threshold)?)
                .with_field("WHENGREATERTHANMENU", Field::literal("TIMER")),
        })
    }

    pub fn body(&self, stmts: &[Stmt]) -> CompileResult<Stack> {
        Stack::new(self.stmts(stmts)?)
    }

    fn stmts(&self, stmts: &[Stmt]) -> CompileResult<Vec<Block>> {
        let mut blocks = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            blocks.extend(self.stmt(stmt)?);
        }
        Ok(blocks)
    }

    fn stmt(&self, stmt: &Stmt) -> CompileResult<Vec<Block>> {
        let block = match stmt {
            Stmt::Call { name, args, comment } => {
                let comment = comment.as_ref().map(literal).transpose()?;
                self.call(name, args)?.with_comment(comment)
            }
            Stmt::MacroCall { name, .. } => return Err(unexpanded_macro(name)),
            Stmt::If {
                span,
                branches,
                else_body,
            } => match branches.split_first() {
                Some((first, rest)) => self.if_chain(first, rest, else_body.as_deref())?.at(*span),
                // A chain with no conditions runs its else body in place.
                None => return self.stmts(else_body.as_deref().unwrap_or_default()),
            },
            Stmt::Until { span, condition, body } => Block::new("control_repeat_until")
                .with_input("CONDITION", Input::block(coerce_condition(self.expr(condition)?, false)))
                .with_input("SUBSTACK", Input::Stack(self.body(body)?))
                .at(*span),
            Stmt::Repeat { span, times, body } => Block::new("control_repeat")
                .with_input("TIMES", self.expr(times)?)
                .with_input("SUBSTACK", Input::Stack(self.body(body)?))
                .at(*span),
            Stmt::Forever { span, body } => Block::new("control_forever")
                .with_input("SUBSTACK", Input::Stack(self.body(body)?))
                .at(*span),
            Stmt::Local { name, value } => {
                let Some(function) = self.function else {
                    return Err(
                        CompileError::span(name.span, "local variables cannot be used outside of functions")
                            .with_help("switch to a non-local variable"),
                    );
                };
                let qualified = format!("{}:{}", function.name.text, name.text);
                set_variable(qualified, self.expr(value)?).at(name.span)
            }
            Stmt::Assign { name, value } => set_variable(self.variable(name)?, self.expr(value)?).at(name.span),
            Stmt::Compound { name, op, value } => self.compound(name, *op, value)?.at(name.span),
            Stmt::Increment { name } => change_variable(self.variable(name)?, Input::literal("1")).at(name.span),
            Stmt::ListSet { name, items } => {
                let list = self.list(name)?;
                let mut blocks = vec![list_block("data_deletealloflist", &list).at(name.span)];
                for item in items {
                    blocks.push(
                        list_block("data_addtolist", &list)
                            .with_input("ITEM", self.expr(item)?)
                            .at(name.span),
                    );
                }
                return Ok(blocks);
            }
            Stmt::ListAdd { list, item } => list_block("data_addtolist", &self.list(list)?)
                .with_input("ITEM", self.expr(item)?)
                .at(list.span),
            Stmt::ListDelete { list, index } => list_block("data_deleteoflist", &self.list(list)?)
                .with_input("INDEX", self.expr(index)?)
                .at(list.span),
            Stmt::ListDeleteAll { list } => list_block("data_deletealloflist", &self.list(list)?).at(list.span),
            Stmt::ListInsert { list, index, item } => list_block("data_insertatlist", &self.list(list)?)
                .with_input("INDEX", self.expr(index)?)
                .with_input("ITEM", self.expr(item)?)
                .at(list.span),
            Stmt::ListReplace { list, index, op, item } => {
                let resolved = self.list(list)?;
                let index = self.expr(index)?;
                let item = self.expr(item)?;
                let item = match op {
                    None => item,
                    Some(op) => {
                        let current = list_block("data_itemoflist", &resolved).with_input("INDEX", index.clone());
                        Input::block(self.operator(assign_reporter(*op), vec![Input::block(current), item])?)
                    }
                };
                list_block("data_replaceitemoflist", &resolved)
                    .with_input("INDEX", index)
                    .with_input("ITEM", item)
                    .at(list.span)
            }
            Stmt::Show { name } => self.visibility(name, "show")?,
            Stmt::Hide { name } => self.visibility(name, "hide")?,
        };
        Ok(vec![block])
    }

    /// Procedures shadow table statements of the same name.
    fn call(&self, name: &Name, args: &[Expr]) -> CompileResult<Block> {
        if let Some(function) = self.defs.functions.get(&name.text) {
            let params = function.param_names();
            check_arity(name, &params, args.len(), "function")?;
            let mut inputs = Vec::with_capacity(args.len());
            for (param, arg) in params.iter().zip(args) {
                inputs.push((param.to_string(), self.expr(arg)?));
            }
            return Ok(Block::proc_call(proccode(function), function.warp, inputs).at(name.span));
        }
        if let Some(prototype) = self.registry.statement(&name.text) {
            return self.instantiate(name, prototype, args, "statement");
        }
        let help = suggest(
            &name.text,
            self.registry
                .statement_names()
                .chain(self.defs.functions.keys().map(String::as_str)),
        )
        .map(|s| format!("Did you mean `{}`?", s));
        Err(CompileError::span(name.span, format!("Undefined statement or function `{}`", name.text)).with_help_opt(help))
    }

    fn instantiate(&self, name: &Name, prototype: &Prototype, args: &[Expr], what: &str) -> CompileResult<Block> {
        let params: Vec<&str> = prototype.params.iter().map(String::as_str).collect();
        check_arity(name, &params, args.len(), what)?;
        let mut inputs = Vec::with_capacity(args.len());
        for (param, arg) in params.iter().zip(args) {
            let input = self.expr(arg)?;
            inputs.push(if *param == "CONDITION" {
                Input::block(coerce_condition(input, false))
            } else {
                input
            });
        }
        Ok(Block::from_prototype(prototype, inputs).at(name.span))
    }

    /// Builds `if`/`elif`/`else` as nested `control_if_else` blocks, each
    /// `elif` becoming the sole block of its predecessor's else branch.
    fn if_chain(
        &self,
        (condition, body): &(Expr, Vec<Stmt>),
        rest: &[(Expr, Vec<Stmt>)],
        else_body: Option<&[Stmt]>,
    ) -> CompileResult<Block> {
        let condition = coerce_condition(self.expr(condition)?, false);
        let substack = self.body(body)?;
        let alternative = match (rest.split_first(), else_body) {
            (Some((next, rest)), _) => Some(Stack::new(vec![self.if_chain(next, rest, else_body)?])?),
            (None, Some(body)) => Some(self.body(body)?),
            (None, None) => None,
        };
        Ok(match alternative {
            Some(alternative) => Block::new("control_if_else")
                .with_input("CONDITION", Input::block(condition))
                .with_input("SUBSTACK", Input::Stack(substack))
                .with_input("SUBSTACK2", Input::Stack(alternative)),
            None => Block::new("control_if")
                .with_input("CONDITION", Input::block(condition))
                .with_input("SUBSTACK", Input::Stack(substack)),
        })
    }

    fn compound(&self, name: &Name, op: AssignOp, value: &Expr) -> CompileResult<Block> {
        let variable = self.variable(name)?;
        let value = self.expr(value)?;
        Ok(match op {
            AssignOp::Add => change_variable(variable, value),
            AssignOp::Sub => change_variable(variable, negate(value).0),
            AssignOp::Mul if value.as_literal().and_then(number) == Some(2.0) => {
                let current = Input::Variable(variable.clone());
                change_variable(variable, current)
            }
            other => {
                let current = Input::Variable(variable.clone());
                let updated = self.operator(assign_reporter(other), vec![current, value])?;
                set_variable(variable, Input::block(updated))
            }
        })
    }

    fn visibility(&self, name: &Name, action: &str) -> CompileResult<Block> {
        Ok(match self.identifier(name)? {
            Input::List(list) => list_block(&format!("data_{}list", action), &list),
            Input::Variable(variable) => {
                Block::new(format!("data_{}variable", action)).with_field("VARIABLE", Field::Variable(variable))
            }
            _ => return Err(CompileError::span(name.span, "Identifier is not a variable or list")),
        }
        .at(name.span))
    }

    pub fn expr(&self, expr: &Expr) -> CompileResult<Input> {
        match expr {
            Expr::Literal(token) => Ok(Input::Literal(literal(token)?)),
            Expr::Argument(token) => self.argument(token),
            Expr::Var(name) => self.identifier(name),
            Expr::MacroVar(name) => Err(CompileError::span(
                name.span,
                format!("Macro argument `{}!` used outside of a macro", name.text),
            )),
            Expr::MacroCall { name, .. } => Err(unexpanded_macro(name)),
            Expr::Reporter { name, args } => self.reporter(name, args),
            Expr::Unary { op, operand, .. } => {
                let operand = self.expr(operand)?;
                Ok(match op {
                    UnaryOp::Neg => negate(operand).0,
                    UnaryOp::Not => not(operand),
                })
            }
            Expr::Binary { op, left, right, .. } => {
                if *op == BinaryOp::In {
                    return self.membership(left, right);
                }
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                self.binary(*op, left, right)
            }
            Expr::Index { target, index, .. } => {
                let index = self.expr(index)?;
                let target = self.expr(target)?;
                Ok(Input::block(match target {
                    Input::List(list) => list_block("data_itemoflist", &list).with_input("INDEX", index),
                    other => self.operator("letter", vec![index, other])?,
                }))
            }
            Expr::ListLength { list } => Ok(Input::block(list_block("data_lengthoflist", &self.list(list)?))),
            Expr::ListIndex { list, item } => Ok(Input::block(
                list_block("data_itemnumoflist", &self.list(list)?).with_input("ITEM", self.expr(item)?),
            )),
            Expr::ListContains { list, item } => Ok(Input::block(contains_item(self.list(list)?, self.expr(item)?))),
            Expr::SensingOf { object, property } => {
                let object = match literal(object)?.as_str() {
                    "Stage" => "_stage_".to_string(),
                    other => other.to_string(),
                };
                let menu = Block::new("sensing_of_object_menu").with_field("OBJECT", Field::Literal(object));
                Ok(Input::block(
                    Block::new("sensing_of")
                        .with_input("OBJECT", Input::block(menu))
                        .with_field("PROPERTY", Field::literal(sensing_property(&property.text)))
                        .at(property.span),
                ))
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: Input, right: Input) -> CompileResult<Input> {
        let reporter = match op {
            BinaryOp::And | BinaryOp::Or => return Ok(Input::block(logical(op, left, right))),
            BinaryOp::Ne => return Ok(not(self.binary(BinaryOp::Eq, left, right)?)),
            BinaryOp::Le => return Ok(not(self.binary(BinaryOp::Gt, left, right)?)),
            BinaryOp::Ge => return Ok(not(self.binary(BinaryOp::Lt, left, right)?)),
            BinaryOp::In => return Err(CompileError::file("membership test without a list or string")),
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Join => "join",
            BinaryOp::Eq => "eq",
            BinaryOp::Lt => "lt",
            BinaryOp::Gt => "gt",
        };
        if let (Some(a), Some(b)) = (left.as_literal(), right.as_literal()) {
            if let Some(folded) = fold_binary(op, a, b) {
                return Ok(Input::Literal(folded));
            }
        }
        Ok(Input::block(self.operator(reporter, vec![left, right])?))
    }

    fn membership(&self, item: &Expr, container: &Expr) -> CompileResult<Input> {
        let item = self.expr(item)?;
        match self.expr(container)? {
            Input::List(list) => Ok(Input::block(contains_item(list, item))),
            text => Ok(Input::block(self.operator("contains", vec![text, item])?)),
        }
    }

    fn reporter(&self, name: &Name, args: &[Expr]) -> CompileResult<Input> {
        let Some(prototype) = self.registry.reporter(&name.text) else {
            let help = suggest(&name.text, self.registry.reporter_names()).map(|s| format!("Did you mean `{}`?", s));
            return Err(CompileError::span(name.span, format!("Undefined reporter `{}`", name.text)).with_help_opt(help));
        };
        let block = self.instantiate(name, prototype, args, "reporter")?;
        let is_sqrt = block.opcode == "operator_mathop"
            && matches!(block.field("OPERATOR"), Some(Field::Literal(op)) if op == "sqrt");
        if is_sqrt {
            if let Some(folded) = block.input("NUM").and_then(Input::as_literal).and_then(fold_sqrt) {
                return Ok(Input::Literal(folded));
            }
        }
        Ok(Input::block(block))
    }

    fn argument(&self, token: &Token) -> CompileResult<Input> {
        let Some(function) = self.function else {
            return Err(CompileError::span(
                token.span,
                "Argument reporter used outside function declaration",
            ));
        };
        let name = literal(token)?;
        let params = function.param_names();
        if !params.contains(&name.as_str()) {
            let help = suggest(&name, params.iter().copied()).map(|s| format!("Did you mean `${}`?", s));
            return Err(CompileError::span(token.span, "Undefined function argument").with_help_opt(help));
        }
        Ok(Input::block(Block::argument(name, false).at(token.span)))
    }

    /// Locals of the current function, then sprite storage, then globals.
    fn identifier(&self, name: &Name) -> CompileResult<Input> {
        let text = &name.text;
        if let Some(function) = self.function {
            if function.locals.contains(text) {
                return Ok(Input::Variable(format!("{}:{}", function.name.text, text)));
            }
        }
        if self.defs.variables.contains_key(text) {
            return Ok(Input::Variable(text.clone()));
        }
        if self.defs.lists.contains_key(text) {
            return Ok(Input::List(text.clone()));
        }
        if self.defs.globals.variables.contains(text) {
            return Ok(Input::Variable(text.clone()));
        }
        if self.defs.globals.lists.contains(text) {
            return Ok(Input::List(text.clone()));
        }

        let variables = self
            .defs
            .variables
            .keys()
            .filter(|n| !n.contains(':'))
            .chain(self.defs.globals.variables.iter())
            .map(String::as_str);
        let lists = self
            .defs
            .lists
            .keys()
            .chain(self.defs.globals.lists.iter())
            .map(String::as_str);
        let help = if let Some(found) = suggest(text, variables) {
            Some(format!("Did you mean the variable `{}`?", found))
        } else if let Some(found) = suggest(text, lists) {
            Some(format!("Did you mean the list `{}`?", found))
        } else {
            self.function
                .and_then(|f| suggest(text, f.locals.iter().map(String::as_str)))
                .map(|found| format!("Did you mean the local variable `{}`?", found))
        };
        Err(CompileError::span(name.span, format!("Undefined variable or list `{}`", text)).with_help_opt(help))
    }

    fn variable(&self, name: &Name) -> CompileResult<String> {
        match self.identifier(name)? {
            Input::Variable(variable) => Ok(variable),
            _ => Err(CompileError::span(name.span, "Identifier is not a variable")),
        }
    }

    fn list(&self, name: &Name) -> CompileResult<String> {
        match self.identifier(name)? {
            Input::List(list) => Ok(list),
            _ => Err(CompileError::span(name.span, "Identifier is not a list")),
        }
    }

    /// Table reporter used by operators, e.g. `add` for `+`.
    fn operator(&self, name: &str, args: Vec<Input>) -> CompileResult<Block> {
        let prototype = self
            .registry
            .reporter(name)
            .ok_or_else(|| CompileError::project(format!("Reporter table has no `{}` entry", name)))?;
        Ok(Block::from_prototype(prototype, args))
    }
}

fn check_arity(name: &Name, params: &[&str], given: usize, what: &str) -> CompileResult<()> {
    if given > params.len() {
        return Err(CompileError::span(name.span, format!("Too many arguments for {} `{}`", what, name.text))
            .with_help(format!("expected {}", num_plural(params.len(), "argument"))));
    }
    if given < params.len() {
        return Err(CompileError::span(name.span, format!("Missing arguments for {} `{}`", what, name.text))
            .with_help(format!("missing arguments: {}", params[given..].join(", "))));
    }
    Ok(())
}

fn unexpanded_macro(name: &Name) -> CompileError {
    CompileError::span(name.span, format!("Macro `{}` was not expanded", name.text))
}

fn set_variable(variable: String, value: Input) -> Block {
    Block::new("data_setvariableto")
        .with_input("VALUE", value)
        .with_field("VARIABLE", Field::Variable(variable))
}

fn change_variable(variable: String, value: Input) -> Block {
    Block::new("data_changevariableby")
        .with_input("VALUE", value)
        .with_field("VARIABLE", Field::Variable(variable))
}

fn list_block(opcode: &str, list: &str) -> Block {
    Block::new(opcode).with_field("LIST", Field::List(list.to_string()))
}

fn contains_item(list: String, item: Input) -> Block {
    Block::condition("data_listcontainsitem")
        .with_input("ITEM", item)
        .with_field("LIST", Field::List(list))
}

fn assign_reporter(op: AssignOp) -> &'static str {
    match op {
        AssignOp::Add => "add",
        AssignOp::Sub => "sub",
        AssignOp::Mul => "mul",
        AssignOp::Div => "div",
        AssignOp::Mod => "mod",
        AssignOp::Join => "join",
    }
}

fn sensing_property(property: &str) -> &str {
    match property {
        "x_position" => "x position",
        "y_position" => "y position",
        "costume_number" => "costume #",
        "costume_name" => "costume name",
        "backdrop_number" => "backdrop #",
        "backdrop_name" => "backdrop name",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{DefinitionCollector, Globals};
    use crate::ir::BlockKind;
    use crate::macros::expand_macros;
    use crate::parser::parse_source;
    use crate::vfs::MemoryProvider;
    use std::path::Path;

    fn build_with(source: &str, globals: Globals) -> CompileResult<Sprite> {
        let tree = parse_source(source)?;
        let fs = MemoryProvider::new();
        let defs = DefinitionCollector::new(&fs, Path::new("p"), globals).collect(&tree)?;
        let expanded = expand_macros(&tree, &defs)?;
        let registry = PrototypeRegistry::builtin()?;
        build_sprite("Sprite", &expanded, defs, &registry)
    }

    fn build(source: &str) -> CompileResult<Sprite> {
        build_with(source, Globals::default())
    }

    fn first_statement(sprite: &Sprite) -> Block {
        sprite.blocks[0].stack().and_then(Stack::first).cloned().unwrap()
    }

    fn said(source: &str) -> Input {
        let sprite = build(source).unwrap();
        first_statement(&sprite).input("MESSAGE").cloned().unwrap()
    }

    #[test]
    fn literals_fold_at_compile_time() {
        assert_eq!(said("onflag { say 1 + 2 * 3; }"), Input::literal("7"));
        assert_eq!(said("onflag { say \"a\" ++ \"b\"; }"), Input::literal("ab"));
        assert_eq!(said("onflag { say 7 % 3 == 1; }"), Input::literal("true"));
        assert_eq!(said("onflag { say sqrt(16); }"), Input::literal("4"));
        assert_eq!(said("onflag { say -(5); }"), Input::literal("-5"));
    }

    #[test]
    fn division_by_zero_stays_a_block() {
        let input = said("onflag { say 1 / 0; }");
        assert_eq!(input.as_block().unwrap().opcode, "operator_divide");
        let input = said("onflag { say \"x\" + 1; }");
        assert_eq!(input.as_block().unwrap().opcode, "operator_add");
    }

    #[test]
    fn negation_never_adds_blocks() {
        let simplified = said("variables a, b; onflag { say -(a - b); }");
        let wrapped = said("variables a, b; onflag { say 0 - (a - b); }");
        assert!(simplified.block_count() < wrapped.block_count());
        let block = simplified.as_block().unwrap();
        assert_eq!(block.input("NUM1"), Some(&Input::Variable("b".into())));
    }

    #[test]
    fn not_not_is_plain_coercion() {
        let sprite = build("variables a; onflag { if not not a { show; } }").unwrap();
        let if_block = first_statement(&sprite);
        let condition = if_block.input("CONDITION").and_then(Input::as_block).unwrap();
        assert_eq!(condition.opcode, "operator_not");
        let inner = condition.input("OPERAND").and_then(Input::as_block).unwrap();
        assert_eq!(inner.opcode, "operator_equals");
        assert_eq!(inner.input("OPERAND2"), Some(&Input::Variable("a".into())));
    }

    #[test]
    fn elif_chains_nest_right_to_left() {
        let sprite = build(
            "variables a, b, c;\n\
             onflag { if a { say 1; } elif b { say 2; } elif c { say 3; } else { say 4; } }",
        )
        .unwrap();
        let mut block = first_statement(&sprite);
        let mut depth = 0;
        loop {
            assert_eq!(block.opcode, "control_if_else");
            depth += 1;
            let Some(Input::Stack(alternative)) = block.input("SUBSTACK2").cloned() else {
                panic!("missing else");
            };
            let next = alternative.first().cloned().unwrap();
            if next.opcode != "control_if_else" {
                assert_eq!(next.input("MESSAGE"), Some(&Input::literal("4")));
                break;
            }
            block = next;
        }
        assert_eq!(depth, 3);

        let sprite = build("variables a, b; onflag { if a { say 1; } elif b { say 2; } }").unwrap();
        let outer = first_statement(&sprite);
        let Some(Input::Stack(alternative)) = outer.input("SUBSTACK2") else {
            panic!("missing else");
        };
        assert_eq!(alternative.first().unwrap().opcode, "control_if");
    }

    #[test]
    fn lone_if_has_no_else_branch() {
        let sprite = build("variables a; onflag {\n    if a { say 1; }\n}").unwrap();
        let block = first_statement(&sprite);
        assert_eq!(block.opcode, "control_if");
        assert!(block.input("SUBSTACK2").is_none());
        assert_eq!(block.span.unwrap().line, 2);

        let sprite = build("variables a; onflag { if a { } else { say 2; } }").unwrap();
        let block = first_statement(&sprite);
        assert_eq!(block.opcode, "control_if_else");
        let Some(Input::Stack(then)) = block.input("SUBSTACK") else {
            panic!("missing then branch");
        };
        assert!(then.is_empty());
    }

    #[test]
    fn locals_shadow_sprite_and_global_storage() {
        let globals = Globals {
            variables: vec!["x".into()],
            lists: Vec::new(),
        };
        let sprite = build_with("def f { local x = 1; say x; }\nonflag { say x; }", globals).unwrap();
        let def = &sprite.blocks[0];
        let body: Vec<&Block> = def.stack().unwrap().iter().collect();
        assert_eq!(body[0].field("VARIABLE"), Some(&Field::Variable("f:x".into())));
        assert_eq!(body[1].input("MESSAGE"), Some(&Input::Variable("f:x".into())));

        let event = sprite.blocks[1].stack().and_then(Stack::first).unwrap();
        assert_eq!(event.input("MESSAGE"), Some(&Input::Variable("x".into())));
        assert!(!sprite.variables.contains_key("x"));
    }

    #[test]
    fn procedure_arity_is_checked() {
        let err = build("def f a, b { } onflag { f 1; }").unwrap_err();
        assert_eq!(err.description(), "Missing arguments for function `f`");
        assert_eq!(err.help(), Some("missing arguments: b"));

        let err = build("def f a, b { } onflag { f 1, 2, 3; }").unwrap_err();
        assert_eq!(err.description(), "Too many arguments for function `f`");
        assert_eq!(err.help(), Some("expected 2 arguments"));

        let sprite = build("nowarp def f a, b { say $a; } onflag { f 1, 2; }").unwrap();
        let call = sprite.blocks[1].stack().and_then(Stack::first).unwrap();
        assert_eq!(
            call.kind,
            BlockKind::ProcCall {
                proccode: "f %s %s".into(),
                warp: false
            }
        );
        let names: Vec<&str> = call.inputs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn unknown_names_get_suggestions() {
        let err = build("onflag { sya 1; }").unwrap_err();
        assert_eq!(err.description(), "Undefined statement or function `sya`");
        assert_eq!(err.help(), Some("Did you mean `say`?"));

        let err = build("variables score; onflag { say scor; }").unwrap_err();
        assert_eq!(err.description(), "Undefined variable or list `scor`");
        assert_eq!(err.help(), Some("Did you mean the variable `score`?"));

        let err = build("onflag { say $a; }").unwrap_err();
        assert_eq!(err.description(), "Argument reporter used outside function declaration");

        let err = build("def f value { say $valeu; }").unwrap_err();
        assert_eq!(err.help(), Some("Did you mean `$value`?"));

        let err = build("onflag { local y = 1; }").unwrap_err();
        assert_eq!(err.help(), Some("switch to a non-local variable"));
    }

    #[test]
    fn compound_assignment_forms() {
        let sprite = build("onflag { n = 0; n *= 2; n -= 3; n /= 4; n++; }").unwrap();
        let body: Vec<&Block> = sprite.blocks[0].stack().unwrap().iter().collect();
        assert_eq!(body[1].opcode, "data_changevariableby");
        assert_eq!(body[1].input("VALUE"), Some(&Input::Variable("n".into())));
        assert_eq!(body[2].input("VALUE"), Some(&Input::literal("-3")));
        assert_eq!(body[3].opcode, "data_setvariableto");
        assert_eq!(body[3].input("VALUE").and_then(Input::as_block).unwrap().opcode, "operator_divide");
        assert_eq!(body[4].input("VALUE"), Some(&Input::literal("1")));
    }

    #[test]
    fn list_statements_and_queries() {
        let sprite = build(
            "onflag { l = [1, 2]; l[1] += 5; if 3 in l { say l.length; } say \"abc\"[2]; }",
        )
        .unwrap();
        let body: Vec<&Block> = sprite.blocks[0].stack().unwrap().iter().collect();
        assert_eq!(body[0].opcode, "data_deletealloflist");
        assert_eq!(body[1].opcode, "data_addtolist");
        assert_eq!(body[2].opcode, "data_addtolist");
        let replaced = body[3].input("ITEM").and_then(Input::as_block).unwrap();
        assert_eq!(replaced.opcode, "operator_add");
        let condition = body[4].input("CONDITION").and_then(Input::as_block).unwrap();
        assert_eq!(condition.opcode, "data_listcontainsitem");
        let letter = body[5].input("MESSAGE").and_then(Input::as_block).unwrap();
        assert_eq!(letter.opcode, "operator_letter_of");
        assert!(sprite.lists.contains_key("l"));
    }

    #[test]
    fn list_assignment_blocks_point_at_the_list() {
        let sprite = build("onflag {\n    say 1;\n    l = [1, 2, 3];\n}").unwrap();
        let body: Vec<&Block> = sprite.blocks[0].stack().unwrap().iter().collect();
        assert_eq!(body.len(), 5);
        let list_span = body[1].span.unwrap();
        assert_eq!(list_span.line, 3);
        for block in &body[2..] {
            assert_eq!(block.opcode, "data_addtolist");
            assert_eq!(block.span, Some(list_span));
        }
    }

    #[test]
    fn events_and_sensing() {
        let sprite = build("on \"go\" { say \"Stage\".backdrop_number; } onkey \"space\" {} ontimer 10 {}").unwrap();
        assert_eq!(sprite.blocks[0].opcode, "event_whenbroadcastreceived");
        assert_eq!(
            sprite.blocks[0].field("BROADCAST_OPTION"),
            Some(&Field::Variable("go".into()))
        );
        let sensing = first_statement(&sprite);
        let of = sensing.input("MESSAGE").and_then(Input::as_block).unwrap();
        assert_eq!(of.field("PROPERTY"), Some(&Field::literal("backdrop #")));
        let menu = of.input("OBJECT").and_then(Input::as_block).unwrap();
        assert_eq!(menu.field("OBJECT"), Some(&Field::literal("_stage_")));
        assert_eq!(sprite.blocks[1].field("KEY_OPTION"), Some(&Field::literal("space")));
        assert_eq!(
            sprite.blocks[2].field("WHENGREATERTHANMENU"),
            Some(&Field::literal("TIMER"))
        );
    }

    #[test]
    fn forever_must_be_last() {
        let err = build("onflag { forever { } say 1; }").unwrap_err();
        assert_eq!(err.description(), "forever cannot be preceded by any statements");
        assert!(build("onflag { say 1; forever { say 2; } }").is_ok());
    }
}
