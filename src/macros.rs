use crate::ast::{Decl, EventKind, Expr, Name, SpriteTree, Stmt};
use crate::definitions::{BlockMacro, Definitions, Macro};
use crate::diagnostic::{suggest, CompileError, CompileResult};
use std::collections::BTreeMap;

/// Block macros first, then expression macros.
pub fn expand_macros(tree: &SpriteTree, defs: &Definitions) -> CompileResult<SpriteTree> {
    let statements_expanded = expand_block_macros(tree, &defs.block_macros)?;
    expand_expression_macros(&statements_expanded, &defs.macros)
}

pub fn expand_block_macros(tree: &SpriteTree, macros: &BTreeMap<String, BlockMacro>) -> CompileResult<SpriteTree> {
    let mut expander = BlockExpander {
        macros,
        stack: Vec::new(),
    };
    let mut decls = Vec::with_capacity(tree.decls.len());
    for decl in &tree.decls {
        decls.push(match decl {
            Decl::Function {
                name,
                params,
                body,
                warp,
            } => Decl::Function {
                name: name.clone(),
                params: params.clone(),
                body: expander.expand_body(body)?,
                warp: *warp,
            },
            Decl::Event { span, kind, body } => Decl::Event {
                span: *span,
                kind: kind.clone(),
                body: expander.expand_body(body)?,
            },
            other => other.clone(),
        });
    }
    Ok(SpriteTree { decls })
}

pub fn expand_expression_macros(tree: &SpriteTree, macros: &BTreeMap<String, Macro>) -> CompileResult<SpriteTree> {
    let mut expander = ExprExpander {
        macros,
        stack: Vec::new(),
    };
    let mut decls = Vec::with_capacity(tree.decls.len());
    for decl in &tree.decls {
        decls.push(match decl {
            Decl::Function {
                name,
                params,
                body,
                warp,
            } => Decl::Function {
                name: name.clone(),
                params: params.clone(),
                body: walk_body(&mut expander, body)?,
                warp: *warp,
            },
            Decl::Event { span, kind, body } => {
                let kind = match kind {
                    EventKind::Loudness(threshold) => EventKind::Loudness(expander.rewrite(threshold)?),
                    EventKind::Timer(threshold) => EventKind::Timer(expander.rewrite(threshold)?),
                    other => other.clone(),
                };
                Decl::Event {
                    span: *span,
                    kind,
                    body: walk_body(&mut expander, body)?,
                }
            }
            other => other.clone(),
        });
    }
    Ok(SpriteTree { decls })
}

struct BlockExpander<'a> {
    macros: &'a BTreeMap<String, BlockMacro>,
    stack: Vec<String>,
}

impl BlockExpander<'_> {
    fn expand_body(&mut self, body: &[Stmt]) -> CompileResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(body.len());
        for stmt in body {
            match stmt {
                Stmt::MacroCall { name, args } => {
                    let spliced = self.expand_call(name, args)?;
                    out.extend(spliced);
                }
                other => out.push(map_bodies(other, &mut |nested| self.expand_body(nested))?),
            }
        }
        Ok(out)
    }

    fn expand_call(&mut self, name: &Name, args: &[Expr]) -> CompileResult<Vec<Stmt>> {
        let Some(block_macro) = self.macros.get(&name.text) else {
            return Err(undefined_macro(name, self.macros.keys()));
        };
        check_arity(name, &block_macro.params, args.len(), "block macro")?;
        if self.stack.contains(&name.text) {
            return Err(recursive_macro(name));
        }
        self.stack.push(name.text.clone());
        let body = self.expand_body(&block_macro.body)?;
        self.stack.pop();

        let mut substitute = Substitute {
            params: &block_macro.params,
            args,
        };
        walk_body(&mut substitute, &body)
    }
}

struct ExprExpander<'a> {
    macros: &'a BTreeMap<String, Macro>,
    stack: Vec<String>,
}

impl ExprRewriter for ExprExpander<'_> {
    fn rewrite(&mut self, expr: &Expr) -> CompileResult<Expr> {
        let Expr::MacroCall { name, args } = expr else {
            return walk_expr(self, expr);
        };
        let Some(found) = self.macros.get(&name.text) else {
            return Err(undefined_macro(name, self.macros.keys()));
        };
        check_arity(name, &found.params, args.len(), "macro")?;
        let args = args.iter().map(|a| self.rewrite(a)).collect::<CompileResult<Vec<_>>>()?;
        if self.stack.contains(&name.text) {
            return Err(recursive_macro(name));
        }
        self.stack.push(name.text.clone());
        let body = self.rewrite(&found.body)?;
        self.stack.pop();

        Substitute {
            params: &found.params,
            args: &args,
        }
        .rewrite(&body)
    }
}

/// Replaces `param!` leaves with the matching call argument.
struct Substitute<'a> {
    params: &'a [String],
    args: &'a [Expr],
}

impl ExprRewriter for Substitute<'_> {
    fn rewrite(&mut self, expr: &Expr) -> CompileResult<Expr> {
        let Expr::MacroVar(name) = expr else {
            return walk_expr(self, expr);
        };
        match self.params.iter().position(|p| *p == name.text) {
            Some(index) => Ok(self.args[index].clone()),
            None => {
                let help = suggest(&name.text, self.params.iter().map(String::as_str))
                    .map(|s| format!("Did you mean `{}!`?", s));
                Err(CompileError::span(name.span, format!("Undefined macro argument `{}!`", name.text))
                    .with_help_opt(help))
            }
        }
    }
}

fn check_arity(name: &Name, params: &[String], given: usize, what: &str) -> CompileResult<()> {
    if given < params.len() {
        return Err(CompileError::span(name.span, format!("Missing arguments for {}", what))
            .with_help(format!("Missing {}", params[given..].join(", "))));
    }
    if given > params.len() {
        let expected = if params.is_empty() {
            "Expected no arguments".to_string()
        } else {
            format!("Expected {}", params.join(", "))
        };
        return Err(CompileError::span(name.span, format!("Too many arguments for {}", what)).with_help(expected));
    }
    Ok(())
}

fn undefined_macro<'a>(name: &Name, known: impl Iterator<Item = &'a String>) -> CompileError {
    let help = suggest(&name.text, known.map(String::as_str)).map(|s| format!("Did you mean `{}`?", s));
    CompileError::span(name.span, format!("Undefined macro `{}`", name.text)).with_help_opt(help)
}

fn recursive_macro(name: &Name) -> CompileError {
    CompileError::span(name.span, format!("Recursive macro `{}`", name.text))
        .with_help("A macro cannot expand into itself")
}

/// Bottom-up rebuild of expression trees. Implementors intercept the
/// nodes they care about and hand everything else to [`walk_expr`].
pub trait ExprRewriter {
    fn rewrite(&mut self, expr: &Expr) -> CompileResult<Expr>;
}

pub fn walk_expr<R: ExprRewriter + ?Sized>(r: &mut R, expr: &Expr) -> CompileResult<Expr> {
    Ok(match expr {
        Expr::Literal(_)
        | Expr::Argument(_)
        | Expr::Var(_)
        | Expr::MacroVar(_)
        | Expr::ListLength { .. }
        | Expr::SensingOf { .. } => expr.clone(),
        Expr::MacroCall { name, args } => Expr::MacroCall {
            name: name.clone(),
            args: rewrite_all(r, args)?,
        },
        Expr::Reporter { name, args } => Expr::Reporter {
            name: name.clone(),
            args: rewrite_all(r, args)?,
        },
        Expr::Unary { op, span, operand } => Expr::Unary {
            op: *op,
            span: *span,
            operand: Box::new(r.rewrite(operand)?),
        },
        Expr::Binary { op, span, left, right } => Expr::Binary {
            op: *op,
            span: *span,
            left: Box::new(r.rewrite(left)?),
            right: Box::new(r.rewrite(right)?),
        },
        Expr::Index { span, target, index } => Expr::Index {
            span: *span,
            target: Box::new(r.rewrite(target)?),
            index: Box::new(r.rewrite(index)?),
        },
        Expr::ListIndex { list, item } => Expr::ListIndex {
            list: list.clone(),
            item: Box::new(r.rewrite(item)?),
        },
        Expr::ListContains { list, item } => Expr::ListContains {
            list: list.clone(),
            item: Box::new(r.rewrite(item)?),
        },
    })
}

fn rewrite_all<R: ExprRewriter + ?Sized>(r: &mut R, exprs: &[Expr]) -> CompileResult<Vec<Expr>> {
    exprs.iter().map(|e| r.rewrite(e)).collect()
}

pub fn walk_body<R: ExprRewriter + ?Sized>(r: &mut R, body: &[Stmt]) -> CompileResult<Vec<Stmt>> {
    body.iter().map(|s| walk_stmt(r, s)).collect()
}

/// Rewrites every expression of a statement, nested bodies included.
pub fn walk_stmt<R: ExprRewriter + ?Sized>(r: &mut R, stmt: &Stmt) -> CompileResult<Stmt> {
    Ok(match stmt {
        Stmt::Call { name, args, comment } => Stmt::Call {
            name: name.clone(),
            args: rewrite_all(r, args)?,
            comment: comment.clone(),
        },
        Stmt::MacroCall { name, args } => Stmt::MacroCall {
            name: name.clone(),
            args: rewrite_all(r, args)?,
        },
        Stmt::If {
            span,
            branches,
            else_body,
        } => Stmt::If {
            span: *span,
            branches: branches
                .iter()
                .map(|(condition, body)| Ok((r.rewrite(condition)?, walk_body(r, body)?)))
                .collect::<CompileResult<Vec<_>>>()?,
            else_body: match else_body {
                Some(body) => Some(walk_body(r, body)?),
                None => None,
            },
        },
        Stmt::Until { span, condition, body } => Stmt::Until {
            span: *span,
            condition: r.rewrite(condition)?,
            body: walk_body(r, body)?,
        },
        Stmt::Repeat { span, times, body } => Stmt::Repeat {
            span: *span,
            times: r.rewrite(times)?,
            body: walk_body(r, body)?,
        },
        Stmt::Forever { span, body } => Stmt::Forever {
            span: *span,
            body: walk_body(r, body)?,
        },
        Stmt::Local { name, value } => Stmt::Local {
            name: name.clone(),
            value: r.rewrite(value)?,
        },
        Stmt::Assign { name, value } => Stmt::Assign {
            name: name.clone(),
            value: r.rewrite(value)?,
        },
        Stmt::Compound { name, op, value } => Stmt::Compound {
            name: name.clone(),
            op: *op,
            value: r.rewrite(value)?,
        },
        Stmt::ListSet { name, items } => Stmt::ListSet {
            name: name.clone(),
            items: rewrite_all(r, items)?,
        },
        Stmt::ListAdd { list, item } => Stmt::ListAdd {
            list: list.clone(),
            item: r.rewrite(item)?,
        },
        Stmt::ListDelete { list, index } => Stmt::ListDelete {
            list: list.clone(),
            index: r.rewrite(index)?,
        },
        Stmt::ListInsert { list, index, item } => Stmt::ListInsert {
            list: list.clone(),
            index: r.rewrite(index)?,
            item: r.rewrite(item)?,
        },
        Stmt::ListReplace { list, index, op, item } => Stmt::ListReplace {
            list: list.clone(),
            index: r.rewrite(index)?,
            op: *op,
            item: r.rewrite(item)?,
        },
        Stmt::Increment { .. } | Stmt::ListDeleteAll { .. } | Stmt::Show { .. } | Stmt::Hide { .. } => stmt.clone(),
    })
}

/// Rebuilds a statement with `f` applied to each of its nested bodies.
fn map_bodies(stmt: &Stmt, f: &mut dyn FnMut(&[Stmt]) -> CompileResult<Vec<Stmt>>) -> CompileResult<Stmt> {
    Ok(match stmt {
        Stmt::If {
            span,
            branches,
            else_body,
        } => {
            let mut mapped = Vec::with_capacity(branches.len());
            for (condition, body) in branches {
                mapped.push((condition.clone(), f(body)?));
            }
            Stmt::If {
                span: *span,
                branches: mapped,
                else_body: match else_body {
                    Some(body) => Some(f(body)?),
                    None => None,
                },
            }
        }
        Stmt::Until { span, condition, body } => Stmt::Until {
            span: *span,
            condition: condition.clone(),
            body: f(body)?,
        },
        Stmt::Repeat { span, times, body } => Stmt::Repeat {
            span: *span,
            times: times.clone(),
            body: f(body)?,
        },
        Stmt::Forever { span, body } => Stmt::Forever {
            span: *span,
            body: f(body)?,
        },
        other => other.clone(),
    })
}
