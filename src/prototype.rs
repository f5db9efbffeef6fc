use crate::diagnostic::{CompileError, CompileResult};
use std::collections::BTreeMap;

const STATEMENTS: &str = include_str!("prototypes/statements.txt");
const REPORTERS: &str = include_str!("prototypes/reporters.txt");

/// A language-level block name and the target opcode it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prototype {
    pub name: String,
    /// Input names, in call-argument order.
    pub params: Vec<String>,
    pub opcode: String,
    /// Fields the opcode always sets (`opcode.FIELD=value`).
    pub fields: Vec<(String, String)>,
    /// Inputs the opcode always wires to a literal (`opcode!INPUT=value`).
    pub inputs: Vec<(String, String)>,
    pub condition: bool,
}

#[derive(Debug, Clone)]
pub struct PrototypeRegistry {
    statements: BTreeMap<String, Prototype>,
    reporters: BTreeMap<String, Prototype>,
}

impl PrototypeRegistry {
    /// The tables compiled into the crate.
    pub fn builtin() -> CompileResult<Self> {
        Self::load(STATEMENTS, REPORTERS)
    }

    pub fn load(statements: &str, reporters: &str) -> CompileResult<Self> {
        Ok(Self {
            statements: parse_table(statements, "statements")?,
            reporters: parse_table(reporters, "reporters")?,
        })
    }

    pub fn statement(&self, name: &str) -> Option<&Prototype> {
        self.statements.get(name)
    }

    pub fn reporter(&self, name: &str) -> Option<&Prototype> {
        self.reporters.get(name)
    }

    pub fn statement_names(&self) -> impl Iterator<Item = &str> {
        self.statements.keys().map(String::as_str)
    }

    pub fn reporter_names(&self) -> impl Iterator<Item = &str> {
        self.reporters.keys().map(String::as_str)
    }
}

fn parse_table(text: &str, table: &str) -> CompileResult<BTreeMap<String, Prototype>> {
    let mut out = BTreeMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let prototype = parse_line(line).ok_or_else(|| {
            CompileError::project(format!(
                "Malformed prototype in {} table, line {}: {}",
                table,
                idx + 1,
                line
            ))
        })?;
        out.insert(prototype.name.clone(), prototype);
    }
    Ok(out)
}

fn parse_line(line: &str) -> Option<Prototype> {
    let mut columns = line.split('|').map(str::trim);
    let raw_name = columns.next()?;
    let raw_params = columns.next()?;
    let raw_opcode = columns.next()?;
    if columns.next().is_some() || raw_name.is_empty() || raw_opcode.is_empty() {
        return None;
    }

    let condition = raw_name.ends_with('?');
    let name = raw_name.trim_end_matches('?').to_string();
    let params: Vec<String> = raw_params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    let (opcode, fields, inputs) = if let Some((opcode, rest)) = raw_opcode.split_once('.') {
        (opcode, parse_assignments(rest)?, Vec::new())
    } else if let Some((opcode, rest)) = raw_opcode.split_once('!') {
        (opcode, Vec::new(), parse_assignments(rest)?)
    } else {
        (raw_opcode, Vec::new(), Vec::new())
    };

    Some(Prototype {
        name,
        params,
        opcode: opcode.to_string(),
        fields,
        inputs,
        condition,
    })
}

fn parse_assignments(text: &str) -> Option<Vec<(String, String)>> {
    text.split(',')
        .map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
