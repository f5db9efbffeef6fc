use crate::ast::{Decl, Expr, Name, Span, SpriteTree, Stmt};
use crate::diagnostic::{suggest, CompileError, CompileResult};
use crate::lexer::Token;
use crate::literal::literal;
use crate::vfs::SourceProvider;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// `function:name` for locals, the plain name otherwise.
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct List {
    pub name: String,
    pub span: Span,
    pub data: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Name,
    pub warp: bool,
    pub params: Vec<Name>,
    pub locals: Vec<String>,
    pub fixed_proccode: Option<String>,
}

impl Function {
    fn builtin(name: &str, params: &[&str]) -> Self {
        let placeholders: String = params.iter().map(|_| " %s").collect();
        Self {
            name: Name::new(name, Span::default()),
            warp: false,
            params: params.iter().map(|p| Name::new(*p, Span::default())).collect(),
            locals: Vec::new(),
            fixed_proccode: Some(format!("\u{200B}\u{200B}{}\u{200B}\u{200B}{}", name, placeholders)),
        }
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub name: Name,
    pub params: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockMacro {
    pub name: Name,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Costume {
    pub path: PathBuf,
    /// Display name when it differs from the file stem.
    pub alias: Option<String>,
}

impl Costume {
    pub fn name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Project-wide storage, declared on the stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Globals {
    pub variables: Vec<String>,
    pub lists: Vec<String>,
}

impl Globals {
    pub fn from_stage(stage: &Definitions) -> Self {
        Self {
            variables: stage.variables.keys().filter(|n| !n.contains(':')).cloned().collect(),
            lists: stage.lists.keys().filter(|n| !n.contains(':')).cloned().collect(),
        }
    }
}

/// Symbol tables of one sprite, ready for macro expansion and IR building.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    pub functions: BTreeMap<String, Function>,
    pub macros: BTreeMap<String, Macro>,
    pub block_macros: BTreeMap<String, BlockMacro>,
    pub variables: BTreeMap<String, Variable>,
    pub lists: BTreeMap<String, List>,
    pub costumes: Vec<Costume>,
    pub comment: Option<String>,
    pub globals: Globals,
}

pub struct DefinitionCollector<'a> {
    provider: &'a dyn SourceProvider,
    root: &'a Path,
    defs: Definitions,
    declared: HashSet<String>,
}

impl<'a> DefinitionCollector<'a> {
    pub fn new(provider: &'a dyn SourceProvider, root: &'a Path, globals: Globals) -> Self {
        let mut functions = BTreeMap::new();
        for builtin in [
            Function::builtin("breakpoint", &[]),
            Function::builtin("log", &["message"]),
            Function::builtin("warn", &["message"]),
            Function::builtin("error", &["message"]),
        ] {
            functions.insert(builtin.name.text.clone(), builtin);
        }
        Self {
            provider,
            root,
            defs: Definitions {
                functions,
                globals,
                ..Definitions::default()
            },
            declared: HashSet::new(),
        }
    }

    pub fn collect(mut self, tree: &SpriteTree) -> CompileResult<Definitions> {
        // Macros first: block macro bodies are walked for declarations below.
        for decl in &tree.decls {
            match decl {
                Decl::Macro { name, params, body } => {
                    if self.defs.macros.contains_key(&name.text) {
                        return Err(redeclared_macro(name));
                    }
                    self.defs.macros.insert(
                        name.text.clone(),
                        Macro {
                            name: name.clone(),
                            params: params.iter().map(|p| p.text.clone()).collect(),
                            body: body.clone(),
                        },
                    );
                }
                Decl::BlockMacro { name, params, body } => {
                    if self.defs.block_macros.contains_key(&name.text) {
                        return Err(redeclared_macro(name));
                    }
                    self.defs.block_macros.insert(
                        name.text.clone(),
                        BlockMacro {
                            name: name.clone(),
                            params: params.iter().map(|p| p.text.clone()).collect(),
                            body: body.clone(),
                        },
                    );
                }
                _ => {}
            }
        }

        for decl in &tree.decls {
            match decl {
                Decl::Costumes(paths) => {
                    for path in paths {
                        self.collect_costume(path)?;
                    }
                }
                Decl::Variables(names) => {
                    for name in names {
                        self.check_declared(name, "variable")?;
                        self.scope().add_variable(name, &[]);
                    }
                }
                Decl::Lists(names) => {
                    for name in names {
                        self.check_declared(name, "list")?;
                        self.scope().add_list(name);
                    }
                }
                Decl::DataList { name, path } => {
                    self.check_list_name(name)?;
                    let file = self.data_file(path)?;
                    let text = self.provider.read_to_string(&file).map_err(|e| {
                        CompileError::span(path.span, format!("Could not read data file: {}", e))
                    })?;
                    self.insert_list(name, text.lines().map(str::to_string).collect());
                }
                Decl::ImageList { name, path, format } => {
                    self.check_list_name(name)?;
                    let file = self.data_file(path)?;
                    if let Some(format) = format {
                        return Err(CompileError::span(format.span, "Invalid imagelist format")
                            .with_help("formats are not implemented"));
                    }
                    let bytes = self.provider.read_bytes(&file).map_err(|e| {
                        CompileError::span(path.span, format!("Could not read image file: {}", e))
                    })?;
                    let pixels = decode_png(&bytes)
                        .map_err(|e| CompileError::span(path.span, format!("Could not decode image: {}", e)))?;
                    self.insert_list(name, pixels.iter().map(u8::to_string).collect());
                }
                Decl::Function {
                    name,
                    params,
                    body,
                    warp,
                } => self.collect_function(name, params, body, *warp)?,
                Decl::Event { body, .. } => self.scope().declare_implicit(body, &[]),
                Decl::DocComment(token) => {
                    self.defs.comment = Some(literal(token)?);
                }
                Decl::Macro { .. } | Decl::BlockMacro { .. } => {}
            }
        }
        Ok(self.defs)
    }

    fn scope(&mut self) -> Scope<'_> {
        Scope {
            variables: &mut self.defs.variables,
            lists: &mut self.defs.lists,
            globals: &self.defs.globals,
            block_macros: &self.defs.block_macros,
            expanding: Vec::new(),
        }
    }

    fn check_declared(&mut self, name: &Name, kind: &str) -> CompileResult<()> {
        if !self.declared.insert(name.text.clone()) {
            return Err(CompileError::span(name.span, format!("Redeclaration of {} `{}`", kind, name.text))
                .with_help("Remove this declaration"));
        }
        Ok(())
    }

    /// A data list name must be new and must not already name a variable.
    fn check_list_name(&mut self, name: &Name) -> CompileResult<()> {
        self.check_declared(name, "list")?;
        if self.defs.variables.contains_key(&name.text) || self.defs.globals.variables.contains(&name.text) {
            return Err(
                CompileError::span(name.span, format!("`{}` is already declared as a variable", name.text))
                    .with_help("Rename this list"),
            );
        }
        Ok(())
    }

    fn insert_list(&mut self, name: &Name, data: Vec<String>) {
        self.defs.lists.insert(
            name.text.clone(),
            List {
                name: name.text.clone(),
                span: name.span,
                data,
            },
        );
    }

    fn collect_function(&mut self, name: &Name, params: &[Name], body: &[Stmt], warp: bool) -> CompileResult<()> {
        if self.defs.functions.contains_key(&name.text) {
            return Err(CompileError::span(name.span, "Redeclaration of function").with_help("Rename this function"));
        }
        let mut seen: Vec<&str> = Vec::new();
        for param in params {
            if seen.contains(&param.text.as_str()) {
                return Err(CompileError::span(param.span, format!("Argument `{}` was repeated", param.text))
                    .with_help("Rename this argument"));
            }
            seen.push(&param.text);
        }

        let mut scope = self.scope();
        let mut locals = Vec::new();
        scope.collect_locals(body, &name.text, &mut locals);
        scope.declare_implicit(body, &locals);

        self.defs.functions.insert(
            name.text.clone(),
            Function {
                name: name.clone(),
                warp,
                params: params.to_vec(),
                locals,
                fixed_proccode: None,
            },
        );
        Ok(())
    }

    fn collect_costume(&mut self, token: &Token) -> CompileResult<()> {
        let pattern = literal(token)?;
        if pattern == "*machine:ASCII" {
            let blank = self.root.join("blank.svg");
            if !self.provider.is_file(&blank) {
                return Err(CompileError::span(token.span, "Costume file not found blank.svg")
                    .with_help("`*machine:ASCII` uses blank.svg from the project root"));
            }
            for code in 33u8..127 {
                self.defs.costumes.push(Costume {
                    path: blank.clone(),
                    alias: Some(char::from(code).to_string()),
                });
            }
            return Ok(());
        }

        if pattern.contains('*') {
            let mut paths = self
                .provider
                .glob(self.root, &pattern)
                .map_err(|e| CompileError::span(token.span, format!("Invalid glob: {}", e)))?;
            if paths.is_empty() {
                return Err(CompileError::span(
                    token.span,
                    format!("Glob does not match any files {}", pattern),
                ));
            }
            paths.sort_by(|a, b| a.file_stem().cmp(&b.file_stem()));
            self.defs
                .costumes
                .extend(paths.into_iter().map(|path| Costume { path, alias: None }));
            return Ok(());
        }

        let path = self.root.join(&pattern);
        if !self.provider.is_file(&path) {
            return Err(CompileError::span(token.span, format!("Costume file not found {}", pattern))
                .with_help_opt(self.file_suggestion(&path)));
        }
        self.defs.costumes.push(Costume { path, alias: None });
        Ok(())
    }

    fn data_file(&self, token: &Token) -> CompileResult<PathBuf> {
        let path = self.root.join(literal(token)?);
        if !self.provider.is_file(&path) {
            return Err(CompileError::span(token.span, "Data file not found.").with_help_opt(self.file_suggestion(&path)));
        }
        Ok(path)
    }

    /// Closest sibling of a missing file, shown relative to the project.
    fn file_suggestion(&self, missing: &Path) -> Option<String> {
        let parent = missing.parent()?;
        let wanted = missing.file_name()?.to_string_lossy().into_owned();
        let siblings: Vec<String> = self
            .provider
            .list_dir(parent)
            .ok()?
            .iter()
            .filter(|p| self.provider.is_file(p))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        let found = suggest(&wanted, siblings.iter().map(String::as_str))?;
        let full = parent.join(found);
        let shown = full.strip_prefix(self.root).unwrap_or(&full);
        Some(format!("Did you mean {}?", shown.display()))
    }
}

fn redeclared_macro(name: &Name) -> CompileError {
    CompileError::span(name.span, "Redeclaration of macro").with_help("Rename this macro")
}

fn decode_png(bytes: &[u8]) -> Result<Vec<u8>, png::DecodingError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info()?;
    let mut buffer = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buffer)?;
    buffer.truncate(frame.buffer_size());
    Ok(buffer)
}

/// Walks statement bodies to register locals and implicitly declared
/// sprite storage.
struct Scope<'a> {
    variables: &'a mut BTreeMap<String, Variable>,
    lists: &'a mut BTreeMap<String, List>,
    globals: &'a Globals,
    block_macros: &'a BTreeMap<String, BlockMacro>,
    expanding: Vec<String>,
}

impl Scope<'_> {
    fn collect_locals(&mut self, body: &[Stmt], function: &str, locals: &mut Vec<String>) {
        for stmt in body {
            match stmt {
                Stmt::Local { name, .. } => {
                    if !locals.contains(&name.text) {
                        locals.push(name.text.clone());
                    }
                    let qualified = format!("{}:{}", function, name.text);
                    self.variables.insert(
                        qualified.clone(),
                        Variable {
                            name: qualified,
                            span: name.span,
                        },
                    );
                }
                Stmt::MacroCall { name, .. } => {
                    if let Some(body) = self.enter_macro(&name.text) {
                        self.collect_locals(&body, function, locals);
                        self.expanding.pop();
                    }
                }
                other => {
                    for nested in nested_bodies(other) {
                        self.collect_locals(nested, function, locals);
                    }
                }
            }
        }
    }

    fn declare_implicit(&mut self, body: &[Stmt], locals: &[String]) {
        for stmt in body {
            match stmt {
                Stmt::Assign { name, .. } => self.add_variable(name, locals),
                Stmt::ListSet { name, .. } => self.add_list(name),
                Stmt::MacroCall { name, .. } => {
                    if let Some(body) = self.enter_macro(&name.text) {
                        self.declare_implicit(&body, locals);
                        self.expanding.pop();
                    }
                }
                other => {
                    for nested in nested_bodies(other) {
                        self.declare_implicit(nested, locals);
                    }
                }
            }
        }
    }

    /// Body of a block macro about to be walked, unless it is unknown or
    /// already being walked.
    fn enter_macro(&mut self, name: &str) -> Option<Vec<Stmt>> {
        if self.expanding.iter().any(|n| n == name) {
            return None;
        }
        let body = self.block_macros.get(name)?.body.clone();
        self.expanding.push(name.to_string());
        Some(body)
    }

    fn add_variable(&mut self, name: &Name, locals: &[String]) {
        let text = &name.text;
        if self.globals.variables.contains(text)
            || locals.contains(text)
            || self.variables.contains_key(text)
            || self.lists.contains_key(text)
        {
            return;
        }
        self.variables.insert(
            text.clone(),
            Variable {
                name: text.clone(),
                span: name.span,
            },
        );
    }

    fn add_list(&mut self, name: &Name) {
        let text = &name.text;
        if self.globals.lists.contains(text) || self.lists.contains_key(text) || self.variables.contains_key(text) {
            return;
        }
        self.lists.insert(
            text.clone(),
            List {
                name: text.clone(),
                span: name.span,
                data: Vec::new(),
            },
        );
    }
}

fn nested_bodies(stmt: &Stmt) -> Vec<&[Stmt]> {
    match stmt {
        Stmt::If {
            branches, else_body, ..
        } => {
            let mut out: Vec<&[Stmt]> = branches.iter().map(|(_, body)| body.as_slice()).collect();
            if let Some(body) = else_body {
                out.push(body);
            }
            out
        }
        Stmt::Until { body, .. } | Stmt::Repeat { body, .. } | Stmt::Forever { body, .. } => vec![body],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::vfs::MemoryProvider;

    fn collect(fs: &MemoryProvider, source: &str, globals: Globals) -> CompileResult<Definitions> {
        let tree = parse_source(source).unwrap();
        DefinitionCollector::new(fs, Path::new("p"), globals).collect(&tree)
    }

    fn project() -> MemoryProvider {
        MemoryProvider::new()
            .with_file("p/blank.svg", "<svg/>")
            .with_file("p/player.svg", "<svg/>")
            .with_file("p/walk/b2.svg", "<svg/>")
            .with_file("p/walk/a1.svg", "<svg/>")
            .with_file("p/words.txt", "alpha\nbeta\n")
    }

    #[test]
    fn locals_are_qualified_by_function() {
        let defs = collect(
            &project(),
            "def f a { local x = 1; if 1 { y = x; } }\nonflag { z = 2; }",
            Globals::default(),
        )
        .unwrap();
        let f = &defs.functions["f"];
        assert_eq!(f.locals, vec!["x".to_string()]);
        assert!(defs.variables.contains_key("f:x"));
        assert!(defs.variables.contains_key("y"));
        assert!(defs.variables.contains_key("z"));
        assert!(!defs.variables.contains_key("x"));
    }

    #[test]
    fn globals_are_not_redeclared() {
        let globals = Globals {
            variables: vec!["score".to_string()],
            lists: vec!["items".to_string()],
        };
        let defs = collect(&project(), "onflag { score = 1; items = [1]; own = 2; }", globals).unwrap();
        assert!(!defs.variables.contains_key("score"));
        assert!(!defs.lists.contains_key("items"));
        assert!(defs.variables.contains_key("own"));
    }

    #[test]
    fn builtins_and_redeclarations() {
        let defs = collect(&project(), "onflag {}", Globals::default()).unwrap();
        let log = &defs.functions["log"];
        assert_eq!(
            log.fixed_proccode.as_deref(),
            Some("\u{200B}\u{200B}log\u{200B}\u{200B} %s")
        );
        assert!(!log.warp);

        let err = collect(&project(), "def log m {}", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "Redeclaration of function");
        let err = collect(&project(), "def f a, a {}", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "Argument `a` was repeated");
        let err = collect(&project(), "macro M -> 1; macro M -> 2;", Globals::default()).unwrap_err();
        assert_eq!(err.help(), Some("Rename this macro"));
        let err = collect(&project(), "variables a; variables a;", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "Redeclaration of variable `a`");
    }

    #[test]
    fn costumes_from_literals_globs_and_ascii() {
        let defs = collect(
            &project(),
            "costumes \"player.svg\", \"walk/*.svg\", \"*machine:ASCII\";",
            Globals::default(),
        )
        .unwrap();
        assert_eq!(defs.costumes[0].name(), "player");
        assert_eq!(defs.costumes[1].name(), "a1");
        assert_eq!(defs.costumes[2].name(), "b2");
        assert_eq!(defs.costumes.len(), 3 + 94);
        assert_eq!(defs.costumes[3].name(), "!");
        assert_eq!(defs.costumes.last().unwrap().name(), "~");
    }

    #[test]
    fn missing_costume_suggests_sibling() {
        let err = collect(&project(), "costumes \"playr.svg\";", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "Costume file not found playr.svg");
        assert_eq!(err.help(), Some("Did you mean player.svg?"));

        let err = collect(&project(), "costumes \"run/*.svg\";", Globals::default()).unwrap_err();
        assert!(err.description().starts_with("Glob does not match any files"));
    }

    #[test]
    fn data_lists_read_lines_and_reject_formats() {
        let defs = collect(&project(), "datalist words \"words.txt\";", Globals::default()).unwrap();
        assert_eq!(defs.lists["words"].data, vec!["alpha", "beta"]);

        let err = collect(&project(), "datalist w \"nope.txt\";", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "Data file not found.");

        let err = collect(&project(), "imagelist px \"words.txt\" rgb;", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "Invalid imagelist format");
        assert_eq!(err.help(), Some("formats are not implemented"));
    }

    #[test]
    fn data_lists_cannot_share_a_name() {
        let err = collect(&project(), "variables a; datalist a \"words.txt\";", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "Redeclaration of list `a`");

        let err = collect(&project(), "onflag { a = 1; } datalist a \"words.txt\";", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "`a` is already declared as a variable");
        assert_eq!(err.help(), Some("Rename this list"));

        let err = collect(&project(), "datalist a \"words.txt\"; lists a;", Globals::default()).unwrap_err();
        assert_eq!(err.description(), "Redeclaration of list `a`");

        let err = collect(
            &project(),
            "datalist a \"words.txt\"; datalist a \"words.txt\";",
            Globals::default(),
        )
        .unwrap_err();
        assert_eq!(err.description(), "Redeclaration of list `a`");

        let globals = Globals {
            variables: vec!["g".to_string()],
            lists: Vec::new(),
        };
        let err = collect(&project(), "datalist g \"words.txt\";", globals).unwrap_err();
        assert_eq!(err.description(), "`g` is already declared as a variable");
    }

    #[test]
    fn block_macro_bodies_declare_storage() {
        let defs = collect(
            &project(),
            "macro RESET { hits = 0; } onflag { RESET!(); }",
            Globals::default(),
        )
        .unwrap();
        assert!(defs.variables.contains_key("hits"));
    }
}
