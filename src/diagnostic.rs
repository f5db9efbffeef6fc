use crate::ast::Span;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// One level of an include chain: the directive that pulled the erroring
/// file into its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeFrame {
    pub file: PathBuf,
    pub line: usize,
}

/// A span mapped back to the file it was written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub length: usize,
    pub source_line: String,
    pub trace: Vec<IncludeFrame>,
}

#[derive(Debug, Clone)]
pub enum CompileError {
    Project {
        description: String,
        help: Option<String>,
    },
    File {
        description: String,
        help: Option<String>,
        file: Option<PathBuf>,
    },
    Span {
        description: String,
        help: Option<String>,
        span: Span,
        location: Option<SourceLocation>,
    },
}

pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    pub fn project(description: impl Into<String>) -> Self {
        CompileError::Project {
            description: description.into(),
            help: None,
        }
    }

    pub fn file(description: impl Into<String>) -> Self {
        CompileError::File {
            description: description.into(),
            help: None,
            file: None,
        }
    }

    pub fn span(span: Span, description: impl Into<String>) -> Self {
        CompileError::Span {
            description: description.into(),
            help: None,
            span,
            location: None,
        }
    }

    pub fn with_help(self, help: impl Into<String>) -> Self {
        self.with_help_opt(Some(help.into()))
    }

    pub fn with_help_opt(mut self, new_help: Option<String>) -> Self {
        match &mut self {
            CompileError::Project { help, .. }
            | CompileError::File { help, .. }
            | CompileError::Span { help, .. } => *help = new_help,
        }
        self
    }

    pub fn description(&self) -> &str {
        match self {
            CompileError::Project { description, .. }
            | CompileError::File { description, .. }
            | CompileError::Span { description, .. } => description,
        }
    }

    pub fn help(&self) -> Option<&str> {
        match self {
            CompileError::Project { help, .. }
            | CompileError::File { help, .. }
            | CompileError::Span { help, .. } => help.as_deref(),
        }
    }

    /// Location after source-map resolution, if this is a span error that
    /// has been resolved.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            CompileError::Span { location, .. } => location.as_ref(),
            _ => None,
        }
    }

    /// Attaches the sprite file to file errors that were raised without one.
    pub fn in_file(mut self, path: &Path) -> Self {
        if let CompileError::File { file, .. } = &mut self {
            if file.is_none() {
                *file = Some(path.to_path_buf());
            }
        }
        self
    }

    pub fn located(mut self, resolved: SourceLocation) -> Self {
        if let CompileError::Span { location, .. } = &mut self {
            if location.is_none() {
                *location = Some(resolved);
            }
        }
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!("Error! {}\n", self.description());
        match self {
            CompileError::Project { help, .. } => {
                if let Some(help) = help {
                    out.push_str(&format!("help: {}\n", help));
                }
            }
            CompileError::File { help, file, .. } => {
                if let Some(file) = file {
                    out.push_str(&format!("in {}\n", pretty_path(file)));
                }
                if let Some(help) = help {
                    out.push_str(&format!("help: {}\n", help));
                }
            }
            CompileError::Span {
                help,
                span,
                location,
                ..
            } => match location {
                Some(loc) => {
                    out.push_str(&format!(
                        "in {}:{}:{}\n",
                        pretty_path(&loc.file),
                        loc.line,
                        loc.column
                    ));
                    let gutter = format!("{:>4} | ", loc.line);
                    out.push_str(&gutter);
                    out.push_str(loc.source_line.trim_end_matches(['\r', '\n']));
                    out.push('\n');
                    out.push_str(&" ".repeat(gutter.chars().count() + loc.column.saturating_sub(1)));
                    out.push_str(&"^".repeat(loc.length.max(1)));
                    if let Some(help) = help {
                        out.push(' ');
                        out.push_str(help);
                    }
                    out.push('\n');
                    for frame in &loc.trace {
                        out.push_str(&format!(
                            "  included from {}:{}\n",
                            pretty_path(&frame.file),
                            frame.line
                        ));
                    }
                }
                None => {
                    out.push_str(&format!("at line {}, column {}\n", span.line, span.column));
                    if let Some(help) = help {
                        out.push_str(&format!("help: {}\n", help));
                    }
                }
            },
        }
        out
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render().trim_end())
    }
}

impl Error for CompileError {}

pub fn pretty_path(path: &Path) -> String {
    let raw = path.display().to_string();
    if let Some(stripped) = raw.strip_prefix(r"\\?\") {
        stripped.to_string()
    } else {
        raw
    }
}

/// Closest candidate to `name`, by optimal-string-alignment distance, or
/// `None` when nothing is similar enough to be worth suggesting.
pub fn suggest<'a, I>(name: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        if candidate == name {
            continue;
        }
        let distance = edit_distance(name, candidate);
        let longest = name.chars().count().max(candidate.chars().count());
        // similarity = 1 - distance / longest must reach 0.6
        if distance * 10 > longest * 4 {
            continue;
        }
        let better = match best {
            None => true,
            Some((d, c)) => distance < d || (distance == d && candidate < c),
        };
        if better {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, c)| c.to_string())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut rows = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in rows.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        rows[0][j] = j;
    }
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (rows[i - 1][j] + 1)
                .min(rows[i][j - 1] + 1)
                .min(rows[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(rows[i - 2][j - 2] + 1);
            }
            rows[i][j] = best;
        }
    }
    rows[a.len()][b.len()]
}

pub fn num_plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}
