use crate::ast::Span;
use crate::diagnostic::{suggest, CompileError, CompileResult, IncludeFrame, SourceLocation};
use crate::vfs::{normalize, SourceProvider};
use regex::Regex;
use std::path::{Path, PathBuf};

/// A run of consecutive merged lines that all come from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeRange {
    /// First merged line (1-based) covered by this range.
    pub pasted_start: usize,
    pub length: usize,
    pub file: PathBuf,
    /// Line in `file` that `pasted_start` corresponds to.
    pub file_start: usize,
    /// Range of the including file that was open when the directive ran.
    pub included_from: Option<usize>,
    /// Line of the `%use` directive in the including file.
    pub directive_line: usize,
}

impl IncludeRange {
    fn contains(&self, merged_line: usize) -> bool {
        merged_line >= self.pasted_start && merged_line < self.pasted_start + self.length
    }
}

/// One sprite's sources with every `%use` directive spliced in place.
#[derive(Debug, Clone)]
pub struct AssembledSource {
    pub text: String,
    pub ranges: Vec<IncludeRange>,
    lines: Vec<String>,
    entry: PathBuf,
}

impl AssembledSource {
    pub fn entry(&self) -> &Path {
        &self.entry
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Maps a merged-stream span back to its file, line and include chain.
    pub fn locate(&self, span: Span) -> SourceLocation {
        let source_line = span
            .line
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .cloned()
            .unwrap_or_default();
        match self.ranges.iter().position(|r| r.contains(span.line)) {
            Some(index) => {
                let range = &self.ranges[index];
                SourceLocation {
                    file: range.file.clone(),
                    line: range.file_start + span.line - range.pasted_start,
                    column: span.column,
                    length: span.length,
                    source_line,
                    trace: trace_of(&self.ranges, index),
                }
            }
            // Past the end: the EOF token of the last line.
            None => {
                let last = self.ranges.iter().rev().find(|r| r.length > 0);
                let (file, line) = match last {
                    Some(range) => (
                        range.file.clone(),
                        range.file_start + span.line.saturating_sub(range.pasted_start),
                    ),
                    None => (self.entry.clone(), span.line.max(1)),
                };
                SourceLocation {
                    file,
                    line,
                    column: span.column,
                    length: span.length,
                    source_line,
                    trace: Vec::new(),
                }
            }
        }
    }

    /// Resolves a span error raised against the merged stream. Errors that
    /// already carry a location pass through untouched.
    pub fn resolve(&self, err: CompileError) -> CompileError {
        if let CompileError::Span {
            span,
            location: None,
            ..
        } = err
        {
            let location = self.locate(span);
            return err.located(location);
        }
        err.in_file(&self.entry)
    }
}

fn trace_of(ranges: &[IncludeRange], index: usize) -> Vec<IncludeFrame> {
    let mut trace = Vec::new();
    let mut current = &ranges[index];
    while let Some(parent) = current.included_from {
        let parent_range = &ranges[parent];
        trace.push(IncludeFrame {
            file: parent_range.file.clone(),
            line: current.directive_line,
        });
        current = parent_range;
    }
    trace
}

pub struct Assembler<'a> {
    provider: &'a dyn SourceProvider,
    root: PathBuf,
    directive: Regex,
    lines: Vec<String>,
    ranges: Vec<IncludeRange>,
    stack: Vec<PathBuf>,
}

impl<'a> Assembler<'a> {
    /// `root` is the project directory; include paths are relative to it.
    pub fn new(provider: &'a dyn SourceProvider, root: &Path) -> CompileResult<Self> {
        let directive = Regex::new(r#"^%\s*use\s+"(?P<path>[^"]*)"\s*;?\s*$"#)
            .map_err(|e| CompileError::project(format!("Invalid include grammar: {}", e)))?;
        Ok(Self {
            provider,
            root: root.to_path_buf(),
            directive,
            lines: Vec::new(),
            ranges: Vec::new(),
            stack: Vec::new(),
        })
    }

    pub fn assemble(mut self, entry: &Path) -> CompileResult<AssembledSource> {
        let source = self.provider.read_to_string(entry).map_err(|e| {
            CompileError::file(format!("Could not read source file: {}", e)).in_file(entry)
        })?;
        self.paste_file(entry, &source, None, 0)?;
        let mut text = self.lines.join("\n");
        text.push('\n');
        Ok(AssembledSource {
            text,
            ranges: self.ranges,
            lines: self.lines,
            entry: entry.to_path_buf(),
        })
    }

    fn open_range(&mut self, file: &Path, file_start: usize, included_from: Option<usize>, directive_line: usize) -> usize {
        self.ranges.push(IncludeRange {
            pasted_start: self.lines.len() + 1,
            length: 0,
            file: file.to_path_buf(),
            file_start,
            included_from,
            directive_line,
        });
        self.ranges.len() - 1
    }

    fn paste_file(
        &mut self,
        file: &Path,
        source: &str,
        included_from: Option<usize>,
        directive_line: usize,
    ) -> CompileResult<()> {
        self.stack.push(normalize(file));
        let mut current = self.open_range(file, 1, included_from, directive_line);

        for (idx, raw_line) in source.lines().enumerate() {
            let line_no = idx + 1;
            let line = if line_no == 1 {
                raw_line.trim_start_matches('\u{feff}')
            } else {
                raw_line
            };
            // Only a `%` in the first column starts a directive. An indented
            // one is the modulo operator continuing an expression.
            if !line.starts_with('%') {
                self.lines.push(line.to_string());
                self.ranges[current].length += 1;
                continue;
            }

            let directive_span = Span::new(line_no, 1, line.trim_end().chars().count());
            let Some(caps) = self.directive.captures(line) else {
                return Err(self.error_at(
                    CompileError::span(directive_span, "Malformed include directive")
                        .with_help("expected: %use \"path\""),
                    current,
                    line,
                ));
            };
            let pattern = caps["path"].to_string();
            let path_match = caps.name("path").map(|m| m.start()).unwrap_or(0);
            let path_span = Span::new(
                line_no,
                line[..path_match].chars().count(),
                pattern.chars().count() + 2,
            );

            let targets = match self.resolve_targets(&pattern, path_span) {
                Ok(targets) => targets,
                Err(err) => return Err(self.error_at(err, current, line)),
            };
            for target in targets {
                if self.stack.contains(&normalize(&target)) {
                    return Err(self.error_at(
                        CompileError::span(path_span, format!("Circular include of `{}`", pattern)),
                        current,
                        line,
                    ));
                }
                let included = match self.provider.read_to_string(&target) {
                    Ok(text) => text,
                    Err(e) => {
                        return Err(self.error_at(
                            CompileError::span(path_span, format!("Could not read `{}`: {}", pattern, e)),
                            current,
                            line,
                        ))
                    }
                };
                self.paste_file(&target, &included, Some(current), line_no)?;
            }
            current = self.open_range(file, line_no + 1, included_from, directive_line);
        }

        self.stack.pop();
        Ok(())
    }

    fn resolve_targets(&self, pattern: &str, span: Span) -> CompileResult<Vec<PathBuf>> {
        if pattern.contains(['*', '?']) {
            let matches = self
                .provider
                .glob(&self.root, pattern)
                .map_err(|e| CompileError::span(span, format!("Invalid glob: {}", e)))?;
            if matches.is_empty() {
                return Err(CompileError::span(span, "Glob does not match any files"));
            }
            return Ok(matches);
        }

        let direct = self.root.join(pattern);
        if self.provider.is_file(&direct) {
            return Ok(vec![direct]);
        }
        let with_extension = self.root.join(format!("{}.gs", pattern));
        if self.provider.is_file(&with_extension) {
            return Ok(vec![with_extension]);
        }

        let known: Vec<String> = self
            .provider
            .walk_files(&self.root)
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.strip_prefix(&self.root).ok())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .collect();
        let help = suggest(pattern, known.iter().map(String::as_str))
            .map(|s| format!("Did you mean `{}`?", s));
        Err(CompileError::span(span, format!("Included file `{}` not found", pattern)).with_help_opt(help))
    }

    /// Errors raised while reading directives refer to real file lines, so
    /// they are located right away instead of through the merged stream.
    fn error_at(&self, err: CompileError, current: usize, line: &str) -> CompileError {
        let CompileError::Span { span, .. } = &err else {
            return err;
        };
        let location = SourceLocation {
            file: self.ranges[current].file.clone(),
            line: span.line,
            column: span.column,
            length: span.length,
            source_line: line.to_string(),
            trace: trace_of(&self.ranges, current),
        };
        err.located(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryProvider;

    fn assemble(fs: &MemoryProvider) -> CompileResult<AssembledSource> {
        Assembler::new(fs, Path::new("p"))?.assemble(Path::new("p/main.gs"))
    }

    #[test]
    fn included_lines_map_back_to_their_file() {
        let fs = MemoryProvider::new()
            .with_file("p/main.gs", "costumes \"a.svg\";\n%use \"lib.gs\"\nonflag {}\n")
            .with_file("p/lib.gs", "# lib\n\nsay \"x\";\n");
        let assembled = assemble(&fs).unwrap();
        assert_eq!(assembled.line_count(), 5);

        let loc = assembled.locate(Span::new(4, 1, 3));
        assert_eq!(loc.file, PathBuf::from("p/lib.gs"));
        assert_eq!(loc.line, 3);
        assert_eq!(loc.source_line, "say \"x\";");
        assert_eq!(
            loc.trace,
            vec![IncludeFrame {
                file: PathBuf::from("p/main.gs"),
                line: 2
            }]
        );

        let after = assembled.locate(Span::new(5, 1, 6));
        assert_eq!(after.file, PathBuf::from("p/main.gs"));
        assert_eq!(after.line, 3);
        assert!(after.trace.is_empty());
    }

    #[test]
    fn glob_includes_paste_in_sorted_order() {
        let fs = MemoryProvider::new()
            .with_file("p/main.gs", "%use \"lib/*.gs\"\n")
            .with_file("p/lib/b.gs", "b;\n")
            .with_file("p/lib/a.gs", "a;\n");
        let assembled = assemble(&fs).unwrap();
        assert_eq!(assembled.text, "a;\nb;\n");
    }

    #[test]
    fn missing_include_points_at_directive() {
        let fs = MemoryProvider::new()
            .with_file("p/main.gs", "\n%use \"lbi\"\n")
            .with_file("p/lib.gs", "");
        let err = assemble(&fs).unwrap_err();
        assert_eq!(err.description(), "Included file `lbi` not found");
        let loc = err.location().unwrap();
        assert_eq!(loc.file, PathBuf::from("p/main.gs"));
        assert_eq!(loc.line, 2);
        assert_eq!(loc.column, 6);
        assert_eq!(loc.length, 5);
    }

    #[test]
    fn indented_percent_continues_an_expression() {
        let fs = MemoryProvider::new().with_file("p/main.gs", "onflag {\n    n = 7\n        % 3;\n}\n");
        let assembled = assemble(&fs).unwrap();
        assert_eq!(assembled.text, "onflag {\n    n = 7\n        % 3;\n}\n");
        assert_eq!(assembled.ranges.len(), 1);
    }

    #[test]
    fn malformed_directive_shows_expected_syntax() {
        let fs = MemoryProvider::new().with_file("p/main.gs", "%use lib\n");
        let err = assemble(&fs).unwrap_err();
        assert_eq!(err.help(), Some("expected: %use \"path\""));
    }

    #[test]
    fn circular_includes_are_rejected() {
        let fs = MemoryProvider::new()
            .with_file("p/main.gs", "%use \"a.gs\"\n")
            .with_file("p/a.gs", "%use \"b.gs\"\n")
            .with_file("p/b.gs", "%use \"a.gs\"\n");
        let err = assemble(&fs).unwrap_err();
        assert_eq!(err.description(), "Circular include of `a.gs`");
        let loc = err.location().unwrap();
        assert_eq!(loc.file, PathBuf::from("p/b.gs"));
        assert_eq!(loc.trace.len(), 2);
    }
}
