pub mod assembler;
pub mod ast;
pub mod builder;
pub mod costume;
pub mod definitions;
pub mod diagnostic;
pub mod ir;
pub mod layout;
pub mod lexer;
pub mod literal;
pub mod macros;
pub mod optimize;
pub mod package;
pub mod parser;
pub mod project;
pub mod prototype;
pub mod serialize;
pub mod vfs;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

#[cfg(all(target_arch = "wasm32", feature = "wasm-bindings"))]
pub mod wasm;

use anyhow::{bail, Context, Result};
use project::BuildOptions;
use std::path::{Path, PathBuf};
use vfs::SourceProvider;

const STARTER_STAGE: &str = "costumes \"blank.svg\";\n";
const STARTER_MAIN: &str = "costumes \"blank.svg\";\n\nonflag {\n    say \"Hello, World!\";\n}\n";
const BLANK_SVG: &str =
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="2" height="2" viewBox="0 0 2 2"></svg>"##;

#[cfg(not(target_arch = "wasm32"))]
pub fn run_cli(args: &cli::Args) -> Result<()> {
    if args.init {
        let progress = CliProgress::new("Init", 1);
        progress.emit(1, "Writing starter project");
        return init_project(&args.input);
    }

    let total_stages = 2 + usize::from(!args.check);
    let progress = CliProgress::new("Build", total_stages);
    let mut stage = 0usize;

    stage += 1;
    progress.emit(stage, "Resolving project directory");
    let root = canonicalize_dir(&args.input)?;
    let provider = vfs::FsProvider;

    stage += 1;
    let mut compile_cb = |step: usize, total: usize, label: &str| {
        progress.emit_with_total(step, total, &format!("Compiling {}", label));
    };
    let project = project::compile_project_with_progress(&provider, &root, Some(&mut compile_cb))?;
    if args.check {
        progress.emit(stage, "Checked");
        return Ok(());
    }

    stage += 1;
    let output = match &args.output {
        Some(output) => output.clone(),
        None => default_output(&root),
    };
    let options = BuildOptions {
        svg_center: !args.no_svg_center,
    };
    let mut package_cb = |step: usize, total: usize, label: &str| {
        progress.emit_with_total(step, total, label);
    };
    let bytes = package::build_sb3_bytes_with_progress(&project, &provider, options, Some(&mut package_cb))?;
    progress.emit(stage, &format!("Writing {}", diagnostic::pretty_path(&output)));
    package::write_sb3(&bytes, &output)
}

/// Compiles a project tree and packages it into `.sb3` bytes.
pub fn compile_to_sb3_bytes(provider: &dyn SourceProvider, root: &Path, options: BuildOptions) -> Result<Vec<u8>> {
    let project = project::compile_project(provider, root)?;
    package::build_sb3_bytes(&project, provider, options)
}

/// Writes `stage.gs`, `main.gs` and `blank.svg` into `dir`.
pub fn init_project(dir: &Path) -> Result<()> {
    for existing in [project::STAGE_FILE, "main.gs"] {
        if dir.join(existing).exists() {
            bail!("A project already exists in '{}'.", diagnostic::pretty_path(dir));
        }
    }
    std::fs::create_dir_all(dir).with_context(|| format!("Could not create '{}'", dir.display()))?;
    for (name, contents) in [
        (project::STAGE_FILE, STARTER_STAGE),
        ("main.gs", STARTER_MAIN),
        ("blank.svg", BLANK_SVG),
    ] {
        std::fs::write(dir.join(name), contents).with_context(|| format!("Could not write '{}'", name))?;
    }
    Ok(())
}

pub fn canonicalize_dir(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        // Let the project loader produce the diagnostic with a suggestion.
        return Ok(path.to_path_buf());
    }
    Ok(path.canonicalize()?)
}

#[cfg(not(target_arch = "wasm32"))]
fn default_output(root: &Path) -> PathBuf {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    root.join(format!("{}.sb3", name))
}

#[cfg(not(target_arch = "wasm32"))]
struct CliProgress {
    prefix: &'static str,
    total: usize,
}

#[cfg(not(target_arch = "wasm32"))]
impl CliProgress {
    fn new(prefix: &'static str, total: usize) -> Self {
        Self {
            prefix,
            total: total.max(1),
        }
    }

    fn emit(&self, step: usize, label: &str) {
        self.emit_with_total(step, self.total, label);
    }

    fn emit_with_total(&self, step: usize, total: usize, label: &str) {
        let total = total.max(1);
        let step = step.clamp(1, total);
        let bar = render_progress_bar(step, total, 14);
        eprintln!("[{}] {}... ({}/{}) {}", self.prefix, label, step, total, bar);
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn render_progress_bar(step: usize, total: usize, width: usize) -> String {
    let width = width.max(1);
    let filled = ((step * width) + (total / 2)) / total;
    let mut s = String::with_capacity(width + 2);
    s.push('[');
    for i in 0..width {
        s.push(if i < filled { '=' } else { '-' });
    }
    s.push(']');
    s
}
