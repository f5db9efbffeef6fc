use crate::assembler::Assembler;
use crate::builder::build_sprite;
use crate::costume::AssetOptions;
use crate::definitions::{DefinitionCollector, Globals};
use crate::diagnostic::{pretty_path, suggest, CompileError, CompileResult};
use crate::ir::{Project, Sprite};
use crate::layout;
use crate::macros::expand_macros;
use crate::parser::parse_source;
use crate::prototype::PrototypeRegistry;
use crate::vfs::SourceProvider;
use std::path::{Path, PathBuf};

pub const STAGE_FILE: &str = "stage.gs";
const SOURCE_EXT: &str = ".gs";
const HEADER_EXT: &str = ".h.gs";

#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Read SVG sizes to center costume rotation points.
    pub svg_center: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { svg_center: true }
    }
}

impl BuildOptions {
    pub fn assets(&self) -> AssetOptions {
        AssetOptions {
            svg_center: self.svg_center,
        }
    }
}

type ProgressCallback<'a> = dyn FnMut(usize, usize, &str) + 'a;

pub fn compile_project(provider: &dyn SourceProvider, root: &Path) -> CompileResult<Project> {
    compile_project_with_progress(provider, root, Option::<&mut fn(usize, usize, &str)>::None)
}

/// Compiles the stage, then every sprite file in the project root.
pub fn compile_project_with_progress<F>(
    provider: &dyn SourceProvider,
    root: &Path,
    progress: Option<&mut F>,
) -> CompileResult<Project>
where
    F: FnMut(usize, usize, &str),
{
    let mut progress = progress.map(|cb| cb as &mut ProgressCallback<'_>);
    let sprite_files = discover(provider, root)?;
    let registry = PrototypeRegistry::builtin()?;
    let compiler = TargetCompiler {
        provider,
        root,
        registry: &registry,
    };
    let total = sprite_files.len() + 1;

    report(&mut progress, 1, total, "Stage");
    let (stage, globals) = compiler.compile(&root.join(STAGE_FILE), "Stage", Globals::default())?;

    let mut sprites = Vec::with_capacity(sprite_files.len());
    for (index, (name, path)) in sprite_files.iter().enumerate() {
        report(&mut progress, index + 2, total, name);
        let (sprite, _) = compiler.compile(path, name, globals.clone())?;
        sprites.push(sprite);
    }
    Ok(Project { stage, sprites })
}

fn report(progress: &mut Option<&mut ProgressCallback<'_>>, step: usize, total: usize, label: &str) {
    if let Some(cb) = progress.as_deref_mut() {
        cb(step, total, label);
    }
}

/// Sprite sources in the project root as `(name, path)`, sorted by path.
fn discover(provider: &dyn SourceProvider, root: &Path) -> CompileResult<Vec<(String, PathBuf)>> {
    if !provider.is_dir(root) {
        return Err(missing_directory(provider, root));
    }
    if !provider.is_file(&root.join(STAGE_FILE)) {
        return Err(CompileError::project(format!(
            "No {} found in `{}`",
            STAGE_FILE,
            pretty_path(root)
        ))
        .with_help("Every project needs a stage; run with --init to create one"));
    }
    let entries = provider
        .list_dir(root)
        .map_err(|e| CompileError::project(format!("Could not list `{}`: {}", pretty_path(root), e)))?;
    let mut sprites = Vec::new();
    for path in entries {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name == STAGE_FILE || file_name.ends_with(HEADER_EXT) || !provider.is_file(&path) {
            continue;
        }
        let Some(name) = file_name.strip_suffix(SOURCE_EXT) else {
            continue;
        };
        if name == "Stage" {
            return Err(CompileError::file("`Stage` cannot be used as a sprite name")
                .with_help(format!("Rename the file or move its code into {}", STAGE_FILE))
                .in_file(&path));
        }
        sprites.push((name.to_string(), path.clone()));
    }
    sprites.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(sprites)
}

fn missing_directory(provider: &dyn SourceProvider, root: &Path) -> CompileError {
    let wanted = root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let siblings: Vec<String> = root
        .parent()
        .and_then(|parent| provider.list_dir(parent).ok())
        .unwrap_or_default()
        .into_iter()
        .filter(|p| provider.is_dir(p))
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    let help = suggest(&wanted, siblings.iter().map(String::as_str)).map(|s| format!("Did you mean `{}`?", s));
    CompileError::project(format!("Project directory `{}` does not exist", pretty_path(root))).with_help_opt(help)
}

struct TargetCompiler<'a> {
    provider: &'a dyn SourceProvider,
    root: &'a Path,
    registry: &'a PrototypeRegistry,
}

impl TargetCompiler<'_> {
    /// Runs one source file through the whole pipeline. Also returns the
    /// storage it declares, which becomes the globals when it is the stage.
    fn compile(&self, path: &Path, name: &str, globals: Globals) -> CompileResult<(Sprite, Globals)> {
        let assembled = Assembler::new(self.provider, self.root)?.assemble(path)?;
        let pipeline = || -> CompileResult<(Sprite, Globals)> {
            let tree = parse_source(&assembled.text)?;
            let defs = DefinitionCollector::new(self.provider, self.root, globals).collect(&tree)?;
            if defs.costumes.is_empty() {
                return Err(CompileError::file("No costumes defined").with_help("Add a costumes statement"));
            }
            let declared = Globals::from_stage(&defs);
            let tree = expand_macros(&tree, &defs)?;
            let mut sprite = build_sprite(name, &tree, defs, self.registry)?;
            layout::cleanup(&mut sprite.blocks);
            Ok((sprite, declared))
        };
        pipeline().map_err(|e| assembled.resolve(e))
    }
}
