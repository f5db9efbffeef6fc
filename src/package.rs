use crate::costume::{load_costume, CostumeAsset};
use crate::ir::Project;
use crate::project::BuildOptions;
use crate::serialize::Serializer;
use crate::vfs::SourceProvider;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;

type PackageProgressCallback<'a> = dyn FnMut(usize, usize, &str) + 'a;

pub fn build_sb3_bytes(project: &Project, provider: &dyn SourceProvider, options: BuildOptions) -> Result<Vec<u8>> {
    build_sb3_bytes_with_progress(project, provider, options, Option::<&mut fn(usize, usize, &str)>::None)
}

pub fn build_sb3_bytes_with_progress<F>(
    project: &Project,
    provider: &dyn SourceProvider,
    options: BuildOptions,
    progress: Option<&mut F>,
) -> Result<Vec<u8>>
where
    F: FnMut(usize, usize, &str),
{
    let mut progress = progress.map(|cb| cb as &mut PackageProgressCallback<'_>);

    let targets: Vec<_> = project.targets().collect();
    let mut assets: Vec<Vec<CostumeAsset>> = Vec::with_capacity(targets.len());
    for (index, target) in targets.iter().enumerate() {
        report_progress(&mut progress, index + 1, targets.len(), "Loading costumes");
        let loaded = target
            .costumes
            .iter()
            .map(|costume| load_costume(provider, costume, options.assets()))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Could not load costumes of `{}`", target.name))?;
        assets.push(loaded);
    }

    let project_json = Serializer::new().project(project, &assets);

    let mut buffer = Cursor::new(Vec::<u8>::new());
    let mut zip = zip::ZipWriter::new(&mut buffer);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    report_progress(&mut progress, 1, 1, "Writing project.json");
    zip.start_file("project.json", opts)?;
    let project_bytes = serde_json::to_vec_pretty(&project_json)?;
    zip.write_all(&project_bytes)?;

    // Identical files share one archive entry.
    let files: BTreeMap<&str, &[u8]> = assets
        .iter()
        .flatten()
        .map(|asset| (asset.md5ext.as_str(), asset.bytes.as_slice()))
        .collect();
    let file_total = files.len().max(1);
    if files.is_empty() {
        report_progress(&mut progress, 1, 1, "Packaging assets");
    }
    for (index, (name, bytes)) in files.into_iter().enumerate() {
        zip.start_file(name, opts)?;
        zip.write_all(bytes)?;
        report_progress(&mut progress, index + 1, file_total, "Packaging assets");
    }
    zip.finish()?;
    Ok(buffer.into_inner())
}

fn report_progress(progress: &mut Option<&mut PackageProgressCallback<'_>>, step: usize, total: usize, label: &str) {
    if let Some(cb) = progress.as_deref_mut() {
        cb(step, total, label);
    }
}

/// Writes the archive next to `output_path` first, so a failed build never
/// leaves a truncated file behind.
pub fn write_sb3(bytes: &[u8], output_path: &Path) -> Result<()> {
    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("Could not create '{}'", parent.display()))?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.persist(output_path)
        .map_err(|e| e.error)
        .with_context(|| format!("Could not write '{}'", output_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::compile_project;
    use crate::vfs::MemoryProvider;
    use serde_json::Value;
    use std::io::Read;

    const SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"></svg>"#;

    fn sample() -> MemoryProvider {
        MemoryProvider::new()
            .with_file("p/blank.svg", SVG)
            .with_file("p/copy.svg", SVG)
            .with_file("p/stage.gs", "costumes \"blank.svg\";\n")
            .with_file("p/main.gs", "costumes \"blank.svg\", \"copy.svg\";\nonflag { say 1; }\n")
    }

    fn entries(bytes: Vec<u8>) -> Vec<String> {
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[test]
    fn archive_holds_project_and_deduplicated_assets() {
        let fs = sample();
        let project = compile_project(&fs, Path::new("p")).unwrap();
        let bytes = build_sb3_bytes(&project, &fs, BuildOptions::default()).unwrap();
        let hash = format!("{:x}", md5::compute(SVG.as_bytes()));
        assert_eq!(entries(bytes.clone()), vec![format!("{}.svg", hash), "project.json".to_string()]);

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut text = String::new();
        archive.by_name("project.json").unwrap().read_to_string(&mut text).unwrap();
        let json: Value = serde_json::from_str(&text).unwrap();
        let costumes = json["targets"][1]["costumes"].as_array().unwrap();
        assert_eq!(costumes.len(), 2);
        assert_eq!(costumes[1]["name"], "copy");
        assert_eq!(costumes[1]["rotationCenterX"], 5.0);
    }

    #[test]
    fn progress_reports_every_stage() {
        let fs = sample();
        let project = compile_project(&fs, Path::new("p")).unwrap();
        let mut labels = Vec::new();
        let mut cb = |_: usize, _: usize, label: &str| labels.push(label.to_string());
        build_sb3_bytes_with_progress(&project, &fs, BuildOptions::default(), Some(&mut cb)).unwrap();
        labels.dedup();
        assert_eq!(labels, vec!["Loading costumes", "Writing project.json", "Packaging assets"]);
    }

    #[test]
    fn write_replaces_the_output_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("game.sb3");
        write_sb3(b"first", &out).unwrap();
        write_sb3(b"second", &out).unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"second");
    }

    #[test]
    fn missing_costume_file_is_reported() {
        let fs = sample();
        let project = compile_project(&fs, Path::new("p")).unwrap();
        let empty = MemoryProvider::new();
        let err = build_sb3_bytes(&project, &empty, BuildOptions::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("Stage"));
    }
}
