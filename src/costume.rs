use crate::definitions::Costume;
use crate::diagnostic::pretty_path;
use crate::vfs::SourceProvider;
use anyhow::{anyhow, bail, Context, Result};
use std::io::Cursor;
use xmltree::Element;

/// A costume file read from disk and addressed by content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct CostumeAsset {
    pub name: String,
    pub asset_id: String,
    pub md5ext: String,
    pub data_format: String,
    pub rotation_center: (f64, f64),
    pub bytes: Vec<u8>,
}

impl CostumeAsset {
    pub fn is_bitmap(&self) -> bool {
        self.data_format != "svg"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssetOptions {
    /// Read SVG dimensions to center the rotation point.
    pub svg_center: bool,
}

impl Default for AssetOptions {
    fn default() -> Self {
        Self { svg_center: true }
    }
}

pub fn load_costume(provider: &dyn SourceProvider, costume: &Costume, options: AssetOptions) -> Result<CostumeAsset> {
    let path = &costume.path;
    let bytes = provider
        .read_bytes(path)
        .with_context(|| format!("Could not read costume '{}'", pretty_path(path)))?;
    let data_format = path
        .extension()
        .and_then(|x| x.to_str())
        .unwrap_or("")
        .to_lowercase();
    let rotation_center = match data_format.as_str() {
        "svg" if options.svg_center => svg_center(&bytes)
            .with_context(|| format!("Invalid SVG costume '{}'", pretty_path(path)))?,
        "svg" => (0.0, 0.0),
        "png" => png_center(&bytes).with_context(|| format!("Invalid PNG costume '{}'", pretty_path(path)))?,
        _ => (0.0, 0.0),
    };
    let asset_id = format!("{:x}", md5::compute(&bytes));
    Ok(CostumeAsset {
        name: costume.name().replace("{{fwslash}}", "/"),
        md5ext: format!("{}.{}", asset_id, data_format),
        asset_id,
        data_format,
        rotation_center,
        bytes,
    })
}

fn svg_center(data: &[u8]) -> Result<(f64, f64)> {
    let root = Element::parse(Cursor::new(data)).map_err(|e| anyhow!("{}", e))?;
    if let Some(view_box) = root.attributes.get("viewBox") {
        let parts: Vec<&str> = view_box
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .collect();
        if parts.len() == 4 {
            let width: f64 = parts[2].parse().map_err(|_| anyhow!("bad viewBox '{}'", view_box))?;
            let height: f64 = parts[3].parse().map_err(|_| anyhow!("bad viewBox '{}'", view_box))?;
            if width <= 0.0 || height <= 0.0 {
                bail!("viewBox must have a positive size");
            }
            return Ok((width / 2.0, height / 2.0));
        }
    }
    let width = root.attributes.get("width").and_then(|v| svg_length(v));
    let height = root.attributes.get("height").and_then(|v| svg_length(v));
    Ok(match (width, height) {
        (Some(w), Some(h)) => (w / 2.0, h / 2.0),
        _ => (0.0, 0.0),
    })
}

/// Leading number of a length such as `48px` or `12.5`.
fn svg_length(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+'))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse::<f64>().ok().filter(|n| *n > 0.0)
}

fn png_center(data: &[u8]) -> Result<(f64, f64)> {
    let reader = png::Decoder::new(Cursor::new(data)).read_info()?;
    let info = reader.info();
    Ok((f64::from(info.width) / 2.0, f64::from(info.height) / 2.0))
}
