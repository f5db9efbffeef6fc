use crate::project::BuildOptions;
use crate::vfs::MemoryProvider;
use serde_json::Value;
use std::path::Path;
use wasm_bindgen::prelude::*;

/// `files_json` maps project-relative paths to contents: a string for text
/// files, an array of bytes for binary ones.
#[wasm_bindgen]
pub fn compile_project_files(files_json: &str) -> Result<Vec<u8>, JsValue> {
    compile_project_files_with_options(files_json, true)
}

#[wasm_bindgen]
pub fn compile_project_files_with_options(files_json: &str, svg_center: bool) -> Result<Vec<u8>, JsValue> {
    let provider = provider_from_json(files_json).map_err(|e| JsValue::from_str(&e))?;
    crate::compile_to_sb3_bytes(&provider, Path::new("."), BuildOptions { svg_center }).map_err(|e| {
        let message = match e.downcast_ref::<crate::diagnostic::CompileError>() {
            Some(diagnostic) => diagnostic.render(),
            None => format!("{:#}", e),
        };
        JsValue::from_str(&message)
    })
}

fn provider_from_json(files_json: &str) -> Result<MemoryProvider, String> {
    let files: Value = serde_json::from_str(files_json).map_err(|e| format!("Invalid file map: {}", e))?;
    let Value::Object(files) = files else {
        return Err("The file map must be a JSON object".to_string());
    };
    let mut provider = MemoryProvider::new();
    for (path, contents) in files {
        let bytes = match contents {
            Value::String(text) => text.into_bytes(),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| format!("`{}` must be an array of bytes", path))?,
            _ => return Err(format!("`{}` must be a string or an array of bytes", path)),
        };
        provider.insert(path, bytes);
    }
    Ok(provider)
}
