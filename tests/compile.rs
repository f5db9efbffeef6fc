use blockscript_core::diagnostic::CompileError;
use blockscript_core::project::{compile_project, BuildOptions};
use blockscript_core::serialize::Serializer;
use blockscript_core::vfs::MemoryProvider;
use blockscript_core::compile_to_sb3_bytes;
use serde_json::Value;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

const SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 4 4"></svg>"#;

fn project(stage: &str, sprites: &[(&str, &str)]) -> MemoryProvider {
    let mut fs = MemoryProvider::new()
        .with_file("game/x.svg", SVG)
        .with_file("game/stage.gs", stage);
    for (path, text) in sprites {
        fs.insert(format!("game/{}", path), *text);
    }
    fs
}

fn project_json(fs: &MemoryProvider) -> Value {
    let bytes = compile_to_sb3_bytes(fs, Path::new("game"), BuildOptions::default()).unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut text = String::new();
    archive.by_name("project.json").unwrap().read_to_string(&mut text).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn blocks_with<'a>(target: &'a Value, opcode: &str) -> Vec<(&'a String, &'a Value)> {
    target["blocks"]
        .as_object()
        .unwrap()
        .iter()
        .filter(|(_, b)| b["opcode"] == opcode)
        .collect()
}

fn compile_error(fs: &MemoryProvider) -> CompileError {
    compile_project(fs, Path::new("game")).unwrap_err()
}

#[test]
fn constant_join_is_a_single_literal() {
    let fs = project(
        "costumes \"x.svg\";\n",
        &[("main.gs", "costumes \"x.svg\";\nonflag { say \"a\" ++ \"b\"; }\n")],
    );
    let json = project_json(&fs);
    let sprite = &json["targets"][1];
    assert_eq!(sprite["name"], "main");

    let hats = blocks_with(sprite, "event_whenflagclicked");
    assert_eq!(hats.len(), 1);
    let (hat_id, hat) = hats[0];
    assert_eq!(hat["topLevel"], true);

    let says = blocks_with(sprite, "looks_say");
    assert_eq!(says.len(), 1);
    let (say_id, say) = says[0];
    assert_eq!(hat["next"], Value::String(say_id.clone()));
    assert_eq!(say["parent"], Value::String(hat_id.clone()));
    assert_eq!(say["inputs"]["MESSAGE"], serde_json::json!([1, [10, "ab"]]));
    assert_eq!(sprite["blocks"].as_object().unwrap().len(), 2);
}

#[test]
fn stage_globals_are_not_redeclared_by_sprites() {
    let fs = project(
        "costumes \"x.svg\";\nvariables score;\n",
        &[("main.gs", "costumes \"x.svg\";\nonflag { score = 1; mine = 2; }\n")],
    );
    let json = project_json(&fs);
    let stage = &json["targets"][0];
    let sprite = &json["targets"][1];
    assert!(stage["variables"].get("score").is_some());
    assert!(sprite["variables"].get("score").is_none());
    assert!(sprite["variables"].get("mine").is_some());

    let sets = blocks_with(sprite, "data_setvariableto");
    let fields: Vec<&Value> = sets.iter().map(|(_, b)| &b["fields"]["VARIABLE"]).collect();
    assert!(fields.contains(&&serde_json::json!(["score", "score"])));
}

#[test]
fn sibling_sprites_share_stage_storage() {
    let reader = "costumes \"x.svg\";\nonflag { say score; add 1 to items; }\n";
    let fs = project(
        "costumes \"x.svg\";\nvariables score;\nlists items;\n",
        &[("a.gs", reader), ("b.gs", reader)],
    );
    let json = project_json(&fs);
    let stage = &json["targets"][0];
    assert_eq!(stage["variables"]["score"][0], "score");
    assert_eq!(stage["lists"]["items"][0], "items");

    let sprites: Vec<&Value> = json["targets"].as_array().unwrap()[1..].iter().collect();
    let names: Vec<&Value> = sprites.iter().map(|t| &t["name"]).collect();
    assert_eq!(names, vec!["a", "b"]);
    for sprite in sprites {
        assert!(sprite["variables"].get("score").is_none());
        assert!(sprite["lists"].get("items").is_none());
        let (_, say) = blocks_with(sprite, "looks_say")[0];
        assert_eq!(say["inputs"]["MESSAGE"], serde_json::json!([3, [12, "score", "score"], [10, ""]]));
        let (_, add) = blocks_with(sprite, "data_addtolist")[0];
        assert_eq!(add["fields"]["LIST"], serde_json::json!(["items", "items"]));
    }
}

#[test]
fn indented_modulo_line_compiles() {
    let fs = project(
        "costumes \"x.svg\";\n",
        &[("main.gs", "costumes \"x.svg\";\nonflag {\n    say 7\n        % 3;\n}\n")],
    );
    let json = project_json(&fs);
    let (_, say) = blocks_with(&json["targets"][1], "looks_say")[0];
    assert_eq!(say["inputs"]["MESSAGE"], serde_json::json!([1, [10, "1"]]));
}

#[test]
fn errors_in_included_files_point_at_that_file() {
    let fs = project(
        "costumes \"x.svg\";\n",
        &[
            ("main.gs", "costumes \"x.svg\";\n%use \"b.inc\"\nonflag { b; }\n"),
            ("b.inc", "def b {\n    show;\n    sya 1;\n}\n"),
        ],
    );
    let err = compile_error(&fs);
    assert_eq!(err.description(), "Undefined statement or function `sya`");
    let location = err.location().unwrap();
    assert_eq!(location.file, PathBuf::from("game/b.inc"));
    assert_eq!(location.line, 3);
    assert_eq!(location.trace.len(), 1);
    assert_eq!(location.trace[0].file, PathBuf::from("game/main.gs"));
    assert_eq!(location.trace[0].line, 2);

    let rendered = err.render();
    assert!(rendered.contains("game/b.inc:3"));
    assert!(rendered.contains("Did you mean `say`?"));
}

#[test]
fn arity_and_forever_diagnostics_are_spanned() {
    let fs = project(
        "costumes \"x.svg\";\n",
        &[("main.gs", "costumes \"x.svg\";\ndef f a { }\nonflag {\n    f 1, 2;\n}\n")],
    );
    let err = compile_error(&fs);
    assert_eq!(err.description(), "Too many arguments for function `f`");
    assert_eq!(err.location().unwrap().line, 4);

    let fs = project(
        "costumes \"x.svg\";\n",
        &[("main.gs", "costumes \"x.svg\";\nonflag {\n    forever { }\n    say 1;\n}\n")],
    );
    let err = compile_error(&fs);
    assert_eq!(err.description(), "forever cannot be preceded by any statements");
    assert!(matches!(err, CompileError::Span { .. }));
}

#[test]
fn procedures_serialize_with_mutations() {
    let fs = project(
        "costumes \"x.svg\";\n",
        &[(
            "main.gs",
            "costumes \"x.svg\";\nvariables v;\ndef greet who, times { say $who; }\nonflag { greet v, 2; }\n",
        )],
    );
    let json = project_json(&fs);
    let sprite = &json["targets"][1];

    let (_, call) = blocks_with(sprite, "procedures_call")[0];
    assert_eq!(call["mutation"]["proccode"], "greet %s %s");
    assert_eq!(call["mutation"]["argumentids"], "[\"who\",\"times\"]");
    assert_eq!(call["mutation"]["warp"], true);
    assert_eq!(call["inputs"]["who"], serde_json::json!([3, [12, "v", "v"], [10, ""]]));
    assert_eq!(call["inputs"]["times"], serde_json::json!([1, [10, "2"]]));

    let (proto_id, proto) = blocks_with(sprite, "procedures_prototype")[0];
    assert_eq!(proto["shadow"], true);
    assert_eq!(proto["mutation"]["warp"], "true");
    let (_, def) = blocks_with(sprite, "procedures_definition")[0];
    assert_eq!(def["inputs"]["custom_block"], serde_json::json!([1, proto_id]));

    let arguments = blocks_with(sprite, "argument_reporter_string_number");
    let shadows = arguments.iter().filter(|(_, b)| b["shadow"] == true).count();
    assert_eq!(shadows, 2);
    assert_eq!(arguments.len(), 3);
}

#[test]
fn broadcasts_and_pen_land_in_the_project() {
    let fs = project(
        "costumes \"x.svg\";\n",
        &[("main.gs", "costumes \"x.svg\";\non \"start\" { erase; }\n")],
    );
    let compiled = compile_project(&fs, Path::new("game")).unwrap();
    let json = Serializer::new().project(&compiled, &[]);
    assert_eq!(json["targets"][0]["broadcasts"]["start"], "start");
    assert_eq!(json["extensions"], serde_json::json!(["pen"]));
    assert_eq!(json["meta"]["semver"], "3.0.0");
}

#[test]
fn scripts_are_laid_out_top_to_bottom() {
    let fs = project(
        "costumes \"x.svg\";\n",
        &[("main.gs", "costumes \"x.svg\";\nonflag { say 1; }\nonclick { say 2; }\n")],
    );
    let compiled = compile_project(&fs, Path::new("game")).unwrap();
    let sprite = &compiled.sprites[0];
    assert_eq!(sprite.blocks[0].position, (0, 0));
    assert!(sprite.blocks[1].position.1 > 0);
}
