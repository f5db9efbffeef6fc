use crate::costume::CostumeAsset;
use crate::ir::{Block, BlockKind, Field, Input, Project, Sprite, Stack};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

const DOC_COMMENT_ID: &str = "__docComment__";

/// Writes the flat, ID-indexed block graph. IDs are unique across every
/// target one serializer writes.
#[derive(Debug, Default)]
pub struct Serializer {
    id_counter: usize,
}

struct TargetGraph {
    blocks: Map<String, Value>,
    comments: Map<String, Value>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_id(&mut self) -> String {
        self.id_counter += 1;
        format!("block_{}", self.id_counter)
    }

    pub fn project(&mut self, project: &Project, assets: &[Vec<CostumeAsset>]) -> Value {
        let broadcasts = collect_broadcasts(project);
        let empty = Vec::new();
        let targets: Vec<Value> = project
            .targets()
            .enumerate()
            .map(|(layer, sprite)| {
                let messages = if sprite.is_stage() { &broadcasts } else { &empty };
                self.target(sprite, assets.get(layer).map_or(&[][..], Vec::as_slice), layer, messages)
            })
            .collect();
        let extensions: Vec<&str> = if project.targets().any(uses_pen) {
            vec!["pen"]
        } else {
            Vec::new()
        };
        json!({
            "targets": targets,
            "monitors": [],
            "extensions": extensions,
            "meta": {
                "semver": "3.0.0",
                "vm": "0.2.0",
                "agent": concat!("blockscript-rs ", env!("CARGO_PKG_VERSION"))
            }
        })
    }

    pub fn target(&mut self, sprite: &Sprite, costumes: &[CostumeAsset], layer_order: usize, broadcasts: &[String]) -> Value {
        let mut graph = TargetGraph {
            blocks: Map::new(),
            comments: Map::new(),
        };
        for root in &sprite.blocks {
            let id = self.new_id();
            self.block(&mut graph, root, &id, None, None);
        }
        if let Some(text) = &sprite.comment {
            graph.comments.insert(
                DOC_COMMENT_ID.to_string(),
                json!({
                    "blockId": Value::Null,
                    "x": 0,
                    "y": 0,
                    "width": 200,
                    "height": 200,
                    "minimized": false,
                    "text": text
                }),
            );
        }

        let variables: Map<String, Value> = sprite
            .variables
            .keys()
            .map(|name| (name.clone(), json!([name, 0])))
            .collect();
        let lists: Map<String, Value> = sprite
            .lists
            .iter()
            .map(|(name, list)| (name.clone(), json!([name, list.data])))
            .collect();
        let broadcasts: Map<String, Value> = broadcasts.iter().map(|m| (m.clone(), json!(m))).collect();

        let mut target = json!({
            "isStage": sprite.is_stage(),
            "name": sprite.name,
            "variables": variables,
            "lists": lists,
            "broadcasts": broadcasts,
            "blocks": graph.blocks,
            "comments": graph.comments,
            "currentCostume": 0,
            "costumes": costumes.iter().map(costume_json).collect::<Vec<_>>(),
            "sounds": [],
            "volume": 100,
            "layerOrder": layer_order
        });
        let extra = if sprite.is_stage() {
            json!({
                "tempo": 60,
                "videoTransparency": 50,
                "videoState": "on",
                "textToSpeechLanguage": Value::Null
            })
        } else {
            json!({
                "visible": true,
                "x": 0,
                "y": 0,
                "size": 100,
                "direction": 90,
                "draggable": false,
                "rotationStyle": "all around"
            })
        };
        if let (Some(dst), Value::Object(add)) = (target.as_object_mut(), extra) {
            dst.extend(add);
        }
        target
    }

    fn block(&mut self, graph: &mut TargetGraph, block: &Block, id: &str, next: Option<&str>, parent: Option<&str>) {
        let mut inputs = Map::new();
        for (name, input) in &block.inputs {
            if let Some(value) = self.input(graph, name, input, id) {
                inputs.insert(name.clone(), value);
            }
        }
        let fields: Map<String, Value> = block
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field_json(field)))
            .collect();

        let first_of_body = match &block.kind {
            BlockKind::Hat { stack } => self.stack(graph, stack, id),
            _ => None,
        };
        let next = first_of_body.as_deref().or(next);

        let mut record = Map::new();
        record.insert("opcode".into(), json!(block.opcode));
        record.insert("next".into(), json!(next));
        record.insert("parent".into(), json!(parent));
        record.insert("inputs".into(), Value::Object(inputs));
        record.insert("fields".into(), Value::Object(fields));
        record.insert("shadow".into(), json!(is_shadow(block)));
        record.insert("topLevel".into(), json!(block.is_hat()));
        if block.is_hat() {
            record.insert("x".into(), json!(block.position.0));
            record.insert("y".into(), json!(block.position.1));
        }
        match &block.kind {
            BlockKind::ProcCall { proccode, warp } => {
                record.insert(
                    "mutation".into(),
                    json!({
                        "tagName": "mutation",
                        "children": [],
                        "proccode": proccode,
                        "argumentids": argument_ids(block),
                        "warp": warp
                    }),
                );
            }
            BlockKind::ProcProto { proccode, warp } => {
                let ids = argument_ids(block);
                let defaults = vec!["0"; block.inputs.len()];
                record.insert(
                    "mutation".into(),
                    json!({
                        "tagName": "mutation",
                        "children": [],
                        "proccode": proccode,
                        "argumentids": ids,
                        "argumentnames": ids,
                        "argumentdefaults": Value::Array(defaults.into_iter().map(Value::from).collect()).to_string(),
                        "warp": warp.to_string()
                    }),
                );
            }
            _ => {}
        }
        if let Some(text) = &block.comment {
            let comment_id = format!("{}_comment", id);
            record.insert("comment".into(), json!(comment_id));
            graph.comments.insert(
                comment_id,
                json!({
                    "blockId": id,
                    "x": 0,
                    "y": 0,
                    "width": 200,
                    "height": 200,
                    "minimized": false,
                    "text": text
                }),
            );
        }
        graph.blocks.insert(id.to_string(), Value::Object(record));
    }

    /// Serializes a stack under `parent`, returning the id of its first block.
    fn stack(&mut self, graph: &mut TargetGraph, stack: &Stack, parent: &str) -> Option<String> {
        let ids: Vec<String> = stack.iter().map(|_| self.new_id()).collect();
        for (index, block) in stack.iter().enumerate() {
            let parent = if index == 0 { parent } else { ids[index - 1].as_str() };
            let next = ids.get(index + 1).map(String::as_str);
            self.block(graph, block, &ids[index], next, Some(parent));
        }
        ids.into_iter().next()
    }

    fn input(&mut self, graph: &mut TargetGraph, name: &str, input: &Input, owner: &str) -> Option<Value> {
        Some(match input {
            Input::Literal(value) => json!([1, [10, value]]),
            Input::Variable(variable) => json!([3, [12, variable, variable], [10, ""]]),
            Input::List(list) => json!([3, [13, list, list], [10, ""]]),
            Input::Stack(stack) => {
                let first = self.stack(graph, stack, owner)?;
                json!([2, first])
            }
            Input::Block(block) => {
                let id = self.new_id();
                self.block(graph, block, &id, None, Some(owner));
                if block.is_condition() {
                    json!([2, id])
                } else if block.opcode == "sensing_of_object_menu"
                    || name == "custom_block"
                    || matches!(block.kind, BlockKind::Argument { shadow: true })
                {
                    json!([1, id])
                } else {
                    json!([3, id, [10, ""]])
                }
            }
        })
    }
}

fn is_shadow(block: &Block) -> bool {
    block.opcode == "sensing_of_object_menu"
        || matches!(
            block.kind,
            BlockKind::Argument { shadow: true } | BlockKind::ProcProto { .. }
        )
}

fn field_json(field: &Field) -> Value {
    match field {
        Field::Literal(value) => json!([value, Value::Null]),
        Field::Variable(name) | Field::List(name) => json!([name, name]),
    }
}

/// JSON-encoded input names, as the mutation stores them.
fn argument_ids(block: &Block) -> String {
    let names: Vec<&str> = block.inputs.iter().map(|(n, _)| n.as_str()).collect();
    Value::from(names).to_string()
}

fn costume_json(asset: &CostumeAsset) -> Value {
    let mut entry = json!({
        "name": asset.name,
        "assetId": asset.asset_id,
        "md5ext": asset.md5ext,
        "dataFormat": asset.data_format,
        "rotationCenterX": asset.rotation_center.0,
        "rotationCenterY": asset.rotation_center.1
    });
    if asset.is_bitmap() {
        if let Some(obj) = entry.as_object_mut() {
            obj.insert("bitmapResolution".into(), json!(1));
        }
    }
    entry
}

/// Every message a `when I receive` hat listens for, sorted.
pub fn collect_broadcasts(project: &Project) -> Vec<String> {
    let mut messages = BTreeSet::new();
    for sprite in project.targets() {
        for block in &sprite.blocks {
            if block.opcode != "event_whenbroadcastreceived" {
                continue;
            }
            if let Some(Field::Variable(message) | Field::Literal(message)) = block.field("BROADCAST_OPTION") {
                messages.insert(message.clone());
            }
        }
    }
    messages.into_iter().collect()
}

fn uses_pen(sprite: &Sprite) -> bool {
    fn block_uses_pen(block: &Block) -> bool {
        block.opcode.starts_with("pen_")
            || block.inputs.iter().any(|(_, input)| match input {
                Input::Block(inner) => block_uses_pen(inner),
                Input::Stack(stack) => stack.iter().any(block_uses_pen),
                _ => false,
            })
            || block.stack().is_some_and(|s| s.iter().any(block_uses_pen))
    }
    sprite.blocks.iter().any(block_uses_pen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sprite(name: &str, blocks: Vec<Block>) -> Sprite {
        Sprite {
            name: name.to_string(),
            variables: BTreeMap::new(),
            lists: BTreeMap::new(),
            blocks,
            costumes: Vec::new(),
            comment: None,
        }
    }

    fn find<'a>(blocks: &'a Value, opcode: &str) -> (&'a String, &'a Value) {
        blocks
            .as_object()
            .unwrap()
            .iter()
            .find(|(_, b)| b["opcode"] == opcode)
            .unwrap()
    }

    #[test]
    fn stacks_link_next_and_parent() {
        let body = Stack::new(vec![
            Block::new("looks_show"),
            Block::new("looks_say")
                .with_input("MESSAGE", Input::literal("hi"))
                .with_comment(Some("greet".into())),
        ])
        .unwrap();
        let hat = Block::hat("event_whenflagclicked", body);
        let json = Serializer::new().target(&sprite("Cat", vec![hat]), &[], 1, &[]);
        let blocks = &json["blocks"];

        let (hat_id, hat) = find(blocks, "event_whenflagclicked");
        let (show_id, show) = find(blocks, "looks_show");
        let (say_id, say) = find(blocks, "looks_say");
        assert_eq!(hat["topLevel"], true);
        assert_eq!(hat["next"], json!(show_id));
        assert_eq!(show["parent"], json!(hat_id));
        assert_eq!(show["next"], json!(say_id));
        assert_eq!(say["parent"], json!(show_id));
        assert_eq!(say["next"], Value::Null);
        assert_eq!(say["inputs"]["MESSAGE"], json!([1, [10, "hi"]]));

        let comment_id = say["comment"].as_str().unwrap();
        assert_eq!(json["comments"][comment_id]["blockId"], json!(say_id));
        assert_eq!(json["comments"][comment_id]["text"], "greet");
        assert_eq!(json["isStage"], false);
        assert_eq!(json["rotationStyle"], "all around");
    }

    #[test]
    fn input_encodings() {
        let condition = Block::condition("sensing_mousedown");
        let reporter = Block::new("motion_xposition");
        let body = Stack::new(vec![Block::new("control_if")
            .with_input("CONDITION", Input::block(condition))
            .with_input("SUBSTACK", Input::Stack(Stack::empty()))])
        .unwrap();
        let hat = Block::hat(
            "event_whenflagclicked",
            Stack::new(vec![
                Block::new("looks_say").with_input("MESSAGE", Input::block(reporter)),
                Block::new("data_addtolist")
                    .with_input("ITEM", Input::Variable("v".into()))
                    .with_field("LIST", Field::List("l".into())),
                Block::new("control_repeat")
                    .with_input("TIMES", Input::List("l".into()))
                    .with_input("SUBSTACK", Input::Stack(body)),
            ])
            .unwrap(),
        );
        let json = Serializer::new().target(&sprite("Cat", vec![hat]), &[], 1, &[]);
        let blocks = &json["blocks"];

        let (x_id, _) = find(blocks, "motion_xposition");
        let (_, say) = find(blocks, "looks_say");
        assert_eq!(say["inputs"]["MESSAGE"], json!([3, x_id, [10, ""]]));
        let (_, add) = find(blocks, "data_addtolist");
        assert_eq!(add["inputs"]["ITEM"], json!([3, [12, "v", "v"], [10, ""]]));
        assert_eq!(add["fields"]["LIST"], json!(["l", "l"]));
        let (mouse_id, _) = find(blocks, "sensing_mousedown");
        let (if_id, if_block) = find(blocks, "control_if");
        assert_eq!(if_block["inputs"]["CONDITION"], json!([2, mouse_id]));
        assert!(if_block["inputs"].get("SUBSTACK").is_none());
        let (_, repeat) = find(blocks, "control_repeat");
        assert_eq!(repeat["inputs"]["SUBSTACK"], json!([2, if_id]));
        assert_eq!(if_block["parent"], json!(find(blocks, "control_repeat").0));
    }

    #[test]
    fn procedure_mutations() {
        let params = vec!["a".to_string(), "b".to_string()];
        let body = Stack::new(vec![Block::proc_call(
            "f %s %s".into(),
            true,
            vec![
                ("a".into(), Input::block(Block::argument("a", false))),
                ("b".into(), Input::literal("2")),
            ],
        )])
        .unwrap();
        let def = Block::proc_def("f %s %s".into(), true, &params, body);
        let json = Serializer::new().target(&sprite("Cat", vec![def]), &[], 1, &[]);
        let blocks = &json["blocks"];

        let (proto_id, proto) = find(blocks, "procedures_prototype");
        let (_, def) = find(blocks, "procedures_definition");
        assert_eq!(def["inputs"]["custom_block"], json!([1, proto_id]));
        assert_eq!(proto["shadow"], true);
        assert_eq!(proto["mutation"]["argumentids"], "[\"a\",\"b\"]");
        assert_eq!(proto["mutation"]["argumentnames"], "[\"a\",\"b\"]");
        assert_eq!(proto["mutation"]["argumentdefaults"], "[\"0\",\"0\"]");
        assert_eq!(proto["mutation"]["warp"], "true");
        let arg_a = proto["inputs"]["a"].as_array().unwrap();
        assert_eq!(arg_a[0], 1);

        let (_, call) = find(blocks, "procedures_call");
        assert_eq!(call["mutation"]["proccode"], "f %s %s");
        assert_eq!(call["mutation"]["warp"], true);
        assert_eq!(call["shadow"], false);
    }

    #[test]
    fn project_collects_broadcasts_and_extensions() {
        let receiver = Block::hat("event_whenbroadcastreceived", Stack::empty())
            .with_field("BROADCAST_OPTION", Field::Variable("go".into()));
        let pen = Block::hat(
            "event_whenflagclicked",
            Stack::new(vec![Block::new("pen_clear")]).unwrap(),
        );
        let mut stage = sprite("Stage", Vec::new());
        stage.comment = Some("about".into());
        let project = Project {
            stage,
            sprites: vec![sprite("Cat", vec![receiver, pen])],
        };
        let json = Serializer::new().project(&project, &[]);
        assert_eq!(json["extensions"], json!(["pen"]));
        let stage = &json["targets"][0];
        assert_eq!(stage["isStage"], true);
        assert_eq!(stage["broadcasts"], json!({"go": "go"}));
        assert_eq!(stage["comments"]["__docComment__"]["text"], "about");
        assert_eq!(stage["tempo"], 60);
        assert_eq!(json["targets"][1]["layerOrder"], 1);
        assert_eq!(json["targets"][1]["broadcasts"], json!({}));
    }
}
