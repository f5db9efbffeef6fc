use crate::ir::{Block, Input};

const PADDING: i64 = 30;
const HAT_HEIGHT: i64 = 65;
const BLOCK_HEIGHT: i64 = 48;

/// Estimated height a reporter adds to the block holding it.
fn input_height(input: &Input) -> i64 {
    match input {
        Input::Block(block) => 8 + block.inputs.iter().map(|(_, i)| input_height(i)).max().unwrap_or(0),
        _ => 0,
    }
}

fn substack_height(input: &Input) -> i64 {
    match input {
        Input::Stack(stack) => stack.iter().map(height).sum(),
        _ => 0,
    }
}

pub fn height(block: &Block) -> i64 {
    if let Some(stack) = block.stack() {
        return HAT_HEIGHT + stack.iter().map(height).sum::<i64>();
    }
    let tallest_input = block.inputs.iter().map(|(_, i)| input_height(i)).max().unwrap_or(0);
    let substacks: i64 = block.inputs.iter().map(|(_, i)| substack_height(i)).sum();
    BLOCK_HEIGHT + tallest_input + substacks
}

/// Stacks scripts top to bottom so that none overlap.
pub fn cleanup(blocks: &mut [Block]) {
    let mut y = 0;
    for block in blocks.iter_mut().filter(|b| b.is_hat()) {
        block.position = (0, y);
        y += height(block) + PADDING;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Stack;

    #[test]
    fn scripts_are_stacked_without_overlap() {
        let say = Block::new("looks_say").with_input(
            "MESSAGE",
            Input::block(Block::new("operator_add").with_input("NUM1", Input::literal("1"))),
        );
        let first = Block::hat("event_whenflagclicked", Stack::new(vec![say]).unwrap());
        let second = Block::hat("event_whenthisspriteclicked", Stack::empty());
        let mut blocks = vec![first, second];
        cleanup(&mut blocks);
        assert_eq!(blocks[0].position, (0, 0));
        assert_eq!(blocks[1].position, (0, 65 + 48 + 8 + 30));
    }

    #[test]
    fn nested_bodies_count_towards_height() {
        let inner = Stack::new(vec![Block::new("looks_show"), Block::new("looks_hide")]).unwrap();
        let forever = Block::new("control_forever").with_input("SUBSTACK", Input::Stack(inner));
        assert_eq!(height(&forever), 48 + 96);
    }
}
