// Demo host world and the command set the `juicy-pie` binary serves.
//
// `DemoWorld` stands in for a real simulation: a tick counter, a sparse block
// map over flat generated terrain, and a chat log. It is deliberately small;
// the interesting part is the handler set, which exercises every handler
// shape the session layer supports:
//
// - value commands parsing typed arguments (`world.getHeight`, `world.getBlock`,
//   `world.getTick`)
// - void commands acknowledged with `SUCCESS` (`world.setBlock`, `chat.post`)
// - a per-session context that is also clearable (`events.chat.posts` keeps a
//   cursor into the chat log)
// - a maintenance command that walks the registry and uses the clearable
//   capability (`events.clear`)
// - an optional feature-gated command (`script.eval`, see `script.rs`)
//
// Terrain: every column is `STONE` up to `GROUND_Y - 1` with `GRASS_BLOCK` at
// `GROUND_Y`, `BEDROCK` at `MIN_Y` and `AIR` above. Placed blocks override the
// generated ones; placing the generated type again removes the override.

use std::any::Any;
use std::collections::BTreeMap;

use juicy_pie_protocol::{ArgumentError, Instruction};

use crate::attachment::Attachment;
use crate::config::Features;
use crate::error::CommandError;
use crate::handler::{Call, Clearable, Handler, Response};
use crate::registry::{HandlerId, Registry};
use crate::script::ScriptEval;

pub const AIR: &str = "AIR";
pub const GROUND_Y: i32 = 63;
pub const MIN_Y: i32 = -64;
pub const MAX_Y: i32 = 319;

/// Separator between entries in multi-entry replies.
pub const ENTRY_SEPARATOR: &str = "|";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Default)]
pub struct DemoWorld {
    tick: u64,
    placed: BTreeMap<BlockPos, String>,
    chat: Vec<String>,
}

impl DemoWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) {
        self.tick += 1;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn block_at(&self, pos: BlockPos) -> &str {
        match self.placed.get(&pos) {
            Some(block) => block,
            None => generated_block(pos.y),
        }
    }

    /// Returns false (and changes nothing) when `pos` is outside the world.
    pub fn set_block(&mut self, pos: BlockPos, block: &str) -> bool {
        if !(MIN_Y..=MAX_Y).contains(&pos.y) {
            return false;
        }
        if generated_block(pos.y) == block {
            self.placed.remove(&pos);
        } else {
            self.placed.insert(pos, block.to_owned());
        }
        true
    }

    /// Y of the highest non-air block in column (x, z).
    pub fn height_at(&self, x: i32, z: i32) -> i32 {
        let placed = self
            .placed
            .iter()
            .filter(|(pos, block)| pos.x == x && pos.z == z && block.as_str() != AIR)
            .map(|(pos, _)| pos.y)
            .max();
        let mut ground = GROUND_Y;
        while ground > MIN_Y && self.block_at(BlockPos::new(x, ground, z)) == AIR {
            ground -= 1;
        }
        placed.map_or(ground, |y| y.max(ground))
    }

    pub fn post_chat(&mut self, message: impl Into<String>) {
        self.chat.push(message.into());
    }

    pub fn chat_len(&self) -> usize {
        self.chat.len()
    }

    /// Chat messages posted at or after index `from`.
    pub fn chat_since(&self, from: usize) -> &[String] {
        self.chat.get(from..).unwrap_or(&[])
    }
}

fn generated_block(y: i32) -> &'static str {
    match y {
        y if y == MIN_Y => "BEDROCK",
        y if y < MIN_Y || y > GROUND_Y => AIR,
        GROUND_Y => "GRASS_BLOCK",
        _ => "STONE",
    }
}

fn next_pos(instruction: &mut Instruction) -> Result<BlockPos, ArgumentError> {
    let x = instruction.next_parsed()?;
    let y = instruction.next_parsed()?;
    let z = instruction.next_parsed()?;
    Ok(BlockPos::new(x, y, z))
}

/// `world.getHeight(x,y,z,)`. The y coordinate is accepted and ignored.
pub struct GetHeight;

impl Handler<DemoWorld> for GetHeight {
    fn invoke(&self, call: &mut Call<'_, DemoWorld>) -> Result<Response, CommandError> {
        let pos = next_pos(&mut call.instruction)?;
        Ok(Response::Reply(call.world.height_at(pos.x, pos.z).to_string()))
    }
}

/// `world.getBlock(x,y,z,)`.
pub struct GetBlock;

impl Handler<DemoWorld> for GetBlock {
    fn invoke(&self, call: &mut Call<'_, DemoWorld>) -> Result<Response, CommandError> {
        let pos = next_pos(&mut call.instruction)?;
        Ok(Response::Reply(call.world.block_at(pos).to_owned()))
    }
}

/// `world.setBlock(x,y,z,type,)`.
pub struct SetBlock;

impl Handler<DemoWorld> for SetBlock {
    fn invoke(&self, call: &mut Call<'_, DemoWorld>) -> Result<Response, CommandError> {
        let pos = next_pos(&mut call.instruction)?;
        let block = call.instruction.next_argument()?.trim().to_ascii_uppercase();
        if block.is_empty() {
            return Err(CommandError::rejected("Block type must not be empty"));
        }
        if !call.world.set_block(pos, &block) {
            return Err(CommandError::rejected(format!(
                "y={} is outside the world",
                pos.y
            )));
        }
        Ok(Response::Done)
    }
}

/// Per-session position in the chat log.
#[derive(Debug)]
pub struct ChatCursor {
    next: usize,
}

/// `events.chat.posts()`: chat messages posted since this session last asked
/// (or since it connected), joined by `|`.
pub struct ChatPosts;

impl ChatPosts {
    pub const NAME: &'static str = "events.chat.posts";
}

impl Handler<DemoWorld> for ChatPosts {
    fn invoke(&self, call: &mut Call<'_, DemoWorld>) -> Result<Response, CommandError> {
        let id = call.handler_id();
        let cursor = call
            .attachment
            .context_mut::<ChatCursor>(id)
            .ok_or(CommandError::MissingContext(Self::NAME))?;
        let posts = call.world.chat_since(cursor.next);
        cursor.next = call.world.chat_len();
        Ok(Response::Reply(posts.join(ENTRY_SEPARATOR)))
    }

    fn create_context(&self, host: &DemoWorld, _attachment: &Attachment) -> Option<Box<dyn Any>> {
        Some(Box::new(ChatCursor {
            next: host.chat_len(),
        }))
    }

    fn as_clearable(&self) -> Option<&dyn Clearable<DemoWorld>> {
        Some(self)
    }
}

impl Clearable<DemoWorld> for ChatPosts {
    fn clear_pending(&self, host: &DemoWorld, attachment: &mut Attachment, id: HandlerId) {
        if let Some(cursor) = attachment.context_mut::<ChatCursor>(id) {
            cursor.next = host.chat_len();
        }
    }
}

/// `events.clear()`: discard pending events for every handler that buffers
/// them for this session.
pub struct EventsClear;

impl<W> Handler<W> for EventsClear {
    fn invoke(&self, call: &mut Call<'_, W>) -> Result<Response, CommandError> {
        let registry = call.registry();
        for (id, handler) in registry.handlers() {
            if let Some(clearable) = handler.as_clearable() {
                clearable.clear_pending(&*call.world, call.attachment, id);
            }
        }
        Ok(Response::Done)
    }
}

/// The command set served by the `juicy-pie` binary.
pub fn build_registry(features: &Features) -> Registry<DemoWorld> {
    let mut registry = Registry::<DemoWorld>::new();
    registry.register("world.getHeight", GetHeight);
    registry.register("world.getBlock", GetBlock);
    registry.register("world.setBlock", SetBlock);
    registry.register_value("world.getTick", |call: &mut Call<'_, DemoWorld>| {
        Ok(call.world.tick().to_string())
    });
    registry.register_void("chat.post", |call: &mut Call<'_, DemoWorld>| {
        let message = call.instruction.all_arguments();
        call.world.post_chat(message);
        Ok(())
    });
    registry.register(ChatPosts::NAME, ChatPosts);
    registry.register("events.clear", EventsClear);
    if features.script_eval {
        registry.register(ScriptEval::NAME, ScriptEval);
    }
    registry
}
