mod bindings;
mod context;
mod scripts;
mod sprites;

pub use context::{FrameSnapshot, RenderCallback, SpriteFrame, TickSummary};
pub use scripts::{ScheduleError, ScriptStep, SuspendReason};

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use mlua::{Lua, LuaOptions, StdLib};

use crate::scheduler::ArmQueue;
use context::StageContext;

#[derive(Default)]
pub struct StageOptions {
    pub verbose: bool,
    pub render: Option<Rc<dyn RenderCallback>>,
}

/// Owns the Lua state and the stage it animates. Behavior scripts register
/// sprites and key bindings at load time; an external clock then calls
/// `tick()` once per frame and `key_pressed()` whenever input arrives.
pub struct StageHost {
    lua: Lua,
    context: Rc<RefCell<StageContext>>,
}

impl StageHost {
    pub fn new(options: StageOptions) -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .context("initialising Lua runtime with standard libraries")?;
        let context = Rc::new(RefCell::new(StageContext::new(
            options.verbose,
            options.render,
        )));
        bindings::install_globals(&lua, context.clone())
            .map_err(|err| anyhow!(err))
            .context("installing stage bindings")?;
        Ok(StageHost { lua, context })
    }

    pub fn load_script_file(&self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading behavior script {}", path.display()))?;
        self.eval_script(&path.display().to_string(), &source)
    }

    /// Runs top-level script code: sprite setup and `whenKeyPressed`
    /// registrations. Behavior bodies themselves only run once armed.
    pub fn eval_script(&self, name: &str, source: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("loading behavior script {name}"))
    }

    /// Delivers a named key event: every script bound to the key gets an
    /// arm request, consumed at the next scheduling pass. Returns how many
    /// scripts were addressed.
    pub fn key_pressed(&self, key: &str) -> usize {
        self.context.borrow_mut().post_key(key)
    }

    pub fn tick(&self) -> Result<TickSummary> {
        bindings::run_tick(&self.lua, self.context.clone()).map_err(|err| anyhow!(err))
    }

    pub fn tick_count(&self) -> u64 {
        self.context.borrow().tick_count()
    }

    pub fn start_ticking(&self) {
        self.context.borrow_mut().set_ticking(true);
    }

    pub fn stop_ticking(&self) {
        self.context.borrow_mut().set_ticking(false);
    }

    pub fn is_ticking(&self) -> bool {
        self.context.borrow().is_ticking()
    }

    pub fn sprite_count(&self) -> usize {
        self.context.borrow().sprites.len()
    }

    pub fn sprite_position(&self, name: &str) -> Option<(f64, f64)> {
        let ctx = self.context.borrow();
        let handle = ctx.sprites.handle_by_name(name)?;
        ctx.sprites
            .get(handle)
            .map(|sprite| (sprite.x(), sprite.y()))
    }

    pub fn sprite_direction(&self, name: &str) -> Option<f64> {
        let ctx = self.context.borrow();
        let handle = ctx.sprites.handle_by_name(name)?;
        ctx.sprites.get(handle).map(|sprite| sprite.direction())
    }

    pub fn sprite_costume(&self, name: &str) -> Option<String> {
        let ctx = self.context.borrow();
        let handle = ctx.sprites.handle_by_name(name)?;
        ctx.sprites
            .get(handle)
            .and_then(|sprite| sprite.current_costume())
            .map(|costume| costume.name().to_string())
    }

    pub fn events(&self) -> Vec<String> {
        self.context.borrow().events().to_vec()
    }

    /// Current visible state, independent of any tick in progress.
    pub fn frame_snapshot(&self) -> FrameSnapshot {
        self.context.borrow().frame_snapshot(false)
    }

    pub fn arm_queue(&self) -> ArmQueue {
        self.context.borrow().arm_queue().clone()
    }
}
