use std::rc::Rc;
use std::time::Instant;

use serde::Serialize;

use crate::scheduler::{ArmQueue, ArmRequest};

use super::scripts::ScriptRuntime;
use super::sprites::SpriteStore;

/// Collaborator that turns the stage's visible state into a frame. Invoked
/// exactly once per completed tick, never mid-pass.
pub trait RenderCallback {
    fn render(&self, frame: &FrameSnapshot);
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpriteFrame {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub costume: Option<String>,
    /// Image source of the current costume, for renderers that draw it.
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FrameSnapshot {
    pub tick: u64,
    pub redraw: bool,
    pub sprites: Vec<SpriteFrame>,
}

/// What one `tick()` did, reduced from the individual step reports.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: u64,
    pub passes: u32,
    pub steps: u32,
    pub redraw: bool,
    pub faults: u32,
}

pub(super) struct StageContext {
    verbose: bool,
    pub(super) sprites: SpriteStore,
    pub(super) scripts: ScriptRuntime,
    arm_queue: ArmQueue,
    events: Vec<String>,
    tick_count: u64,
    ticking: bool,
    step_touched: bool,
    started: Instant,
    render: Option<Rc<dyn RenderCallback>>,
}

impl StageContext {
    pub(super) fn new(verbose: bool, render: Option<Rc<dyn RenderCallback>>) -> Self {
        StageContext {
            verbose,
            sprites: SpriteStore::new(),
            scripts: ScriptRuntime::new(),
            arm_queue: ArmQueue::new(),
            events: Vec::new(),
            tick_count: 0,
            ticking: false,
            step_touched: false,
            started: Instant::now(),
            render,
        }
    }

    pub(super) fn log_event(&mut self, event: impl Into<String>) {
        let event = event.into();
        if self.verbose {
            println!("[kratz_engine] {event}");
        }
        self.events.push(event);
    }

    pub(super) fn events(&self) -> &[String] {
        &self.events
    }

    /// Seconds since host start, the timer wait deadlines are measured on.
    pub(super) fn clock_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub(super) fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub(super) fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub(super) fn set_ticking(&mut self, ticking: bool) {
        self.ticking = ticking;
    }

    pub(super) fn begin_tick(&mut self) -> u64 {
        self.tick_count += 1;
        self.step_touched = false;
        self.tick_count
    }

    /// Records a visible mutation. The flag is consumed per step by the
    /// scheduler rather than read ambiently.
    pub(super) fn mark_redraw(&mut self, event: String) {
        self.step_touched = true;
        self.log_event(event);
    }

    pub(super) fn take_step_touched(&mut self) -> bool {
        std::mem::take(&mut self.step_touched)
    }

    /// Posts one arm request per script bound to `key`. Requests are only
    /// applied when a scheduling pass drains the queue.
    pub(super) fn post_key(&mut self, key: &str) -> usize {
        let key = key.to_ascii_lowercase();
        let handles = self.scripts.handles_for_key(&key);
        let tick = self.tick_count;
        for handle in &handles {
            self.arm_queue.post(ArmRequest {
                script: *handle,
                key: key.clone(),
                tick,
            });
        }
        self.log_event(format!("input.key {key} -> {} script(s)", handles.len()));
        handles.len()
    }

    pub(super) fn drain_pending_arms(&mut self) {
        for request in self.arm_queue.drain() {
            if self.scripts.arm(request.script) {
                let label = self
                    .scripts
                    .label(request.script)
                    .unwrap_or("<unbound>")
                    .to_string();
                self.log_event(format!("script.arm {label} (#{})", request.script));
            }
        }
    }

    pub(super) fn arm_queue(&self) -> &ArmQueue {
        &self.arm_queue
    }

    /// Ready scripts in sprite registration order, then per-sprite insertion
    /// order. Taken as a snapshot before any script in the pass is resumed.
    pub(super) fn ready_snapshot(&self) -> Vec<u32> {
        let mut ready = Vec::new();
        for (_, sprite) in self.sprites.iter() {
            for handle in sprite.scripts() {
                if self.scripts.is_ready(*handle) {
                    ready.push(*handle);
                }
            }
        }
        ready
    }

    pub(super) fn render_callback(&self) -> Option<Rc<dyn RenderCallback>> {
        self.render.clone()
    }

    pub(super) fn frame_snapshot(&self, redraw: bool) -> FrameSnapshot {
        let sprites = self
            .sprites
            .iter()
            .map(|(_, sprite)| SpriteFrame {
                name: sprite.name().to_string(),
                x: sprite.x(),
                y: sprite.y(),
                direction: sprite.direction(),
                costume: sprite
                    .current_costume()
                    .map(|costume| costume.name().to_string()),
                image: sprite
                    .current_costume()
                    .map(|costume| costume.source().to_string()),
            })
            .collect();
        FrameSnapshot {
            tick: self.tick_count,
            redraw,
            sprites,
        }
    }
}
