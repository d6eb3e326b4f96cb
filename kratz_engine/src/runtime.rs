use std::collections::BTreeMap;
use std::fs;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::cli::RunArgs;
use crate::lua_host::{RenderCallback, StageHost, StageOptions, TickSummary};
use crate::render_bridge::RecordingRenderCallback;

/// Built-in demo: one sprite with a walk script and a wait-then-turn
/// script, driven entirely by injected key presses.
pub const DEMO_SCRIPT: &str = r#"
local cat = stage.addSprite("cat")
cat:addCostume("cat.png")
cat:addCostume("cat-walk.png", "walk")

cat:whenKeyPressed("space", function(self)
    self:move(10)
    self:repeatTimes(9, function(me)
        me:move(1)
    end)
end)

cat:whenKeyPressed("d", function(self)
    self:switchCostume("walk")
    self:wait(0.05)
    self:turnClockwise(90)
end)

stage.log("demo ready: press space to walk, d to turn")
"#;

#[derive(Serialize)]
struct EventLog {
    events: Vec<String>,
}

pub fn execute(args: RunArgs) -> Result<()> {
    let recorder = args
        .frame_log_json
        .as_ref()
        .map(|_| Rc::new(RecordingRenderCallback::new()));
    let render = recorder
        .as_ref()
        .map(|recorder| recorder.clone() as Rc<dyn RenderCallback>);

    let host = StageHost::new(StageOptions {
        verbose: args.verbose,
        render,
    })?;

    if args.demo {
        host.eval_script("demo", DEMO_SCRIPT)?;
    } else if let Some(path) = args.script.as_ref() {
        host.load_script_file(path)?;
    }

    let mut presses = parse_press_specs(&args.press)?;
    if args.demo && presses.is_empty() {
        presses.insert(1, vec!["space".to_string()]);
    }

    host.start_ticking();
    let mut summaries: Vec<TickSummary> = Vec::with_capacity(args.ticks as usize);
    for tick in 1..=args.ticks {
        if !host.is_ticking() {
            break;
        }
        if let Some(keys) = presses.get(&tick) {
            for key in keys {
                host.key_pressed(key);
            }
        }
        summaries.push(host.tick()?);
        if args.tick_ms > 0 {
            thread::sleep(Duration::from_millis(args.tick_ms));
        }
    }
    host.stop_ticking();

    if let Some(path) = args.tick_log_json.as_ref() {
        let json = serde_json::to_string_pretty(&summaries)
            .context("serializing tick summaries to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing tick summaries to {}", path.display()))?;
        println!("Saved tick summaries to {}", path.display());
    }

    if let (Some(path), Some(recorder)) = (args.frame_log_json.as_ref(), recorder.as_ref()) {
        let frames = recorder.frames();
        let json =
            serde_json::to_string_pretty(&frames).context("serializing frame log to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing frame log to {}", path.display()))?;
        println!("Saved frame log to {}", path.display());
    }

    if let Some(path) = args.event_log_json.as_ref() {
        let log = EventLog {
            events: host.events(),
        };
        let json = serde_json::to_string_pretty(&log).context("serializing event log to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing event log to {}", path.display()))?;
        println!("Saved event log to {}", path.display());
    }

    if let Some(path) = args.scheduler_json.as_ref() {
        let json = serde_json::to_string_pretty(&host.arm_queue())
            .context("serializing arm-queue history to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing arm-queue history to {}", path.display()))?;
        println!("Saved arm-queue history to {}", path.display());
    }

    println!(
        "Ran {} tick(s) across {} sprite(s)",
        summaries.len(),
        host.sprite_count()
    );
    for sprite in host.frame_snapshot().sprites {
        let costume = sprite
            .costume
            .map(|name| format!(" costume={name}"))
            .unwrap_or_default();
        println!(
            "  {}: x={:.1} y={:.1} direction={:.1}{costume}",
            sprite.name, sprite.x, sprite.y, sprite.direction
        );
    }

    Ok(())
}

/// Parses repeated `KEY@TICK` specs into a tick -> keys map. Keys are
/// lowercased the same way bindings are.
fn parse_press_specs(specs: &[String]) -> Result<BTreeMap<u64, Vec<String>>> {
    let mut presses: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    for spec in specs {
        let Some((key, tick)) = spec.split_once('@') else {
            bail!("invalid --press spec {spec:?}: expected KEY@TICK");
        };
        if key.is_empty() {
            bail!("invalid --press spec {spec:?}: empty key");
        }
        let tick: u64 = tick
            .parse()
            .with_context(|| format!("invalid --press spec {spec:?}: bad tick number"))?;
        presses
            .entry(tick)
            .or_default()
            .push(key.to_ascii_lowercase());
    }
    Ok(presses)
}
