use std::cell::RefCell;
use std::rc::Rc;

use mlua::{
    Error as LuaError, Function, Lua, MultiValue, Result as LuaResult, Table, Thread, ThreadStatus,
    Value,
};

use super::context::{StageContext, TickSummary};
use super::scripts::{ScheduleError, ScriptStep, SuspendReason};
use super::sprites::SpriteRecord;

pub(super) fn install_globals(lua: &Lua, context: Rc<RefCell<StageContext>>) -> LuaResult<()> {
    let globals = lua.globals();
    let stage = lua.create_table()?;

    let add_context = context.clone();
    stage.set(
        "addSprite",
        lua.create_function(move |lua_ctx, name: Option<String>| {
            let handle = {
                let mut ctx = add_context.borrow_mut();
                let (handle, event, replaced) = ctx.sprites.add(name);
                ctx.log_event(event);
                if let Some(replaced) = replaced {
                    // The displaced sprite's scripts go with it.
                    for &script in replaced.scripts() {
                        let (_, event) = ctx.scripts.mark_dead(script);
                        if let Some(event) = event {
                            ctx.log_event(event);
                        }
                    }
                }
                handle
            };
            let table = make_sprite_table(lua_ctx, add_context.clone(), handle)?;
            let key = lua_ctx.create_registry_value(table.clone())?;
            if let Some(sprite) = add_context.borrow_mut().sprites.get_mut(handle) {
                sprite.attach_table(key);
            }
            Ok(table)
        })?,
    )?;

    let find_context = context.clone();
    stage.set(
        "sprite",
        lua.create_function(move |lua_ctx, name: String| {
            let ctx = find_context.borrow();
            let table_key = ctx
                .sprites
                .handle_by_name(&name)
                .and_then(|handle| ctx.sprites.get(handle))
                .and_then(|sprite| sprite.table_key());
            match table_key {
                Some(key) => Ok(Value::Table(lua_ctx.registry_value::<Table>(key)?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    let tick_context = context.clone();
    stage.set(
        "tickCount",
        lua.create_function(move |_, ()| Ok(tick_context.borrow().tick_count()))?,
    )?;

    let clock_context = context.clone();
    stage.set(
        "clock",
        lua.create_function(move |_, ()| Ok(clock_context.borrow().clock_seconds()))?,
    )?;

    let log_context = context.clone();
    stage.set(
        "log",
        lua.create_function(move |_, message: String| {
            log_context
                .borrow_mut()
                .log_event(format!("user.log {message}"));
            Ok(())
        })?,
    )?;

    globals.set("stage", stage)?;
    Ok(())
}

/// Applies a position/direction/costume mutation and records it as a
/// visible change for the step in progress.
fn mutate_sprite<F>(context: &Rc<RefCell<StageContext>>, handle: u32, mutate: F) -> LuaResult<()>
where
    F: FnOnce(&mut SpriteRecord) -> String,
{
    let mut ctx = context.borrow_mut();
    let event = match ctx.sprites.get_mut(handle) {
        Some(sprite) => mutate(sprite),
        None => {
            return Err(LuaError::external(format!(
                "sprite #{handle} no longer exists"
            )))
        }
    };
    ctx.mark_redraw(event);
    Ok(())
}

fn read_sprite<T, F>(context: &Rc<RefCell<StageContext>>, handle: u32, read: F) -> LuaResult<T>
where
    F: FnOnce(&SpriteRecord) -> T,
{
    let ctx = context.borrow();
    match ctx.sprites.get(handle) {
        Some(sprite) => Ok(read(sprite)),
        None => Err(LuaError::external(format!(
            "sprite #{handle} no longer exists"
        ))),
    }
}

fn make_sprite_table<'lua>(
    lua: &'lua Lua,
    context: Rc<RefCell<StageContext>>,
    handle: u32,
) -> LuaResult<Table<'lua>> {
    let table = lua.create_table()?;

    // Movement. `move` deliberately ignores direction and walks the x axis.
    let move_context = context.clone();
    table.set(
        "move",
        lua.create_function(move |_, (_this, steps): (Table, f64)| {
            mutate_sprite(&move_context, handle, |sprite| {
                sprite.set_x(sprite.x() + steps);
                format!("sprite.move {} {steps} -> {}", sprite.name(), sprite.x())
            })
        })?,
    )?;

    let set_x_context = context.clone();
    table.set(
        "setX",
        lua.create_function(move |_, (_this, value): (Table, f64)| {
            mutate_sprite(&set_x_context, handle, |sprite| {
                sprite.set_x(value);
                format!("sprite.set_x {} {value}", sprite.name())
            })
        })?,
    )?;

    let set_y_context = context.clone();
    table.set(
        "setY",
        lua.create_function(move |_, (_this, value): (Table, f64)| {
            mutate_sprite(&set_y_context, handle, |sprite| {
                sprite.set_y(value);
                format!("sprite.set_y {} {value}", sprite.name())
            })
        })?,
    )?;

    let change_x_context = context.clone();
    table.set(
        "changeXBy",
        lua.create_function(move |_, (_this, delta): (Table, f64)| {
            mutate_sprite(&change_x_context, handle, |sprite| {
                sprite.set_x(sprite.x() + delta);
                format!("sprite.change_x {} {delta} -> {}", sprite.name(), sprite.x())
            })
        })?,
    )?;

    let change_y_context = context.clone();
    table.set(
        "changeYBy",
        lua.create_function(move |_, (_this, delta): (Table, f64)| {
            mutate_sprite(&change_y_context, handle, |sprite| {
                sprite.set_y(sprite.y() + delta);
                format!("sprite.change_y {} {delta} -> {}", sprite.name(), sprite.y())
            })
        })?,
    )?;

    let go_to_context = context.clone();
    table.set(
        "goTo",
        lua.create_function(move |_, (_this, x, y): (Table, f64, f64)| {
            mutate_sprite(&go_to_context, handle, |sprite| {
                sprite.go_to(x, y);
                format!("sprite.go_to {} {x},{y}", sprite.name())
            })
        })?,
    )?;

    let point_context = context.clone();
    table.set(
        "pointInDirection",
        lua.create_function(move |_, (_this, degrees): (Table, f64)| {
            mutate_sprite(&point_context, handle, |sprite| {
                sprite.point_in_direction(degrees);
                format!("sprite.direction {} {degrees}", sprite.name())
            })
        })?,
    )?;

    let turn_cw_context = context.clone();
    table.set(
        "turnClockwise",
        lua.create_function(move |_, (_this, degrees): (Table, f64)| {
            mutate_sprite(&turn_cw_context, handle, |sprite| {
                sprite.turn(degrees);
                format!(
                    "sprite.turn {} {degrees} -> {}",
                    sprite.name(),
                    sprite.direction()
                )
            })
        })?,
    )?;

    let turn_ccw_context = context.clone();
    table.set(
        "turnCounterClockwise",
        lua.create_function(move |_, (_this, degrees): (Table, f64)| {
            mutate_sprite(&turn_ccw_context, handle, |sprite| {
                sprite.turn(-degrees);
                format!(
                    "sprite.turn {} -{degrees} -> {}",
                    sprite.name(),
                    sprite.direction()
                )
            })
        })?,
    )?;

    let x_context = context.clone();
    table.set(
        "x",
        lua.create_function(move |_, _this: Table| read_sprite(&x_context, handle, |s| s.x()))?,
    )?;

    let y_context = context.clone();
    table.set(
        "y",
        lua.create_function(move |_, _this: Table| read_sprite(&y_context, handle, |s| s.y()))?,
    )?;

    let direction_context = context.clone();
    table.set(
        "direction",
        lua.create_function(move |_, _this: Table| {
            read_sprite(&direction_context, handle, |s| s.direction())
        })?,
    )?;

    // Costumes.
    let add_costume_context = context.clone();
    table.set(
        "addCostume",
        lua.create_function(
            move |_, (_this, source, name): (Table, String, Option<String>)| {
                let mut ctx = add_costume_context.borrow_mut();
                let (costume, event) = match ctx.sprites.get_mut(handle) {
                    Some(sprite) => {
                        let costume = sprite.add_costume(source.clone(), name);
                        let event =
                            format!("sprite.costume.add {} {costume} ({source})", sprite.name());
                        (costume, event)
                    }
                    None => {
                        return Err(LuaError::external(format!(
                            "sprite #{handle} no longer exists"
                        )))
                    }
                };
                ctx.log_event(event);
                Ok(costume)
            },
        )?,
    )?;

    let switch_costume_context = context.clone();
    table.set(
        "switchCostume",
        lua.create_function(move |_, (_this, name): (Table, String)| {
            let mut ctx = switch_costume_context.borrow_mut();
            let switched = match ctx.sprites.get_mut(handle) {
                Some(sprite) => sprite
                    .switch_costume(&name)
                    .then(|| format!("sprite.costume.switch {} -> {name}", sprite.name())),
                None => {
                    return Err(LuaError::external(format!(
                        "sprite #{handle} no longer exists"
                    )))
                }
            };
            if let Some(event) = switched {
                ctx.mark_redraw(event);
            }
            Ok(())
        })?,
    )?;

    let costume_context = context.clone();
    table.set(
        "costume",
        lua.create_function(move |_, _this: Table| {
            read_sprite(&costume_context, handle, |sprite| {
                sprite
                    .current_costume()
                    .map(|costume| costume.name().to_string())
            })
        })?,
    )?;

    // Events.
    let bind_context = context.clone();
    table.set(
        "whenKeyPressed",
        lua.create_function(move |lua_ctx, (_this, key, body): (Table, String, Function)| {
            let key = key.to_ascii_lowercase();
            let callable = lua_ctx.create_registry_value(body)?;
            let mut ctx = bind_context.borrow_mut();
            let label = ctx
                .sprites
                .get(handle)
                .map(|sprite| format!("{}:{key}", sprite.name()))
                .unwrap_or_else(|| format!("#{handle}:{key}"));
            let (script, event) = ctx.scripts.bind(handle, key, label, callable);
            if let Some(sprite) = ctx.sprites.get_mut(handle) {
                sprite.push_script(script);
            }
            ctx.log_event(event);
            Ok(script)
        })?,
    )?;

    // Control primitives. Both are coroutines that suspend with a tagged
    // reason the scheduler matches on: "loop" after each completed
    // iteration, "wait" while a deadline has not elapsed.
    let repeat_times = lua
        .load(
            r#"
            return function(self, times, body)
                for _ = 1, times do
                    body(self)
                    coroutine.yield("loop")
                end
            end
            "#,
        )
        .eval::<Function>()?;
    table.set("repeatTimes", repeat_times)?;

    let wait_clock_context = context.clone();
    let wait_clock =
        lua.create_function(move |_, ()| Ok(wait_clock_context.borrow().clock_seconds()))?;
    let wait = lua
        .load(
            r#"
            local clock = ...
            return function(self, seconds)
                local deadline = clock() + seconds
                repeat
                    coroutine.yield("wait")
                until clock() >= deadline
            end
            "#,
        )
        .call::<_, Function>(wait_clock)?;
    table.set("wait", wait)?;

    Ok(table)
}

/// Advances one script coroutine by a single resumption: starts the thread
/// lazily on first run after arming, passing the owning sprite's table as
/// the behavior's context argument.
pub(super) fn resume_script(
    lua: &Lua,
    context: Rc<RefCell<StageContext>>,
    handle: u32,
) -> LuaResult<ScriptStep> {
    let started = {
        let ctx = context.borrow();
        match ctx.scripts.thread_key(handle) {
            Some(key) => Some(lua.registry_value::<Thread>(key)?),
            None => None,
        }
    };

    let (thread, initial_arg) = match started {
        Some(thread) => (thread, None),
        None => {
            let (callable, sprite_table) = {
                let ctx = context.borrow();
                let callable = match ctx.scripts.callable_key(handle) {
                    Some(key) => lua.registry_value::<Function>(key)?,
                    None => return Ok(ScriptStep::Completed),
                };
                let sprite_table = ctx
                    .scripts
                    .get(handle)
                    .and_then(|record| ctx.sprites.get(record.sprite()))
                    .and_then(|sprite| sprite.table_key())
                    .map(|key| lua.registry_value::<Table>(key))
                    .transpose()?
                    .ok_or_else(|| {
                        LuaError::external(format!("script #{handle} has no owning sprite"))
                    })?;
                (callable, sprite_table)
            };
            let thread = lua.create_thread(callable)?;
            let key = lua.create_registry_value(thread.clone())?;
            {
                let mut ctx = context.borrow_mut();
                ctx.scripts.attach_thread(handle, key);
                let label = ctx.scripts.label(handle).unwrap_or("<unbound>").to_string();
                ctx.log_event(format!("script.start {label} (#{handle})"));
            }
            (thread, Some(sprite_table))
        }
    };

    if !matches!(thread.status(), ThreadStatus::Resumable) {
        finish_script(lua, &context, handle)?;
        return Ok(ScriptStep::Completed);
    }

    let resumed = match initial_arg {
        Some(sprite_table) => thread.resume::<_, MultiValue>(sprite_table),
        None => thread.resume::<_, MultiValue>(()),
    };

    match resumed {
        Ok(values) => match thread.status() {
            ThreadStatus::Resumable => match parse_suspension(values.iter().next()) {
                Ok(reason) => {
                    context.borrow_mut().scripts.record_yield(handle);
                    Ok(ScriptStep::Suspended(reason))
                }
                Err(tag) => {
                    // The pass-termination policy matches suspension tags
                    // exhaustively; an unknown tag is a programming error,
                    // not a script fault.
                    let label = {
                        let ctx = context.borrow();
                        ctx.scripts.label(handle).unwrap_or("<unbound>").to_string()
                    };
                    discard_thread(lua, &context, handle)?;
                    Err(LuaError::external(ScheduleError::UnknownSuspension {
                        label,
                        tag,
                    }))
                }
            },
            ThreadStatus::Unresumable | ThreadStatus::Error => {
                finish_script(lua, &context, handle)?;
                Ok(ScriptStep::Completed)
            }
        },
        Err(err) => {
            {
                let mut ctx = context.borrow_mut();
                let label = ctx.scripts.label(handle).unwrap_or("<unbound>").to_string();
                ctx.log_event(format!("script.error {label}: {err}"));
            }
            discard_thread(lua, &context, handle)?;
            Ok(ScriptStep::Faulted)
        }
    }
}

fn finish_script(lua: &Lua, context: &Rc<RefCell<StageContext>>, handle: u32) -> LuaResult<()> {
    let (thread_key, event) = context.borrow_mut().scripts.complete(handle);
    if let Some(key) = thread_key {
        lua.remove_registry_value(key)?;
    }
    if let Some(event) = event {
        context.borrow_mut().log_event(event);
    }
    Ok(())
}

fn discard_thread(lua: &Lua, context: &Rc<RefCell<StageContext>>, handle: u32) -> LuaResult<()> {
    let (thread_key, event) = context.borrow_mut().scripts.mark_dead(handle);
    if let Some(key) = thread_key {
        lua.remove_registry_value(key)?;
    }
    if let Some(event) = event {
        context.borrow_mut().log_event(event);
    }
    Ok(())
}

fn parse_suspension(tag: Option<&Value>) -> Result<SuspendReason, String> {
    match tag {
        // A bare yield marks the end of a loop iteration.
        None | Some(Value::Nil) => Ok(SuspendReason::EndOfIteration),
        Some(Value::String(text)) => match text.to_str() {
            Ok("loop") => Ok(SuspendReason::EndOfIteration),
            Ok("wait") => Ok(SuspendReason::Waiting),
            Ok(other) => Err(other.to_string()),
            Err(_) => Err("<non-utf8 tag>".to_string()),
        },
        Some(other) => Err(format!("<{}>", other.type_name())),
    }
}

/// One tick: pump scheduling passes until a step reports a visible change
/// or nothing is runnable, then render exactly once.
pub(super) fn run_tick(lua: &Lua, context: Rc<RefCell<StageContext>>) -> LuaResult<TickSummary> {
    let tick = {
        let mut ctx = context.borrow_mut();
        let tick = ctx.begin_tick();
        ctx.log_event(format!("tick.begin {tick}"));
        tick
    };

    let mut deferred: Vec<u32> = Vec::new();
    let mut passes = 0u32;
    let mut steps = 0u32;
    let mut faults = 0u32;
    let mut redraw = false;

    loop {
        context.borrow_mut().drain_pending_arms();
        // Snapshot before resuming anything: a script armed by this pass's
        // side effects waits for the next pass.
        let ready = context.borrow().ready_snapshot();
        if ready.is_empty() {
            break;
        }
        passes += 1;
        let mut pass_redraw = false;
        for handle in ready {
            context.borrow_mut().scripts.clear_ready(handle);
            let step = resume_script(lua, context.clone(), handle)?;
            steps += 1;
            pass_redraw |= context.borrow_mut().take_step_touched();
            match step {
                ScriptStep::Suspended(SuspendReason::EndOfIteration) => {
                    // Eligible again in the next pass of this same tick.
                    context.borrow_mut().scripts.arm(handle);
                }
                ScriptStep::Suspended(SuspendReason::Waiting) => deferred.push(handle),
                ScriptStep::Completed => {}
                ScriptStep::Faulted => faults += 1,
            }
        }
        if pass_redraw {
            redraw = true;
            break;
        }
    }

    // Waiting scripts see at most one deadline check per tick, however many
    // passes ran: they only become eligible again from the next tick on.
    {
        let mut ctx = context.borrow_mut();
        for handle in deferred {
            if ctx.scripts.arm(handle) {
                let label = ctx.scripts.label(handle).unwrap_or("<unbound>").to_string();
                ctx.log_event(format!("script.rearm {label} (#{handle})"));
            }
        }
    }

    let (frame, render) = {
        let mut ctx = context.borrow_mut();
        ctx.log_event(format!(
            "tick.render {tick} passes={passes} steps={steps} redraw={redraw}"
        ));
        (ctx.frame_snapshot(redraw), ctx.render_callback())
    };
    if let Some(callback) = render {
        callback.render(&frame);
    }

    Ok(TickSummary {
        tick,
        passes,
        steps,
        redraw,
        faults,
    })
}
