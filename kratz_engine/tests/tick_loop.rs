use std::rc::Rc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use kratz_engine::lua_host::{RenderCallback, StageHost, StageOptions};
use kratz_engine::render_bridge::RecordingRenderCallback;

fn host_with_script(source: &str) -> Result<StageHost> {
    let host = StageHost::new(StageOptions::default())?;
    host.eval_script("test", source)?;
    Ok(host)
}

#[test]
fn repeat_scenario_advances_one_step_per_tick() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        local firstTick = stage.tickCount()
        cat:whenKeyPressed("space", function(self)
            self:move(10)
            self:repeatTimes(9, function(me)
                me:move(1)
            end)
            stage.log("elapsed " .. (stage.tickCount() - firstTick))
        end)
        "#,
    )?;

    assert_eq!(host.key_pressed("space"), 1);
    for _ in 0..10 {
        host.tick()?;
    }

    assert_eq!(host.sprite_position("cat"), Some((19.0, 0.0)));
    assert!(
        host.events().iter().any(|event| event == "user.log elapsed 10"),
        "script should complete on the tenth tick"
    );

    // The script is inert now: a further tick schedules nothing.
    let idle = host.tick()?;
    assert_eq!(idle.steps, 0);
    assert_eq!(idle.passes, 0);
    Ok(())
}

#[test]
fn completed_scripts_can_be_rearmed_and_rerun() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            self:move(10)
            self:repeatTimes(9, function(me)
                me:move(1)
            end)
        end)
        "#,
    )?;

    host.key_pressed("space");
    for _ in 0..10 {
        host.tick()?;
    }
    assert_eq!(host.sprite_position("cat"), Some((19.0, 0.0)));

    host.key_pressed("space");
    for _ in 0..10 {
        host.tick()?;
    }
    assert_eq!(host.sprite_position("cat"), Some((38.0, 0.0)));
    Ok(())
}

#[test]
fn wait_resolves_on_the_next_tick_never_the_same_one() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            local first = stage.tickCount()
            self:wait(0.001)
            stage.log("elapsed " .. (stage.tickCount() - first))
        end)
        "#,
    )?;

    host.key_pressed("space");
    for _ in 0..10 {
        host.tick()?;
        thread::sleep(Duration::from_millis(2));
    }

    assert!(
        host.events().iter().any(|event| event == "user.log elapsed 1"),
        "a sub-tick wait must still span exactly one tick boundary, got: {:?}",
        host.events()
    );
    Ok(())
}

#[test]
fn non_mutating_script_coalesces_into_a_single_tick() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            self:repeatTimes(50, function() end)
            stage.log("quiet done")
        end)
        "#,
    )?;

    host.key_pressed("space");
    let first = host.tick()?;
    assert_eq!(first.steps, 51);
    assert_eq!(first.passes, 51);
    assert!(!first.redraw);
    assert!(host.events().iter().any(|event| event == "user.log quiet done"));

    let idle = host.tick()?;
    assert_eq!(idle.steps, 0);
    Ok(())
}

#[test]
fn arming_an_already_ready_script_is_idempotent() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            self:move(5)
        end)
        "#,
    )?;

    host.key_pressed("space");
    host.key_pressed("space");
    let summary = host.tick()?;

    assert_eq!(summary.steps, 1, "double arming must not double-run");
    assert_eq!(host.sprite_position("cat"), Some((5.0, 0.0)));
    Ok(())
}

#[test]
fn a_mutating_step_ends_the_tick_while_siblings_coalesce_later() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            self:repeatTimes(3, function() end)
            stage.log("quiet done")
        end)
        cat:whenKeyPressed("space", function(self)
            self:move(1)
        end)
        "#,
    )?;

    host.key_pressed("space");
    let first = host.tick()?;
    // Both ready scripts run once in the snapshot pass, then the visible
    // mutation stops further passes.
    assert_eq!(first.steps, 2);
    assert_eq!(first.passes, 1);
    assert!(first.redraw);
    assert_eq!(host.sprite_position("cat"), Some((1.0, 0.0)));
    assert!(!host.events().iter().any(|event| event == "user.log quiet done"));

    // With the mutating script finished, the quiet one runs to completion
    // within the next tick.
    let second = host.tick()?;
    assert!(!second.redraw);
    assert!(host.events().iter().any(|event| event == "user.log quiet done"));
    Ok(())
}

#[test]
fn waiting_scripts_get_one_deadline_check_per_tick() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            self:wait(60)
        end)
        cat:whenKeyPressed("space", function(self)
            self:repeatTimes(5, function() end)
        end)
        "#,
    )?;

    host.key_pressed("space");
    let summary = host.tick()?;
    // The waiter is resumed once; the quiet script accounts for the other
    // six steps (five iterations plus completion) across later passes.
    assert_eq!(summary.steps, 7);
    assert_eq!(summary.passes, 6);
    assert!(!summary.redraw);
    Ok(())
}

#[test]
fn a_bare_yield_suspends_until_the_next_pass_of_the_same_tick() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            coroutine.yield()
            stage.log("resumed after bare yield")
        end)
        "#,
    )?;

    host.key_pressed("space");
    let summary = host.tick()?;
    assert_eq!(summary.steps, 2);
    assert!(host
        .events()
        .iter()
        .any(|event| event == "user.log resumed after bare yield"));
    Ok(())
}

#[test]
fn a_faulting_body_is_isolated_and_stays_dead() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            error("boom")
        end)
        cat:whenKeyPressed("space", function(self)
            self:move(2)
        end)
        "#,
    )?;

    host.key_pressed("space");
    let first = host.tick()?;
    assert_eq!(first.faults, 1);
    assert_eq!(host.sprite_position("cat"), Some((2.0, 0.0)));

    let errors = |host: &StageHost| {
        host.events()
            .iter()
            .filter(|event| event.starts_with("script.error"))
            .count()
    };
    assert_eq!(errors(&host), 1);

    // Arming the dead script again is a no-op; its sibling still runs.
    host.key_pressed("space");
    let second = host.tick()?;
    assert_eq!(second.faults, 0);
    assert_eq!(host.sprite_position("cat"), Some((4.0, 0.0)));
    assert_eq!(errors(&host), 1);
    Ok(())
}

#[test]
fn an_unknown_suspension_tag_is_a_fatal_tick_error() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            coroutine.yield("bogus")
        end)
        "#,
    )?;

    host.key_pressed("space");
    let err = host.tick().expect_err("bogus tag must not be scheduled");
    assert!(
        format!("{err:#}").contains("unknown suspension tag: bogus"),
        "unexpected error: {err:#}"
    );
    Ok(())
}

#[test]
fn a_duplicate_sprite_name_replaces_the_old_sprite_and_its_scripts() -> Result<()> {
    let host = host_with_script(
        r#"
        local old = stage.addSprite("cat")
        old:whenKeyPressed("space", function(self)
            self:move(100)
        end)
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            self:move(2)
        end)
        "#,
    )?;

    assert_eq!(host.sprite_count(), 1);
    assert_eq!(host.key_pressed("space"), 1, "only the live script is addressed");
    let summary = host.tick()?;
    assert_eq!(summary.steps, 1);
    assert_eq!(summary.faults, 0);
    assert_eq!(host.sprite_position("cat"), Some((2.0, 0.0)));

    let frame = host.frame_snapshot();
    assert_eq!(frame.sprites.len(), 1);
    assert_eq!(frame.sprites[0].name, "cat");
    Ok(())
}

#[test]
fn motion_bindings_update_position_and_direction() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            self:goTo(5, -3)
            self:changeYBy(4)
            self:setX(7)
            self:pointInDirection(180)
            self:turnCounterClockwise(45)
            stage.log("pose " .. self:x() .. "," .. self:y() .. " @" .. self:direction())
        end)
        "#,
    )?;

    host.key_pressed("space");
    host.tick()?;

    assert_eq!(host.tick_count(), 1);
    assert_eq!(host.sprite_position("cat"), Some((7.0, 1.0)));
    assert_eq!(host.sprite_direction("cat"), Some(135.0));
    assert!(host.events().iter().any(|event| event == "user.log pose 7,1 @135"));
    Ok(())
}

#[test]
fn costume_switches_count_as_visible_mutations() -> Result<()> {
    let host = host_with_script(
        r#"
        local cat = stage.addSprite("cat")
        cat:addCostume("cat.png")
        cat:addCostume("cat-walk.png", "walk")
        cat:whenKeyPressed("space", function(self)
            self:switchCostume("walk")
        end)
        "#,
    )?;

    assert_eq!(host.sprite_costume("cat").as_deref(), Some("costume1"));
    host.key_pressed("space");
    let summary = host.tick()?;
    assert!(summary.redraw);
    assert_eq!(host.sprite_costume("cat").as_deref(), Some("walk"));
    Ok(())
}

#[test]
fn renderer_runs_exactly_once_per_tick() -> Result<()> {
    let recorder = Rc::new(RecordingRenderCallback::new());
    let host = StageHost::new(StageOptions {
        verbose: false,
        render: Some(recorder.clone() as Rc<dyn RenderCallback>),
    })?;
    host.eval_script(
        "test",
        r#"
        local cat = stage.addSprite("cat")
        cat:whenKeyPressed("space", function(self)
            self:move(10)
            self:repeatTimes(2, function(me)
                me:move(1)
            end)
        end)
        "#,
    )?;

    host.key_pressed("space");
    for _ in 0..5 {
        host.tick()?;
    }

    let frames = recorder.frames();
    assert_eq!(frames.len(), 5);
    let ticks: Vec<u64> = frames.iter().map(|frame| frame.tick).collect();
    assert_eq!(ticks, vec![1, 2, 3, 4, 5]);
    // Ticks 1 and 2 move the sprite, tick 3 only completes the script,
    // and the trailing two render unchanged state.
    let redraws: Vec<bool> = frames.iter().map(|frame| frame.redraw).collect();
    assert_eq!(redraws, vec![true, true, false, false, false]);
    assert_eq!(frames[4].sprites[0].x, 12.0);
    Ok(())
}
