//! Handle lifetimes, engine teardown and hook ordering.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use common::{active, next, next_of, poll};
use mediabus_core::{
    Command, CommandContext, EnginePhase, EventKind, EventPayload, Handle, HandleKind, HandleState,
    HookPhase, Result, Value,
};

fn register_hook_runner(handle: &Handle, command: &str, hook: &'static str) {
    handle
        .register_command(command, move |ctx: &mut CommandContext<'_>, _: &Command| -> Result<Value> {
            let ran = ctx.run_hook(hook);
            Ok(Value::Int64(ran as i64))
        })
        .unwrap();
}

#[test]
fn client_ids_are_unique_and_positive() {
    let main = active();
    let a = main.create_client(None).unwrap();
    let b = main.create_weak_client(Some("weakling")).unwrap();
    assert!(main.client_id() > 0);
    assert!(a.client_id() > main.client_id());
    assert!(b.client_id() > a.client_id());
    assert_eq!(b.kind(), HandleKind::Weak);
    assert_eq!(b.client_name(), "weakling");
    assert_eq!(a.state(), HandleState::Active);
}

#[test]
fn destroying_the_last_strong_handle_shuts_weak_handles_down() {
    let main = active();
    let weak = main.create_weak_client(Some("watcher")).unwrap();
    let (tx, rx) = mpsc::channel();

    let watcher = thread::spawn(move || {
        let event = weak.wait_event(None);
        tx.send((event.kind, weak.state())).unwrap();
        weak.destroy();
    });

    main.destroy();
    let (kind, state) = rx.recv().unwrap();
    assert_eq!(kind, EventKind::Shutdown);
    assert_eq!(state, HandleState::ShuttingDown);
    watcher.join().unwrap();
}

#[test]
fn a_remaining_strong_handle_keeps_the_engine_alive() {
    let main = active();
    let other = main.create_client(Some("other")).unwrap();
    main.destroy();

    assert_eq!(other.engine_phase(), EnginePhase::Active);
    assert!(poll(&other).is_none());
    other.set_property("still", true).unwrap();
    assert_eq!(other.command(&Value::args(["ignore"])), Ok(Value::None));
}

#[test]
fn terminate_and_wait_blocks_only_the_first_caller() {
    let main = active();
    let second = main.create_client(Some("second")).unwrap();
    let weak = main.create_weak_client(None).unwrap();
    let finished = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&finished);
    let second_thread = thread::spawn(move || {
        assert_eq!(second.wait_event(None).kind, EventKind::Shutdown);
        // Teardown is already under way, so this returns without waiting.
        second.terminate_and_wait();
        flag.store(true, Ordering::SeqCst);
    });
    let weak_thread = thread::spawn(move || {
        assert_eq!(weak.wait_event(None).kind, EventKind::Shutdown);
        weak.destroy();
    });

    main.terminate_and_wait();
    second_thread.join().unwrap();
    weak_thread.join().unwrap();
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn quit_command_shuts_every_handle_down() {
    let main = active();
    let other = main.create_client(None).unwrap();
    main.command(&Value::args(["quit"])).unwrap();

    assert_eq!(poll(&main).kind, EventKind::Shutdown);
    assert_eq!(poll(&other).kind, EventKind::Shutdown);
    assert_eq!(main.state(), HandleState::ShuttingDown);
    assert_eq!(main.engine_phase(), EnginePhase::ShuttingDown);
    assert!(poll(&main).is_none());

    // Shutting down handles can still talk to the engine until destroyed.
    assert_eq!(main.command(&Value::args(["ignore"])), Ok(Value::None));
    other.destroy();
}

#[test]
fn hooks_fire_in_ascending_priority_then_registration_order() {
    let main = active();
    let hooker = main.create_client(Some("hooker")).unwrap();
    hooker.hook_add(10, "on_load", 5).unwrap();
    hooker.hook_add(11, "on_load", 1).unwrap();
    hooker.hook_add(12, "on_load", 5).unwrap();
    hooker.hook_add(13, "on_unload", 0).unwrap();

    let order: Vec<i32> = main
        .hook_registrations("on_load")
        .iter()
        .map(|r| r.priority)
        .collect();
    assert_eq!(order, [1, 5, 5]);
    register_hook_runner(&main, "load", "on_load");

    let responder = thread::spawn(move || {
        let mut tokens = Vec::new();
        while tokens.len() < 3 {
            let event = next_of(&hooker, EventKind::Hook);
            assert_eq!(event.kind, EventKind::Hook);
            let EventPayload::Hook { name, id } = event.payload else {
                panic!("hook event without hook payload");
            };
            assert_eq!(name, "on_load");
            assert_eq!(hooker.hook_phase("on_load"), HookPhase::Blocked(hooker.client_id()));
            tokens.push(event.reply_token);
            hooker.hook_continue(id).unwrap();
        }
        tokens
    });

    assert_eq!(main.command(&Value::args(["load"])), Ok(Value::Int64(3)));
    assert_eq!(responder.join().unwrap(), [11, 10, 12]);
    assert_eq!(main.hook_phase("on_load"), HookPhase::Idle);
}

#[test]
fn destroying_a_blocking_handle_releases_the_hook() {
    let main = active();
    let hooker = main.create_client(Some("quitter")).unwrap();
    hooker.hook_add(1, "on_load", 0).unwrap();
    register_hook_runner(&main, "load", "on_load");

    let responder = thread::spawn(move || {
        let event = next(&hooker);
        assert_eq!(event.kind, EventKind::Hook);
        hooker.destroy();
    });

    assert_eq!(main.command(&Value::args(["load"])), Ok(Value::Int64(1)));
    responder.join().unwrap();
    assert!(main.hook_registrations("on_load").is_empty());
    assert_eq!(main.command(&Value::args(["load"])), Ok(Value::Int64(0)));
}

#[test]
fn hook_continue_rejects_foreign_ids() {
    let main = active();
    let hooker = main.create_client(None).unwrap();
    let bystander = main.create_client(None).unwrap();
    hooker.hook_add(1, "on_seek", 0).unwrap();
    assert!(hooker.hook_add(2, "", 0).is_err());
    register_hook_runner(&main, "seek", "on_seek");

    let responder = thread::spawn(move || {
        let event = next(&hooker);
        let EventPayload::Hook { id, .. } = event.payload else {
            panic!("expected a hook event");
        };
        assert!(bystander.hook_continue(id).is_err());
        hooker.hook_continue(id).unwrap();
        assert!(hooker.hook_continue(id).is_err());
    });

    assert_eq!(main.command(&Value::args(["seek"])), Ok(Value::Int64(1)));
    responder.join().unwrap();
}

#[test]
fn monotonic_time_never_goes_backwards() {
    let handle = active();
    let first = handle.time_us();
    let second = mediabus_core::monotonic_time_us();
    assert!(second >= first);
    assert!(first >= 0);
}
