//! End-to-end runs of whole machines: boot, schedule, interrupt, halt.

use super::*;
use std::cell::RefCell;
use std::rc::Rc;

fn sink_values(os: &Kernel) -> Vec<Value> {
    let out = os
        .device(STDOUT)
        .and_then(|d| d.output().cloned())
        .expect("stdout sink");
    let mut values = Vec::new();
    while let Ok(v) = out.rx.try_recv() {
        values.push(v);
    }
    values
}

#[test]
fn test_hello_world_via_stdout() {
    let os = Kernel::new();
    os.create_process(
        "hello",
        0,
        20,
        Box::new(|ctx| {
            if ctx.pc() == 0 {
                let chan = Chan::bounded(1);
                chan.tx.send(Value::from("Hello, world!")).unwrap();
                ctx.interrupt_request(InterruptKind::StdOut, chan);
                Status::Running
            } else {
                Status::Done
            }
        }),
    );

    os.boot();

    assert_eq!(sink_values(&os), vec![Value::from("Hello, world!")]);
    assert_eq!(os.process_status("hello"), Some(Status::Done));
    assert!(!os.has_work());
}

#[test]
fn test_producer_consumer_over_a_pipe() {
    const ITEMS: i64 = 5;

    let os = Kernel::new();

    let mut sent = 0i64;
    os.create_process(
        "producer",
        10,
        200,
        Box::new(move |ctx| {
            let Some(dev) = ctx.device("pipe0") else {
                let chan = Chan::bounded(2);
                chan.tx.send(Value::from("pipe0")).unwrap();
                chan.tx.send(Value::Int(3)).unwrap();
                ctx.interrupt_request(InterruptKind::NewPipe, chan);
                return Status::Running;
            };
            let pipe = dev.as_pipe().unwrap();
            if sent == ITEMS {
                return Status::Done;
            }
            if pipe.inputable() {
                pipe.input(Value::Int(sent)).unwrap();
                sent += 1;
                Status::Running
            } else {
                // Full: give the consumer a turn
                Status::Ready
            }
        }),
    );

    let mut received = 0i64;
    os.create_process(
        "consumer",
        10,
        200,
        Box::new(move |ctx| {
            let Some(dev) = ctx.device("pipe0") else {
                let chan = Chan::bounded(1);
                chan.tx.send(Value::from("pipe0")).unwrap();
                ctx.interrupt_request(InterruptKind::GetPipe, chan);
                return Status::Running;
            };
            let pipe = dev.as_pipe().unwrap();
            if pipe.outputable() {
                let value = pipe.output().unwrap();
                received += 1;
                let chan = Chan::bounded(1);
                chan.tx.send(value).unwrap();
                ctx.interrupt_request(InterruptKind::StdOut, chan);
                Status::Running
            } else if received == ITEMS {
                Status::Done
            } else {
                // Empty: wait for the producer
                Status::Ready
            }
        }),
    );

    os.boot();

    let expected: Vec<Value> = (0..ITEMS).map(Value::Int).collect();
    assert_eq!(sink_values(&os), expected);
    assert_eq!(os.process_status("producer"), Some(Status::Done));
    assert_eq!(os.process_status("consumer"), Some(Status::Done));
    let pipe = os.device("pipe0").unwrap();
    assert_eq!(pipe.as_pipe().unwrap().in_use(), 0);
}

#[test]
fn test_clock_preemption_round_trip() {
    let os = Kernel::new();
    os.create_process("spin", 0, 100, Box::new(|_| Status::Running));

    let done = os.ready_to_running("spin");
    assert_eq!(os.wait_for_completion(done.as_ref()), Some(Status::Blocked));

    // A default slice is 10 committed steps
    assert_eq!(os.running_pc(), Some(10));
    assert_eq!(os.pending_interrupts(), vec![InterruptKind::Clock]);

    os.running_to_blocked();
    assert_eq!(os.blocked_ids(), vec!["spin"]);

    os.handle_interrupts();
    assert!(os.blocked_ids().is_empty());
    assert!(os.ready_ids().contains(&"spin".to_string()));
    assert_eq!(os.process_status("spin"), Some(Status::Ready));
}

#[test]
fn test_malformed_new_pipe_leaves_requester_blocked() {
    let os = Kernel::new();
    os.create_process(
        "bad",
        0,
        20,
        Box::new(|ctx| {
            let chan = Chan::bounded(2);
            chan.tx.send(Value::Int(42)).unwrap(); // pipe id must be a string
            chan.tx.send(Value::Int(1)).unwrap();
            ctx.interrupt_request(InterruptKind::NewPipe, chan);
            Status::Running
        }),
    );

    let done = os.ready_to_running("bad");
    assert_eq!(os.wait_for_completion(done.as_ref()), Some(Status::Blocked));
    os.running_to_blocked();

    os.handle_interrupts();

    // The handler rejects the request and never readies the process
    assert_eq!(os.blocked_ids(), vec!["bad"]);
    assert!(os.device("42").is_none());
}

#[test]
fn test_fcfs_completes_in_creation_order() {
    let os = Kernel::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for id in ["a", "b", "c"] {
        let order = order.clone();
        os.create_process(
            id,
            0,
            10,
            Box::new(move |_| {
                order.borrow_mut().push(id.to_string());
                Status::Done
            }),
        );
    }

    os.boot();

    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn test_pc_advances_one_per_step() {
    let os = Kernel::new();
    let pcs = Rc::new(RefCell::new(Vec::new()));

    let seen = pcs.clone();
    os.create_process(
        "count",
        0,
        10,
        Box::new(move |ctx| {
            seen.borrow_mut().push(ctx.pc());
            if ctx.pc() < 4 { Status::Running } else { Status::Done }
        }),
    );

    os.boot();

    assert_eq!(*pcs.borrow(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_process_can_spawn_another() {
    let os = Kernel::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let parent_order = order.clone();
    let child_order = order.clone();
    os.create_process(
        "parent",
        0,
        10,
        Box::new(move |ctx| {
            let child_order = child_order.clone();
            ctx.create_process(
                "child",
                0,
                10,
                Box::new(move |_| {
                    child_order.borrow_mut().push("child".to_string());
                    Status::Done
                }),
            );
            parent_order.borrow_mut().push("parent".to_string());
            Status::Done
        }),
    );

    os.boot();

    assert_eq!(*order.borrow(), vec!["parent", "child"]);
    assert_eq!(os.process_status("child"), Some(Status::Done));
}

#[test]
fn test_stdin_feeds_a_reader() {
    let os = Kernel::new();
    os.device(STDIN)
        .and_then(|d| d.input().cloned())
        .expect("stdin source")
        .tx
        .send(Value::from("typed"))
        .unwrap();

    let got = Rc::new(RefCell::new(None));
    let chan = Chan::bounded(1);
    let reply = chan.clone();
    let seen = got.clone();
    os.create_process(
        "reader",
        0,
        20,
        Box::new(move |ctx| {
            if ctx.pc() == 0 {
                ctx.interrupt_request(InterruptKind::StdIn, chan.clone());
                Status::Running
            } else {
                *seen.borrow_mut() = reply.rx.try_recv().ok();
                Status::Done
            }
        }),
    );

    os.boot();

    assert_eq!(*got.borrow(), Some(Value::from("typed")));
}

#[test]
fn test_stdin_pads_when_source_is_dry() {
    let os = Kernel::new();

    let got = Rc::new(RefCell::new(None));
    let chan = Chan::bounded(1);
    let reply = chan.clone();
    let seen = got.clone();
    os.create_process(
        "reader",
        0,
        20,
        Box::new(move |ctx| {
            if ctx.pc() == 0 {
                ctx.interrupt_request(InterruptKind::StdIn, chan.clone());
                Status::Running
            } else {
                *seen.borrow_mut() = reply.rx.try_recv().ok();
                Status::Done
            }
        }),
    );

    os.boot();

    assert_eq!(*got.borrow(), Some(Value::from("")));
}

#[test]
fn test_destroy_pipe_unregisters_but_keeps_grants() {
    let os = Kernel::new();
    let grant_survived = Rc::new(RefCell::new(false));

    let seen = grant_survived.clone();
    os.create_process(
        "plumber",
        0,
        30,
        Box::new(move |ctx| match ctx.pc() {
            0 => {
                let chan = Chan::bounded(2);
                chan.tx.send(Value::from("scratch")).unwrap();
                chan.tx.send(Value::Int(2)).unwrap();
                ctx.interrupt_request(InterruptKind::NewPipe, chan);
                Status::Running
            }
            1 => {
                let chan = Chan::bounded(1);
                chan.tx.send(Value::from("scratch")).unwrap();
                ctx.interrupt_request(InterruptKind::DestroyPipe, chan);
                Status::Running
            }
            _ => {
                *seen.borrow_mut() = ctx.device("scratch").is_some();
                Status::Done
            }
        }),
    );

    os.boot();

    assert!(os.device("scratch").is_none());
    assert!(*grant_survived.borrow());
    assert_eq!(os.process_status("plumber"), Some(Status::Done));
}

#[test]
fn test_var_pool_persists_across_slices() {
    let os = Kernel::new();
    let slot = os.create_process(
        "stateful",
        0,
        20,
        Box::new(|ctx| match ctx.pc() {
            0 => {
                assert!(ctx.init_var_pool());
                ctx.set_var("acc", Value::Int(1));
                Status::Running
            }
            1 => {
                let acc = ctx.get_var("acc").as_int().unwrap();
                ctx.set_var("acc", Value::Int(acc + 1));
                Status::Running
            }
            _ => Status::Done,
        }),
    );

    os.boot();

    let acc = os.with_var_pool(slot, |pool| pool.get("acc").cloned()).flatten();
    assert_eq!(acc, Some(Value::Int(2)));
}

#[test]
fn test_noop_scheduler_runs_head_once() {
    let os = Kernel::new();
    os.set_scheduler(Box::new(NoopScheduler::new()));
    os.create_process("solo", 0, 10, Box::new(|_| Status::Done));

    os.boot();

    // Single-shot: only the queue head (the seeded idle process) ran
    assert_eq!(os.process_status("idle-0"), Some(Status::Done));
    assert_eq!(os.process_status("solo"), Some(Status::Ready));
}
