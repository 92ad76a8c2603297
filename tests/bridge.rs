use std::cell::*;
use std::collections::*;
use std::rc::*;
use tether::*;

type Log = Rc<RefCell<Vec<String>>>;

fn record(log: &Log, tag: &'static str) -> Arg {
    let log = log.clone();
    Arg::handle(move |args| log.borrow_mut().push(format!("{tag}{args:?}")))
}

fn module_m(bridge: &Bridge) -> ModuleProxy {
    let mut constants = BTreeMap::new();
    constants.insert("K".to_string(), Value::from(1));
    bridge.register_module(ModuleConfig::from((
        "M".to_string(),
        Some(constants),
        Some(vec!["a".to_string(), "b".to_string()]),
        Some(vec![1]),
        Some(vec![])
    ))).unwrap();
    bridge.module("M").unwrap()
}

#[test]
fn registration_derives_kinds_and_constants() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);

    assert_eq!(module.method("a").unwrap().kind(), MethodKind::Callback);
    assert_eq!(module.method("b").unwrap().kind(), MethodKind::Promise);
    assert_eq!(module.constant("K"), Some(&Value::from(1)));
}

#[test]
fn dual_kind_method_registers_nothing() {
    let bridge = Bridge::new();
    let result = bridge.register_module(ModuleConfig::from((
        "Both".to_string(),
        None,
        Some(vec!["x".to_string()]),
        Some(vec![0]),
        Some(vec![0])
    )));

    assert!(matches!(result, Err(BridgeError::InvariantViolation(_))));
    assert!(bridge.descriptor("Both").is_none());
    assert!(bridge.module("Both").is_none());
    assert_eq!(bridge.status().modules, 0);
}

#[test]
fn drain_returns_calls_since_previous_drain_in_order() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let a = module.method("a").unwrap();

    for i in 0..3 {
        a.call(vec![Arg::data(i)]).unwrap();
    }
    let first = bridge.drain_pending();
    a.call(vec![Arg::data(10)]).unwrap();
    let second = bridge.drain_pending();

    assert_eq!(first.len(), 3);
    assert_eq!(first.args(), &[vec![Value::from(0)], vec![Value::from(1)], vec![Value::from(2)]]);
    assert_eq!(first.module_ids().len(), first.callback_ids().len());
    assert_eq!(first.method_ids().len(), first.args().len());
    assert_eq!(second.args(), &[vec![Value::from(10)]]);
    assert!(bridge.drain_pending().is_empty());
}

#[test]
fn callback_call_strips_handles_and_routes_success() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let log = Log::default();

    module.method("a").unwrap()
        .call(vec![Arg::data(1), Arg::data(2), record(&log, "fail"), record(&log, "success")])
        .unwrap();
    let snapshot = bridge.drain_pending();
    let call = snapshot.get(0).unwrap();
    assert_eq!(call.args, vec![Value::from(1), Value::from(2)]);
    let callback_id = call.callback_id.unwrap();

    bridge.dispatch_callback(callback_id, vec![Value::Null, Value::from(42)]);
    assert_eq!(*log.borrow(), vec![format!("success{:?}", vec![Value::from(42)])]);
}

#[test]
fn callback_call_routes_failure_descriptor() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let log = Log::default();

    module.method("a").unwrap().call(vec![record(&log, "fail"), record(&log, "success")]).unwrap();
    let callback_id = bridge.drain_pending().callback_ids()[0].unwrap();
    bridge.dispatch_callback(callback_id, vec![Value::from("bad"), Value::from(1)]);

    assert_eq!(*log.borrow(), vec![format!("fail{:?}", vec![Value::from("bad")])]);
}

#[test]
fn double_dispatch_fires_once() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let count = Rc::new(Cell::new(0));
    let counter = count.clone();

    module.method("a").unwrap().call(vec![Arg::handle(move |_| counter.set(counter.get() + 1))]).unwrap();
    let callback_id = bridge.drain_pending().callback_ids()[0].unwrap();

    bridge.dispatch_callback(callback_id, vec![Value::Null]);
    bridge.dispatch_callback(callback_id, vec![Value::Null]);
    assert_eq!(count.get(), 1);
    assert_eq!(bridge.status().pending_callbacks, 0);
}

#[test]
fn dispatch_miss_still_drains() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    module.method("a").unwrap().call(vec![Arg::data("queued")]).unwrap();

    let snapshot = bridge.dispatch_callback(CallbackId::new(999), vec![Value::Null]);
    assert_eq!(snapshot.len(), 1);
}

#[test]
fn promise_resolves_with_first_result() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);

    let promise = module.method("b").unwrap().promise(Vec::new()).unwrap();
    let callback_id = bridge.drain_pending().callback_ids()[0].unwrap();
    bridge.dispatch_callback(callback_id, vec![Value::Null, Value::from("ok")]);

    assert_eq!(futures::executor::block_on(promise).unwrap(), Value::from("ok"));
}

#[test]
fn promise_rejects_with_message() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);

    let promise = module.method("b").unwrap().promise(vec![Value::from("key")]).unwrap();
    let callback_id = bridge.drain_pending().callback_ids()[0].unwrap();
    bridge.dispatch_callback(callback_id, vec![Value::from("boom")]);

    match futures::executor::block_on(promise) {
        Err(BridgeError::Remote(error)) => assert_eq!(error.message, "boom"),
        other => panic!("unexpected result {other:?}")
    }
}

#[test]
fn promise_rejection_keeps_extra_fields() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);

    let promise = module.method("b").unwrap().promise(Vec::new()).unwrap();
    let callback_id = bridge.drain_pending().callback_ids()[0].unwrap();
    let descriptor = ErrorData::new("denied").with_field("code", "E_PERM").to_value();
    bridge.dispatch_callback(callback_id, vec![descriptor]);

    match futures::executor::block_on(promise) {
        Err(BridgeError::Remote(error)) => {
            assert_eq!(error.message, "denied");
            assert_eq!(error.field("code"), Some(&Value::from("E_PERM")));
        },
        other => panic!("unexpected result {other:?}")
    }
}

#[test]
fn reentrant_calls_land_in_next_drain() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let a = module.method("a").unwrap().clone();

    let inner = a.clone();
    a.call(vec![Arg::data("outer"), Arg::handle(move |_| inner.call(vec![Arg::data("inner")]).unwrap())]).unwrap();
    let first = bridge.drain_pending();
    assert_eq!(first.args(), &[vec![Value::from("outer")]]);

    let after_dispatch = bridge.dispatch_callback(first.callback_ids()[0].unwrap(), vec![Value::Null]);
    assert_eq!(after_dispatch.args(), &[vec![Value::from("inner")]]);
    assert!(!first.args().contains(&vec![Value::from("inner")]));
    assert!(bridge.drain_pending().is_empty());
}

#[test]
fn handler_drain_does_not_leak_into_outer_snapshot() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let a = module.method("a").unwrap().clone();
    let inner_snapshot = Rc::new(RefCell::new(None));

    let (handler_bridge, handler_method, seen) = (bridge.clone(), a.clone(), inner_snapshot.clone());
    a.call(vec![Arg::handle(move |_| {
        handler_method.call(vec![Arg::data("first")]).unwrap();
        *seen.borrow_mut() = Some(handler_bridge.drain_pending());
        handler_method.call(vec![Arg::data("second")]).unwrap();
    })]).unwrap();

    let callback_id = bridge.drain_pending().callback_ids()[0].unwrap();
    let outer = bridge.dispatch_callback(callback_id, vec![Value::Null]);

    let inner = inner_snapshot.borrow_mut().take().unwrap();
    assert_eq!(inner.args(), &[vec![Value::from("first")]]);
    assert_eq!(outer.args(), &[vec![Value::from("second")]]);
}

#[test]
fn panicking_handler_is_contained() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let a = module.method("a").unwrap().clone();

    let inner = a.clone();
    a.call(vec![Arg::handle(move |_| {
        inner.call(vec![Arg::data("before panic")]).unwrap();
        panic!("handler failed");
    })]).unwrap();

    let callback_id = bridge.drain_pending().callback_ids()[0].unwrap();
    let snapshot = bridge.dispatch_callback(callback_id, vec![Value::Null]);
    assert_eq!(snapshot.args(), &[vec![Value::from("before panic")]]);
    assert!(!bridge.is_in_callback());
}

#[test]
fn malformed_handle_pattern_is_rejected() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let result = module.method("a").unwrap().call(vec![Arg::handle(|_| {}), Arg::data(1)]);

    assert!(matches!(result, Err(BridgeError::InvariantViolation(_))));
    assert!(bridge.drain_pending().is_empty());
}

#[test]
fn exported_functions_run_and_drain() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let a = module.method("a").unwrap().clone();
    let received = Rc::new(RefCell::new(Vec::new()));

    let seen = received.clone();
    bridge.register_callable_module("Emitter", CallableModule::new().with("emit", move |args| {
        seen.borrow_mut().extend(args);
        a.call(vec![Arg::data("ack")]).unwrap();
    }));

    let snapshot = bridge.invoke_exported("Emitter", "emit", vec![Value::from("tick")]);
    assert_eq!(*received.borrow(), vec![Value::from("tick")]);
    assert_eq!(snapshot.args(), &[vec![Value::from("ack")]]);
}

#[test]
fn missing_exported_targets_still_drain() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    module.method("a").unwrap().call(Vec::new()).unwrap();
    bridge.register_callable_module("Emitter", CallableModule::new());

    assert_eq!(bridge.invoke_exported("Nowhere", "emit", Vec::new()).len(), 1);
    module.method("a").unwrap().call(Vec::new()).unwrap();
    assert_eq!(bridge.invoke_exported("Emitter", "missing", Vec::new()).len(), 1);
}

#[test]
fn lazy_callable_module_is_created_on_first_invoke() {
    let bridge = Bridge::new();
    let created = Rc::new(Cell::new(0));
    let calls = Rc::new(Cell::new(0));

    let (created_count, call_count) = (created.clone(), calls.clone());
    bridge.register_lazy_callable_module("Timers", move || {
        created_count.set(created_count.get() + 1);
        CallableModule::new().with("fire", move |_| call_count.set(call_count.get() + 1))
    });
    assert_eq!(created.get(), 0);

    bridge.invoke_exported("Timers", "fire", Vec::new());
    bridge.invoke_exported("Timers", "fire", Vec::new());
    assert_eq!((created.get(), calls.get()), (1, 2));
}

#[test]
fn batch_registration_keeps_host_indices() {
    let bridge = Bridge::new();
    let results = bridge.register_modules(vec![
        Some(ModuleConfig::new("DeviceInfo").with_constant("model", "sim")),
        None,
        Some(ModuleConfig::new("RCTNetworking").with_method("send", MethodKind::Callback)),
        Some(ModuleConfig::new("Storage").with_method("getItem", MethodKind::Promise))
    ]);

    assert_eq!(results.len(), 3);
    assert!(matches!(results[1], Err(BridgeError::Naming(_))));
    let storage = bridge.module("Storage").unwrap();
    assert_eq!(storage.id(), 3);

    storage.method("getItem").unwrap().promise(Vec::new()).unwrap();
    assert_eq!(bridge.drain_pending().module_ids(), &[3]);
}

#[test]
fn callback_ids_increase_across_calls() {
    let bridge = Bridge::new();
    let module = module_m(&bridge);
    let a = module.method("a").unwrap();

    a.call(vec![Arg::handle(|_| {})]).unwrap();
    a.call(vec![Arg::data(0)]).unwrap();
    a.call(vec![Arg::handle(|_| {}), Arg::handle(|_| {})]).unwrap();

    let ids = bridge.drain_pending().callback_ids().to_vec();
    assert_eq!(ids, vec![Some(CallbackId::new(0)), None, Some(CallbackId::new(1))]);
}
