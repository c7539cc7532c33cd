use super::*;

fn global(rt: &Runtime, name: &str) -> Value {
    let v = rt.global(name);
    assert!(!v.is_nil(), "{name} is not defined");
    v
}

#[test]
fn chunk_ids() {
    assert_eq!(chunk_id(Some("@fib.lua")), "fib.lua");
    assert_eq!(chunk_id(Some("=stdin")), "stdin");
    assert_eq!(chunk_id(None), "?");
    assert_eq!(chunk_id(Some("return 1")), "[string \"return 1\"]");
    assert_eq!(
        chunk_id(Some("local x = 1\nreturn x")),
        "[string \"local x = 1...\"]"
    );
}

#[test]
fn base_library_is_installed() {
    let rt = Runtime::new();
    for name in ["print", "pcall", "error", "pairs", "ipairs", "setmetatable", "select"] {
        global(&rt, name);
    }
    assert_eq!(rt.global("_VERSION"), Value::str("Lua 5.4"));
    match rt.global("_G") {
        Value::Table(g) => assert!(Rc::ptr_eq(&g, rt.globals())),
        v => panic!("_G is {v:?}"),
    }
}

#[test]
fn host_calls_return_every_result() {
    let mut rt = Runtime::new();
    let select = global(&rt, "select");
    let args = [Value::Int(2), Value::Int(10), Value::Int(20), Value::Int(30)];
    let out = rt.call_function(select.clone(), &args).unwrap();
    assert_eq!(out, [Value::Int(20), Value::Int(30)]);

    let count = Value::str("#");
    let out = rt.call_function(select.clone(), &[count, Value::Nil, Value::Nil]).unwrap();
    assert_eq!(out, [Value::Int(2)]);

    let e = rt.call_function(select, &[Value::Int(0)]).unwrap_err();
    assert_eq!(e.message(), "bad argument #1 to 'select' (index out of range)");
}

#[test]
fn pcall_catches_host_errors() {
    let mut rt = Runtime::new();
    let pcall = global(&rt, "pcall");
    let error = global(&rt, "error");
    let out = rt
        .call_function(pcall.clone(), &[error.clone(), Value::str("boom")])
        .unwrap();
    assert_eq!(out, [Value::Bool(false), Value::str("boom")]);

    let ty = global(&rt, "type");
    let out = rt.call_function(pcall, &[ty, Value::Int(1)]).unwrap();
    assert_eq!(out, [Value::Bool(true), Value::str("number")]);
    assert_eq!(rt.depth(), 1);
}

#[test]
fn calling_a_non_function() {
    let mut rt = Runtime::new();
    let e = rt.call_function(Value::Int(3), &[]).unwrap_err();
    assert_eq!(e.message(), "attempt to call a number value");
}

#[test]
fn stack_grows_on_demand() {
    let mut rt = Runtime::new();
    let before = rt.stack_last();
    rt.check_stack(before * 3).unwrap();
    assert!(rt.stack_last() >= before * 3);
    assert_eq!(rt.stack.len(), rt.stack_last() + EXTRA_STACK);

    let e = rt.check_stack(MAX_STACK + 1).unwrap_err();
    assert_eq!(e.message(), "stack overflow");
}

#[test]
fn stack_check_with_top_in_the_reserve() {
    let mut rt = Runtime::new();
    let before = rt.stack_last();
    rt.top = before + EXTRA_STACK - 1;
    rt.check_stack(1).unwrap();
    assert!(rt.stack_last() > rt.top + 1);
    assert!(rt.stack_last() >= before * 2);
}

#[test]
fn compiled_slot_is_bound_once() {
    let mut rt = Runtime::new();
    let proto = rt.load_proto(&Prototype {
        code: vec![crate::bytecode::asm::return0(0, 0, 0)],
        ..Default::default()
    });
    assert!(proto.compiled().is_none());
    fn nothing(_: &mut Runtime, _: FrameId) -> Result<Option<FrameId>> {
        Ok(None)
    }
    proto.bind(Compiled::Native(nothing)).unwrap();
    assert!(matches!(proto.compiled(), Some(Compiled::Native(_))));
    let e = proto.bind(Compiled::Native(nothing)).unwrap_err();
    assert_eq!(e.message(), "prototype already has a compiled implementation");
}

#[test]
fn loaded_constants_are_runtime_values() {
    let mut rt = Runtime::new();
    let proto = rt.load_proto(&Prototype {
        source: Some("@k.lua".into()),
        constants: vec![
            Constant::Nil,
            Constant::Bool(true),
            Constant::Int(-1),
            Constant::Float(0.5),
            Constant::Str("key".into()),
        ],
        protos: vec![Prototype::default()],
        ..Default::default()
    });
    assert_eq!(
        &proto.k[..],
        [
            Value::Nil,
            Value::Bool(true),
            Value::Int(-1),
            Value::Float(0.5),
            Value::str("key"),
        ]
    );
    assert_eq!(proto.protos.len(), 1);
    assert_eq!(proto.chunk_id(), "k.lua");
}
