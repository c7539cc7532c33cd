#![allow(dead_code)]

use std::{cell::RefCell, collections::HashMap, io::Write, rc::Rc};

use luaot::{
    Chunk, Engine, Runtime, Value,
    bytecode::{Constant, Instruction, OpCode, Prototype, UpvalueDesc, asm},
    vm::Stats,
};

/// Hand assembler: instructions in order, jump operands by label name.
pub struct Asm {
    proto: Prototype,
    line: u32,
    labels: HashMap<&'static str, u32>,
    fixups: Vec<(u32, &'static str)>,
}

impl Asm {
    /// A main chunk: vararg, `_ENV` as its only upvalue.
    pub fn main() -> Self {
        let mut a = Self::new(0);
        a.proto.is_vararg = true;
        a.proto.upvalues.push(UpvalueDesc::stack("_ENV", 0));
        a
    }

    /// A function defined at `line` with `params` fixed parameters
    /// that reaches `_ENV` through its parent.
    pub fn function(line: u32, params: u8) -> Self {
        let mut a = Self::new(line);
        a.proto.num_params = params;
        a.proto.upvalues.push(UpvalueDesc::outer("_ENV", 0));
        a
    }

    fn new(line: u32) -> Self {
        Self {
            proto: Prototype {
                source: Some("@test.lua".into()),
                line_defined: line,
                last_line_defined: line,
                max_stack_size: 2,
                ..Default::default()
            },
            line: line.max(1),
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    pub fn stack(mut self, size: u8) -> Self {
        self.proto.max_stack_size = size;
        self
    }

    pub fn vararg(mut self) -> Self {
        self.proto.is_vararg = true;
        self
    }

    pub fn upvalue(mut self, desc: UpvalueDesc) -> Self {
        self.proto.upvalues.push(desc);
        self
    }

    pub fn at(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn pc(&self) -> u32 {
        self.proto.code.len() as u32
    }

    pub fn k(&mut self, k: Constant) -> u32 {
        self.proto.constants.push(k);
        self.proto.constants.len() as u32 - 1
    }

    pub fn str(&mut self, s: &str) -> u32 {
        self.k(Constant::Str(s.to_owned()))
    }

    pub fn int(&mut self, v: i64) -> u32 {
        self.k(Constant::Int(v))
    }

    pub fn float(&mut self, v: f64) -> u32 {
        self.k(Constant::Float(v))
    }

    pub fn child(&mut self, p: Prototype) -> u32 {
        self.proto.protos.push(p);
        self.proto.protos.len() as u32 - 1
    }

    pub fn op(&mut self, i: Instruction) -> &mut Self {
        self.proto.code.push(i);
        self.proto.line_info.push(self.line);
        self
    }

    pub fn label(&mut self, name: &'static str) -> &mut Self {
        let pc = self.pc();
        assert!(self.labels.insert(name, pc).is_none(), "label {name} defined twice");
        self
    }

    fn fixup(&mut self, i: Instruction, to: &'static str) -> &mut Self {
        self.fixups.push((self.pc(), to));
        self.op(i)
    }

    pub fn jmp(&mut self, to: &'static str) -> &mut Self {
        self.fixup(asm::jmp(0), to)
    }

    /// A test followed by the `JMP` it guards.
    pub fn test_jmp(&mut self, test: Instruction, to: &'static str) -> &mut Self {
        self.op(test).jmp(to)
    }

    pub fn forprep(&mut self, a: u8, exit: &'static str) -> &mut Self {
        self.fixup(asm::forprep(a, 0), exit)
    }

    pub fn forloop(&mut self, a: u8, body: &'static str) -> &mut Self {
        self.fixup(asm::forloop(a, 0), body)
    }

    pub fn tforprep(&mut self, a: u8, call: &'static str) -> &mut Self {
        self.fixup(asm::tforprep(a, 0), call)
    }

    pub fn tforloop(&mut self, a: u8, body: &'static str) -> &mut Self {
        self.fixup(asm::tforloop(a, 0), body)
    }

    pub fn finish(&mut self) -> Prototype {
        for &(pc, name) in &self.fixups {
            let to = *self
                .labels
                .get(name)
                .unwrap_or_else(|| panic!("undefined label {name}")) as i64;
            let pc_ = pc as i64;
            let old = self.proto.code[pc as usize];
            let op = old.opcode().unwrap();
            self.proto.code[pc as usize] = match op {
                OpCode::Jmp => Instruction::sj_op(op, (to - pc_ - 1) as i32),
                OpCode::ForPrep => Instruction::abx(op, old.a(), (to - pc_ - 2) as u32),
                OpCode::ForLoop | OpCode::TForLoop => {
                    Instruction::abx(op, old.a(), (pc_ + 1 - to) as u32)
                }
                OpCode::TForPrep => Instruction::abx(op, old.a(), (to - pc_ - 1) as u32),
                _ => unreachable!("{op:?} has no jump operand"),
            };
        }
        let last = self.proto.line_info.last().copied().unwrap_or(0);
        if self.proto.line_defined != 0 {
            self.proto.last_line_defined = last;
        }
        std::mem::take(&mut self.proto)
    }
}

#[derive(Clone, Default)]
pub struct Sink(Rc<RefCell<Vec<u8>>>);

impl Sink {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct Run {
    pub result: luaot::Result<Vec<Value>>,
    pub output: String,
    pub stats: Stats,
}

impl Run {
    pub fn values(&self) -> &[Value] {
        match &self.result {
            Ok(v) => v,
            Err(e) => panic!("program failed: {e}"),
        }
    }

    pub fn error(&self) -> String {
        match &self.result {
            Ok(v) => panic!("program succeeded with {v:?}"),
            Err(e) => e.to_string(),
        }
    }
}

pub fn runtime(engine: Engine) -> (Runtime, Sink) {
    let sink = Sink::default();
    let mut rt = Runtime::new();
    rt.set_engine(engine);
    rt.set_output(Box::new(sink.clone()));
    (rt, sink)
}

pub fn run(main: &Prototype, engine: Engine) -> Run {
    let (mut rt, sink) = runtime(engine);
    let result = rt.execute_module(&Chunk::new(main.clone()));
    Run {
        result,
        output: sink.text(),
        stats: rt.stats(),
    }
}

/// Runs `main` interpreted and compiled and checks that both agree on
/// results, errors and output. Returns the compiled run.
pub fn run_both(main: &Prototype) -> Run {
    let interpreted = run(main, Engine::Interpreted);
    let compiled = run(main, Engine::Compiled);
    match (&interpreted.result, &compiled.result) {
        (Ok(a), Ok(b)) => assert_eq!(a, b, "results differ"),
        (Err(a), Err(b)) => assert_eq!(a.to_string(), b.to_string(), "errors differ"),
        (a, b) => panic!("engines disagree: interpreted {a:?}, compiled {b:?}"),
    }
    assert_eq!(interpreted.output, compiled.output, "output differs");
    assert_eq!(
        interpreted.stats.fallbacks, compiled.stats.fallbacks,
        "fallback counts differ"
    );
    compiled
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v)).collect()
}
