use std::io::{self, Write};
use std::rc::Rc;

use hashbrown::HashMap;

use pond_core::{
    intern, op, resolve, Closure, PondError, Spur, TypeTag, UpvalueCell, Value,
};

use crate::compiler;
use crate::disasm;

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

#[derive(Debug)]
struct Global {
    value: Value,
    mutable: bool,
}

/// A call frame: the executing closure, its instruction pointer, and the
/// stack slot holding the callee (slot 0; argument k lives at slot k).
struct CallFrame {
    closure: Rc<Closure>,
    ip: usize,
    base: usize,
    /// Cells for locals captured by closures created in this frame, keyed by
    /// slot. Shared so every capture of one local observes the same value.
    open_cells: Vec<(u8, Rc<UpvalueCell>)>,
}

impl CallFrame {
    fn open_cell(&self, slot: u8) -> Option<&Rc<UpvalueCell>> {
        self.open_cells
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, cell)| cell)
    }
}

/// The bytecode virtual machine. Owns the value stack, the call stack and
/// the globals table; globals survive across `interpret` calls so a REPL can
/// build state line by line.
pub struct VM {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<Spur, Global>,
    out: Box<dyn Write>,
    /// Print each instruction and the stack to stderr while executing.
    pub trace: bool,
    /// Dump compiled bytecode to stderr before executing.
    pub disassemble: bool,
}

impl VM {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// A VM whose `print` output goes to the given sink instead of stdout.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        VM {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: HashMap::new(),
            out,
            trace: false,
            disassemble: false,
        }
    }

    /// Compile and execute a source buffer.
    pub fn interpret(&mut self, source: &str) -> Result<(), PondError> {
        let function = compiler::compile(source)?;
        if self.disassemble {
            eprint!("{}", disasm::disassemble(&function.chunk, &resolve(function.name)));
        }

        let closure = Rc::new(Closure {
            func: Rc::new(function),
            upvalues: Vec::new(),
        });
        self.stack.clear();
        self.frames.clear();
        self.stack.push(Value::Closure(closure.clone()));
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base: 0,
            open_cells: Vec::new(),
        });

        self.run()
    }

    fn run(&mut self) -> Result<(), PondError> {
        loop {
            if self.trace {
                self.trace_instruction();
            }

            let instr = self.read_byte();
            match instr {
                op::LITERAL => {
                    let value = self.read_literal();
                    self.push(value)?;
                }
                op::NIL => self.push(Value::Nil)?,
                op::TRUE => self.push(Value::Bool(true))?,
                op::FALSE => self.push(Value::Bool(false))?,
                op::POP => {
                    self.pop();
                }
                op::POP_N => {
                    let n = self.read_byte() as usize;
                    let new_len = self.stack.len().checked_sub(n).expect("stack underflow");
                    self.stack.truncate(new_len);
                }

                op::DEFINE_GLOBAL_VAR | op::DEFINE_GLOBAL_CONST => {
                    let name = self.read_string();
                    if self.globals.contains_key(&name) {
                        return Err(self.runtime_error(format!(
                            "Redeclaration of variable '{}'.",
                            resolve(name)
                        )));
                    }
                    let value = self.peek(0).clone();
                    self.globals.insert(
                        name,
                        Global {
                            value,
                            mutable: instr == op::DEFINE_GLOBAL_VAR,
                        },
                    );
                    self.pop();
                }
                op::GET_GLOBAL => {
                    let name = self.read_string();
                    let Some(global) = self.globals.get(&name) else {
                        return Err(self.runtime_error(format!(
                            "Undefined variable '{}'.",
                            resolve(name)
                        )));
                    };
                    let value = global.value.clone();
                    self.push(value)?;
                }
                op::SET_GLOBAL => {
                    let name = self.read_string();
                    // no pop: the assignment can be used in an expression
                    let value = self.peek(0).clone();
                    match self.globals.get_mut(&name) {
                        Some(global) if global.mutable => global.value = value,
                        Some(_) => {
                            return Err(self.runtime_error(format!(
                                "Cannot redefine const variable '{}'.",
                                resolve(name)
                            )));
                        }
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                resolve(name)
                            )));
                        }
                    }
                }

                op::GET_LOCAL => {
                    let slot = self.read_byte();
                    let value = {
                        let frame = self.frames.last().expect("call frame");
                        match frame.open_cell(slot) {
                            Some(cell) => cell.get(),
                            None => self.stack[frame.base + slot as usize].clone(),
                        }
                    };
                    self.push(value)?;
                }
                op::SET_LOCAL => {
                    let slot = self.read_byte();
                    let value = self.peek(0).clone();
                    let (base, cell) = {
                        let frame = self.frames.last().expect("call frame");
                        (frame.base, frame.open_cell(slot).cloned())
                    };
                    // keep the captured cell and the stack slot coherent
                    if let Some(cell) = cell {
                        cell.set(value.clone());
                    }
                    self.stack[base + slot as usize] = value;
                }

                op::GET_UPVALUE => {
                    let index = self.read_byte() as usize;
                    let value = self.frames.last().expect("call frame").closure.upvalues[index]
                        .get();
                    self.push(value)?;
                }
                op::SET_UPVALUE => {
                    let index = self.read_byte() as usize;
                    let value = self.peek(0).clone();
                    self.frames.last().expect("call frame").closure.upvalues[index].set(value);
                }

                op::EQUAL => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b))?;
                }
                op::NOT_EQUAL => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a != b))?;
                }

                op::GREATER
                | op::GREATER_EQUAL
                | op::LESS
                | op::LESS_EQUAL
                | op::SUBTRACT
                | op::MULTIPLY
                | op::DIVIDE => self.binary_op(instr)?,

                op::ADD => {
                    if self.peek(1).is_string() {
                        // string LHS: coerce the RHS to text, intern the result
                        let b = self.pop();
                        let Value::Str(a) = self.pop() else {
                            unreachable!("peeked string LHS")
                        };
                        let mut text = resolve(a);
                        text.push_str(&b.to_string());
                        self.push(Value::Str(intern(&text)))?;
                    } else if self.peek(0).is_number() && self.peek(1).is_number() {
                        let (Value::Number(b), Value::Number(a)) = (self.pop(), self.pop()) else {
                            unreachable!("peeked number operands")
                        };
                        self.push(Value::Number(a + b))?;
                    } else {
                        return Err(self.runtime_error("Invalid operands for +"));
                    }
                }

                op::NEGATE => {
                    let Value::Number(n) = self.peek(0) else {
                        return Err(self.runtime_error("Operand must be a number"));
                    };
                    let n = *n;
                    self.pop();
                    self.push(Value::Number(-n))?;
                }
                op::NOT => {
                    let value = self.pop();
                    self.push(Value::Bool(!value.is_truthy()))?;
                }

                op::PRINT => {
                    let value = self.pop();
                    let _ = writeln!(self.out, "{value}");
                }

                op::JUMP => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().expect("call frame").ip += offset;
                }
                op::LOOP => {
                    let offset = self.read_u16() as usize;
                    self.frames.last_mut().expect("call frame").ip -= offset;
                }
                op::JUMP_IF_TRUE => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_truthy() {
                        self.frames.last_mut().expect("call frame").ip += offset;
                    }
                }
                op::JUMP_IF_FALSE => {
                    let offset = self.read_u16() as usize;
                    if !self.peek(0).is_truthy() {
                        self.frames.last_mut().expect("call frame").ip += offset;
                    }
                }
                op::JUMP_IF_TRUE_POP => {
                    let offset = self.read_u16() as usize;
                    if self.pop().is_truthy() {
                        self.frames.last_mut().expect("call frame").ip += offset;
                    }
                }
                op::JUMP_IF_FALSE_POP => {
                    let offset = self.read_u16() as usize;
                    if !self.pop().is_truthy() {
                        self.frames.last_mut().expect("call frame").ip += offset;
                    }
                }

                op::CALL => {
                    let argc = self.read_byte() as usize;
                    self.call_value(argc)?;
                }
                op::RETURN => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("call frame");
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        // the script frame returned: execution is complete
                        return Ok(());
                    }
                    self.push(result)?;
                }

                op::CLOSURE => {
                    let Value::Function(func) = self.read_literal() else {
                        unreachable!("CLOSURE operand is a function literal")
                    };
                    let count = func.upvalue_count as usize;
                    let mut upvalues = Vec::with_capacity(count);
                    for _ in 0..count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte();
                        if is_local {
                            // capture a slot of the currently executing frame
                            upvalues.push(self.capture_local(index));
                        } else {
                            // re-capture from the enclosing closure
                            let cell = self.frames.last().expect("call frame").closure.upvalues
                                [index as usize]
                                .clone();
                            upvalues.push(cell);
                        }
                    }
                    self.push(Value::Closure(Rc::new(Closure { func, upvalues })))?;
                }

                op::MAKE_LIST => {
                    let n = self.read_byte() as usize;
                    let start = self.stack.len() - n;
                    let items: Vec<Value> = self.stack.drain(start..).collect();
                    self.push(Value::List(Rc::new(items)))?;
                }
                op::INDEX_GET => {
                    let index = self.pop();
                    let target = self.pop();
                    let Value::List(items) = target else {
                        return Err(self.runtime_error("Can only index lists."));
                    };
                    let Value::Number(n) = index else {
                        return Err(self.runtime_error("List index must be a number."));
                    };
                    if n.fract() != 0.0 || n < 0.0 || n >= items.len() as f64 {
                        return Err(self.runtime_error("List index out of range."));
                    }
                    self.push(items[n as usize].clone())?;
                }

                op::TYPE_OF => {
                    let value = self.pop();
                    self.push(Value::Type(value.type_tag()))?;
                }
                op::TYPE_BOOL => self.push(Value::Type(TypeTag::Bool))?,
                op::TYPE_FLOAT => self.push(Value::Type(TypeTag::Float))?,
                op::TYPE_STRING => self.push(Value::Type(TypeTag::Str))?,
                op::TYPE_OBJECT => self.push(Value::Type(TypeTag::Object))?,
                op::TYPE_TYPEID => self.push(Value::Type(TypeTag::TypeId))?,

                _ => {
                    return Err(self.runtime_error(format!("Unknown opcode {instr}.")));
                }
            }
        }
    }

    // ── Stack ─────────────────────────────────────────────────────

    fn push(&mut self, value: Value) -> Result<(), PondError> {
        if self.stack.len() == STACK_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    // ── Bytecode reads (on the top frame) ─────────────────────────

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("call frame");
        let byte = frame.closure.func.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_literal(&mut self) -> Value {
        let index = self.read_byte();
        let frame = self.frames.last().expect("call frame");
        frame.closure.func.chunk.literal(index).clone()
    }

    fn read_string(&mut self) -> Spur {
        let Value::Str(name) = self.read_literal() else {
            unreachable!("name literal is an interned string")
        };
        name
    }

    // ── Calls & captures ──────────────────────────────────────────

    fn call_value(&mut self, argc: usize) -> Result<(), PondError> {
        let callee = self.peek(argc).clone();
        let Value::Closure(closure) = callee else {
            return Err(self.runtime_error("Can only call callables."));
        };

        let arity = closure.func.arity as usize;
        if argc != arity {
            return Err(
                self.runtime_error(format!("Expected {arity} arguments but got {argc}."))
            );
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }

        // slot 0 is the callee, slot k is argument k
        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base,
            open_cells: Vec::new(),
        });
        Ok(())
    }

    /// Capture a slot of the current frame by cell, creating the shared cell
    /// on first capture so sibling closures alias one location.
    fn capture_local(&mut self, slot: u8) -> Rc<UpvalueCell> {
        let frame = self.frames.last_mut().expect("call frame");
        if let Some(cell) = frame.open_cell(slot) {
            return cell.clone();
        }
        let value = self.stack[frame.base + slot as usize].clone();
        let cell = Rc::new(UpvalueCell::new(value));
        frame.open_cells.push((slot, cell.clone()));
        cell
    }

    // ── Arithmetic & comparison ───────────────────────────────────

    fn binary_op(&mut self, instr: u8) -> Result<(), PondError> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0).clone(), self.peek(1).clone())
        else {
            return Err(self.runtime_error("Operands must be numbers."));
        };
        self.pop();
        self.pop();
        let result = match instr {
            op::GREATER => Value::Bool(a > b),
            op::GREATER_EQUAL => Value::Bool(a >= b),
            op::LESS => Value::Bool(a < b),
            op::LESS_EQUAL => Value::Bool(a <= b),
            op::SUBTRACT => Value::Number(a - b),
            op::MULTIPLY => Value::Number(a * b),
            // IEEE-754: division by zero yields ±inf or NaN
            op::DIVIDE => Value::Number(a / b),
            _ => unreachable!("numeric opcode"),
        };
        self.push(result)
    }

    // ── Errors & tracing ──────────────────────────────────────────

    /// Build a runtime error attributed to the faulting instruction's source
    /// line, resetting the stacks.
    fn runtime_error(&mut self, message: impl Into<String>) -> PondError {
        let line = match self.frames.last() {
            Some(frame) => {
                let offset = frame.ip.saturating_sub(1);
                frame.closure.func.chunk.line_for(offset)
            }
            None => 0,
        };
        self.stack.clear();
        self.frames.clear();
        PondError::runtime(message, line)
    }

    fn trace_instruction(&self) {
        use std::fmt::Write as _;
        let mut stack_line = String::from("          stack:");
        for value in &self.stack {
            let _ = write!(stack_line, " [ {value} ]");
        }
        eprintln!("{stack_line}");

        let frame = self.frames.last().expect("call frame");
        let mut text = String::new();
        disasm::write_instruction(&frame.closure.func.chunk, frame.ip, None, &mut text);
        eprint!("{text}");
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// An output sink the test can read back after the VM is done with it.
    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(source: &str) -> Result<String, PondError> {
        let buf = SharedBuf::default();
        let mut vm = VM::with_output(Box::new(buf.clone()));
        vm.interpret(source)?;
        let bytes = buf.0.borrow().clone();
        Ok(String::from_utf8(bytes).unwrap())
    }

    fn run_output(source: &str) -> String {
        run(source).unwrap_or_else(|e| panic!("VM failed for {source:?}: {e}"))
    }

    fn run_error(source: &str) -> PondError {
        run(source).expect_err(&format!("expected runtime error for: {source}"))
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(run_output("print(1+2*3);"), "7\n");
        assert_eq!(run_output("print((1+2)*3);"), "9\n");
        assert_eq!(run_output("print(10/4);"), "2.5\n");
        assert_eq!(run_output("print(-(1+2));"), "-3\n");
    }

    #[test]
    fn test_comparison_and_equality() {
        assert_eq!(run_output("print(1 < 2);"), "true\n");
        assert_eq!(run_output("print(2 <= 1);"), "false\n");
        assert_eq!(run_output("print(1 == 1);"), "true\n");
        assert_eq!(run_output("print(1 != 1);"), "false\n");
        assert_eq!(run_output("print(\"a\" == \"a\");"), "true\n");
        assert_eq!(run_output("print(nil == false);"), "false\n");
    }

    #[test]
    fn test_division_by_zero_is_ieee() {
        assert_eq!(run_output("print(1/0);"), "inf\n");
        assert_eq!(run_output("print(0-1/0);"), "-inf\n");
        assert_eq!(run_output("print(0/0 == 0/0);"), "false\n");
    }

    #[test]
    fn test_stack_neutral_statements() {
        let buf = SharedBuf::default();
        let mut vm = VM::with_output(Box::new(buf.clone()));
        vm.interpret("var a = 1; a = a + 1; print(a); 1 + 2;").unwrap();
        assert!(vm.stack.is_empty(), "statements must leave the stack empty");
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn test_globals_persist_across_interpret_calls() {
        let buf = SharedBuf::default();
        let mut vm = VM::with_output(Box::new(buf.clone()));
        vm.interpret("var counter = 1;").unwrap();
        vm.interpret("counter = counter + 1;").unwrap();
        vm.interpret("print(counter);").unwrap();
        assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "2\n");
    }

    #[test]
    fn test_block_scoping_and_shadowing() {
        assert_eq!(
            run_output("var a = 1; { var a = 2; print(a); } print(a);"),
            "2\n1\n"
        );
    }

    #[test]
    fn test_expression_block_value_survives_locals() {
        // the block's locals die but its value must not
        assert_eq!(run_output("var x = { var y = 20; var z = 1; y + z }; print(x);"), "21\n");
    }

    #[test]
    fn test_if_elif_else() {
        let source = "fn pick(n) { if n < 0 { return \"neg\"; } elif n == 0 { return \"zero\"; } else { return \"pos\"; } } print(pick(0-1)); print(pick(0)); print(pick(5));";
        assert_eq!(run_output(source), "neg\nzero\npos\n");
    }

    #[test]
    fn test_if_expression_value() {
        assert_eq!(run_output("var x = if false { 1 } else { 2 }; print(x);"), "2\n");
    }

    #[test]
    fn test_while_loop() {
        assert_eq!(
            run_output("var i = 0; var sum = 0; while i < 5 { i = i + 1; sum = sum + i; } print(sum);"),
            "15\n"
        );
    }

    #[test]
    fn test_short_circuit() {
        assert_eq!(run_output("print(false and undefined_x);"), "false\n");
        assert_eq!(run_output("print(true or undefined_x);"), "true\n");
        assert_eq!(run_output("print(1 and 2);"), "2\n");
        assert_eq!(run_output("print(nil or \"fallback\");"), "fallback\n");
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(
            run_output("fn add(a, b) { return a + b; } print(add(2, 3));"),
            "5\n"
        );
    }

    #[test]
    fn test_trailing_expression_is_return_value() {
        assert_eq!(run_output("fn three() { 1 + 2 } print(three());"), "3\n");
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        assert_eq!(run_output("fn noop() { 1; } print(noop());"), "nil\n");
    }

    #[test]
    fn test_recursion() {
        assert_eq!(
            run_output("fn fib(n) { if n < 2 { return n; } return fib(n-1) + fib(n-2); } print(fib(10));"),
            "55\n"
        );
    }

    #[test]
    fn test_closure_counter() {
        let source = "fn make() { var x = 0; fn inc() { x = x + 1; return x; } return inc; } const f = make(); print(f()); print(f()); print(f());";
        assert_eq!(run_output(source), "1\n2\n3\n");
    }

    #[test]
    fn test_sibling_closures_share_a_variable() {
        let source = "fn make() { var x = 0; fn set(v) { x = v; } fn get() { return x; } return [set, get]; } const pair = make(); pair[0](41); print(pair[1]());";
        assert_eq!(run_output(source), "41\n");
    }

    #[test]
    fn test_closure_observes_writes_while_local_lives() {
        let source = "fn make() { var x = 1; fn get() { return x; } x = 9; return get; } print(make()());";
        assert_eq!(run_output(source), "9\n");
    }

    #[test]
    fn test_independent_closures_from_separate_calls() {
        let source = "fn make() { var x = 0; fn inc() { x = x + 1; return x; } return inc; } const a = make(); const b = make(); print(a()); print(a()); print(b());";
        assert_eq!(run_output(source), "1\n2\n1\n");
    }

    #[test]
    fn test_string_concatenation_coerces_rhs() {
        assert_eq!(run_output("const s = \"ab\"; print(s + 1);"), "ab1\n");
        assert_eq!(run_output("print(\"v=\" + true);"), "v=true\n");
        assert_eq!(run_output("print(\"n: \" + nil);"), "n: nil\n");
        assert_eq!(run_output("print(\"a\" + \"b\" + \"c\");"), "abc\n");
    }

    #[test]
    fn test_concatenation_result_is_interned() {
        assert_eq!(run_output("print(\"ab\" + \"c\" == \"a\" + \"bc\");"), "true\n");
    }

    #[test]
    fn test_lists() {
        assert_eq!(run_output("var l = [1, 2, 3]; print(l[0] + l[2]);"), "4\n");
        assert_eq!(run_output("print([\"x\", [1, 2]][1][0]);"), "1\n");
        assert_eq!(run_output("print([1, \"two\", nil]);"), "[1, two, nil]\n");
    }

    #[test]
    fn test_list_index_errors() {
        let e = run_error("var l = [1]; l[1];");
        assert!(e.to_string().contains("List index out of range."));
        let e = run_error("var l = [1]; l[\"0\"];");
        assert!(e.to_string().contains("List index must be a number."));
        let e = run_error("1[0];");
        assert!(e.to_string().contains("Can only index lists."));
    }

    #[test]
    fn test_type_reflection() {
        assert_eq!(run_output("print(type(1));"), "float\n");
        assert_eq!(run_output("print(type(\"s\"));"), "string\n");
        assert_eq!(run_output("print(type(true));"), "bool\n");
        assert_eq!(run_output("print(type(nil));"), "nil\n");
        assert_eq!(run_output("print(type([1]));"), "object\n");
        assert_eq!(run_output("fn f() {} print(type(f));"), "object\n");
        assert_eq!(run_output("print(type(1) == float);"), "true\n");
        assert_eq!(run_output("print(type(type(1)));"), "typeid\n");
        assert_eq!(run_output("print(type(1) == type(2.5));"), "true\n");
        assert_eq!(run_output("print(bool == float);"), "false\n");
    }

    #[test]
    fn test_undefined_global() {
        let e = run_error("print(undefined_x);");
        let text = e.to_string();
        assert!(text.contains("Undefined variable 'undefined_x'."));
        assert!(text.contains("[line 1] in script"));
    }

    #[test]
    fn test_runtime_error_line_attribution() {
        let e = run_error("var a = 1;\nvar b = 2;\na + \"\";\n");
        assert!(e.to_string().contains("[line 3] in script"), "got: {e}");
    }

    #[test]
    fn test_set_undefined_global() {
        let e = run_error("x = 1;");
        assert!(e.to_string().contains("Undefined variable 'x'."));
    }

    #[test]
    fn test_global_redeclaration_forbidden() {
        let e = run_error("var x = 1; var x = 2;");
        assert!(e.to_string().contains("Redeclaration of variable 'x'."));
        let e = run_error("const x = 1; var x = 2;");
        assert!(e.to_string().contains("Redeclaration of variable 'x'."));
    }

    #[test]
    fn test_const_global_assignment_fails_at_runtime() {
        let e = run_error("const x = 1; x = 2;");
        assert!(e.to_string().contains("Cannot redefine const variable 'x'."));
    }

    #[test]
    fn test_operand_type_errors() {
        let e = run_error("1 < \"a\";");
        assert!(e.to_string().contains("Operands must be numbers."));
        let e = run_error("-nil;");
        assert!(e.to_string().contains("Operand must be a number"));
        let e = run_error("1 + \"a\";");
        assert!(e.to_string().contains("Invalid operands for +"));
    }

    #[test]
    fn test_call_errors() {
        let e = run_error("var x = 1; x();");
        assert!(e.to_string().contains("Can only call callables."));
        let e = run_error("fn f(a) {} f();");
        assert!(e.to_string().contains("Expected 1 arguments but got 0."));
    }

    #[test]
    fn test_deep_recursion_overflows_frames() {
        let e = run_error("fn loop_() { loop_(); } loop_();");
        assert!(e.to_string().contains("Stack overflow."));
    }

    #[test]
    fn test_vm_is_reusable_after_error() {
        let buf = SharedBuf::default();
        let mut vm = VM::with_output(Box::new(buf.clone()));
        assert!(vm.interpret("print(undefined_x);").is_err());
        assert!(vm.stack.is_empty());
        vm.interpret("print(1);").unwrap();
        assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "1\n");
    }

    #[test]
    fn test_print_is_an_expression_yielding_nil() {
        assert_eq!(run_output("print(print(1));"), "1\nnil\n");
    }

    #[test]
    fn test_negative_zero_and_not() {
        assert_eq!(run_output("print(!true);"), "false\n");
        assert_eq!(run_output("print(!nil);"), "true\n");
        assert_eq!(run_output("print(!0);"), "false\n");
    }
}
