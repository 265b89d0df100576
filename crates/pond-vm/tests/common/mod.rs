use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use pond_core::PondError;
use pond_vm::VM;

/// An output sink that can be read back after the VM is done with it.
#[derive(Clone, Default)]
pub struct CapturedOutput(Rc<RefCell<Vec<u8>>>);

impl CapturedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("utf8 output")
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A VM writing into a captured buffer.
pub fn test_vm() -> (VM, CapturedOutput) {
    let out = CapturedOutput::default();
    let vm = VM::with_output(Box::new(out.clone()));
    (vm, out)
}

/// Interpret `source`, returning its stdout.
pub fn run(source: &str) -> String {
    let (mut vm, out) = test_vm();
    vm.interpret(source)
        .unwrap_or_else(|e| panic!("interpret failed for {source:?}: {e}"));
    out.contents()
}

/// Interpret `source`, expecting it to fail.
pub fn run_err(source: &str) -> PondError {
    let (mut vm, _) = test_vm();
    vm.interpret(source)
        .expect_err(&format!("expected error for: {source}"))
}
