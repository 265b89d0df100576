use std::fmt::Write;

use pond_core::{resolve, Chunk, Op, Value};

fn read_u16(code: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([code[offset], code[offset + 1]])
}

fn op_name(op: Op) -> &'static str {
    match op {
        Op::Literal => "LITERAL",
        Op::Nil => "NIL",
        Op::True => "TRUE",
        Op::False => "FALSE",
        Op::Pop => "POP",
        Op::PopN => "POP_N",
        Op::DefineGlobalVar => "DEFINE_GLOBAL_VAR",
        Op::DefineGlobalConst => "DEFINE_GLOBAL_CONST",
        Op::GetGlobal => "GET_GLOBAL",
        Op::SetGlobal => "SET_GLOBAL",
        Op::GetLocal => "GET_LOCAL",
        Op::SetLocal => "SET_LOCAL",
        Op::GetUpvalue => "GET_UPVALUE",
        Op::SetUpvalue => "SET_UPVALUE",
        Op::Equal => "EQUAL",
        Op::NotEqual => "NOT_EQUAL",
        Op::Greater => "GREATER",
        Op::GreaterEqual => "GREATER_EQUAL",
        Op::Less => "LESS",
        Op::LessEqual => "LESS_EQUAL",
        Op::Add => "ADD",
        Op::Subtract => "SUBTRACT",
        Op::Multiply => "MULTIPLY",
        Op::Divide => "DIVIDE",
        Op::Negate => "NEGATE",
        Op::Not => "NOT",
        Op::Print => "PRINT",
        Op::Jump => "JUMP",
        Op::Loop => "LOOP",
        Op::JumpIfTrue => "JUMP_IF_TRUE",
        Op::JumpIfFalse => "JUMP_IF_FALSE",
        Op::JumpIfTruePop => "JUMP_IF_TRUE_POP",
        Op::JumpIfFalsePop => "JUMP_IF_FALSE_POP",
        Op::Call => "CALL",
        Op::Closure => "CLOSURE",
        Op::MakeList => "MAKE_LIST",
        Op::IndexGet => "INDEX_GET",
        Op::TypeOf => "TYPE",
        Op::TypeBool => "TYPE_BOOL",
        Op::TypeFloat => "TYPE_FLOAT",
        Op::TypeString => "TYPE_STRING",
        Op::TypeObject => "TYPE_OBJECT",
        Op::TypeTypeId => "TYPE_TYPEID",
        Op::Return => "RETURN",
    }
}

/// Produce a human-readable disassembly of a chunk, recursing into the
/// function literals it holds.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");

    let mut offset = 0;
    let mut previous_line = None;
    while offset < chunk.code.len() {
        let line = chunk.line_for(offset);
        offset = write_instruction(chunk, offset, previous_line, &mut out);
        previous_line = Some(line);
    }

    for value in chunk.literals() {
        if let Value::Function(func) = value {
            out.push('\n');
            out.push_str(&disassemble(&func.chunk, &resolve(func.name)));
        }
    }
    out
}

/// Render the instruction at `offset`: byte offset, source line (`|` when it
/// matches `previous_line`), mnemonic and operands. Returns the offset of the
/// next instruction.
pub fn write_instruction(
    chunk: &Chunk,
    offset: usize,
    previous_line: Option<u16>,
    out: &mut String,
) -> usize {
    let line = chunk.line_for(offset);
    if previous_line == Some(line) {
        let _ = write!(out, "{offset:04}    | ");
    } else {
        let _ = write!(out, "{offset:04} {line:4} ");
    }

    let code = &chunk.code;
    let byte = code[offset];
    let Some(op) = Op::from_u8(byte) else {
        let _ = writeln!(out, "UNKNOWN({byte:#04x})");
        return offset + 1;
    };
    let name = op_name(op);

    match op {
        Op::Literal => {
            let index = code[offset + 1];
            let value = chunk.literal(index);
            let _ = writeln!(out, "{name:<18} {index:<4} ; {value}");
            offset + 2
        }

        Op::DefineGlobalVar | Op::DefineGlobalConst | Op::GetGlobal | Op::SetGlobal => {
            let index = code[offset + 1];
            let value = chunk.literal(index);
            let _ = writeln!(out, "{name:<18} {index:<4} ; {value}");
            offset + 2
        }

        Op::PopN
        | Op::GetLocal
        | Op::SetLocal
        | Op::GetUpvalue
        | Op::SetUpvalue
        | Op::Call
        | Op::MakeList => {
            let operand = code[offset + 1];
            let _ = writeln!(out, "{name:<18} {operand}");
            offset + 2
        }

        Op::Jump | Op::JumpIfTrue | Op::JumpIfFalse | Op::JumpIfTruePop | Op::JumpIfFalsePop => {
            let jump = read_u16(code, offset + 1) as usize;
            let target = offset + 3 + jump;
            let _ = writeln!(out, "{name:<18} {jump:<4} ; -> {target:04}");
            offset + 3
        }
        Op::Loop => {
            let jump = read_u16(code, offset + 1) as usize;
            let target = offset + 3 - jump;
            let _ = writeln!(out, "{name:<18} {jump:<4} ; -> {target:04}");
            offset + 3
        }

        Op::Closure => {
            let index = code[offset + 1];
            let value = chunk.literal(index);
            let _ = writeln!(out, "{name:<18} {index:<4} ; {value}");
            let mut next = offset + 2;
            if let Value::Function(func) = value {
                for _ in 0..func.upvalue_count {
                    let is_local = code[next];
                    let slot = code[next + 1];
                    let kind = if is_local != 0 { "local" } else { "upvalue" };
                    let _ = writeln!(out, "            | {kind} {slot}");
                    next += 2;
                }
            }
            next
        }

        _ => {
            let _ = writeln!(out, "{name}");
            offset + 1
        }
    }
}
