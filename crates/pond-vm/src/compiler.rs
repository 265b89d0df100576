use std::rc::Rc;

use pond_core::{
    intern, Chunk, Diagnostic, Diagnostics, ErrorLocation, Function, Op, PondError, Spur, Value,
};

use crate::scanner::{Scanner, Token, TokenKind, MAX_LINES};

/// Locals per function, including the reserved callee slot. A slot index must
/// fit in one byte.
const MAX_LOCALS: usize = 256;
/// Captured variables per function; the count is carried in a single byte.
const MAX_UPVALUES: usize = 255;
/// Ceiling on bytecode per chunk. Jumps are relative, so code may exceed a
/// single jump's 16-bit span; past this point the chunk is abandoned with a
/// fatal error.
const MAX_CODE: usize = 1 << 20;

/// Compile a source buffer into the top-level script function.
///
/// Diagnostics accumulate across panic-mode resyncs; the result is an error
/// iff at least one was recorded.
pub fn compile(source: &str) -> Result<Function, PondError> {
    let mut compiler = Compiler::new(source);
    compiler.envs.push(Environment::new(intern("<script>"), EnvKind::Script));

    compiler.advance();
    while !compiler.matches(TokenKind::End) {
        compiler.declaration(false);
        if compiler.had_fatal_error {
            break;
        }
    }

    let (function, _) = compiler.end_environment();
    if compiler.had_error {
        Err(PondError::Compile(Diagnostics(compiler.diagnostics)))
    } else {
        Ok(function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvKind {
    Script,
    Function,
}

#[derive(Debug)]
struct Local<'src> {
    name: &'src str,
    depth: usize,
    /// False between declaration and the end of the initialiser, so that
    /// `var a = a;` is rejected at compile time.
    is_defined: bool,
    is_const: bool,
}

#[derive(Debug, Clone, Copy)]
struct UpvalueRecord {
    index: u8,
    is_local: bool,
    is_const: bool,
}

/// Compile-time bookkeeping for one function being compiled. Environments
/// stack up as `fn` declarations nest; the enclosing environment is the
/// previous entry in the compiler's `envs` vector.
struct Environment<'src> {
    kind: EnvKind,
    name: Spur,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    scope_depth: usize,
    upvalues: Vec<UpvalueRecord>,
}

impl<'src> Environment<'src> {
    fn new(name: Spur, kind: EnvKind) -> Self {
        // Slot 0 is reserved: at runtime it holds the callee.
        let locals = vec![Local {
            name: "",
            depth: 0,
            is_defined: true,
            is_const: false,
        }];
        Environment {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals,
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// The next-higher level; parsing a binary RHS one level up makes the
    /// operator left-associative.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src>, bool);

struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

/// The fixed Pratt dispatch table: each token kind maps to at most one prefix
/// handler and one infix handler with its infix precedence.
fn rule_for<'src>(kind: TokenKind) -> ParseRule<'src> {
    use TokenKind::*;

    fn rule<'src>(
        prefix: Option<ParseFn<'src>>,
        infix: Option<ParseFn<'src>>,
        precedence: Precedence,
    ) -> ParseRule<'src> {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    match kind {
        LeftParen => rule(Some(grouping), Some(call), Precedence::Call),
        LeftBrace => rule(Some(expression_block), None, Precedence::None),
        LeftBracket => rule(Some(list), Some(index), Precedence::Call),
        Minus => rule(Some(unary), Some(binary), Precedence::Term),
        Plus => rule(None, Some(binary), Precedence::Term),
        Slash => rule(None, Some(binary), Precedence::Factor),
        Star => rule(None, Some(binary), Precedence::Factor),
        Bang => rule(Some(unary), None, Precedence::None),
        BangEqual => rule(None, Some(binary), Precedence::Equality),
        EqualEqual => rule(None, Some(binary), Precedence::Equality),
        Greater => rule(None, Some(binary), Precedence::Comparison),
        GreaterEqual => rule(None, Some(binary), Precedence::Comparison),
        Less => rule(None, Some(binary), Precedence::Comparison),
        LessEqual => rule(None, Some(binary), Precedence::Comparison),
        Identifier => rule(Some(variable), None, Precedence::None),
        Str => rule(Some(string), None, Precedence::None),
        Number => rule(Some(number), None, Precedence::None),
        And => rule(None, Some(and_operator), Precedence::And),
        Or => rule(None, Some(or_operator), Precedence::Or),
        Nil | True | False => rule(Some(constant), None, Precedence::None),
        Fn => rule(Some(anonymous_function), None, Precedence::None),
        If => rule(Some(if_expression), None, Precedence::None),
        Print => rule(Some(print_builtin), None, Precedence::None),
        Type => rule(Some(type_builtin), None, Precedence::None),
        TypeBool | TypeFloat | TypeObject | TypeString | TypeTypeId => {
            rule(Some(type_keyword), None, Precedence::None)
        }
        _ => rule(None, None, Precedence::None),
    }
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    envs: Vec<Environment<'src>>,
    diagnostics: Vec<Diagnostic>,
    panic_mode: bool,
    had_error: bool,
    had_fatal_error: bool,
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str) -> Self {
        let placeholder = Token {
            kind: TokenKind::End,
            lexeme: "",
            line: 1,
        };
        Compiler {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            envs: Vec::new(),
            diagnostics: Vec::new(),
            panic_mode: false,
            had_error: false,
            had_fatal_error: false,
        }
    }

    // ── Token plumbing ────────────────────────────────────────────

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.line == MAX_LINES {
                self.fatal_error("Too many lines in script");
                // pretend this is the end of the script
                self.current.kind = TokenKind::End;
                return;
            }
            if self.current.kind == TokenKind::Error {
                // report, then keep scanning for a usable token
                let message = self.current.lexeme;
                self.error_at_current(message);
            } else {
                return;
            }
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // ── Diagnostics ───────────────────────────────────────────────

    fn error_at(&mut self, token: Token<'src>, message: impl Into<String>) {
        // suppress the cascade after the first error until resync
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let location = match token.kind {
            TokenKind::End => ErrorLocation::AtEnd,
            TokenKind::Error => ErrorLocation::Bare,
            _ => ErrorLocation::Lexeme(token.lexeme.to_string()),
        };
        self.diagnostics.push(Diagnostic {
            line: token.line,
            location,
            message: message.into(),
        });
    }

    fn error_at_current(&mut self, message: impl Into<String>) {
        self.error_at(self.current, message);
    }

    fn error_at_previous(&mut self, message: impl Into<String>) {
        self.error_at(self.previous, message);
    }

    fn fatal_error(&mut self, message: impl Into<String>) {
        self.had_fatal_error = true;
        self.error_at(self.current, message);
    }

    fn synchronise(&mut self) {
        // don't stop panicking if we have had a fatal error
        if self.had_fatal_error {
            return;
        }

        self.panic_mode = false;
        while self.current.kind != TokenKind::End {
            // the previous token looking like the end of a statement, or the
            // current one starting a new declaration, is a good sync point
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Const
                | TokenKind::Fn
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ── Emission ──────────────────────────────────────────────────

    fn code_len(&self) -> usize {
        self.envs.last().expect("environment").chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        self.emit_byte_at_line(byte, self.previous.line);
    }

    fn emit_byte_at_line(&mut self, byte: u8, line: u16) {
        if self.code_len() >= MAX_CODE {
            let message = if self.envs.last().expect("environment").kind == EnvKind::Function {
                "Too much code in function."
            } else {
                "Too much code in top level of script."
            };
            self.fatal_error(message);
            return;
        }
        self.envs
            .last_mut()
            .expect("environment")
            .chunk
            .write(byte, line);
    }

    fn emit_op(&mut self, op: Op) {
        self.emit_byte(op as u8);
    }

    fn emit_op_byte(&mut self, op: Op, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_return(&mut self) {
        self.emit_op(Op::Nil); // implicit return value
        self.emit_op(Op::Return);
    }

    fn make_literal(&mut self, value: Value) -> u8 {
        match self
            .envs
            .last_mut()
            .expect("environment")
            .chunk
            .add_literal(value)
        {
            Some(index) => index,
            None => {
                self.error_at_previous("Too many literals in one chunk.");
                0
            }
        }
    }

    fn emit_literal(&mut self, value: Value) {
        let index = self.make_literal(value);
        self.emit_op_byte(Op::Literal, index);
    }

    fn identifier_literal(&mut self, name: &str) -> u8 {
        self.make_literal(Value::Str(intern(name)))
    }

    /// Emit a jump with a placeholder offset, returning the patch site.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_op(op);
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        self.code_len() - 2
    }

    /// Point the placeholder at `patch_site` to the current position.
    fn patch_jump(&mut self, patch_site: usize) {
        // -2 to step over the offset bytes themselves
        let jump = self.code_len() - patch_site - 2;
        if jump > u16::MAX as usize {
            self.error_at_previous("Too much code to jump over.");
        }
        let bytes = (jump as u16).to_be_bytes();
        let code = &mut self.envs.last_mut().expect("environment").chunk.code;
        code[patch_site] = bytes[0];
        code[patch_site + 1] = bytes[1];
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Op::Loop);
        let offset = self.code_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error_at_previous("Loop body is too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    // ── Environments & scopes ─────────────────────────────────────

    fn scope_depth(&self) -> usize {
        self.envs.last().expect("environment").scope_depth
    }

    fn begin_scope(&mut self) {
        self.envs.last_mut().expect("environment").scope_depth += 1;
    }

    /// Close the current scope, dropping its locals from the runtime stack.
    /// When the scope produced an expression value, that value sits above the
    /// dying locals: park it in the first freed slot before popping so the
    /// block's net stack effect is +1.
    fn end_scope(&mut self, is_expression: bool) {
        let env = self.envs.last_mut().expect("environment");
        env.scope_depth -= 1;
        let mut freed: u8 = 0;
        while let Some(local) = env.locals.last() {
            if local.depth <= env.scope_depth {
                break;
            }
            env.locals.pop();
            freed += 1;
        }
        let first_freed_slot = env.locals.len() as u8;
        if freed > 0 {
            if is_expression {
                self.emit_op_byte(Op::SetLocal, first_freed_slot);
            }
            self.emit_op_byte(Op::PopN, freed);
        }
    }

    /// Finish the current environment: emit the implicit `nil` return and
    /// package the compiled function with its capture records.
    fn end_environment(&mut self) -> (Function, Vec<UpvalueRecord>) {
        self.emit_return();
        let env = self.envs.pop().expect("environment");
        let function = Function {
            name: env.name,
            arity: env.arity,
            upvalue_count: env.upvalues.len() as u8,
            chunk: env.chunk,
        };
        (function, env.upvalues)
    }

    // ── Variables ─────────────────────────────────────────────────

    fn parse_variable(&mut self, message: &str, is_const: bool, is_local: bool) -> u8 {
        self.consume(TokenKind::Identifier, message);
        if is_local {
            // locals live in stack slots
            self.declare_local(is_const);
            0
        } else {
            // global names are interned into the literal pool
            self.identifier_literal(self.previous.lexeme)
        }
    }

    fn declare_local(&mut self, is_const: bool) {
        let name = self.previous.lexeme;

        // reject a duplicate name in the same scope (shadowing an outer scope
        // is fine)
        let env = self.envs.last().expect("environment");
        let duplicate = env
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth >= env.scope_depth)
            .any(|local| local.name == name);
        if duplicate {
            self.error_at_previous(format!("Already a variable called '{name}' in this scope."));
        }

        if self.envs.last().expect("environment").locals.len() == MAX_LOCALS {
            self.error_at_previous("Too many local variables in function.");
            return;
        }
        let env = self.envs.last_mut().expect("environment");
        env.locals.push(Local {
            name,
            depth: env.scope_depth,
            is_defined: false,
            is_const,
        });
    }

    /// Mark the newest local as initialised.
    fn define_local(&mut self) {
        let env = self.envs.last_mut().expect("environment");
        env.locals.last_mut().expect("local").is_defined = true;
    }

    fn define_variable(&mut self, global: u8, is_const: bool, is_local: bool) {
        if is_local {
            self.define_local();
        } else if is_const {
            self.emit_op_byte(Op::DefineGlobalConst, global);
        } else {
            self.emit_op_byte(Op::DefineGlobalVar, global);
        }
    }

    /// Find `name` among the environment's locals, newest first so shadowing
    /// resolves to the innermost binding. Returns the slot and constness.
    fn resolve_local(&mut self, env_index: usize, name: &str) -> Option<(u8, bool)> {
        let found = self.envs[env_index]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot as u8, local.is_const, local.is_defined));
        match found {
            Some((slot, is_const, is_defined)) => {
                if !is_defined {
                    // e.g. var a = a;
                    self.error_at_previous("Local variable referenced before definition.");
                }
                Some((slot, is_const))
            }
            None => None,
        }
    }

    /// Find `name` in an enclosing environment, recording capture metadata in
    /// every environment the reference passes through. Returns the upvalue
    /// index in `env_index`'s environment.
    fn resolve_upvalue(&mut self, env_index: usize, name: &str) -> Option<(u8, bool)> {
        if env_index == 0 {
            return None;
        }
        let parent = env_index - 1;

        if let Some((slot, is_const)) = self.resolve_local(parent, name) {
            let index = self.add_upvalue(env_index, slot, true, is_const);
            return Some((index, is_const));
        }
        if let Some((upvalue, is_const)) = self.resolve_upvalue(parent, name) {
            let index = self.add_upvalue(env_index, upvalue, false, is_const);
            return Some((index, is_const));
        }
        None
    }

    fn add_upvalue(&mut self, env_index: usize, index: u8, is_local: bool, is_const: bool) -> u8 {
        // deduplicate: a capture of the same slot reuses its record
        for (i, upvalue) in self.envs[env_index].upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i as u8;
            }
        }

        if self.envs[env_index].upvalues.len() == MAX_UPVALUES {
            self.error_at_previous("Too many closure variables in function.");
            return 0;
        }
        self.envs[env_index].upvalues.push(UpvalueRecord {
            index,
            is_local,
            is_const,
        });
        (self.envs[env_index].upvalues.len() - 1) as u8
    }

    fn named_variable(&mut self, name_token: Token<'src>, can_assign: bool) {
        let env_index = self.envs.len() - 1;
        let name = name_token.lexeme;

        let (get_op, set_op, arg, is_const) =
            if let Some((slot, is_const)) = self.resolve_local(env_index, name) {
                (Op::GetLocal, Op::SetLocal, slot, is_const)
            } else if let Some((index, is_const)) = self.resolve_upvalue(env_index, name) {
                (Op::GetUpvalue, Op::SetUpvalue, index, is_const)
            } else {
                // assume global; constness is enforced at runtime
                let arg = self.identifier_literal(name);
                (Op::GetGlobal, Op::SetGlobal, arg, false)
            };

        if can_assign && self.matches(TokenKind::Equal) {
            if is_const {
                self.error_at_previous("Cannot redefine a const variable.");
            }
            self.expression();
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    // ── Declarations & statements ─────────────────────────────────

    /// Parse one declaration or statement. Returns whether it was a trailing
    /// block expression (value left on the stack).
    fn declaration(&mut self, can_be_expression: bool) -> bool {
        let is_expression = if self.matches(TokenKind::Var) {
            self.var_declaration(false);
            false
        } else if self.matches(TokenKind::Const) {
            self.var_declaration(true);
            false
        } else if self.matches(TokenKind::Fn) {
            self.fn_declaration();
            false
        } else {
            self.statement(can_be_expression)
        };

        // the end of a statement is a good place to re-sync a panicking parser
        if self.panic_mode && !is_expression {
            self.synchronise();
        }

        is_expression
    }

    fn var_declaration(&mut self, is_const: bool) {
        let is_local = self.scope_depth() > 0;
        let global = self.parse_variable("Expected variable name.", is_const, is_local);

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(Op::Nil); // default value
        }
        self.consume(TokenKind::Semicolon, "Expected ';' after var declaration.");

        self.define_variable(global, is_const, is_local);
    }

    fn fn_declaration(&mut self) {
        let is_local = self.scope_depth() > 0;
        let is_const = true; // functions may not be reassigned

        let global = self.parse_variable("Expected variable name.", is_const, is_local);
        let name = intern(self.previous.lexeme);

        // define the local before compiling the body so the function can
        // call itself; globals are defined after the value exists anyway
        if is_local {
            self.define_local();
        }

        self.function(name, EnvKind::Function);
        self.define_variable(global, is_const, is_local);
    }

    fn function(&mut self, name: Spur, kind: EnvKind) {
        self.envs.push(Environment::new(name, kind));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expected '(' for function.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.envs.last().expect("environment").arity == u8::MAX {
                    self.error_at_current("Can't have over 255 parameters.");
                } else {
                    self.envs.last_mut().expect("environment").arity += 1;
                }
                self.parse_variable("Expected parameter name.", false, true);
                self.define_variable(0, false, true);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expected '{' before function body.");

        let is_expression = self.block(true);
        if is_expression {
            // a trailing expression is the function's return value
            self.emit_op(Op::Return);
        }
        // no POP_N on the way out: RETURN tears the whole frame down

        let (function, upvalues) = self.end_environment();
        let literal = self.make_literal(Value::Function(Rc::new(function)));
        self.emit_op_byte(Op::Closure, literal);

        // capture metadata, consumed by the CLOSURE instruction at runtime
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn statement(&mut self, can_be_expression: bool) -> bool {
        if self.matches(TokenKind::If) {
            return self.if_then(can_be_expression);
        } else if self.matches(TokenKind::While) {
            self.while_statement();
            return false;
        } else if self.matches(TokenKind::LeftBrace) {
            return self.nested_block(can_be_expression);
        } else if self.matches(TokenKind::Return) {
            if self.envs.last().expect("environment").kind == EnvKind::Script {
                self.error_at_previous("Can't return from top-level.");
            }
            if self.check(TokenKind::Semicolon) {
                self.emit_return();
            } else {
                self.expression();
                self.emit_op(Op::Return);
            }
        } else {
            self.expression();
        }

        // what comes next depends on the context of the expression-statement
        if !can_be_expression {
            self.consume(TokenKind::Semicolon, "Expected ';' after statement.");
            self.emit_op(Op::Pop); // discard the result
            false
        } else if self.matches(TokenKind::Semicolon) {
            self.emit_op(Op::Pop);
            false
        } else if self.check(TokenKind::RightBrace) {
            // the end of an expression block: leave the value on the stack
            true
        } else {
            self.error_at_current("Expected ';' or '}'.");
            false
        }
    }

    fn if_then(&mut self, can_be_expression: bool) -> bool {
        self.expression();
        let mut jump_over = self.emit_jump(Op::JumpIfFalsePop);
        self.consume(TokenKind::LeftBrace, "Expected '{' after condition.");
        let is_expression = self.nested_block(can_be_expression);

        // every completed branch jumps to the final rendezvous
        let mut jumps_to_end = Vec::new();

        while self.matches(TokenKind::Elif) {
            jumps_to_end.push(self.emit_jump(Op::Jump));
            self.patch_jump(jump_over);
            self.expression();
            jump_over = self.emit_jump(Op::JumpIfFalsePop);
            self.consume(TokenKind::LeftBrace, "Expected '{' after 'elif'.");
            if self.nested_block(can_be_expression) != is_expression {
                self.error_at_previous("Inconsistent if-statement/if-expression.");
            }
        }

        if self.matches(TokenKind::Else) {
            jumps_to_end.push(self.emit_jump(Op::Jump));
            self.patch_jump(jump_over);
            self.consume(TokenKind::LeftBrace, "Expected '{' after 'else'.");
            if self.nested_block(can_be_expression) != is_expression {
                self.error_at_previous("Inconsistent if-statement/if-expression.");
            }
        } else {
            self.patch_jump(jump_over);
            if is_expression {
                // an if-expression without else could produce no value
                self.error_at_previous("Expected 'else' on if expression.");
            }
        }

        for jump in jumps_to_end {
            self.patch_jump(jump);
        }

        is_expression
    }

    fn while_statement(&mut self) {
        let loop_start = self.code_len();
        self.expression();
        let exit_jump = self.emit_jump(Op::JumpIfFalsePop);
        self.consume(TokenKind::LeftBrace, "Expected '{' after condition.");
        self.nested_block(false);
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
    }

    fn block(&mut self, can_be_expression: bool) -> bool {
        let mut is_expression = false;
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::End) {
            if is_expression {
                self.error_at_previous("Expression only allowed at end of block.");
            }
            is_expression = self.declaration(can_be_expression);
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after block.");
        is_expression
    }

    fn nested_block(&mut self, can_be_expression: bool) -> bool {
        self.begin_scope();
        let is_expression = self.block(can_be_expression);
        self.end_scope(is_expression);
        is_expression
    }

    // ── Expressions ───────────────────────────────────────────────

    fn expression(&mut self) {
        self.parse(Precedence::Assignment);
    }

    fn parse(&mut self, min_precedence: Precedence) {
        self.advance();

        let Some(prefix) = rule_for(self.previous.kind).prefix else {
            self.error_at_previous("Expected expression");
            return;
        };
        // only a whole assignment target may be followed by `=`
        let can_assign = min_precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while rule_for(self.current.kind).precedence >= min_precedence {
            self.advance();
            if let Some(infix) = rule_for(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error_at_previous("Invalid assignment target.");
        }
    }
}

// ── Parse handlers (the table's function entries) ─────────────────

fn grouping(c: &mut Compiler<'_>, _can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightParen, "Expected ')' after expression");
}

fn call(c: &mut Compiler<'_>, _can_assign: bool) {
    let mut argc: u8 = 0;
    if !c.check(TokenKind::RightParen) {
        loop {
            c.expression();
            if argc == u8::MAX {
                c.error_at_previous("Can't have more than 255 arguments.");
            } else {
                argc += 1;
            }
            if !c.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightParen, "Expected ')' after arguments.");
    c.emit_op_byte(Op::Call, argc);
}

fn list(c: &mut Compiler<'_>, _can_assign: bool) {
    let mut entries: u8 = 0;
    if !c.check(TokenKind::RightBracket) {
        loop {
            c.expression();
            if entries == u8::MAX {
                c.error_at_previous("Can't have more than 255 elements in list initialiser.");
            } else {
                entries += 1;
            }
            if !c.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    c.consume(TokenKind::RightBracket, "Expected ']' after list elements.");
    c.emit_op_byte(Op::MakeList, entries);
}

fn index(c: &mut Compiler<'_>, _can_assign: bool) {
    c.expression();
    c.consume(TokenKind::RightBracket, "Expected ']' after index.");
    c.emit_op(Op::IndexGet);
}

fn unary(c: &mut Compiler<'_>, _can_assign: bool) {
    let operator = c.previous.kind;
    let line = c.previous.line;

    // compile the operand first
    c.parse(Precedence::Unary);

    match operator {
        TokenKind::Bang => c.emit_byte_at_line(Op::Not as u8, line),
        TokenKind::Minus => c.emit_byte_at_line(Op::Negate as u8, line),
        _ => {}
    }
}

fn binary(c: &mut Compiler<'_>, _can_assign: bool) {
    // the first operand is compiled and will end up on the stack first
    let operator = c.previous.kind;
    let precedence = rule_for(operator).precedence;

    // one level up makes the operator left-associative
    c.parse(precedence.next());

    match operator {
        TokenKind::BangEqual => c.emit_op(Op::NotEqual),
        TokenKind::EqualEqual => c.emit_op(Op::Equal),
        TokenKind::Greater => c.emit_op(Op::Greater),
        TokenKind::GreaterEqual => c.emit_op(Op::GreaterEqual),
        TokenKind::Less => c.emit_op(Op::Less),
        TokenKind::LessEqual => c.emit_op(Op::LessEqual),
        TokenKind::Plus => c.emit_op(Op::Add),
        TokenKind::Minus => c.emit_op(Op::Subtract),
        TokenKind::Star => c.emit_op(Op::Multiply),
        TokenKind::Slash => c.emit_op(Op::Divide),
        _ => {}
    }
}

fn number(c: &mut Compiler<'_>, _can_assign: bool) {
    let value: f64 = c
        .previous
        .lexeme
        .parse()
        .expect("scanner-validated number lexeme");
    c.emit_literal(Value::Number(value));
}

fn string(c: &mut Compiler<'_>, _can_assign: bool) {
    // strip the surrounding quotes
    let lexeme = c.previous.lexeme;
    let contents = &lexeme[1..lexeme.len() - 1];
    c.emit_literal(Value::Str(intern(contents)));
}

fn constant(c: &mut Compiler<'_>, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::Nil => c.emit_op(Op::Nil),
        TokenKind::True => c.emit_op(Op::True),
        TokenKind::False => c.emit_op(Op::False),
        _ => {}
    }
}

fn type_keyword(c: &mut Compiler<'_>, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::TypeBool => c.emit_op(Op::TypeBool),
        TokenKind::TypeFloat => c.emit_op(Op::TypeFloat),
        TokenKind::TypeObject => c.emit_op(Op::TypeObject),
        TokenKind::TypeString => c.emit_op(Op::TypeString),
        TokenKind::TypeTypeId => c.emit_op(Op::TypeTypeId),
        _ => {}
    }
}

fn variable(c: &mut Compiler<'_>, can_assign: bool) {
    c.named_variable(c.previous, can_assign);
}

fn and_operator(c: &mut Compiler<'_>, _can_assign: bool) {
    // if the compiled LHS is falsy, short-circuit over the RHS
    let jump_over_rhs = c.emit_jump(Op::JumpIfFalse);
    c.emit_op(Op::Pop);
    c.parse(Precedence::And);
    c.patch_jump(jump_over_rhs);
}

fn or_operator(c: &mut Compiler<'_>, _can_assign: bool) {
    // if the compiled LHS is truthy, short-circuit over the RHS
    let jump_over_rhs = c.emit_jump(Op::JumpIfTrue);
    c.emit_op(Op::Pop);
    c.parse(Precedence::Or);
    c.patch_jump(jump_over_rhs);
}

fn expression_block(c: &mut Compiler<'_>, _can_assign: bool) {
    let is_expression = c.nested_block(true);
    if !is_expression {
        c.error_at_previous("Expression block must end in an expression.");
    }
}

fn if_expression(c: &mut Compiler<'_>, _can_assign: bool) {
    let is_expression = c.if_then(true);
    if !is_expression {
        c.error_at_previous("Expected if-expression, not if-statement.");
    }
}

fn anonymous_function(c: &mut Compiler<'_>, _can_assign: bool) {
    c.function(intern("(anon)"), EnvKind::Function);
}

fn print_builtin(c: &mut Compiler<'_>, _can_assign: bool) {
    c.consume(TokenKind::LeftParen, "Expected '(' after 'print'.");
    c.expression();
    c.consume(TokenKind::RightParen, "Expected ')' after argument.");
    c.emit_op(Op::Print);
    // as an expression, print evaluates to nil
    c.emit_op(Op::Nil);
}

fn type_builtin(c: &mut Compiler<'_>, _can_assign: bool) {
    c.consume(TokenKind::LeftParen, "Expected '(' after 'type'.");
    c.expression();
    c.consume(TokenKind::RightParen, "Expected ')' after argument.");
    c.emit_op(Op::TypeOf);
}
