//! The single-pass compiler: recursive descent for
//! statements, a priority-driven loop for expressions,
//! bytecode out.
//!
//! Identifier references are emitted as symbolic opcodes
//! carrying an index into the parser's identifier list.
//! When a function scope closes, every instruction emitted
//! in that scope is rewritten: names found in the scope's
//! local table become local-slot operands, everything else
//! is interned into the runtime's global table. The same
//! pass computes the maximum working-stack depth from a
//! per-opcode delta table.

use std::{mem, rc::Rc};

use tracing::debug;

use crate::{
    common::{Position, Source},
    compiler::{
        lex::{Lexeme, Lexer, Token},
        syntax::ParseError,
    },
    number::{Number, CMP_EQ, CMP_GREATER, CMP_LESS},
    vm::{
        chunk::{Aop, Chunk, Instr, Op, Quark, Shape},
        state::State,
        table::{fnv, Table},
        value::{Func, Str, Value},
    },
};

type PResult<T> = Result<T, ParseError>;

const NO_LINE: usize = usize::MAX;
const NO_LOOP: usize = usize::MAX;
const SEG_START: usize = usize::MAX - 1;

struct TaggedInstr {
    instr: Instr,
    line: usize,
}

/// A span of emitted instructions belonging to one lexical
/// scope. Nested function bodies interleave scopes, so a
/// scope may own several disjoint ranges.
struct Range {
    scope_index: usize,
    begin: usize,
    end: usize,
}

#[derive(Clone, Copy)]
enum Seg {
    If,
    Break,
    Continue,
}

struct BinProps {
    op: Op,
    a: u8,
    priority: i8,
    left_assoc: bool,
}

fn binary_props(kind: Token) -> Option<BinProps> {
    use Token::*;
    let (op, a, priority, left_assoc) = match kind {
        Tilde => (Op::Aop, Aop::Concat as u8, 10, true),

        OrOr => (Op::Aop, Aop::Or as u8, 11, true),
        AndAnd => (Op::Aop, Aop::And as u8, 12, true),

        Or => (Op::Aop, Aop::BitOr as u8, 13, true),
        Hat => (Op::Aop, Aop::BitXor as u8, 14, true),
        And => (Op::Aop, Aop::BitAnd as u8, 15, true),

        BangEq => (Op::Cmp2Way, 0, 16, true),
        EqEq => (Op::Cmp2Way, CMP_EQ, 16, true),

        GreaterEq => (Op::Cmp3Way, CMP_GREATER | CMP_EQ, 17, true),
        Greater => (Op::Cmp3Way, CMP_GREATER, 17, true),
        LessEq => (Op::Cmp3Way, CMP_LESS | CMP_EQ, 17, true),
        Less => (Op::Cmp3Way, CMP_LESS, 17, true),

        GreaterGreater => (Op::Aop, Aop::Shr as u8, 18, true),
        LessLess => (Op::Aop, Aop::Shl as u8, 18, true),

        Minus => (Op::Aop, Aop::Sub as u8, 19, true),
        Plus => (Op::Aop, Aop::Add as u8, 19, true),

        Percent => (Op::Aop, Aop::Mod as u8, 20, true),
        Slash => (Op::Aop, Aop::Div as u8, 20, true),
        SlashSlash => (Op::Aop, Aop::Idiv as u8, 20, true),
        Star => (Op::Aop, Aop::Mul as u8, 20, true),

        StarStar => (Op::Aop, Aop::Pow as u8, 21, false),

        _ => return None,
    };
    Some(BinProps {
        op,
        a,
        priority,
        left_assoc,
    })
}

fn unary_props(kind: Token) -> Option<(Op, i8)> {
    match kind {
        Token::Minus => Some((Op::Neg, 50)),
        Token::Bang => Some((Op::Not, 50)),
        Token::At => Some((Op::Len, 60)),
        _ => None,
    }
}

fn compound_assign_props(kind: Token) -> Option<Aop> {
    use Token::*;
    Some(match kind {
        AndAndEq => Aop::And,
        AndEq => Aop::BitAnd,
        HatEq => Aop::BitXor,
        GreaterGreaterEq => Aop::Shr,
        LessLessEq => Aop::Shl,
        MinusEq => Aop::Sub,
        OrOrEq => Aop::Or,
        OrEq => Aop::BitOr,
        PercentEq => Aop::Mod,
        PlusEq => Aop::Add,
        SlashEq => Aop::Div,
        SlashSlashEq => Aop::Idiv,
        StarEq => Aop::Mul,
        StarStarEq => Aop::Pow,
        TildeEq => Aop::Concat,
        _ => return None,
    })
}

fn stack_delta(op: Op) -> i64 {
    use Op::*;
    match op {
        LoadConst | LoadLocal | LoadGlobal | Function | List | Dict | LoadSymbolic => 1,
        LoadAt | ModifyLocal | ModifyGlobal | StoreLocal | StoreGlobal | Print | Return
        | JumpUnless | Aop | Cmp2Way | Cmp3Way | ModifySymbolic | StoreSymbolic => -1,
        ModifyAt | StoreAt => -3,
        Jump | Call | Neg | Not | Len => 0,
    }
}

pub struct Parser<'a> {
    lexer: Lexer,
    state: &'a mut State,
    source: Rc<Source>,
    cur: Lexeme,

    prog: Vec<TaggedInstr>,
    consts: Vec<Value>,
    shapes: Vec<Shape>,
    scopes: Vec<Table<u32>>,
    ranges: Vec<Range>,
    idents: Vec<(usize, usize)>,

    if_stack: Vec<usize>,
    break_stack: Vec<usize>,
    continue_stack: Vec<usize>,
}

/// Compiles a source into the entry function of a fresh
/// chunk.
pub fn parse(state: &mut State, source: Rc<Source>) -> Result<Rc<Func>, ParseError> {
    let mut parser = Parser {
        lexer: Lexer::new(source.clone()),
        state,
        source,
        cur: Lexeme::placeholder(),
        prog: Vec::new(),
        consts: Vec::new(),
        shapes: Vec::new(),
        scopes: Vec::new(),
        ranges: Vec::new(),
        idents: Vec::new(),
        if_stack: Vec::new(),
        break_stack: Vec::new(),
        continue_stack: Vec::new(),
    };
    parser.program()?;
    let chunk = Rc::new(parser.into_chunk());
    debug!(
        origin = %chunk.origin,
        ninstrs = chunk.code.len(),
        nshapes = chunk.shapes.len(),
        "compiled chunk"
    );
    Ok(Rc::new(Func { chunk, ip: 0 }))
}

impl<'a> Parser<'a> {
    // Error plumbing.

    fn err_at(&self, msg: &str, at: Lexeme) -> ParseError {
        ParseError {
            pos: Some(at.pos),
            len: at.len,
            message: msg.to_string(),
            need_more: at.kind == Token::Eof,
        }
    }

    fn err_precise(&self, msg: &str, pos: Position, len: usize) -> ParseError {
        ParseError {
            pos: Some(pos),
            len,
            message: msg.to_string(),
            need_more: false,
        }
    }

    fn advance(&mut self) -> PResult<()> {
        self.cur = self.lexer.next();
        if self.cur.kind == Token::Error {
            return Err(self.err_at(self.lexer.error_msg(), self.cur));
        }
        Ok(())
    }

    fn slurp(&mut self, kind: Token, msg: &str) -> PResult<()> {
        if self.cur.kind != kind {
            return Err(self.err_at(msg, self.cur));
        }
        self.advance()
    }

    // Emission.

    fn here(&self) -> usize {
        self.prog.len()
    }

    fn emit(&mut self, instr: Instr) {
        self.prog.push(TaggedInstr {
            instr,
            line: NO_LINE,
        });
    }

    fn emit_at(&mut self, instr: Instr, at: Lexeme) {
        self.prog.push(TaggedInstr {
            instr,
            line: at.pos.line,
        });
    }

    fn unemit(&mut self) -> Instr {
        match self.prog.pop() {
            Some(tagged) => tagged.instr,
            None => Instr::new(Op::Return, 0, 0),
        }
    }

    fn add_shape(&mut self) -> PResult<u32> {
        if self.shapes.len() >= u32::MAX as usize {
            return Err(ParseError::plain("too many functions"));
        }
        self.shapes.push(Shape::default());
        Ok((self.shapes.len() - 1) as u32)
    }

    fn add_const(&mut self, v: Value) -> PResult<u32> {
        if self.consts.len() >= u32::MAX as usize {
            return Err(ParseError::plain("too many constants"));
        }
        self.consts.push(v);
        Ok((self.consts.len() - 1) as u32)
    }

    fn add_number_const(&mut self, token: Lexeme) -> PResult<u32> {
        let text = token.text(&self.source.clone().contents).to_string();
        self.add_const(Value::num(Number::parse(&text)))
    }

    fn add_string_const(&mut self, token: Lexeme) -> PResult<u32> {
        let source = self.source.clone();
        let bytes = source.contents.as_bytes();
        let inner = &bytes[token.offset + 1..token.offset + token.len - 1];

        let mut s = Str::with_capacity(inner.len());
        let mut i = 0;
        while i < inner.len() {
            let esc = match inner[i..].iter().position(|&c| c == b'\\') {
                Some(off) => i + off,
                None => {
                    s.push_bytes(&inner[i..]);
                    break;
                }
            };
            s.push_bytes(&inner[i..esc]);

            let mut j = esc + 1;
            match unescape(inner, &mut j) {
                Some(c) => {
                    s.push_bytes(&[c]);
                    i = j;
                }
                None => {
                    let k = j.saturating_sub(1);
                    let pos = Position {
                        line: token.pos.line,
                        column: token.pos.column + 1 + k,
                    };
                    return Err(self.err_precise("invalid escape", pos, 1));
                }
            }
        }
        self.add_const(Value::str(s))
    }

    // Identifiers and scopes.

    fn ident_bytes(&self, idx: u32) -> (usize, usize) {
        self.idents[idx as usize]
    }

    fn lexeme_is(&self, lexeme: Lexeme, text: &str) -> bool {
        lexeme.text(&self.source.contents) == text
    }

    fn load(&mut self, ident: Lexeme) -> PResult<Instr> {
        if self.idents.len() >= u32::MAX as usize {
            return Err(ParseError::plain("too many identifiers"));
        }
        self.idents.push((ident.offset, ident.len));
        Ok(Instr::new(Op::LoadSymbolic, 0, (self.idents.len() - 1) as u32))
    }

    fn load_to_store(&mut self, instr: Instr, local: bool, scapegoat: Lexeme) -> PResult<Instr> {
        match instr.op {
            Op::LoadSymbolic => {
                if local {
                    let (off, len) = self.ident_bytes(instr.c);
                    let source = self.source.clone();
                    let name = &source.contents.as_bytes()[off..off + len];
                    let scope = match self.scopes.last_mut() {
                        Some(scope) => scope,
                        None => return Err(ParseError::plain("no open scope")),
                    };
                    let size = scope.len();
                    let idx = *scope.slot(name, fnv(name), || size);
                    Ok(Instr::new(Op::StoreLocal, 0, idx))
                } else {
                    Ok(Instr::new(Op::StoreSymbolic, 0, instr.c))
                }
            }
            Op::LoadAt if !local => Ok(Instr::new(Op::StoreAt, 0, 0)),
            _ => Err(self.err_at("invalid assignment", scapegoat)),
        }
    }

    fn load_to_modify(&mut self, instr: Instr, aop: Aop, scapegoat: Lexeme) -> PResult<Instr> {
        match instr.op {
            Op::LoadSymbolic => Ok(Instr::new(Op::ModifySymbolic, aop as u8, instr.c)),
            Op::LoadAt => Ok(Instr::new(Op::ModifyAt, aop as u8, 0)),
            _ => Err(self.err_at("invalid compound assignment", scapegoat)),
        }
    }

    fn open_scope(&mut self) {
        let pos = self.here();
        if let Some(last) = self.ranges.last_mut() {
            last.end = pos;
        }
        self.scopes.push(Table::new(0));
        self.ranges.push(Range {
            scope_index: self.scopes.len() - 1,
            begin: pos,
            end: usize::MAX,
        });
    }

    fn resolve_symbolic(
        &mut self,
        locals: &Table<u32>,
        instr: Instr,
        op_local: Op,
        op_global: Op,
    ) -> Instr {
        let (off, len) = self.ident_bytes(instr.c);
        let source = self.source.clone();
        let name = &source.contents.as_bytes()[off..off + len];
        match locals.get(name, fnv(name)) {
            Some(&local_idx) => Instr::new(op_local, instr.a, local_idx),
            None => {
                let global_idx = self.state.intern_global(name);
                Instr::new(op_global, instr.a, global_idx)
            }
        }
    }

    /// Closes the innermost scope: resolves its symbolic
    /// instructions and computes `(maxstack, nlocals)`.
    fn close_scope(&mut self) -> PResult<(usize, u32)> {
        let pos = self.here();
        if let Some(last) = self.ranges.last_mut() {
            last.end = pos;
        }

        let scope_idx = self.scopes.len() - 1;
        let locals = match self.scopes.pop() {
            Some(locals) => locals,
            None => return Err(ParseError::plain("no open scope")),
        };

        let mut first = self.ranges.len();
        while first > 0 && self.ranges[first - 1].scope_index == scope_idx {
            first -= 1;
        }

        let mut curstack: i64 = 0;
        let mut maxstack: i64 = 0;

        for ri in first..self.ranges.len() {
            let (begin, end) = (self.ranges[ri].begin, self.ranges[ri].end);
            for j in begin..end {
                let instr = self.prog[j].instr;
                curstack += stack_delta(instr.op);

                match instr.op {
                    Op::LoadSymbolic => {
                        self.prog[j].instr =
                            self.resolve_symbolic(&locals, instr, Op::LoadLocal, Op::LoadGlobal);
                    }
                    Op::StoreSymbolic => {
                        self.prog[j].instr =
                            self.resolve_symbolic(&locals, instr, Op::StoreLocal, Op::StoreGlobal);
                    }
                    Op::ModifySymbolic => {
                        self.prog[j].instr = self.resolve_symbolic(
                            &locals,
                            instr,
                            Op::ModifyLocal,
                            Op::ModifyGlobal,
                        );
                    }
                    Op::Call | Op::List => curstack -= instr.c as i64,
                    Op::Dict => curstack -= 2 * instr.c as i64,
                    _ => {}
                }

                if maxstack < curstack {
                    maxstack = curstack;
                }
            }
        }
        self.ranges.truncate(first);

        let nlocals = locals.len();
        if maxstack > (usize::MAX / 2) as i64 {
            return Err(ParseError::plain("program is too big"));
        }
        if nlocals > u32::MAX / 2 {
            return Err(ParseError::plain("too many locals"));
        }

        if !self.scopes.is_empty() {
            self.ranges.push(Range {
                scope_index: self.scopes.len() - 1,
                begin: pos,
                end: usize::MAX,
            });
        }

        Ok((maxstack as usize, nlocals))
    }

    // Function framing.

    fn shape_index_at(&self, begin_pos: usize) -> usize {
        self.prog[begin_pos].instr.c as usize
    }

    fn fun_begin(&mut self) -> PResult<usize> {
        let pos = self.here();
        let shape_idx = self.add_shape()?;
        self.emit(Instr::new(Op::Function, 0, shape_idx));
        self.open_scope();
        self.if_stack.push(NO_LOOP);
        self.break_stack.push(NO_LOOP);
        self.continue_stack.push(NO_LOOP);
        Ok(pos)
    }

    fn fun_param(&mut self, begin_pos: usize, name: Lexeme) -> PResult<()> {
        let source = self.source.clone();
        let key = &source.contents.as_bytes()[name.offset..name.offset + name.len];
        let scope = match self.scopes.last_mut() {
            Some(scope) => scope,
            None => return Err(ParseError::plain("no open scope")),
        };
        let old_size = scope.len();
        let idx = *scope.slot(key, fnv(key), || old_size);
        if idx != old_size {
            return Err(self.err_at("duplicate parameter", name));
        }
        let si = self.shape_index_at(begin_pos);
        self.shapes[si].nargs_encoded += 1;
        Ok(())
    }

    fn fun_end(&mut self, begin_pos: usize) -> PResult<()> {
        let nil_idx = self.add_const(Value::Nil)?;
        self.emit(Instr::new(Op::LoadConst, 0, nil_idx));
        self.emit(Instr::new(Op::Return, 0, 0));

        let pos = self.here();
        let (maxstack, nlocals) = self.close_scope()?;
        let offset = pos - begin_pos;
        if offset > (u32::MAX / 2) as usize {
            return Err(ParseError::plain("function body is too long"));
        }

        let si = self.shape_index_at(begin_pos);
        let shape = &mut self.shapes[si];
        shape.maxstack = maxstack;
        shape.nlocals = nlocals;
        shape.offset = offset;

        self.if_stack.pop();
        self.break_stack.pop();
        self.continue_stack.pop();
        Ok(())
    }

    // Jump bookkeeping.

    fn postpone_jump(&mut self) -> usize {
        let pos = self.here();
        self.emit(Instr::new(Op::Jump, 0, 0));
        pos
    }

    fn postpone_jump_unless(&mut self) -> usize {
        let pos = self.here();
        self.emit(Instr::new(Op::JumpUnless, 0, 0));
        pos
    }

    fn fixup_jump(&mut self, from: usize, to: usize) {
        self.prog[from].instr.c = (to as i64 - from as i64) as i32 as u32;
    }

    fn emit_jump_to(&mut self, to: usize) {
        let from = self.postpone_jump();
        self.fixup_jump(from, to);
    }

    fn seg_stack(&mut self, which: Seg) -> &mut Vec<usize> {
        match which {
            Seg::If => &mut self.if_stack,
            Seg::Break => &mut self.break_stack,
            Seg::Continue => &mut self.continue_stack,
        }
    }

    fn seg_begin(&mut self, which: Seg) {
        self.seg_stack(which).push(SEG_START);
    }

    /// Emits a pending jump and records it in the segment.
    /// Refuses (returns false) outside a loop.
    fn seg_emit_jump_and_push(&mut self, which: Seg) -> bool {
        let top = self.seg_stack(which).last().copied();
        if top == Some(NO_LOOP) || top.is_none() {
            return false;
        }
        let pos = self.postpone_jump();
        self.seg_stack(which).push(pos);
        true
    }

    fn seg_end_fixup(&mut self, which: Seg, to: usize) {
        loop {
            let pos = match self.seg_stack(which).pop() {
                Some(pos) => pos,
                None => break,
            };
            if pos == SEG_START {
                break;
            }
            self.fixup_jump(pos, to);
        }
    }

    // Expressions.

    fn this_is_expr(&self, expect_expr: bool) -> PResult<()> {
        if !expect_expr {
            return Err(self.err_at("unexpected expression", self.cur));
        }
        Ok(())
    }

    fn after_expr(&self, expect_expr: bool) -> PResult<()> {
        if expect_expr {
            return Err(self.err_at("expected expression", self.cur));
        }
        Ok(())
    }

    fn unary_operator(&mut self) -> PResult<()> {
        let cur = self.cur;
        let (op, priority) = match unary_props(cur.kind) {
            Some(props) => props,
            None => return Err(self.err_at("syntax error", cur)),
        };
        self.advance()?;
        self.expr(priority)?;
        self.emit_at(Instr::new(op, 0, 0), cur);
        Ok(())
    }

    fn binary_operator(&mut self, min_priority: i8) -> PResult<bool> {
        let cur = self.cur;
        let props = match binary_props(cur.kind) {
            Some(props) => props,
            None => return Err(self.err_at("syntax error", cur)),
        };
        if props.priority < min_priority {
            return Ok(false);
        }
        self.advance()?;
        self.expr(props.priority + props.left_assoc as i8)?;
        self.emit_at(Instr::new(props.op, props.a, 0), cur);
        Ok(true)
    }

    /// Parses `(...)` call arguments. Returns the argument
    /// count and whether the last argument scatters.
    fn funcall(&mut self) -> PResult<(u32, bool)> {
        self.advance()?;
        if self.cur.kind == Token::Rparen {
            self.advance()?;
            return Ok((0, false));
        }
        let mut nargs: u32 = 1;
        loop {
            self.expr(-1)?;
            let mut scatter = false;
            if self.cur.kind == Token::Ellipsis {
                scatter = true;
                self.advance()?;
            }
            match self.cur.kind {
                Token::Rparen => {
                    self.advance()?;
                    return Ok((nargs, scatter));
                }
                _ if scatter => {
                    return Err(self.err_at("scatter argument must be last", self.cur))
                }
                Token::Comma => {
                    self.advance()?;
                    if nargs == u32::MAX {
                        return Err(self.err_at("too many arguments", self.cur));
                    }
                    nargs += 1;
                }
                _ => return Err(self.err_at("expected ',' or ')'", self.cur)),
            }
        }
    }

    fn newlist(&mut self) -> PResult<u32> {
        self.advance()?;
        if self.cur.kind == Token::Rbracket {
            self.advance()?;
            return Ok(0);
        }
        let mut nelems: u32 = 1;
        loop {
            self.expr(-1)?;
            match self.cur.kind {
                Token::Rbracket => {
                    self.advance()?;
                    return Ok(nelems);
                }
                Token::Comma => {
                    self.advance()?;
                    if nelems == u32::MAX {
                        return Err(self.err_at("too many list elements", self.cur));
                    }
                    nelems += 1;
                }
                _ => return Err(self.err_at("expected ',' or ']'", self.cur)),
            }
        }
    }

    fn newdict(&mut self) -> PResult<u32> {
        self.advance()?;
        if self.cur.kind == Token::Rbrace {
            self.advance()?;
            return Ok(0);
        }
        let mut nentries: u32 = 1;
        loop {
            self.expr(-1)?;
            self.slurp(Token::Colon, "expected ':'")?;
            self.expr(-1)?;
            match self.cur.kind {
                Token::Rbrace => {
                    self.advance()?;
                    return Ok(nentries);
                }
                Token::Comma => {
                    self.advance()?;
                    if nentries == u32::MAX {
                        return Err(self.err_at("too many dict entries", self.cur));
                    }
                    nentries += 1;
                }
                _ => return Err(self.err_at("expected ',' or '}'", self.cur)),
            }
        }
    }

    fn expr(&mut self, min_priority: i8) -> PResult<()> {
        let mut expect_expr = true;
        loop {
            let cur = self.cur;
            match cur.kind {
                Token::Number => {
                    self.this_is_expr(expect_expr)?;
                    let c = self.add_number_const(cur)?;
                    self.emit_at(Instr::new(Op::LoadConst, 0, c), cur);
                    expect_expr = false;
                    self.advance()?;
                }

                Token::True | Token::False => {
                    self.this_is_expr(expect_expr)?;
                    let c = self.add_const(Value::Flag(cur.kind == Token::True))?;
                    self.emit_at(Instr::new(Op::LoadConst, 0, c), cur);
                    expect_expr = false;
                    self.advance()?;
                }

                Token::Nil => {
                    self.this_is_expr(expect_expr)?;
                    let c = self.add_const(Value::Nil)?;
                    self.emit_at(Instr::new(Op::LoadConst, 0, c), cur);
                    expect_expr = false;
                    self.advance()?;
                }

                Token::Str => {
                    self.this_is_expr(expect_expr)?;
                    let c = self.add_string_const(cur)?;
                    self.emit_at(Instr::new(Op::LoadConst, 0, c), cur);
                    expect_expr = false;
                    self.advance()?;
                }

                Token::Ident => {
                    self.this_is_expr(expect_expr)?;
                    let instr = self.load(cur)?;
                    self.emit_at(instr, cur);
                    expect_expr = false;
                    self.advance()?;
                }

                Token::Lbracket => {
                    if expect_expr {
                        let nelems = self.newlist()?;
                        self.emit_at(Instr::new(Op::List, 0, nelems), cur);
                        expect_expr = false;
                    } else {
                        self.advance()?;
                        self.expr(-1)?;
                        self.slurp(Token::Rbracket, "expected ']'")?;
                        self.emit_at(Instr::new(Op::LoadAt, 0, 0), cur);
                    }
                }

                Token::Lbrace => {
                    self.this_is_expr(expect_expr)?;
                    let nentries = self.newdict()?;
                    self.emit_at(Instr::new(Op::Dict, 0, nentries), cur);
                    expect_expr = false;
                }

                Token::Lparen => {
                    if expect_expr {
                        self.advance()?;
                        self.expr(-1)?;
                        self.slurp(Token::Rparen, "expected ')'")?;
                        expect_expr = false;
                    } else {
                        let (nargs, scatter) = self.funcall()?;
                        self.emit_at(Instr::new(Op::Call, scatter as u8, nargs), cur);
                    }
                }

                Token::Dot => {
                    // `x.field` desugars to `x["field"]`
                    self.after_expr(expect_expr)?;
                    self.advance()?;
                    let field = self.cur;
                    if field.kind != Token::Ident {
                        return Err(self.err_at("expected identifier (field name)", field));
                    }
                    let source = self.source.clone();
                    let name = &source.contents.as_bytes()[field.offset..field.offset + field.len];
                    let c = self.add_const(Value::str(Str::new(name)))?;
                    self.emit_at(Instr::new(Op::LoadConst, 0, c), field);
                    self.emit_at(Instr::new(Op::LoadAt, 0, 0), field);
                    self.advance()?;
                }

                Token::AndAndEq
                | Token::AndEq
                | Token::Comma
                | Token::Eof
                | Token::Eq
                | Token::Colon
                | Token::ColonEq
                | Token::Ellipsis
                | Token::HatEq
                | Token::MinusEq
                | Token::OrEq
                | Token::OrOrEq
                | Token::PercentEq
                | Token::PlusEq
                | Token::Semicolon
                | Token::SlashEq
                | Token::SlashSlashEq
                | Token::StarEq
                | Token::StarStarEq
                | Token::TildeEq
                | Token::Rparen
                | Token::Rbracket
                | Token::Rbrace
                | Token::GreaterGreaterEq
                | Token::LessLessEq => {
                    self.after_expr(expect_expr)?;
                    return Ok(());
                }

                _ => {
                    if expect_expr {
                        self.unary_operator()?;
                        expect_expr = false;
                    } else if !self.binary_operator(min_priority)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn expr_or_assignment(&mut self) -> PResult<()> {
        self.expr(-1)?;
        let barrier = self.cur;

        match barrier.kind {
            Token::Eq | Token::ColonEq => {
                let load_instr = self.unemit();
                self.advance()?;
                self.expr(-1)?;
                let store_instr =
                    self.load_to_store(load_instr, barrier.kind == Token::ColonEq, barrier)?;
                self.emit_at(store_instr, barrier);
            }
            Token::Semicolon => {
                self.emit_at(Instr::new(Op::Print, 0, 0), barrier);
            }
            _ => {
                let aop = match compound_assign_props(barrier.kind) {
                    Some(aop) => aop,
                    None => return Err(self.err_at("expected ';' or assignment", barrier)),
                };
                let load_instr = self.unemit();
                self.advance()?;
                self.expr(-1)?;
                let modify_instr = self.load_to_modify(load_instr, aop, barrier)?;
                self.emit_at(modify_instr, barrier);
            }
        }
        Ok(())
    }

    // Statements.

    fn block(&mut self) -> PResult<()> {
        self.slurp(Token::Lbrace, "expected '{'")?;
        loop {
            self.stmt()?;
            match self.cur.kind {
                Token::Eof => return Err(self.err_at("expected '}'", self.cur)),
                Token::Rbrace => {
                    self.advance()?;
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    fn if_or_elif_clause(&mut self) -> PResult<usize> {
        self.advance()?;
        self.slurp(Token::Lparen, "expected '('")?;
        self.expr(-1)?;
        let jump_pos = self.postpone_jump_unless();
        self.slurp(Token::Rparen, "expected ')'")?;
        self.block()?;
        Ok(jump_pos)
    }

    fn if_stmt(&mut self) -> PResult<()> {
        self.seg_begin(Seg::If);

        let mut prev_jump_unless = Some(self.if_or_elif_clause()?);
        while self.cur.kind == Token::Elif {
            let pos = self.postpone_jump();
            self.seg_stack(Seg::If).push(pos);

            let here = self.here();
            if let Some(prev) = prev_jump_unless {
                self.fixup_jump(prev, here);
            }
            prev_jump_unless = Some(self.if_or_elif_clause()?);
        }
        if self.cur.kind == Token::Else {
            let pos = self.postpone_jump();
            self.seg_stack(Seg::If).push(pos);

            let here = self.here();
            if let Some(prev) = prev_jump_unless.take() {
                self.fixup_jump(prev, here);
            }
            self.advance()?;
            self.block()?;
        }
        if let Some(prev) = prev_jump_unless {
            let here = self.here();
            self.fixup_jump(prev, here);
        }

        let here = self.here();
        self.seg_end_fixup(Seg::If, here);
        Ok(())
    }

    fn while_stmt(&mut self) -> PResult<()> {
        self.seg_begin(Seg::Break);
        self.seg_begin(Seg::Continue);

        self.advance()?;
        self.slurp(Token::Lparen, "expected '('")?;
        let begin_pos = self.here();
        self.expr(-1)?;
        let jump_pos = self.postpone_jump_unless();
        self.slurp(Token::Rparen, "expected ')'")?;

        self.block()?;

        self.emit_jump_to(begin_pos);
        let end_pos = self.here();
        self.fixup_jump(jump_pos, end_pos);

        self.seg_end_fixup(Seg::Break, end_pos);
        self.seg_end_fixup(Seg::Continue, begin_pos);
        Ok(())
    }

    /// `for(init; cond; post) { body }`. The post
    /// expression is emitted in source order, then the
    /// `[post, body]` span is rotated so execution runs
    /// `init; cond; body; post; goto cond`. Pending break
    /// and continue jumps are fixed up pre-rotation, with
    /// targets compensated by the rotation amount.
    fn for_stmt(&mut self) -> PResult<()> {
        self.seg_begin(Seg::Break);
        self.seg_begin(Seg::Continue);

        self.advance()?;
        self.slurp(Token::Lparen, "expected '('")?;

        if self.cur.kind != Token::Semicolon {
            self.expr_or_assignment()?;
        }
        self.slurp(Token::Semicolon, "expected ';'")?;

        let begin_pos = self.here();
        let jump_pos = if self.cur.kind != Token::Semicolon {
            self.expr(-1)?;
            Some(self.postpone_jump_unless())
        } else {
            None
        };
        self.slurp(Token::Semicolon, "expected ';'")?;

        let i1 = self.here();
        if self.cur.kind != Token::Rparen {
            self.expr_or_assignment()?;
        }
        self.slurp(Token::Rparen, "expected ')'")?;

        let i2 = self.here();
        self.block()?;

        let i3 = self.here();
        let nrotate = i2 - i1;
        let continue_pos = i3 - nrotate;

        self.emit_jump_to(begin_pos);

        let end_pos = self.here();
        if let Some(jp) = jump_pos {
            self.fixup_jump(jp, end_pos);
        }
        self.seg_end_fixup(Seg::Break, end_pos + nrotate);
        self.seg_end_fixup(Seg::Continue, continue_pos + nrotate);

        self.prog[i1..i3].rotate_left(nrotate);
        Ok(())
    }

    fn fun_stmt(&mut self) -> PResult<()> {
        self.advance()?;

        let name = self.cur;
        if name.kind != Token::Ident {
            return Err(self.err_at("expected function name", name));
        }
        self.advance()?;
        self.slurp(Token::Lparen, "expected '('")?;

        let fun_pos = self.fun_begin()?;
        if self.cur.kind != Token::Rparen {
            loop {
                let param = self.cur;
                if param.kind != Token::Ident {
                    return Err(self.err_at("expected parameter name", param));
                }
                self.fun_param(fun_pos, param)?;
                self.advance()?;

                if self.cur.kind == Token::Ellipsis {
                    // The final parameter gathers the
                    // remaining arguments into a list.
                    let si = self.shape_index_at(fun_pos);
                    self.shapes[si].nargs_encoded = !(self.shapes[si].nargs_encoded - 1);
                    self.advance()?;
                    if self.cur.kind != Token::Rparen {
                        return Err(self.err_at("gather parameter must be last", self.cur));
                    }
                    break;
                }
                if self.cur.kind == Token::Rparen {
                    break;
                }
                self.slurp(Token::Comma, "expected ',' or ')'")?;
            }
        }
        self.advance()?;
        self.block()?;

        self.fun_end(fun_pos)?;

        let load_instr = self.load(name)?;
        let store_instr = self.load_to_store(load_instr, false, name)?;
        self.emit(store_instr);
        Ok(())
    }

    fn stmt(&mut self) -> PResult<()> {
        match self.cur.kind {
            Token::If => self.if_stmt(),
            Token::While => self.while_stmt(),
            Token::For => self.for_stmt(),
            Token::Fun => self.fun_stmt(),
            Token::Semicolon => self.advance(),

            Token::Return => {
                self.advance()?;
                if self.cur.kind == Token::Semicolon {
                    self.advance()?;
                    let c = self.add_const(Value::Nil)?;
                    self.emit(Instr::new(Op::LoadConst, 0, c));
                } else {
                    self.expr(-1)?;
                    self.slurp(Token::Semicolon, "expected ';'")?;
                }
                self.emit(Instr::new(Op::Return, 0, 0));
                Ok(())
            }

            Token::Break => {
                if !self.seg_emit_jump_and_push(Seg::Break) {
                    return Err(self.err_at("'break' outside of a loop", self.cur));
                }
                self.advance()?;
                self.slurp(Token::Semicolon, "expected ';'")
            }

            Token::Continue => {
                if !self.seg_emit_jump_and_push(Seg::Continue) {
                    return Err(self.err_at("'continue' outside of a loop", self.cur));
                }
                self.advance()?;
                self.slurp(Token::Semicolon, "expected ';'")
            }

            Token::Eof | Token::Rbrace => Ok(()),

            Token::Ident if self.lexeme_is(self.cur, "print") => {
                // `print expr;` is sugar for the printing
                // expression statement, usable where the
                // expression itself continues with `=` etc.
                let at = self.cur;
                self.advance()?;
                self.expr(-1)?;
                self.emit_at(Instr::new(Op::Print, 0, 0), at);
                self.slurp(Token::Semicolon, "expected ';'")
            }

            _ => {
                self.expr_or_assignment()?;
                self.slurp(Token::Semicolon, "expected ';'")
            }
        }
    }

    fn program(&mut self) -> PResult<()> {
        let fun_pos = self.fun_begin()?;
        self.advance()?;
        loop {
            self.stmt()?;
            match self.cur.kind {
                Token::Rbrace => return Err(self.err_at("extra '}'", self.cur)),
                Token::Eof => break,
                _ => {}
            }
        }
        self.fun_end(fun_pos)
    }

    /// Finalizes the program: strips line tags into a
    /// deduplicated quark array.
    fn into_chunk(mut self) -> Chunk {
        let mut code = Vec::with_capacity(self.prog.len());
        let mut quarks = Vec::new();
        let mut cur_line = NO_LINE;
        for tagged in &self.prog {
            if tagged.line != NO_LINE && tagged.line != cur_line {
                quarks.push(Quark {
                    instr: code.len(),
                    line: tagged.line,
                });
                cur_line = tagged.line;
            }
            code.push(tagged.instr);
        }

        Chunk {
            code,
            consts: mem::take(&mut self.consts),
            quarks,
            shapes: mem::take(&mut self.shapes),
            origin: self.source.origin.clone(),
            source: self.source.contents.clone(),
        }
    }
}

fn decode_hex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn unescape(inner: &[u8], j: &mut usize) -> Option<u8> {
    let c = *inner.get(*j)?;
    *j += 1;
    match c {
        b'\\' => Some(b'\\'),
        b'a' => Some(0x07),
        b'b' => Some(0x08),
        b'e' => Some(0x1B),
        b'f' => Some(0x0C),
        b'n' => Some(b'\n'),
        b'r' => Some(b'\r'),
        b't' => Some(b'\t'),
        b'v' => Some(0x0B),
        b'"' => Some(b'"'),
        b'0' => Some(0),
        b'x' => {
            let c1 = *inner.get(*j)?;
            *j += 1;
            let hi = decode_hex(c1)?;
            let c2 = *inner.get(*j)?;
            *j += 1;
            let lo = decode_hex(c2)?;
            Some((hi << 4) | lo)
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vm::state::State;

    fn compile(source: &str) -> Result<Rc<Func>, ParseError> {
        let mut state = State::new();
        parse(&mut state, Source::source(source))
    }

    fn ops(source: &str) -> Vec<Op> {
        compile(source)
            .unwrap()
            .chunk
            .code
            .iter()
            .map(|i| i.op)
            .collect()
    }

    #[test]
    fn bare_expression_prints() {
        use Op::*;
        assert_eq!(
            ops("1 + 2;"),
            vec![Function, LoadConst, LoadConst, Aop, Print, LoadConst, Return]
        );
    }

    #[test]
    fn print_statement() {
        use Op::*;
        assert_eq!(
            ops("print 1 + 2;"),
            vec![Function, LoadConst, LoadConst, Aop, Print, LoadConst, Return]
        );
    }

    #[test]
    fn no_symbolic_opcodes_survive() {
        let f = compile("x := 1; y := x + z; fun f(a) { return a * x; }").unwrap();
        for instr in &f.chunk.code {
            assert!(
                !matches!(
                    instr.op,
                    Op::LoadSymbolic | Op::StoreSymbolic | Op::ModifySymbolic
                ),
                "symbolic opcode in final chunk: {:?}",
                instr
            );
        }
    }

    #[test]
    fn locals_vs_globals() {
        use Op::*;
        // `:=` declares a local; plain `=` on an unknown
        // name resolves to a global store.
        assert_eq!(
            ops("x := 1; x = 2;"),
            vec![
                Function, LoadConst, StoreLocal, LoadConst, StoreLocal, LoadConst, Return
            ]
        );
        assert_eq!(
            ops("x = 1;"),
            vec![Function, LoadConst, StoreGlobal, LoadConst, Return]
        );
    }

    #[test]
    fn compound_assignment_rewrites_load() {
        use Op::*;
        let f = compile("x := 1; x += 2;").unwrap();
        let code: Vec<Op> = f.chunk.code.iter().map(|i| i.op).collect();
        assert_eq!(
            code,
            vec![Function, LoadConst, StoreLocal, LoadConst, ModifyLocal, LoadConst, Return]
        );
        let modify = f.chunk.code[4];
        assert_eq!(crate::vm::chunk::Aop::from_u8(modify.a), crate::vm::chunk::Aop::Add);
    }

    #[test]
    fn indexed_compound_assignment() {
        use Op::*;
        let code = ops("l := [0]; l[0] ~= \"x\";");
        assert!(code.contains(&ModifyAt));
    }

    #[test]
    fn field_access_desugars() {
        use Op::*;
        assert_eq!(
            ops("a := {}; a.b;"),
            vec![
                Function, Dict, StoreLocal, LoadLocal, LoadConst, LoadAt, Print, LoadConst,
                Return
            ]
        );
    }

    #[test]
    fn break_outside_loop_rejected() {
        let err = compile("break;").unwrap_err();
        assert_eq!(err.message, "'break' outside of a loop");
        let err = compile("fun f() { while (1) { } break; }").unwrap_err();
        assert_eq!(err.message, "'break' outside of a loop");
    }

    #[test]
    fn break_inside_nested_function_scopes() {
        // a loop does not leak into a nested function body
        let err = compile("while (1) { fun f() { break; } }").unwrap_err();
        assert_eq!(err.message, "'break' outside of a loop");
    }

    #[test]
    fn duplicate_parameter_rejected() {
        let err = compile("fun f(a, a) { }").unwrap_err();
        assert_eq!(err.message, "duplicate parameter");
    }

    #[test]
    fn need_more_only_at_eof() {
        let err = compile("x := (1 +").unwrap_err();
        assert!(err.need_more);
        let err = compile("x := );").unwrap_err();
        assert!(!err.need_more);
    }

    #[test]
    fn invalid_assignment_target() {
        let err = compile("1 + 2 = 3;").unwrap_err();
        assert_eq!(err.message, "invalid assignment");
    }

    #[test]
    fn quarks_are_line_change_points() {
        let f = compile("1;\n2;\n\n3;").unwrap();
        let lines: Vec<usize> = f.chunk.quarks.iter().map(|q| q.line).collect();
        assert_eq!(lines, vec![1, 2, 4]);
        for w in f.chunk.quarks.windows(2) {
            assert!(w[0].instr < w[1].instr);
        }
    }

    #[test]
    fn maxstack_accounts_for_arity() {
        let f = compile("f(1, 2, 3);").unwrap();
        let shape = f.shape();
        // callee + three arguments
        assert!(shape.maxstack >= 4);
        assert_eq!(shape.nargs_encoded, 0);
    }

    #[test]
    fn gather_parameter_encodes_negative() {
        let f = compile("fun f(a, rest...) { }").unwrap();
        // the nested function's shape is index 1
        let shape = f.chunk.shapes[1];
        assert_eq!(shape.nargs_encoded, -2);
        assert_eq!(shape.nlocals, 2);
    }

    #[test]
    fn for_loop_rotation_places_post_after_body() {
        use Op::*;
        let f = compile("for (i := 0; i < 3; i += 1) { i; }").unwrap();
        let code: Vec<Op> = f.chunk.code.iter().map(|i| i.op).collect();
        // body's print must come before the post-expression
        // modify, which must come before the back jump
        let print_pos = code.iter().position(|&op| op == Print);
        let modify_pos = code.iter().position(|&op| op == ModifyLocal);
        let jump_pos = code.iter().rposition(|&op| op == Jump);
        assert!(print_pos < modify_pos);
        assert!(modify_pos < jump_pos);
    }
}
