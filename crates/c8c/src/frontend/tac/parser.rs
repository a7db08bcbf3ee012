//! Recursive descent parser for three-address listings

use string_interner::DefaultStringInterner;

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind};
use crate::common::{CompileError, CompileResult, Span};
use crate::ir::{BinOp, Relation, UnOp};
use crate::types::IrType;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peeked: Option<Token>,
    names: DefaultStringInterner,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> CompileResult<Self> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            peeked: None,
            names: DefaultStringInterner::default(),
        })
    }

    /// Parse a complete source file
    pub fn parse(mut self) -> CompileResult<Program> {
        let mut items = Vec::new();
        while !self.at_end() {
            items.push(self.parse_item()?);
        }
        Ok(Program { items, names: self.names })
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    fn at_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> CompileResult<Token> {
        let next = match self.peeked.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    /// Kind of the token after the current one
    fn peek(&mut self) -> CompileResult<&TokenKind> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        Ok(self.peeked.as_ref().map_or(&TokenKind::Eof, |token| &token.kind))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> CompileResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> CompileResult<Token> {
        if self.check(&kind) {
            self.advance()
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        CompileError::parser(
            format!("expected {}, found {}", expected, self.current.kind),
            self.current.span,
        )
    }

    fn expect_identifier(&mut self) -> CompileResult<(Name, Span)> {
        if let TokenKind::Identifier(text) = &self.current.kind {
            let name = self.names.get_or_intern(text);
            let span = self.advance()?.span;
            Ok((name, span))
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    // =========================================================================
    // Items
    // =========================================================================

    fn parse_item(&mut self) -> CompileResult<Item> {
        match self.current.kind {
            TokenKind::Var => self.parse_global().map(Item::Global),
            TokenKind::Extern => {
                let start = self.advance()?.span;
                self.expect(TokenKind::Fn)?;
                let mut decl = self.parse_function_decl()?;
                let end = self.expect(TokenKind::Semi)?.span;
                decl.span = start.merge(end);
                Ok(Item::Extern(decl))
            }
            TokenKind::Fn => {
                self.advance()?;
                let decl = self.parse_function_decl()?;
                self.expect(TokenKind::LBrace)?;
                let mut body = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    if self.at_end() {
                        return Err(self.unexpected("'}'"));
                    }
                    body.push(self.parse_stmt()?);
                }
                let end = self.advance()?.span;
                Ok(Item::Function(FunctionDef { decl, body, end }))
            }
            _ => Err(self.unexpected("'var', 'extern' or 'fn'")),
        }
    }

    fn parse_global(&mut self) -> CompileResult<Global> {
        let start = self.expect(TokenKind::Var)?.span;
        let (name, _) = self.expect_identifier()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type()?;
        let init = if self.match_token(&TokenKind::Eq)? {
            Some(match &self.current.kind {
                TokenKind::StringLiteral(text) => {
                    let bytes = unescape(&text[1..text.len() - 1], self.current.span)?;
                    self.advance()?;
                    Initializer::Bytes(bytes)
                }
                _ => Initializer::Integer(self.parse_integer()?),
            })
        } else {
            None
        };
        let end = self.expect(TokenKind::Semi)?.span;
        Ok(Global { name, ty, init, span: start.merge(end) })
    }

    /// `IDENT ( params ) (-> type)?`
    fn parse_function_decl(&mut self) -> CompileResult<FunctionDecl> {
        let (name, span) = self.expect_identifier()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (param, param_span) = self.expect_identifier()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;
                params.push(Param { name: param, ty, span: param_span });
                if !self.match_token(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let return_type = if self.match_token(&TokenKind::Arrow)? {
            self.parse_type()?
        } else {
            IrType::void()
        };
        Ok(FunctionDecl { name, params, return_type, span })
    }

    fn parse_type(&mut self) -> CompileResult<IrType> {
        let mut ty = match self.current.kind {
            TokenKind::Byte => IrType::byte(),
            TokenKind::SByte => IrType::sbyte(),
            TokenKind::Word => IrType::word(),
            TokenKind::SWord => IrType::sword(),
            TokenKind::Ptr => {
                self.advance()?;
                return Ok(IrType::ptr(self.parse_type()?));
            }
            _ => return Err(self.unexpected("type")),
        };
        self.advance()?;
        while self.match_token(&TokenKind::LBracket)? {
            let span = self.current.span;
            let count = self.parse_integer()?;
            if count <= 0 {
                return Err(CompileError::parser("array length must be positive", span));
            }
            self.expect(TokenKind::RBracket)?;
            ty = IrType::array(ty, count as usize);
        }
        Ok(ty)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_stmt(&mut self) -> CompileResult<Stmt> {
        let start = self.current.span;
        if matches!(self.current.kind, TokenKind::Identifier(_)) && matches!(self.peek()?, TokenKind::Colon) {
            let (name, span) = self.expect_identifier()?;
            self.advance()?;
            return Ok(Stmt { kind: StmtKind::Label(name), span });
        }

        let kind = match self.current.kind {
            TokenKind::Var => {
                self.advance()?;
                let (name, _) = self.expect_identifier()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;
                StmtKind::Var { name, ty }
            }
            TokenKind::Goto => {
                self.advance()?;
                StmtKind::Goto(self.expect_identifier()?.0)
            }
            TokenKind::If => {
                self.advance()?;
                let left = self.parse_value()?;
                let relation = self.parse_relation()?;
                let right = self.parse_value()?;
                self.expect(TokenKind::Goto)?;
                let (label, _) = self.expect_identifier()?;
                StmtKind::If { left, relation, right, label }
            }
            TokenKind::Return => {
                self.advance()?;
                if self.check(&TokenKind::Semi) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_value()?))
                }
            }
            TokenKind::Call => StmtKind::Call(self.parse_call()?),
            TokenKind::Identifier(_) | TokenKind::Star => {
                let place = self.parse_place()?;
                self.expect(TokenKind::Eq)?;
                let rhs = self.parse_rhs()?;
                StmtKind::Assign { place, rhs }
            }
            _ => return Err(self.unexpected("statement")),
        };
        let end = self.expect(TokenKind::Semi)?.span;
        Ok(Stmt { kind, span: start.merge(end) })
    }

    fn parse_relation(&mut self) -> CompileResult<Relation> {
        let relation = match self.current.kind {
            TokenKind::EqEq => Relation::Eq,
            TokenKind::NotEq => Relation::Ne,
            TokenKind::Lt => Relation::Lt,
            TokenKind::LtEq => Relation::Le,
            TokenKind::Gt => Relation::Gt,
            TokenKind::GtEq => Relation::Ge,
            _ => return Err(self.unexpected("comparison")),
        };
        self.advance()?;
        Ok(relation)
    }

    /// `call IDENT ( args )`
    fn parse_call(&mut self) -> CompileResult<CallExpr> {
        let start = self.expect(TokenKind::Call)?.span;
        let (callee, _) = self.expect_identifier()?;
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_value()?);
                if !self.match_token(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        let end = self.expect(TokenKind::RParen)?.span;
        Ok(CallExpr { callee, args, span: start.merge(end) })
    }

    fn parse_rhs(&mut self) -> CompileResult<Rhs> {
        match self.current.kind {
            TokenKind::Call => return self.parse_call().map(Rhs::Call),
            TokenKind::Minus => {
                let start = self.advance()?.span;
                let value = self.parse_value()?;
                return Ok(match value.kind {
                    ValueKind::Integer(v) => Rhs::Value(Value {
                        kind: ValueKind::Integer(-v),
                        span: start.merge(value.span),
                    }),
                    _ => Rhs::Unary(UnOp::Neg, value),
                });
            }
            TokenKind::Tilde => {
                self.advance()?;
                return Ok(Rhs::Unary(UnOp::BitNot, self.parse_value()?));
            }
            _ => {}
        }

        let left = self.parse_value()?;
        let operator = match self.current.kind {
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Amp => BinOp::And,
            TokenKind::Pipe => BinOp::Or,
            TokenKind::Caret => BinOp::Xor,
            TokenKind::LtLt => BinOp::Shl,
            TokenKind::GtGt => BinOp::Shr,
            _ => return Ok(Rhs::Value(left)),
        };
        self.advance()?;
        let right = self.parse_value()?;
        Ok(Rhs::Binary(left, operator, right))
    }

    fn parse_place(&mut self) -> CompileResult<Place> {
        if self.check(&TokenKind::Star) {
            let start = self.advance()?.span;
            let (name, span) = self.expect_identifier()?;
            return Ok(Place { kind: PlaceKind::Deref(name), span: start.merge(span) });
        }
        let (name, span) = self.expect_identifier()?;
        if self.match_token(&TokenKind::LBracket)? {
            let index = self.parse_integer()?;
            let end = self.expect(TokenKind::RBracket)?.span;
            return Ok(Place { kind: PlaceKind::Index(name, index), span: span.merge(end) });
        }
        Ok(Place { kind: PlaceKind::Name(name), span })
    }

    fn parse_value(&mut self) -> CompileResult<Value> {
        let start = self.current.span;
        let kind = match &self.current.kind {
            TokenKind::StringLiteral(text) => {
                let bytes = unescape(&text[1..text.len() - 1], start)?;
                self.advance()?;
                ValueKind::String(bytes)
            }
            TokenKind::Amp => {
                self.advance()?;
                let (name, span) = self.expect_identifier()?;
                return Ok(Value { kind: ValueKind::AddressOf(name), span: start.merge(span) });
            }
            TokenKind::Identifier(_) | TokenKind::Star => {
                let place = self.parse_place()?;
                let span = place.span;
                return Ok(Value { kind: ValueKind::Place(place), span });
            }
            TokenKind::Minus => {
                self.advance()?;
                let span = self.current.span;
                let value = self.parse_integer()?;
                return Ok(Value { kind: ValueKind::Integer(-value), span: start.merge(span) });
            }
            _ => ValueKind::Integer(self.parse_integer()?),
        };
        Ok(Value { kind, span: start })
    }

    /// Decimal, hex, binary or character literal
    fn parse_integer(&mut self) -> CompileResult<i64> {
        let span = self.current.span;
        let parsed = match &self.current.kind {
            TokenKind::IntLiteral(text) => text.parse::<i64>().ok(),
            TokenKind::HexLiteral(text) => i64::from_str_radix(&text[2..], 16).ok(),
            TokenKind::BinaryLiteral(text) => i64::from_str_radix(&text[2..], 2).ok(),
            TokenKind::CharLiteral(text) => {
                let bytes = unescape(&text[1..text.len() - 1], span)?;
                bytes.first().map(|&b| i64::from(b))
            }
            _ => return Err(self.unexpected("integer")),
        };
        let value = parsed.ok_or_else(|| CompileError::parser("integer literal out of range", span))?;
        self.advance()?;
        Ok(value)
    }
}

/// Decode the escapes of a string or character literal body
fn unescape(text: &str, span: Span) -> CompileResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buffer = [0; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
            continue;
        }
        let escaped = match chars.next() {
            Some('n') => b'\n',
            Some('r') => b'\r',
            Some('t') => b'\t',
            Some('0') => 0,
            Some('\\') => b'\\',
            Some('\'') => b'\'',
            Some('"') => b'"',
            Some('x') => {
                let digits: String = chars.by_ref().take(2).collect();
                u8::from_str_radix(&digits, 16)
                    .map_err(|_| CompileError::lexer(format!("invalid escape '\\x{}'", digits), span))?
            }
            other => {
                return Err(CompileError::lexer(
                    format!("unknown escape '\\{}'", other.map(String::from).unwrap_or_default()),
                    span,
                ));
            }
        };
        bytes.push(escaped);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        Parser::new(source).unwrap().parse().unwrap()
    }

    fn body(program: &Program) -> &[Stmt] {
        match &program.items[0] {
            Item::Function(def) => &def.body,
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_items() {
        let program = parse(
            "var counter: word = 0x100;\n\
             var msg: byte[6] = \"hello\";\n\
             extern fn putc(c: byte);\n\
             fn main() -> byte { return 0; }",
        );
        assert_eq!(program.items.len(), 4);
        match &program.items[0] {
            Item::Global(g) => {
                assert_eq!(program.name(g.name), "counter");
                assert_eq!(g.ty, IrType::word());
                assert!(matches!(g.init, Some(Initializer::Integer(0x100))));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&program.items[1], Item::Global(g) if matches!(&g.init, Some(Initializer::Bytes(b)) if b == b"hello")));
        assert!(matches!(&program.items[2], Item::Extern(d) if d.params.len() == 1 && d.return_type.is_void()));
        assert!(matches!(&program.items[3], Item::Function(f) if f.decl.return_type == IrType::byte()));
    }

    #[test]
    fn test_types() {
        let program = parse("var p: ptr byte[4]; var t: word[2][3];");
        let types: Vec<String> = program
            .items
            .iter()
            .map(|item| match item {
                Item::Global(g) => g.ty.to_string(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(types, vec!["ptr byte[4]".to_string(), "word[2][3]".to_string()]);
    }

    #[test]
    fn test_statements() {
        let program = parse(
            "fn f(n: byte) {\n\
               var i: byte;\n\
             top:\n\
               i = n + 1;\n\
               *p = ~i;\n\
               a[2] = -5;\n\
               if i < 10 goto top;\n\
               x = call g(i, &buf, \"s\");\n\
               call h();\n\
               goto top;\n\
               return;\n\
             }",
        );
        let kinds: Vec<&StmtKind> = body(&program).iter().map(|s| &s.kind).collect();
        assert!(matches!(kinds[0], StmtKind::Var { .. }));
        assert!(matches!(kinds[1], StmtKind::Label(_)));
        assert!(matches!(kinds[2], StmtKind::Assign { rhs: Rhs::Binary(_, BinOp::Add, _), .. }));
        assert!(matches!(
            kinds[3],
            StmtKind::Assign { place: Place { kind: PlaceKind::Deref(_), .. }, rhs: Rhs::Unary(UnOp::BitNot, _) }
        ));
        assert!(matches!(
            kinds[4],
            StmtKind::Assign {
                place: Place { kind: PlaceKind::Index(_, 2), .. },
                rhs: Rhs::Value(Value { kind: ValueKind::Integer(-5), .. })
            }
        ));
        assert!(matches!(kinds[5], StmtKind::If { relation: Relation::Lt, .. }));
        assert!(matches!(kinds[6], StmtKind::Assign { rhs: Rhs::Call(c), .. } if c.args.len() == 3));
        assert!(matches!(kinds[7], StmtKind::Call(c) if c.args.is_empty()));
        assert!(matches!(kinds[8], StmtKind::Goto(_)));
        assert!(matches!(kinds[9], StmtKind::Return(None)));
    }

    #[test]
    fn test_statement_span() {
        let program = parse("fn f() { x = 1; }");
        assert_eq!(body(&program)[0].span, Span::new(9, 15));
    }

    #[test]
    fn test_char_escapes() {
        let program = parse(r"fn f() { c = '\n'; d = '\x41'; }");
        let values: Vec<i64> = body(&program)
            .iter()
            .filter_map(|s| match &s.kind {
                StmtKind::Assign { rhs: Rhs::Value(Value { kind: ValueKind::Integer(v), .. }), .. } => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![10, 0x41]);
    }

    #[test]
    fn test_missing_semicolon() {
        let err = Parser::new("fn f() { x = 1 }").unwrap().parse().unwrap_err();
        assert!(err.to_string().contains("expected ';'"));
        assert_eq!(err.span(), Some(Span::new(15, 16)));
    }
}
