//! Syntax tree of a three-address listing
//!
//! Names are interned; the interner travels with the [`Program`].

use string_interner::{DefaultStringInterner, DefaultSymbol};

use crate::common::Span;
use crate::ir::{BinOp, Relation, UnOp};
use crate::types::IrType;

pub type Name = DefaultSymbol;

/// A parsed source file
#[derive(Debug)]
pub struct Program {
    pub items: Vec<Item>,
    pub names: DefaultStringInterner,
}

impl Program {
    /// Text of an interned name
    pub fn name(&self, name: Name) -> &str {
        self.names.resolve(name).unwrap_or("<unknown>")
    }
}

#[derive(Debug, Clone)]
pub enum Item {
    Global(Global),
    Extern(FunctionDecl),
    Function(FunctionDef),
}

#[derive(Debug, Clone)]
pub struct Global {
    pub name: Name,
    pub ty: IrType,
    pub init: Option<Initializer>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Initializer {
    Integer(i64),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Name,
    pub ty: IrType,
    pub span: Span,
}

/// Name, parameters and return type of a function
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: Name,
    pub params: Vec<Param>,
    pub return_type: IrType,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub decl: FunctionDecl,
    pub body: Vec<Stmt>,
    /// Span of the closing brace
    pub end: Span,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Var { name: Name, ty: IrType },
    Label(Name),
    Goto(Name),
    If {
        left: Value,
        relation: Relation,
        right: Value,
        label: Name,
    },
    Return(Option<Value>),
    Call(CallExpr),
    Assign { place: Place, rhs: Rhs },
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub callee: Name,
    pub args: Vec<Value>,
    pub span: Span,
}

/// Something that can be assigned to
#[derive(Debug, Clone)]
pub struct Place {
    pub kind: PlaceKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PlaceKind {
    Name(Name),
    /// `*p`
    Deref(Name),
    /// `a[i]`, constant index
    Index(Name, i64),
}

#[derive(Debug, Clone)]
pub enum Rhs {
    Call(CallExpr),
    Unary(UnOp, Value),
    Value(Value),
    Binary(Value, BinOp, Value),
}

#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    Integer(i64),
    String(Vec<u8>),
    AddressOf(Name),
    Place(Place),
}
