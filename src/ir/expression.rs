use std::fmt;
use std::rc::Rc;

use num_bigint_dig::BigInt;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::ir::types::Type;

pub type ExprRef = Rc<Expr>;

/// Parameter direction of a call argument, taken from the callee signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    None,
    In,
    Out,
    InOut,
}

impl Direction {
    /// Arguments that the callee may write are passed as references and are
    /// never reduced before the call.
    pub fn is_write_capable(&self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

impl Default for Direction {
    fn default() -> Self {
        Direction::None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Argument {
    #[serde(default)]
    pub direction: Direction,
    pub expr: ExprRef,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedExpr {
    pub name: String,
    pub expr: ExprRef,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BAnd,
    BOr,
    BXor,
    Equ,
    Neq,
    Lss,
    Leq,
    Grt,
    Geq,
    LAnd,
    LOr,
    AddSat,
    SubSat,
    Concat,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Equ | BinOp::Neq | BinOp::Lss | BinOp::Leq | BinOp::Grt | BinOp::Geq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::LAnd | BinOp::LOr)
    }

    pub fn is_saturating(&self) -> bool {
        matches!(self, BinOp::AddSat | BinOp::SubSat)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::BAnd => "&",
            BinOp::BOr => "|",
            BinOp::BXor => "^",
            BinOp::Equ => "==",
            BinOp::Neq => "!=",
            BinOp::Lss => "<",
            BinOp::Leq => "<=",
            BinOp::Grt => ">",
            BinOp::Geq => ">=",
            BinOp::LAnd => "&&",
            BinOp::LOr => "||",
            BinOp::AddSat => "|+|",
            BinOp::SubSat => "|-|",
            BinOp::Concat => "++",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnOp {
    LNot,
    Neg,
    Cmpl,
}

impl UnOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnOp::LNot => "!",
            UnOp::Neg => "-",
            UnOp::Cmpl => "~",
        }
    }
}

/// Keysets used by select cases and constant table entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Keyset {
    Default,
    Value { value: ExprRef },
    Mask { value: ExprRef, mask: ExprRef },
    Range { lo: ExprRef, hi: ExprRef },
    Tuple { components: Vec<Keyset> },
    ValueSet { name: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectCase {
    pub keyset: Keyset,
    pub state: String,
}

/// Expression nodes.
///
/// The first group mirrors what the front end emits. `SymbolicVar`, `Taint`,
/// `Concolic` and `Placeholder` only appear at run time: they are produced by
/// the interpreter while stepping.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Expr {
    Constant {
        ty: Type,
        #[serde_as(as = "DisplayFromStr")]
        value: BigInt,
    },
    Bool {
        value: bool,
    },
    Str {
        value: String,
    },
    Path {
        name: String,
        ty: Type,
    },
    Member {
        expr: ExprRef,
        member: String,
        ty: Type,
    },
    ArrayIndex {
        array: ExprRef,
        index: ExprRef,
        ty: Type,
    },
    MethodCall {
        method: ExprRef,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default = "void_type")]
        ty: Type,
    },
    TableApply {
        table: String,
        keys: Vec<ExprRef>,
    },
    Mux {
        cond: ExprRef,
        if_true: ExprRef,
        if_false: ExprRef,
        ty: Type,
    },
    Binary {
        op: BinOp,
        left: ExprRef,
        right: ExprRef,
        ty: Type,
    },
    Unary {
        op: UnOp,
        expr: ExprRef,
        ty: Type,
    },
    Cast {
        expr: ExprRef,
        ty: Type,
    },
    Slice {
        expr: ExprRef,
        hi: ExprRef,
        lo: ExprRef,
        ty: Type,
    },
    Select {
        select: ExprRef,
        cases: Vec<SelectCase>,
    },
    List {
        components: Vec<ExprRef>,
    },
    Struct {
        fields: Vec<NamedExpr>,
        ty: Type,
    },
    SymbolicVar {
        name: String,
        ty: Type,
    },
    Taint {
        ty: Type,
    },
    Concolic {
        method: String,
        args: Vec<ExprRef>,
        id: u64,
        ty: Type,
    },
    Placeholder {
        id: u64,
        ty: Type,
    },
}

fn void_type() -> Type {
    Type::Void
}

/// A canonical, fully qualified program location such as `hdr.eth.type`,
/// `hs[2].f` or `*table.t.hit`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateVariable {
    pub name: String,
    pub ty: Type,
}

impl StateVariable {
    pub fn new(name: &str, ty: Type) -> Self {
        StateVariable {
            name: name.to_string(),
            ty,
        }
    }

    /// Canonical variable of a field of this variable.
    pub fn field(&self, field: &str, ty: Type) -> Self {
        StateVariable {
            name: format!("{}.{}", self.name, field),
            ty,
        }
    }

    /// Canonical validity bit of a header variable.
    pub fn validity(&self) -> Self {
        self.field(VALID_FIELD, Type::Bool)
    }

    pub fn to_expr(&self) -> ExprRef {
        Rc::new(Expr::Path {
            name: self.name.clone(),
            ty: self.ty.clone(),
        })
    }
}

impl fmt::Display for StateVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Name of the pseudo field holding a header's validity.
pub const VALID_FIELD: &str = "$valid";

impl Expr {
    pub fn constant(ty: Type, value: BigInt) -> ExprRef {
        Rc::new(Expr::Constant { ty, value })
    }

    pub fn bits(width: u32, value: u64) -> ExprRef {
        Expr::constant(Type::bits(width), BigInt::from(value))
    }

    pub fn boolean(value: bool) -> ExprRef {
        Rc::new(Expr::Bool { value })
    }

    pub fn string(value: &str) -> ExprRef {
        Rc::new(Expr::Str {
            value: value.to_string(),
        })
    }

    pub fn path(name: &str, ty: Type) -> ExprRef {
        Rc::new(Expr::Path {
            name: name.to_string(),
            ty,
        })
    }

    pub fn member(expr: ExprRef, member: &str, ty: Type) -> ExprRef {
        Rc::new(Expr::Member {
            expr,
            member: member.to_string(),
            ty,
        })
    }

    pub fn symbolic_var(name: &str, ty: Type) -> ExprRef {
        Rc::new(Expr::SymbolicVar {
            name: name.to_string(),
            ty,
        })
    }

    pub fn taint(ty: Type) -> ExprRef {
        Rc::new(Expr::Taint { ty })
    }

    pub fn method_call(method: ExprRef, args: Vec<Argument>, ty: Type) -> ExprRef {
        Rc::new(Expr::MethodCall { method, args, ty })
    }

    /// The type of the value this expression produces.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Constant { ty, .. }
            | Expr::Path { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::ArrayIndex { ty, .. }
            | Expr::MethodCall { ty, .. }
            | Expr::Mux { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Cast { ty, .. }
            | Expr::Slice { ty, .. }
            | Expr::Struct { ty, .. }
            | Expr::SymbolicVar { ty, .. }
            | Expr::Taint { ty }
            | Expr::Concolic { ty, .. }
            | Expr::Placeholder { ty, .. } => ty.clone(),
            Expr::Bool { .. } => Type::Bool,
            Expr::Str { .. } => Type::String,
            Expr::TableApply { .. } => Type::Void,
            Expr::Select { .. } => Type::State,
            Expr::List { .. } => Type::Void,
        }
    }

    /// A value is symbolic when it needs no further stepping: literals,
    /// run-time leaves, and operations whose operands are all symbolic.
    pub fn is_symbolic(&self) -> bool {
        match self {
            Expr::Constant { .. }
            | Expr::Bool { .. }
            | Expr::Str { .. }
            | Expr::SymbolicVar { .. }
            | Expr::Taint { .. }
            | Expr::Concolic { .. } => true,
            // Saturating operations are rewritten into a Mux before they are
            // considered values.
            Expr::Binary {
                op, left, right, ..
            } => !op.is_saturating() && left.is_symbolic() && right.is_symbolic(),
            Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => expr.is_symbolic(),
            Expr::Slice { expr, hi, lo, .. } => {
                expr.is_symbolic() && hi.is_symbolic() && lo.is_symbolic()
            }
            Expr::List { components } => components.iter().all(|c| c.is_symbolic()),
            Expr::Struct { fields, .. } => fields.iter().all(|f| f.expr.is_symbolic()),
            _ => false,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant { .. } | Expr::Bool { .. })
    }

    pub fn as_bigint(&self) -> Option<&BigInt> {
        match self {
            Expr::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Expr::Bool { value } => Some(*value),
            _ => None,
        }
    }

    /// Canonical state variable denoted by a reference expression, if any.
    ///
    /// Array indices must already be constants; anything else yields `None`.
    pub fn state_variable(&self) -> Option<StateVariable> {
        match self {
            Expr::Path { name, ty } => Some(StateVariable::new(name, ty.clone())),
            Expr::Member { expr, member, ty } => {
                let parent = expr.state_variable()?;
                Some(parent.field(member, ty.clone()))
            }
            Expr::ArrayIndex { array, index, ty } => {
                let parent = array.state_variable()?;
                let idx = index.as_bigint()?;
                Some(StateVariable::new(
                    &format!("{}[{}]", parent.name, idx),
                    ty.clone(),
                ))
            }
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Expr::Path { .. } | Expr::Member { .. } | Expr::ArrayIndex { .. }
        )
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { ty, value } => match ty.width_bits() {
                Some(w) if matches!(ty, Type::Bits { .. }) => {
                    if ty.is_signed() {
                        write!(f, "{}s{}", w, value)
                    } else {
                        write!(f, "{}w{}", w, value)
                    }
                }
                _ => write!(f, "{}", value),
            },
            Expr::Bool { value } => write!(f, "{}", value),
            Expr::Str { value } => write!(f, "\"{}\"", value),
            Expr::Path { name, .. } => write!(f, "{}", name),
            Expr::Member { expr, member, .. } => write!(f, "{}.{}", expr, member),
            Expr::ArrayIndex { array, index, .. } => write!(f, "{}[{}]", array, index),
            Expr::MethodCall { method, args, .. } => {
                let args = args
                    .iter()
                    .map(|a| a.expr.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}({})", method, args)
            }
            Expr::TableApply { table, .. } => write!(f, "{}.apply()", table),
            Expr::Mux {
                cond,
                if_true,
                if_false,
                ..
            } => write!(f, "({} ? {} : {})", cond, if_true, if_false),
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Unary { op, expr, .. } => write!(f, "{}{}", op.symbol(), expr),
            Expr::Cast { expr, ty } => write!(f, "(({}) {})", ty, expr),
            Expr::Slice { expr, hi, lo, .. } => write!(f, "{}[{}:{}]", expr, hi, lo),
            Expr::Select { select, cases } => {
                write!(f, "select({}) {{", select)?;
                for case in cases {
                    write!(f, " {:?}: {};", case.keyset, case.state)?;
                }
                write!(f, " }}")
            }
            Expr::List { components } => {
                let items = components
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{}}}", items)
            }
            Expr::Struct { fields, .. } => {
                let items = fields
                    .iter()
                    .map(|n| format!("{} = {}", n.name, n.expr))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{}}}", items)
            }
            Expr::SymbolicVar { name, .. } => write!(f, "{}", name),
            Expr::Taint { ty } => write!(f, "taint<{}>", ty),
            Expr::Concolic {
                method, args, id, ..
            } => {
                let args = args
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{}#{}({})", method, id, args)
            }
            Expr::Placeholder { id, .. } => write!(f, "?{}", id),
        }
    }
}
