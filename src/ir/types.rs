use std::fmt;

use num_bigint_dig::BigInt;
use num_traits::One;
use serde::{Deserialize, Serialize};

/// A named field of a header or struct type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

/// Types attached to IR nodes by the front end.
///
/// Composite types are carried structurally so that a node's type is usable
/// without consulting the program; `Named` is the only indirection and is
/// resolved through `ProgramInfo::resolve_type`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Type {
    Bits { width: u32, signed: bool },
    Bool,
    String,
    Header { name: String, fields: Vec<Field> },
    Struct { name: String, fields: Vec<Field> },
    Stack { element: Box<Type>, size: usize },
    Enum { name: String, members: Vec<String> },
    Error,
    Extern { name: String },
    Named { name: String },
    Table,
    Action,
    State,
    Void,
}

impl Type {
    pub fn bits(width: u32) -> Type {
        Type::Bits {
            width,
            signed: false,
        }
    }

    pub fn int(width: u32) -> Type {
        Type::Bits {
            width,
            signed: true,
        }
    }

    /// Width in bits of scalar types. Enums and errors are encoded as 32-bit
    /// values, booleans as a single bit.
    pub fn width_bits(&self) -> Option<u32> {
        match self {
            Type::Bits { width, .. } => Some(*width),
            Type::Bool => Some(1),
            Type::Enum { .. } | Type::Error => Some(32),
            Type::Header { fields, .. } | Type::Struct { fields, .. } => fields
                .iter()
                .map(|f| f.ty.width_bits())
                .try_fold(0_u32, |acc, w| w.map(|w| acc + w)),
            Type::Stack { element, size } => element.width_bits().map(|w| w * (*size as u32)),
            _ => None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Type::Bits { signed: true, .. })
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Type::Header { .. } | Type::Struct { .. })
    }

    pub fn is_header(&self) -> bool {
        matches!(self, Type::Header { .. })
    }

    pub fn fields(&self) -> Option<&[Field]> {
        match self {
            Type::Header { fields, .. } | Type::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields()?
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.ty)
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            Type::Header { name, .. }
            | Type::Struct { name, .. }
            | Type::Enum { name, .. }
            | Type::Extern { name }
            | Type::Named { name } => Some(name),
            _ => None,
        }
    }

    /// Largest unsigned value representable in `width` bits.
    pub fn max_value(width: u32) -> BigInt {
        (BigInt::one() << width as usize) - BigInt::one()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bits {
                width,
                signed: false,
            } => write!(f, "bit<{}>", width),
            Type::Bits {
                width,
                signed: true,
            } => write!(f, "int<{}>", width),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Header { name, .. } => write!(f, "header {}", name),
            Type::Struct { name, .. } => write!(f, "struct {}", name),
            Type::Stack { element, size } => write!(f, "{}[{}]", element, size),
            Type::Enum { name, .. } => write!(f, "enum {}", name),
            Type::Error => write!(f, "error"),
            Type::Extern { name } => write!(f, "extern {}", name),
            Type::Named { name } => write!(f, "{}", name),
            Type::Table => write!(f, "table"),
            Type::Action => write!(f, "action"),
            Type::State => write!(f, "state"),
            Type::Void => write!(f, "void"),
        }
    }
}
