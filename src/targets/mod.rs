pub mod bmv2;

use num_bigint_dig::BigInt;
use num_traits::Zero;

use crate::executor::continuation::{Command, ExceptionKind};
use crate::executor::error::StepError;
use crate::executor::extern_methods::ExternMethodImpls;
use crate::executor::symbolic_setting::TestBackend;
use crate::executor::symbolic_value::mk_constant;
use crate::executor::table_stepper::{KeyProperties, TableStepper};
use crate::executor::test_object::TableMatch;
use crate::ir::expression::{Expr, ExprRef};
use crate::ir::types::Type;
use crate::unimplemented_step;

pub use bmv2::Bmv2Target;

/// Architecture-specific behaviour plugged into the steppers.
///
/// Every method except the registry accessor has a default that models an
/// architecture without guarantees: storage nobody wrote is taint, only the
/// core match kinds exist, and exceptions propagate to the top level.
pub trait TargetExtension {
    fn name(&self) -> &str;

    /// Extern implementations consulted before the core ones.
    fn extern_impls(&self) -> &ExternMethodImpls;

    /// The value of storage nobody wrote.
    ///
    /// # Arguments
    ///
    /// * `ty` - The resolved type of the storage.
    /// * `force_taint` - Whether the value must be taint regardless of what
    ///   the architecture guarantees.
    fn create_target_uninitialized(&self, ty: &Type, _force_taint: bool) -> ExprRef {
        Expr::taint(ty.clone())
    }

    /// Hit condition for a key whose match kind the core does not know.
    /// Returns `None` when the key matches every packet.
    fn compute_target_match_type(
        &self,
        _table: &mut TableStepper<'_>,
        key: &KeyProperties,
        _matches: &mut Vec<(String, TableMatch)>,
    ) -> Result<Option<ExprRef>, StepError> {
        Err(unimplemented_step!(
            "match kind {} of key {} on target {}",
            key.match_kind,
            key.name,
            self.name()
        ))
    }

    /// Whether a key of `match_kind` can be widened to match every packet
    /// in tests for `backend`.
    fn can_wildcard(&self, _match_kind: &str, _backend: TestBackend) -> bool {
        true
    }

    /// Gives the target a chance to evaluate a mutable table itself, e.g. a
    /// table backed by an action profile.
    ///
    /// # Returns
    ///
    /// `true` if the control-plane branches were produced by the target.
    fn eval_target_table(&self, _table: &mut TableStepper<'_>) -> Result<bool, StepError> {
        Ok(false)
    }

    /// Whether tests for `backend` can replace the default action of a
    /// table without keys.
    fn supports_default_override(&self, _backend: TestBackend) -> bool {
        false
    }

    /// Commands run when a parser raises `kind`, before the rest of the
    /// pipeline continues. `None` lets the exception terminate the path.
    fn parser_exception_handler(&self, _kind: ExceptionKind) -> Option<Vec<Command>> {
        None
    }
}

/// A target with no architecture-specific behaviour.
pub struct CoreTarget {
    impls: ExternMethodImpls,
}

impl CoreTarget {
    pub fn new() -> Self {
        CoreTarget {
            impls: ExternMethodImpls::new(&[]),
        }
    }
}

impl Default for CoreTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetExtension for CoreTarget {
    fn name(&self) -> &str {
        "core"
    }

    fn extern_impls(&self) -> &ExternMethodImpls {
        &self.impls
    }
}

/// The zero value of a scalar type, taint for anything else.
pub fn zero_value(ty: &Type) -> ExprRef {
    match ty {
        Type::Bits { .. } | Type::Bool | Type::Enum { .. } | Type::Error => {
            mk_constant(ty, BigInt::zero())
        }
        Type::String => Expr::string(""),
        _ => Expr::taint(ty.clone()),
    }
}

/// Looks a target up by its command-line name.
pub fn get_target(name: &str) -> Option<Box<dyn TargetExtension>> {
    match name {
        "bmv2" | "v1model" => Some(Box::new(Bmv2Target::new())),
        "core" => Some(Box::new(CoreTarget::new())),
        _ => None,
    }
}
