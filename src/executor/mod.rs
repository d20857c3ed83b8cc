pub mod branch;
pub mod cmd_stepper;
pub mod concolic;
pub mod continuation;
pub mod coverage;
pub mod error;
pub mod execution_state;
pub mod expr_stepper;
pub mod extern_methods;
pub mod path_selection;
pub mod small_step;
pub mod symbolic_env;
pub mod symbolic_executor;
pub mod symbolic_setting;
pub mod symbolic_value;
pub mod table_stepper;
pub mod test_object;
pub mod utils;
