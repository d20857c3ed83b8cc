pub mod expression;
pub mod program;
pub mod statement;
pub mod types;
