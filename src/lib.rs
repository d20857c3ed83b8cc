pub mod executor;
pub mod ir;
pub mod solver;
pub mod targets;

pub mod input_user;
