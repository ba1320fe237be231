pub mod rhmi;
pub mod shared;
