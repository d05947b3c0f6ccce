pub mod eval;
pub mod judge;
pub mod span;
