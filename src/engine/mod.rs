pub mod signal;
pub mod trader;
