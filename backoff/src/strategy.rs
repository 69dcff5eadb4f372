/// Constant delay between attempts.
pub mod fixed;
