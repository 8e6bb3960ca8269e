/// Newline delimited frames.
pub mod lines;
