//! Interpreters for the bundled rule languages.

mod ecma;
mod lexer;
mod r;
mod scope;

pub use ecma::EcmaEnvironment;
pub use r::REnvironment;
