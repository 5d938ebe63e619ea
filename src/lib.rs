pub mod env;
pub mod evaluator;
pub mod lexer;
pub mod live;
pub mod parser;
pub mod value;

pub use env::Environment;
pub use evaluator::evaluate;
pub use lexer::*;
pub use live::LiveValue;
pub use value::*;

use std::rc::Rc;

/// Parses a complete program into its AST.
pub fn parse(input: &str) -> Result<parser::Expr, miette::Error> {
    parser::Parser::new(input).parse()
}

/// Parses `input` and starts a live evaluation against `env` in one step.
pub fn run(input: &str, env: &Environment) -> Result<LiveValue, miette::Error> {
    let expr = Rc::new(parse(input)?);
    Ok(evaluate(expr, env))
}
