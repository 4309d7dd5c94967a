//! The analysis dialect: a small Python-flavoured scripting language the
//! LLM is asked to produce. The crate parses it into an AST (validator and
//! cleaner operate on the tree) and interprets it in a restricted
//! environment (executor).

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod printer;

pub use ast::{BinOp, BoolOp, CmpOp, Expr, Stmt, Target};
pub use parser::parse;
pub use printer::to_source;
