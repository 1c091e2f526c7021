// mexgen — MEX glue compiler
//
// Library root. Compiler phases are exposed as modules here.

pub mod analyze;
pub mod ast;
pub mod codegen;
pub mod dedup;
pub mod diag;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod stubgen;
