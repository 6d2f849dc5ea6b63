// Plot DSL parser module

pub mod ast;
pub mod build;
pub mod lexer;
pub mod pipeline;

// Public API re-exports
pub use ast::PlotSpec;
pub use build::build_plot;
pub use pipeline::parse_plot_spec;
