pub mod mlp;
pub mod model;
mod optimizer;
