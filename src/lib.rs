pub mod annotate;
pub mod app;
pub mod assemble;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod phylo;
pub mod remap;
pub mod schema;
pub mod sources;
pub mod store;
pub mod tree_builder;
