pub mod alphabet;
pub mod constants;
pub mod likelihood;
pub mod models;
pub mod patterns;
pub mod simulate;
pub mod tree;
pub mod treelikelihood;
pub mod utils;
