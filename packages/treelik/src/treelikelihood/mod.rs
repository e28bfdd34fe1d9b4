pub mod tree_likelihood;
