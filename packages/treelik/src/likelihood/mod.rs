pub mod buffer;
pub mod config;
pub mod error;
pub mod general_core;
pub mod kernels;
pub mod likelihood_core;
pub mod operation;
pub mod real;
pub mod registry;
pub mod slots;
