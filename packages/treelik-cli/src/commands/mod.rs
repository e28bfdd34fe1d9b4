pub mod check_restore;
pub mod compare;
pub mod dataset;
pub mod evaluate;
