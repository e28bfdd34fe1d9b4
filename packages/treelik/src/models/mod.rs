pub mod site_model;
pub mod substitution;
