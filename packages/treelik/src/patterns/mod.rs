pub mod site_patterns;
