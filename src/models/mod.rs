pub mod dictionary;
pub mod field;
pub mod group;
pub mod project;
pub mod state;
pub mod template;
pub mod user;
pub mod validation;
