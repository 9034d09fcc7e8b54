pub mod catalog;
pub mod layout;
pub mod settings;
