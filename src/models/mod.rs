pub mod attribute_definition;
pub mod entry;
pub mod whoop;
