pub mod attribute_definitions;
pub mod charts;
pub mod entries;
pub mod health;
pub mod whoop;
