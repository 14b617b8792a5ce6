pub mod catalog;
pub mod command;
pub mod display;
pub mod launcher;
