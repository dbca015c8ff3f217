pub mod enums;
pub mod error;
pub mod objects;
pub mod views;
