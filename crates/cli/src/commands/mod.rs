pub mod cart;
pub mod manifest;
