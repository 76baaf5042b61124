pub mod price;
pub mod ticker;
