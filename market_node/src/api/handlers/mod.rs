pub mod admin;
pub mod buyer;
pub mod seller;
pub mod status;
