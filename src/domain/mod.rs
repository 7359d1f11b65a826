pub mod fraud;
pub mod ports;
pub mod transaction;
