pub mod booking;
pub mod cleanup;
pub mod payment;
