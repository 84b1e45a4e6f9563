//! Background workers

pub mod pending_payment_sweeper;
