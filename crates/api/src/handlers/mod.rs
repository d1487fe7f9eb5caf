pub mod coverage;
pub mod health;
pub mod slave;
pub mod status;
