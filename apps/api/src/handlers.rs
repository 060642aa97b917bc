pub mod health;
pub mod lockouts;
pub mod orders;
