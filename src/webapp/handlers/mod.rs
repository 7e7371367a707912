pub mod health;
pub mod premium;
pub mod quote;
