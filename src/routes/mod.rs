pub mod alerts;
pub mod feed;
pub mod health;
pub mod holdings;
pub mod users;
