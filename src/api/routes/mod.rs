pub mod alerts;
pub mod handlers;
pub mod health;
pub mod pipeline;
