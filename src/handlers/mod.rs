pub mod ops;
pub mod public;
pub mod webhooks;
