pub mod cache;
pub mod webhook;
