pub mod activity;
pub mod bootstrap;
pub mod cache;
pub mod gate;
pub mod password;
pub mod rate_limit;
