pub mod ident;
pub mod error;
pub mod clock;
pub mod config;
pub mod phone;
pub mod identity;
pub mod storage;
pub mod credentials;
pub mod server;
