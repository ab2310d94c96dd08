#[macro_use]
extern crate diesel;
#[macro_use]
extern crate anyhow;

pub mod api;
pub mod cmd;
pub mod config;
pub mod errors;
pub mod handler;
pub mod helpers;
pub mod nsclient;
pub mod schema;
pub mod storage;
pub mod sync;
#[cfg(test)]
mod test;
