#![allow(dead_code)]

pub mod banner;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod daemonize;
pub mod error;
pub mod keys;
pub mod node;
