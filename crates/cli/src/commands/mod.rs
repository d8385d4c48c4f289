//! `qb-cli` subcommands.

pub mod cart;
pub mod migrate;
