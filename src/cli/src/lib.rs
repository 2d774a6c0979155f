//! Xenomorph CLI library.

pub mod commands;
