//! Shared argument parsing and setup for the wiremod command line tools.

pub mod common;
