//! Rewrite engine and clipboard plumbing.

pub mod clipboard;
pub mod processor;
pub mod rules;
