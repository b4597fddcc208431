//! Activity logging: human status lines on stdout plus an optional JSONL
//! file, both written by one logger thread.

pub mod activity;
pub mod jsonl;
