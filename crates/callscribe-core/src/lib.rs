//! Core config, errors, and the telephony/transcription wire codec for callscribe.

pub mod config;
pub mod error;
pub mod protocol;
