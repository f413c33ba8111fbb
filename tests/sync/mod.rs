// Test module entry point for sync tests

mod common;
mod engine_tests;
mod preview_tests;
