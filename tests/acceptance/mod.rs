//! Integration tests for mailbox acceptance testing.

mod common;
mod concurrency_test;
mod lifecycle_test;
mod schedule_test;
