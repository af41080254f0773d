//! Integration test harness: mock hardware + behavior suites.

mod monitor_tests;
mod server_tests;
