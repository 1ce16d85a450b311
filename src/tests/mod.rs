//! Whole-agent tests driven by a manual clock and in-memory peripherals.

mod agent_tests;
mod support;
