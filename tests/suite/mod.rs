//! Integration test suites

mod agent_loop;
mod approvals;
