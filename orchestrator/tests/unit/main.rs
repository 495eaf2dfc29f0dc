//! Unit test target

mod common;

mod test_fsm;
mod test_health;
mod test_pipeline;
mod test_readiness;
mod test_server;
