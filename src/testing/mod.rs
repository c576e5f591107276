//! Fault-injection harness for exercising execution strategies.

pub mod fault_injection;

pub use fault_injection::{FaultInjector, TEST_DELAY_COEFFICIENT, TestDatabase};
