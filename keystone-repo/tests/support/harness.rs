use keystone_core::User;
use keystone_repo::{EntityMapper, UserMapper};
use keystone_test_utils::{fixtures, TestHarness};

/// Harness with the default layer configuration.
pub fn test_harness() -> TestHarness {
    TestHarness::new().expect("Failed to build test harness")
}

/// Seed one user row directly into the executor.
pub fn seed_user(harness: &TestHarness, id: &str, email: &str) -> User {
    let user = UserMapper::build(fixtures::new_user(email), id.to_string(), harness.now());
    harness.seed::<UserMapper>(std::slice::from_ref(&user));
    user
}
