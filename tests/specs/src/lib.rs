// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end protocol scenarios.
//!
//! Each scenario runs a real seat against the scripted authentication stack
//! and speaks the binary greeter protocol over real pipes, exactly as a
//! greeter process would.

use doorman::test_support::{ScriptedAuthStack, ScriptedUser, SeatHarness, SeatHarnessBuilder};

/// The password accepted for `alice` in every scenario.
pub const ALICE_PASSWORD: &str = "s3cret";

/// Authentication stack with the standard scenario users: `alice`
/// (password only) and `two-factor` (password, then a one-time password).
pub fn scenario_stack() -> ScriptedAuthStack {
    ScriptedAuthStack::new()
        .user("alice", ScriptedUser::password(ALICE_PASSWORD))
        .user(
            "two-factor",
            ScriptedUser::password(ALICE_PASSWORD).with_round(
                vec![doorman::auth::AuthMessage::visible_prompt("OTP:")],
                vec!["otp".to_owned()],
            ),
        )
}

/// Seat harness builder preloaded with the scenario users.
pub fn scenario_seat() -> SeatHarnessBuilder {
    SeatHarness::builder().auth(scenario_stack())
}
