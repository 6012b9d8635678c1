//! End-to-end approach + visual servoing runs on the kinematic host.

use approx::assert_relative_eq;
use nalgebra::Vector3;

use drishti_servo::{
    ApproachVisualServoing, FeedMode, RunStatus, ServoCommand, ServoOutput, ServoPhase, State,
};

use crate::harness::{Harness, Scenario};

fn start(harness: &mut Harness, scenario: &Scenario) -> ApproachVisualServoing {
    let mut state = ApproachVisualServoing::new(scenario.servo_config());
    state.start(&mut harness.host).expect("state starts");
    state
}

fn distance_to_slot(harness: &Harness, scenario: &Scenario) -> f64 {
    (harness.tool().translation.vector - scenario.slot).norm()
}

#[test]
fn test_approach_then_servo_reaches_slot() {
    let scenario = Scenario::default();
    let mut harness = Harness::new(&scenario);
    let mut state = start(&mut harness, &scenario);
    assert_eq!(state.phase(), ServoPhase::Approaching);

    // Approach ends above the slot
    for _ in 0..200 {
        harness.tick(&mut state);
        if state.phase() != ServoPhase::Approaching {
            break;
        }
    }
    assert_eq!(state.phase(), ServoPhase::Servoing);
    let above = harness.tool().translation.vector;
    assert_relative_eq!(above, scenario.slot + Vector3::new(0.0, 0.0, 0.1), epsilon = 1e-3);

    let output = harness.run_to_completion(&mut state, 2000);
    assert_eq!(output, Some(ServoOutput::Ok));
    assert_eq!(state.phase(), ServoPhase::Converged);
    assert!(distance_to_slot(&harness, &scenario) < scenario.eval);

    state.teardown(&mut harness.host);
    assert!(harness.host.sim().speed_bound("robot", "tool").is_none());
}

#[test]
fn test_tool_at_goal_converges_after_debounce() {
    let scenario = Scenario {
        tool: Scenario::default().slot,
        approach: false,
        ..Scenario::default()
    };
    let mut harness = Harness::new(&scenario);
    let mut state = start(&mut harness, &scenario);

    for _ in 0..9 {
        assert_eq!(harness.tick(&mut state), RunStatus::Running);
    }
    assert_eq!(harness.tick(&mut state), RunStatus::Completed(ServoOutput::Ok));
    assert_eq!(harness.ticks(), 10);
}

#[test]
fn test_no_feed_reports_no_vision() {
    let scenario = Scenario {
        mode: FeedMode::None,
        ..Scenario::default()
    };
    let mut harness = Harness::new(&scenario);
    let mut state = start(&mut harness, &scenario);
    assert_eq!(state.phase(), ServoPhase::Failed);
    assert_eq!(
        harness.tick(&mut state),
        RunStatus::Completed(ServoOutput::NoVision)
    );
    assert_eq!(ServoOutput::NoVision.to_string(), "NoVision");
}

#[test]
fn test_occlusion_holds_then_recovers() {
    let scenario = Scenario {
        tool: Scenario::default().slot + Vector3::new(0.05, 0.0, 0.0),
        approach: false,
        ..Scenario::default()
    };
    let mut harness = Harness::new(&scenario);
    let mut state = start(&mut harness, &scenario);

    for _ in 0..20 {
        harness.tick(&mut state);
    }
    assert_eq!(state.phase(), ServoPhase::Servoing);

    // Longer than the visibility timeout
    harness.occlude("gripper");
    for _ in 0..40 {
        harness.tick(&mut state);
    }
    assert_eq!(state.phase(), ServoPhase::AwaitingReacquire);
    let bound = harness.host.sim().speed_bound("robot", "tool").expect("bound set");
    assert_eq!(bound.linear(), 0.0);

    let held = harness.tool();
    for _ in 0..10 {
        assert_eq!(harness.tick(&mut state), RunStatus::Running);
    }
    assert_relative_eq!(harness.tool(), held, epsilon = 1e-12);

    harness.reveal("gripper");
    let output = harness.run_to_completion(&mut state, 2000);
    assert_eq!(output, Some(ServoOutput::Ok));
    assert!(distance_to_slot(&harness, &scenario) < scenario.eval);
}

#[test]
fn test_manual_confirmation_holds_until_enabled() {
    let scenario = Scenario {
        tool: Scenario::default().slot + Vector3::new(0.0, 0.05, 0.0),
        approach: false,
        manual_confirmation: true,
        ..Scenario::default()
    };
    let mut harness = Harness::new(&scenario);
    let mut state = start(&mut harness, &scenario);

    let initial = harness.tool();
    for _ in 0..30 {
        assert_eq!(harness.tick(&mut state), RunStatus::Running);
    }
    assert_eq!(state.phase(), ServoPhase::AwaitingEnable);
    assert_eq!(state.status().label, "not enabled");
    assert_relative_eq!(harness.tool(), initial, epsilon = 1e-12);

    state
        .handle_command(ServoCommand::Enable, &mut harness.host)
        .expect("enable accepted");
    assert_eq!(state.phase(), ServoPhase::Servoing);

    let output = harness.run_to_completion(&mut state, 2000);
    assert_eq!(output, Some(ServoOutput::Ok));
}

#[test]
fn test_pause_stops_motion() {
    let scenario = Scenario {
        tool: Scenario::default().slot + Vector3::new(0.0, 0.0, 0.08),
        approach: false,
        ..Scenario::default()
    };
    let mut harness = Harness::new(&scenario);
    let mut state = start(&mut harness, &scenario);
    for _ in 0..10 {
        harness.tick(&mut state);
    }

    state
        .handle_command(ServoCommand::Pause, &mut harness.host)
        .expect("pause accepted");
    assert_eq!(state.status().label, "paused");
    let paused = harness.tool();
    for _ in 0..20 {
        harness.tick(&mut state);
    }
    assert_relative_eq!(harness.tool(), paused, epsilon = 1e-12);

    state
        .handle_command(ServoCommand::Resume, &mut harness.host)
        .expect("resume accepted");
    assert_eq!(harness.run_to_completion(&mut state, 2000), Some(ServoOutput::Ok));
}
