//! Live feed over TCP into the subscriber and the datastore.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use nalgebra::Vector3;

use drishti_servo::core::from_translation;
use drishti_servo::feed::wire::{MarkerRecord, encode_frame};
use drishti_servo::{
    ApproachVisualServoing, Datastore, FeedStatus, FrameProvider, RunStatus, SUBSCRIBER_KEY,
    ServoPhase, SimHost, State, StaticFrames, Transform, VisionSubscriber, marker_key,
};

use crate::harness::{DT, Scenario};

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_published_markers_reach_store_and_datastore() {
    let mut config = Scenario::default().vision_config();
    config.channel = "127.0.0.1:0".to_string();
    let frames: Arc<dyn FrameProvider> = Arc::new(StaticFrames::new("robot"));
    let datastore = Arc::new(Datastore::new());
    let subscriber = VisionSubscriber::install(&config, frames, &datastore).expect("install");
    assert!(VisionSubscriber::find(&datastore).is_some());
    assert_eq!(subscriber.status(), FeedStatus::Disconnected);

    let addr = subscriber.feed_address().expect("live feed bound");
    let mut stream = TcpStream::connect(addr).expect("connect");
    assert!(wait_for(|| subscriber.status() == FeedStatus::Connected));

    let pose = from_translation(Vector3::new(0.1, -0.2, 1.0));
    let frame = encode_frame(&[
        MarkerRecord::new("target", &pose),
        MarkerRecord::new("stranger", &pose),
    ])
    .expect("encode");
    stream.write_all(&frame).expect("write");

    assert!(wait_for(|| {
        subscriber.tick(0.001);
        subscriber.visible("target")
    }));
    assert!(!subscriber.visible("gripper"));
    assert!(!subscriber.contains("stranger"));

    // Identity camera: world pose equals the observed pose
    let (world, stamp): (Transform, f64) = datastore
        .get(&marker_key("target"))
        .expect("marker published");
    assert_relative_eq!(world, pose, epsilon = 1e-9);
    assert!(stamp >= 0.0);
    assert_relative_eq!(subscriber.camera_relative_pose("target").unwrap(), pose, epsilon = 1e-9);

    drop(stream);
    assert!(wait_for(|| {
        subscriber.tick(0.001);
        subscriber.status() == FeedStatus::Disconnected
    }));

    subscriber.uninstall();
    assert!(!datastore.has(SUBSCRIBER_KEY));
    assert!(!datastore.has(&marker_key("target")));
}

#[test]
fn test_marker_decays_after_publisher_goes_quiet() {
    let mut config = Scenario::default().vision_config();
    config.channel = "127.0.0.1:0".to_string();
    let frames: Arc<dyn FrameProvider> = Arc::new(StaticFrames::new("robot"));
    let datastore = Arc::new(Datastore::new());
    let subscriber = VisionSubscriber::install(&config, frames, &datastore).expect("install");

    let addr = subscriber.feed_address().expect("live feed bound");
    let mut stream = TcpStream::connect(addr).expect("connect");
    let frame = encode_frame(&[MarkerRecord::new("gripper", &Transform::identity())]).expect("encode");
    stream.write_all(&frame).expect("write");
    assert!(wait_for(|| {
        subscriber.tick(0.0);
        subscriber.visible("gripper")
    }));

    // Silence longer than the visibility timeout
    let timeout = config.visibility_timeout;
    let ticks = (timeout / DT).ceil() as usize + 2;
    for _ in 0..ticks {
        subscriber.tick(DT);
    }
    assert!(!subscriber.visible("gripper"));
    assert!(subscriber.lookup("gripper").expect("registered").observed);

    subscriber.uninstall();
}

#[test]
fn test_unusable_channel_is_not_fatal() {
    let scenario = Scenario {
        approach: false,
        ..Scenario::default()
    };
    let mut config = scenario.vision_config();
    config.channel = "not an endpoint".to_string();

    let frames = Arc::new(
        StaticFrames::new("robot")
            .with("robot", "tool", from_translation(scenario.tool))
            .with("env", "slot", from_translation(scenario.slot)),
    );
    let mut host = SimHost::new(Arc::clone(&frames), DT);
    let provider: Arc<dyn FrameProvider> = frames;
    let subscriber =
        VisionSubscriber::install(&config, provider, host.shared_datastore()).expect("install");
    assert_eq!(subscriber.status(), FeedStatus::Disconnected);
    assert_eq!(subscriber.status_label(), "disconnected");
    assert!(subscriber.feed_address().is_none());

    let mut state = ApproachVisualServoing::new(scenario.servo_config());
    state.start(&mut host).expect("start");
    for _ in 0..20 {
        subscriber.tick(DT);
        assert_eq!(state.run(&mut host).expect("run"), RunStatus::Running);
        host.step();
    }
    assert_eq!(state.phase(), ServoPhase::AwaitingReacquire);
    let status = state.status();
    assert!(status.markers.iter().all(|(_, visible)| !visible));
    assert!(status.to_string().contains("gripper: not visible"));

    state.teardown(&mut host);
    subscriber.uninstall();
}
