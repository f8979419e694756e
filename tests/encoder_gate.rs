//! Supervisor and viewer count wired together the way the binary does it

use std::sync::Arc;
use std::time::Duration;

use deskcast::supervisor::{CommandSpec, ProcessControl, Supervisor};
use deskcast::viewers::{EncoderGate, ViewerCount};
use deskcast::AppError;

const ENCODERS: [&str; 2] = ["video-encoder", "audio-encoder"];

fn supervisor() -> Arc<Supervisor> {
    let supervisor = Supervisor::new(false).with_restart_delay(Duration::from_millis(50));
    for id in ENCODERS {
        supervisor
            .add_command(CommandSpec::shell(id, "sleep 30").auto_start(false))
            .unwrap();
    }
    Arc::new(supervisor)
}

fn running(supervisor: &Supervisor) -> Vec<bool> {
    supervisor.status().into_iter().map(|s| s.running).collect()
}

async fn wait_for(supervisor: &Supervisor, expected: [bool; 2]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while running(supervisor) != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {:?}, have {:?}",
            expected,
            running(supervisor)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_encoders_follow_viewers() {
    let supervisor = supervisor();
    assert!(supervisor.launch());

    let viewers = Arc::new(ViewerCount::new());
    let gate = EncoderGate::new(supervisor.clone() as Arc<dyn ProcessControl>, ENCODERS)
        .spawn(viewers.clone());

    assert_eq!(running(&supervisor), [false, false]);

    let first = viewers.join();
    wait_for(&supervisor, [true, true]).await;

    // A second viewer changes nothing
    let second = viewers.join();
    drop(first);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(running(&supervisor), [true, true]);

    drop(second);
    wait_for(&supervisor, [false, false]).await;

    // Stopping again is reported, not silently accepted
    assert!(matches!(
        supervisor.stop("video-encoder"),
        Err(AppError::AlreadyInState { .. })
    ));

    drop(viewers);
    tokio::time::timeout(Duration::from_secs(5), gate)
        .await
        .unwrap()
        .unwrap();
    supervisor.stop_all();
}

#[tokio::test]
async fn test_gate_tolerates_manual_control() {
    let supervisor = supervisor();
    supervisor.launch();

    // Started by hand before anyone connects
    supervisor.start("audio-encoder").unwrap();

    let viewers = Arc::new(ViewerCount::new());
    EncoderGate::new(supervisor.clone() as Arc<dyn ProcessControl>, ENCODERS)
        .spawn(viewers.clone());

    let ticket = viewers.join();
    wait_for(&supervisor, [true, true]).await;

    drop(ticket);
    wait_for(&supervisor, [false, false]).await;
    supervisor.stop_all();
}
