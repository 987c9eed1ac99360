//! Control plane over real TCP: server, client and a watch controller
//! driving real `sh` children.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;

use swarm_core::job::env;
use swarm_core::{HostList, JobConfig, PeerId, PeerList, Stage};
use swarm_runner::{LocalRunner, RunContext};
use swarm_watch::{serve, StageBoard, StageClient, WatchController, WatchError, WatchState};

struct Plane {
    client: StageClient,
    board: StageBoard,
    shutdown: watch::Sender<bool>,
    server: tokio::task::JoinHandle<std::io::Result<()>>,
}

async fn start(board: StageBoard) -> Plane {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (shutdown, rx) = watch::channel(false);
    let server = tokio::spawn(serve(listener, board.clone(), rx));
    Plane {
        client: StageClient::new(PeerId::new("127.0.0.1", port)),
        board,
        shutdown,
        server,
    }
}

fn stage(np: usize, checkpoint: &str) -> Stage {
    Stage::new(HostList::localhost(4).gen_peer_list(np).unwrap(), checkpoint)
}

#[tokio::test]
async fn push_and_fetch_over_http() {
    let plane = start(StageBoard::empty()).await;

    assert!(plane.client.healthy().await);
    assert_eq!(plane.client.fetch_stage().await.unwrap(), None);

    plane.client.push_stage(&stage(2, "1")).await.unwrap();
    plane.client.push_stage(&stage(3, "2")).await.unwrap();

    let latest = plane.client.fetch_stage().await.unwrap().unwrap();
    assert_eq!(latest, stage(3, "2"));
    assert_eq!(plane.board.checkpoint().as_deref(), Some("2"));

    plane.shutdown.send_replace(true);
    plane.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn empty_cluster_push_is_rejected() {
    let plane = start(StageBoard::new(stage(1, "1"))).await;
    let err = plane
        .client
        .push_stage(&Stage::new(PeerList::default(), "2"))
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::Status { status: 400, .. }), "{err}");
    assert_eq!(plane.board.checkpoint().as_deref(), Some("1"));
    plane.shutdown.send_replace(true);
}

#[tokio::test]
async fn unreachable_parent_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = StageClient::new(PeerId::new("127.0.0.1", port)).with_timeout(Duration::from_secs(1));
    assert!(matches!(
        client.fetch_stage().await,
        Err(WatchError::Unreachable { .. })
    ));
}

#[tokio::test]
async fn controller_restarts_peers_on_pushed_checkpoint() {
    let plane = start(StageBoard::new(stage(2, "1"))).await;

    let job = JobConfig::new(
        plane.client.endpoint().clone(),
        HostList::localhost(4),
        "sh",
        vec![
            "-c".to_string(),
            // The first stage runs until stopped, later ones exit at once.
            format!("echo ${}; [ ${} = 1 ] && exec sleep 30; true", env::CHECKPOINT, env::CHECKPOINT),
        ],
    );
    let runner = LocalRunner::new().with_grace_period(Duration::from_millis(500));
    let controller = WatchController::new(job, "127.0.0.1", Arc::new(runner), Arc::new(plane.client.clone()))
        .with_period(Duration::from_millis(20));
    let mut states = controller.subscribe();

    let driver = {
        let client = plane.client.clone();
        async move {
            states
                .wait_for(|s| matches!(s, WatchState::Running { checkpoint, .. } if checkpoint == "1"))
                .await
                .unwrap();
            client.push_stage(&stage(3, "2")).await.unwrap();
        }
    };

    let ctx = RunContext::background();
    let (summary, ()) = tokio::time::timeout(
        Duration::from_secs(20),
        async { tokio::join!(controller.run(&ctx), driver) },
    )
    .await
    .expect("controller did not finish");

    let summary = summary.unwrap();
    assert_eq!(summary.runs, 2);
    assert_eq!(summary.restarts, 1);
    assert_eq!(summary.checkpoint.as_deref(), Some("2"));

    let report = summary.last_report.unwrap();
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.results.len(), 3);
    assert!(report.stdout_lines().all(|l| l == "2"));

    plane.shutdown.send_replace(true);
}
