//! Blocking client against a server running on its own runtime.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use trellis_rpc::SyncClient;
use trellis_types::{Context, Status};

use crate::common::{TestServer, data_root, router};

#[test]
fn sync_client_blocks_for_one_round_trip() {
    let root = data_root();
    let path = root.path().to_path_buf();
    let (addr_tx, addr_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let server_thread = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let server = TestServer::start(router(&path)).await;
            addr_tx.send(server.addr).unwrap();
            tokio::task::spawn_blocking(move || stop_rx.recv())
                .await
                .unwrap()
                .unwrap();
            server.stop().await;
        });
    });

    let addr = addr_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let mut client: SyncClient =
        SyncClient::connect(&addr.to_string(), Duration::from_secs(10)).unwrap();

    let response = client
        .request_workflow("einz", "einzy", Context::new())
        .unwrap();
    assert_eq!(response.status, Status::Completed);
    assert_eq!(response.result, json!("AB"));

    let response = client.request_task("status", "Task", Context::new()).unwrap();
    assert_eq!(response.result, json!("Task"));
    assert_eq!(client.client().history().count(), 2);

    client.stop();
    stop_tx.send(()).unwrap();
    server_thread.join().unwrap();
}
