//! Requests over a real TCP connection against the shipped definitions.

use serde_json::{Value, json};
use tokio::net::TcpStream;
use trellis_rpc::AVAILABLE_TASKS;
use trellis_rpc::codec::{Frame, FrameReader, FrameWriter};
use trellis_types::{Context, Request, Status};

use crate::common::{TestServer, data_root, router};

#[tokio::test]
async fn einzy_workflow_completes() {
    let root = data_root();
    let server = TestServer::start(router(root.path())).await;
    let mut client = server.client().await;

    let response = client
        .request_workflow("einz", "einzy", Context::new())
        .await
        .unwrap();

    assert_eq!(response.status, Status::Completed);
    assert_eq!(response.result, json!("AB"));
    assert!(response.errors.is_empty());
    assert_eq!(response.ctx.get("EinzyA"), Some(&json!("A")));
    assert_eq!(response.ctx.get("B"), Some(&json!("AB")));
    assert_eq!(
        response.ctx.get("workflow").unwrap()["result"]["EinzyB"],
        json!("AB")
    );

    let request = response.request.as_ref().unwrap();
    assert!(response.id.is_some());
    assert_eq!(request.id, response.id);
    assert_eq!(request.requester, response.requester);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn unknown_entity_is_reported() {
    let root = data_root();
    let server = TestServer::start(router(root.path())).await;
    let mut client = server.client().await;

    let response = client
        .request_workflow("drei", "einzy", Context::new())
        .await
        .unwrap();

    assert_eq!(response.status, Status::FinishedWithErrors);
    assert!(response.errors.contains_key("EntityNotFound"));
    assert_eq!(response.result, Value::Null);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn shared_task_runs_alone() {
    let root = data_root();
    let server = TestServer::start(router(root.path())).await;
    let mut client = server.client().await;

    let response = client
        .request_task("uno", "D", Context::new())
        .await
        .unwrap();

    assert_eq!(response.status, Status::Completed);
    assert_eq!(response.result, json!("D"));
    for key in ["A", "B", "C"] {
        assert!(!response.ctx.contains_key(key), "{key} leaked into D");
    }
    assert_eq!(response.info[AVAILABLE_TASKS], ["uno: A, B, C, D"]);

    let entities = response.ctx.get("entity_info").unwrap().as_array().unwrap();
    let names: Vec<_> = entities.iter().map(|e| e["name"].clone()).collect();
    assert_eq!(names, [json!("einz"), json!("zwei")]);

    let services = response.ctx.get("service_info").unwrap().as_array().unwrap();
    let names: Vec<_> = services.iter().map(|s| s["name"].clone()).collect();
    assert_eq!(names, [json!("uno"), json!("status"), json!("project")]);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn love_workflow_stores_the_context() {
    let root = data_root();
    let server = TestServer::start(router(root.path())).await;
    let mut client = server.client().await;

    let response = client
        .request_workflow("zwei", "love", Context::new())
        .await
        .unwrap();

    assert_eq!(response.status, Status::Completed, "{:?}", response.errors);
    assert_eq!(response.result, json!("Unused, see 'store.json'"));

    let stored: Value =
        serde_json::from_str(&std::fs::read_to_string(root.path().join("store.json")).unwrap())
            .unwrap();
    assert_eq!(stored["C"], json!("C"));
    assert_eq!(stored["B"], json!("AB"));
    assert_eq!(stored["workflow"]["input"]["Store"], json!("ABC"));

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn step_options_reach_the_workflow() {
    let root = data_root();
    let server = TestServer::start(router(root.path())).await;
    let mut client = server.client().await;

    let mut request = Request::workflow("einz", "einzy");
    request.set_option("depth", 2);
    let response = client.send(request).await.unwrap();

    assert_eq!(response.status, Status::Completed);
    assert_eq!(
        response.ctx.get("workflow").unwrap()["options"],
        json!({"depth": 2})
    );

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn project_files_round_trip_through_the_server() {
    let root = data_root();
    let server = TestServer::start(router(root.path())).await;
    let mut client = server.client().await;

    let ctx: Context = [
        ("project", json!({"id": "demo"})),
        ("filepath", json!("notes.txt")),
        ("content", json!("hello")),
    ]
    .into_iter()
    .collect();
    let written = client
        .request_task("project", "WriteProjectFile", ctx.clone())
        .await
        .unwrap();
    assert_eq!(written.status, Status::Completed, "{:?}", written.errors);

    let mut read_ctx = ctx;
    read_ctx.remove("content");
    let read = client
        .request_task("project", "ReadProjectFile", read_ctx)
        .await
        .unwrap();
    assert_eq!(read.result, json!("hello"));
    assert!(root.path().join("projects/demo/notes.txt").is_file());

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn queued_requests_are_answered_in_order() {
    let root = data_root();
    let server = TestServer::start(router(root.path())).await;
    let queue = server.client().await.start();

    let first = queue.enqueue(Request::task("uno", "C")).await.unwrap();
    let second = queue.enqueue(Request::workflow("einz", "nope")).await.unwrap();
    let third = queue.enqueue(Request::task("uno", "A")).await.unwrap();

    assert_eq!(first.await.unwrap().unwrap().result, json!("ABC"));
    let second = second.await.unwrap().unwrap();
    assert!(second.errors.contains_key("WorkflowNotFound"));
    assert_eq!(third.await.unwrap().unwrap().result, json!("A"));

    let client = queue.finish().await.unwrap();
    let statuses: Vec<_> = client.history().map(|(_, r)| r.status).collect();
    assert_eq!(
        statuses,
        [
            Status::Completed,
            Status::FinishedWithErrors,
            Status::Completed
        ]
    );
    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn bad_frames_do_not_end_the_connection() {
    let root = data_root();
    let server = TestServer::start(router(root.path())).await;

    let (read_half, write_half) = TcpStream::connect(server.addr).await.unwrap().into_split();
    let mut writer = FrameWriter::new(write_half);
    let mut reader = FrameReader::new(read_half);

    let payloads: [&[u8]; 3] = [
        b"\xff\xfe not utf8",
        br#"{"ctx": "not an object"}"#,
        br#"{"entity": "einz", "workflow": "einzy"}"#,
    ];
    let mut replies = Vec::new();
    for (sequence, payload) in (1..).zip(payloads) {
        writer
            .write_frame(&Frame::new(sequence, payload.to_vec()))
            .await
            .unwrap();
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.sequence, sequence);
        replies.push(serde_json::from_slice::<Value>(&frame.body).unwrap());
    }

    assert_eq!(replies[0]["status"], json!("error"));
    assert!(replies[0]["errors"]["InvalidJSON"].is_array());
    assert_eq!(replies[1]["status"], json!("error"));
    assert!(replies[1]["errors"]["InvalidRequest"].is_array());
    assert_eq!(replies[2]["status"], json!("completed"));
    assert_eq!(replies[2]["result"], json!("AB"));

    server.stop().await;
}
