//! Shared test utilities and fixtures
//!
//! Every test works on a private copy of the shipped `data/` root so that
//! tasks writing under the data root never touch the repository.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::task::JoinHandle;
use trellis_config::{TrellisConfig, build_orchestrator};
use trellis_engine::Orchestrator;
use trellis_engine::builtin::stock_registry;
use trellis_rpc::{Client, DEFAULT_REQUEST_TIMEOUT, Router, Server, ServerHandle};

pub fn shipped_data_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("data")
}

/// Fresh copy of the shipped data root.
pub fn data_root() -> TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    copy_dir(&shipped_data_root(), dir.path());
    dir
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).expect("create dir");
    for entry in fs::read_dir(from).expect("read dir") {
        let entry = entry.expect("dir entry");
        let target = to.join(entry.file_name());
        if entry.file_type().expect("file type").is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).expect("copy file");
        }
    }
}

/// Orchestrator loaded from `root` with the stock task library.
pub fn orchestrator(root: &Path) -> Orchestrator {
    let config = TrellisConfig::load(root).expect("load settings");
    let registry = stock_registry(root).expect("stock registry");
    build_orchestrator(root, &config.settings, &registry).expect("load definitions")
}

pub fn router(root: &Path) -> Router {
    Router::new(orchestrator(root))
}

/// A server on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    handle: ServerHandle,
    serving: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(router: Router) -> Self {
        let server: Server = Server::bind("127.0.0.1:0", router)
            .await
            .expect("bind server");
        let addr = server.local_addr().expect("local addr");
        let handle = server.handle();
        let serving = tokio::spawn(server.serve());
        Self {
            addr,
            handle,
            serving,
        }
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.addr, DEFAULT_REQUEST_TIMEOUT)
            .await
            .expect("connect client")
    }

    pub async fn stop(self) {
        self.handle.stop();
        self.serving
            .await
            .expect("server task")
            .expect("server result");
    }
}
