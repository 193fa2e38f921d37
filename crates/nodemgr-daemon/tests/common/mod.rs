//! Test helpers for daemon integration tests

#![allow(dead_code)]

use nodemgr_daemon::{ApiHandler, FileService, LaunchLoader};
use nodemgr_launch::PackagePath;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zenoh::Session;

/// Router endpoint used by zenohd-backed tests
pub const TEST_ENDPOINT: &str = "tcp/127.0.0.1:17447";

/// A temporary package search root
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Create `name/package.xml` and return the package directory
    pub fn package(&self, name: &str) -> PathBuf {
        let dir = self.root().join(name);
        std::fs::create_dir_all(&dir).expect("Failed to create package dir");
        std::fs::write(
            dir.join("package.xml"),
            format!(
                "<?xml version=\"1.0\"?>\n<package format=\"2\">\n  <name>{}</name>\n</package>\n",
                name
            ),
        )
        .expect("Failed to write package.xml");
        dir
    }

    /// Write `content` to `rel` below the root, creating parents
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, content).expect("Failed to write fixture");
        path
    }

    pub fn file_service(&self) -> Arc<FileService> {
        Arc::new(FileService::new(Arc::new(PackagePath::new(vec![
            self.root().to_path_buf(),
        ]))))
    }

    pub fn loader(&self) -> Arc<LaunchLoader> {
        Arc::new(LaunchLoader::new(self.file_service()))
    }

    /// Loader searching `roots` instead of the workspace root
    pub fn loader_with_roots(&self, roots: Vec<PathBuf>) -> Arc<LaunchLoader> {
        let locator = Arc::new(PackagePath::new(roots));
        Arc::new(LaunchLoader::new(Arc::new(FileService::new(locator))))
    }

    pub fn api(&self) -> ApiHandler {
        let files = self.file_service();
        let loader = Arc::new(LaunchLoader::new(files.clone()));
        ApiHandler::new(files, loader)
    }
}

/// Path as the daemon reports it
pub fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Package `demo_pkg` with a root document whose six include directives sit
/// on lines 6, 9, 10, 12, 13 and 14 and point at a, b, c, a, b, c.
/// Both a and b include d; c and d include nothing.
pub fn include_sample(ws: &Workspace) -> PathBuf {
    ws.package("demo_pkg");

    ws.write(
        "demo_pkg/launch/a.launch",
        "<launch>\n  <include file=\"$(dirname)/d.launch\"/>\n</launch>\n",
    );
    ws.write(
        "demo_pkg/launch/b.launch",
        "<launch>\n  <include file=\"d.launch\"/>\n</launch>\n",
    );
    ws.write(
        "demo_pkg/launch/c.launch",
        "<launch>\n  <node pkg=\"demo_pkg\" type=\"talker\" name=\"talker\"/>\n</launch>\n",
    );
    ws.write("demo_pkg/launch/d.launch", "<launch/>\n");

    ws.write(
        "demo_pkg/launch/root.launch",
        r#"<?xml version="1.0"?>
<launch>
  <!-- <include file="disabled.launch"/> -->
  <arg name="robot" default="r2"/>

  <include file="$(find demo_pkg)/launch/a.launch"/>

  <group ns="$(arg robot)">
    <include file="$(dirname)/b.launch"/>
    <include file="c.launch"/>
  </group>
  <include file="$(find demo_pkg)/launch/a.launch"/>
  <include file="$(dirname)/b.launch"/>
  <include file="c.launch"/>
</launch>
"#,
    )
}

/// Handle to a running zenohd process for testing
pub struct ZenohdHandle {
    child: Option<Child>,
}

impl ZenohdHandle {
    /// Start a zenohd router on [`TEST_ENDPOINT`]
    ///
    /// Note: This requires `zenohd` to be in PATH.
    pub fn start() -> Result<Self, std::io::Error> {
        let child = Command::new("zenohd")
            .arg("--no-multicast-scouting")
            .arg("--listen")
            .arg(TEST_ENDPOINT)
            .spawn()?;

        std::thread::sleep(Duration::from_millis(500));

        Ok(Self { child: Some(child) })
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ZenohdHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Peer session connected to the test router
pub async fn setup_test_session() -> Result<Arc<Session>, zenoh::Error> {
    let mut config = zenoh::Config::default();
    config.insert_json5("mode", "\"peer\"").ok();
    config
        .insert_json5("connect/endpoints", &format!("[\"{}\"]", TEST_ENDPOINT))
        .ok();
    config
        .insert_json5("scouting/multicast/enabled", "false")
        .ok();

    let session = zenoh::open(config).await?;
    Ok(Arc::new(session))
}
