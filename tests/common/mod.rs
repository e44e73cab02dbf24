//! Shared test harness for integration tests.
//!
//! [`TestHarness::with_server`] builds a full [`AppContext`] around a fake
//! conversion engine and starts Axum on a random port. The fake engine is a
//! shell script that parses the same arguments as `soffice` and changes
//! behaviour based on markers in the uploaded file:
//!
//! | marker          | behaviour                                   |
//! |-----------------|---------------------------------------------|
//! | `ENGINE_FAIL`   | prints the input path to stderr, exits 1    |
//! | `ENGINE_SILENT` | exits 0 without writing output              |
//! | `ENGINE_HANG`   | sleeps for 60s in a background helper whose |
//! |                 | pid is written to `engine.pid`              |
//! | `ENGINE_SLOW`   | sleeps for 2s, then converts                |
//! | anything else   | writes `converted to <ext>` plus the input  |

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lc_core::config::Config;
use lc_engine::EngineLocator;
use lc_server::context::AppContext;
use lc_server::router::build_router;
use tempfile::TempDir;

pub const TOKEN: &str = "test-token-123";

const FAKE_ENGINE: &str = r#"#!/bin/sh
target=''; outdir=''; input=''
while [ $# -gt 0 ]; do
  case "$1" in
    --convert-to) target="$2"; shift 2;;
    --outdir) outdir="$2"; shift 2;;
    -*) shift;;
    *) input="$1"; shift;;
  esac
done
ext="${target%%:*}"
name=$(basename "$input"); stem="${name%.*}"
if grep -q ENGINE_FAIL "$input"; then
  echo "Error: source file could not be loaded: $input" >&2
  exit 1
fi
if grep -q ENGINE_SILENT "$input"; then
  exit 0
fi
if grep -q ENGINE_HANG "$input"; then
  sleep 60 &
  echo $! > "$(dirname "$0")/engine.pid"
  wait
fi
if grep -q ENGINE_SLOW "$input"; then
  sleep 2
fi
{ echo "converted to $ext"; cat "$input"; } > "$outdir/$stem.$ext"
"#;

/// A running server backed by the fake engine.
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    scratch: TempDir,
    bin: TempDir,
}

impl TestHarness {
    /// Configuration with test-friendly limits.
    pub fn config() -> Config {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config.conversion.timeout_secs = 20;
        config.conversion.admission_wait_secs = 5;
        config
    }

    /// Configuration with bearer auth enabled using [`TOKEN`].
    pub fn auth_config() -> Config {
        let mut config = Self::config();
        config.auth.enabled = true;
        config.auth.token = Some(TOKEN.into());
        config
    }

    /// Build the context without starting a server.
    pub fn context(mut config: Config) -> (AppContext, TempDir, TempDir) {
        let scratch = tempfile::tempdir().expect("failed to create scratch root");
        let bin = tempfile::tempdir().expect("failed to create bin dir");
        config.conversion.temp_dir = Some(scratch.path().join("jobs"));
        let engine = write_fake_engine(bin.path());
        let ctx = AppContext::new(config, EngineLocator::at(engine));
        (ctx, scratch, bin)
    }

    /// Start an Axum server with `config` on a random port.
    pub async fn with_server(config: Config) -> Self {
        let (ctx, scratch, bin) = Self::context(config);
        let app = build_router(ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .ok();
        });

        Self {
            ctx,
            addr,
            client: reqwest::Client::new(),
            scratch,
            bin,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POST a single-file multipart upload to `/convert?to=<to>`.
    pub async fn convert(&self, to: &str, filename: &str, body: &[u8]) -> reqwest::Response {
        self.convert_request(to, filename, body)
            .send()
            .await
            .expect("request failed")
    }

    /// Same as [`Self::convert`] but with a bearer token.
    pub async fn convert_with_token(
        &self,
        to: &str,
        filename: &str,
        body: &[u8],
        token: &str,
    ) -> reqwest::Response {
        self.convert_request(to, filename, body)
            .bearer_auth(token)
            .send()
            .await
            .expect("request failed")
    }

    fn convert_request(&self, to: &str, filename: &str, body: &[u8]) -> reqwest::RequestBuilder {
        let part = reqwest::multipart::Part::bytes(body.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.client
            .post(self.url("/convert"))
            .query(&[("to", to)])
            .multipart(form)
    }

    /// Root under which the server creates job directories.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch.path().join("jobs")
    }

    /// Number of job directories currently on disk.
    pub fn scratch_entries(&self) -> usize {
        match std::fs::read_dir(self.scratch_root()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    /// Pid of the helper started by the last `ENGINE_HANG` upload.
    pub fn hanging_engine_pid(&self) -> Option<u32> {
        std::fs::read_to_string(self.bin.path().join("engine.pid"))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Wait until every slot is free and no job directory remains.
    ///
    /// Cleanup runs when the response body is dropped, which can land a
    /// moment after the client has read the last byte.
    pub async fn wait_for_idle(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let idle = self.ctx.gate.available() == self.ctx.gate.capacity()
                && self.scratch_entries() == 0;
            if idle {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "server not idle: {} of {} slots free, {} job dirs",
                    self.ctx.gate.available(),
                    self.ctx.gate.capacity(),
                    self.scratch_entries()
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Poll until `pid` is gone, failing the test after five seconds.
pub async fn wait_for_exit(pid: u32) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while process_alive(pid) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "engine helper {pid} outlived its request"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Whether `pid` names a live, non-zombie process.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        // State is the first field after the parenthesised command name.
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .and_then(|(_, rest)| rest.chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .is_ok_and(|status| status.success())
    }
}

fn write_fake_engine(dir: &Path) -> PathBuf {
    let path = dir.join("soffice");
    std::fs::write(&path, FAKE_ENGINE).expect("failed to write fake engine");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to chmod fake engine");
    path
}
