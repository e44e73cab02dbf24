//! Headless engine invocation for a single conversion job.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lc_core::{ConversionTarget, Error, Result};

use crate::command::ToolCommand;
use crate::tools::EngineLocator;
use crate::workspace::ScratchDir;

/// Flags that keep the engine from touching a display, showing dialogs, or
/// trying to recover documents from a previous crash.
const HEADLESS_FLAGS: &[&str] = &[
    "--headless",
    "--invisible",
    "--nocrashreport",
    "--nodefault",
    "--nofirststartwizard",
    "--nolockcheck",
    "--nologo",
    "--norestore",
];

/// Runs the conversion engine against scratch directories.
///
/// Every invocation is pointed at its own user profile inside the job's
/// scratch directory. The engine takes a lock on its profile, so sharing one
/// would serialize all conversions regardless of admission capacity.
#[derive(Debug, Clone)]
pub struct ConversionWorker {
    engine: EngineLocator,
    timeout: Duration,
}

impl ConversionWorker {
    pub fn new(engine: EngineLocator, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    /// Default per-invocation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Convert the staged input of `job` using the worker's default timeout.
    pub async fn convert_job(&self, job: &ScratchDir, target: &ConversionTarget) -> Result<PathBuf> {
        self.convert(job.input(), target, job.path(), self.timeout)
            .await
    }

    /// Convert `input` into `target.output`, writing into `work_dir/out`.
    ///
    /// Returns the path of the produced document.
    ///
    /// # Errors
    ///
    /// - [`Error::ConversionTimeout`] if the engine outlives `timeout`; its
    ///   process group has been killed by then.
    /// - [`Error::ConversionFailed`] if the engine cannot be started, exits
    ///   unsuccessfully, or exits cleanly without writing the output file.
    ///   Engine output is logged here and not carried in the error.
    pub async fn convert(
        &self,
        input: &Path,
        target: &ConversionTarget,
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf> {
        let profile_dir = work_dir.join("profile");
        let output_dir = work_dir.join("out");
        tokio::fs::create_dir_all(&profile_dir).await?;
        tokio::fs::create_dir_all(&output_dir).await?;
        let profile_dir = tokio::fs::canonicalize(&profile_dir).await?;

        let cmd = self.command(input, target, &profile_dir, &output_dir, timeout);

        tracing::debug!(
            input_format = %target.input,
            output_format = %target.output,
            family = ?target.family,
            filter = target.filter,
            "Starting conversion engine"
        );

        match cmd.execute().await {
            Ok(output) => {
                if let Some(path) = find_output(&output_dir, input, &target.output).await? {
                    tracing::debug!(
                        elapsed_ms = output.elapsed.as_millis() as u64,
                        "Conversion engine finished"
                    );
                    return Ok(path);
                }
                tracing::warn!(
                    input_format = %target.input,
                    output_format = %target.output,
                    stdout = %truncate(&output.stdout),
                    stderr = %truncate(&output.stderr),
                    "Conversion engine exited cleanly but produced no output"
                );
                Err(Error::ConversionFailed("the engine produced no output".into()))
            }
            Err(Error::ToolSpawn { tool, source }) => {
                tracing::warn!(tool = %tool, "Conversion engine could not be started: {source}");
                Err(Error::ConversionFailed(
                    "the engine could not be started".into(),
                ))
            }
            Err(Error::Tool { tool, message }) => {
                tracing::warn!(
                    tool = %tool,
                    input_format = %target.input,
                    output_format = %target.output,
                    "Conversion engine failed: {}",
                    truncate(&message)
                );
                Err(Error::ConversionFailed(
                    "the engine could not convert the document".into(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Build the engine invocation. `profile_dir` must be absolute.
    pub fn command(
        &self,
        input: &Path,
        target: &ConversionTarget,
        profile_dir: &Path,
        output_dir: &Path,
        timeout: Duration,
    ) -> ToolCommand {
        let profile_url = file_url(profile_dir);

        let mut cmd = ToolCommand::new(self.engine.program());
        cmd.args(HEADLESS_FLAGS.iter().copied())
            .arg(format!("-env:UserInstallation={profile_url}"))
            .arg("--convert-to")
            .arg(target.convert_to_arg())
            .arg("--outdir")
            .arg(output_dir.to_string_lossy())
            .arg(input.to_string_lossy())
            // Some engine builds consult $HOME before the profile override.
            .env("HOME", profile_dir.to_string_lossy())
            .timeout(timeout);
        if let Some(parent) = output_dir.parent() {
            cmd.current_dir(parent);
        }
        cmd
    }
}

/// Locate the converted document in `output_dir`.
///
/// The engine names its output after the input stem; any file with the target
/// extension is accepted as a fallback since some filters normalize names.
async fn find_output(output_dir: &Path, input: &Path, output_ext: &str) -> Result<Option<PathBuf>> {
    if let Some(stem) = input.file_stem() {
        let mut name = stem.to_os_string();
        name.push(".");
        name.push(output_ext);
        let expected = output_dir.join(name);
        if is_file(&expected).await {
            return Ok(Some(expected));
        }
    }

    let mut entries = tokio::fs::read_dir(output_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(output_ext));
        if matches && is_file(&path).await {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

/// `file://` URL for an absolute path, percent-encoding everything outside
/// the unreserved set.
fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut url = String::from("file://");
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                url.push(byte as char)
            }
            _ => url.push_str(&format!("%{byte:02X}")),
        }
    }
    url
}

/// Cap engine output before it goes into a log line.
fn truncate(text: &str) -> &str {
    const MAX: usize = 500;
    let text = text.trim();
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_core::FormatRegistry;

    fn target(input: &str, output: &str) -> ConversionTarget {
        FormatRegistry::new().resolve(input, output).unwrap()
    }

    #[test]
    fn file_url_encodes_reserved_bytes() {
        assert_eq!(
            file_url(Path::new("/tmp/job-1/profile")),
            "file:///tmp/job-1/profile"
        );
        assert_eq!(file_url(Path::new("/tmp/a b/%")), "file:///tmp/a%20b/%25");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(400);
        let cut = truncate(&long);
        assert!(cut.len() <= 500);
        assert!(long.starts_with(cut));
        assert_eq!(truncate("  short \n"), "short");
    }

    #[test]
    fn command_isolates_profile_per_job() {
        let root = tempfile::tempdir().unwrap();
        let job = ScratchDir::new(root.path(), "docx").unwrap();
        let worker = ConversionWorker::new(
            EngineLocator::at("/usr/bin/soffice"),
            Duration::from_secs(300),
        );

        let profile = job.profile_dir().canonicalize().unwrap();
        let cmd = worker.command(
            job.input(),
            &target("docx", "pdf"),
            &profile,
            &job.output_dir(),
            Duration::from_secs(5),
        );
        let args = cmd.get_args();

        assert!(args.contains(&"--headless".to_string()));
        let expected = format!("-env:UserInstallation={}", file_url(&profile));
        assert!(args.contains(&expected), "missing profile override in {args:?}");

        let pos = args.iter().position(|a| a == "--convert-to").unwrap();
        assert_eq!(args[pos + 1], "pdf:writer_pdf_Export");
        let pos = args.iter().position(|a| a == "--outdir").unwrap();
        assert_eq!(args[pos + 1], job.output_dir().to_string_lossy());
        assert_eq!(args.last().unwrap(), &job.input().to_string_lossy().to_string());
    }

    #[tokio::test]
    async fn find_output_prefers_input_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("input.pdf"), b"x").unwrap();
        let found = find_output(dir.path(), Path::new("/x/input.docx"), "pdf")
            .await
            .unwrap();
        assert_eq!(found, Some(dir.path().join("input.pdf")));
    }

    #[tokio::test]
    async fn find_output_falls_back_to_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("renamed.CSV"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();
        let found = find_output(dir.path(), Path::new("/x/input.xlsx"), "csv")
            .await
            .unwrap();
        assert_eq!(found, Some(dir.path().join("renamed.CSV")));
        assert_eq!(
            find_output(dir.path(), Path::new("/x/input.xlsx"), "pdf")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn missing_engine_is_conversion_failure() {
        let root = tempfile::tempdir().unwrap();
        let job = ScratchDir::new(root.path(), "docx").unwrap();
        std::fs::write(job.input(), b"content").unwrap();
        let worker = ConversionWorker::new(
            EngineLocator::at("/nonexistent/engine/soffice"),
            Duration::from_secs(5),
        );

        let err = worker
            .convert_job(&job, &target("docx", "pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConversionFailed(_)), "unexpected: {err}");
        assert!(err.to_string().contains("could not be started"));
        assert!(!err.to_string().contains("/nonexistent"));
    }

    #[cfg(unix)]
    mod with_fake_engine {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_engine(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-soffice");
            let script = format!(
                "#!/bin/sh\n\
                 target=''; outdir=''; input=''\n\
                 while [ $# -gt 0 ]; do\n\
                   case \"$1\" in\n\
                     --convert-to) target=\"$2\"; shift 2;;\n\
                     --outdir) outdir=\"$2\"; shift 2;;\n\
                     -*) shift;;\n\
                     *) input=\"$1\"; shift;;\n\
                   esac\n\
                 done\n\
                 ext=\"${{target%%:*}}\"\n\
                 name=$(basename \"$input\"); stem=\"${{name%.*}}\"\n\
                 {body}\n"
            );
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        async fn run(body: &str, timeout: Duration) -> (tempfile::TempDir, Result<PathBuf>) {
            let bin = tempfile::tempdir().unwrap();
            let engine = fake_engine(bin.path(), body);
            let root = tempfile::tempdir().unwrap();
            let job = ScratchDir::new(root.path(), "docx").unwrap();
            std::fs::write(job.input(), b"hello").unwrap();
            let worker = ConversionWorker::new(EngineLocator::at(engine), timeout);
            let result = worker
                .convert(job.input(), &target("docx", "pdf"), job.path(), timeout)
                .await;
            // Keep the scratch dir alive for assertions on the returned path.
            let result = result.map(|p| {
                let copy = bin.path().join("result");
                std::fs::copy(&p, &copy).unwrap();
                copy
            });
            (bin, result)
        }

        #[tokio::test]
        async fn produces_output() {
            let (_bin, result) = run("cp \"$input\" \"$outdir/$stem.$ext\"", Duration::from_secs(10)).await;
            let path = result.unwrap();
            assert_eq!(std::fs::read(path).unwrap(), b"hello");
        }

        #[tokio::test]
        async fn clean_exit_without_output_fails() {
            let (_bin, result) = run("exit 0", Duration::from_secs(10)).await;
            let err = result.unwrap_err();
            assert!(matches!(err, Error::ConversionFailed(_)));
            assert!(err.to_string().contains("no output"));
        }

        #[tokio::test]
        async fn non_zero_exit_fails_without_leaking_stderr() {
            let (_bin, result) = run(
                "echo \"fatal: $input is corrupt\" >&2; exit 1",
                Duration::from_secs(10),
            )
            .await;
            let err = result.unwrap_err();
            assert!(matches!(err, Error::ConversionFailed(_)));
            assert!(!err.to_string().contains("corrupt"));
        }

        #[tokio::test]
        async fn slow_engine_times_out() {
            let (_bin, result) = run("sleep 30", Duration::from_millis(300)).await;
            assert!(matches!(
                result.unwrap_err(),
                Error::ConversionTimeout { .. }
            ));
        }
    }
}
