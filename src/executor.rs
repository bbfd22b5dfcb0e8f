//! Per-request execution pipeline: materialize source, compile when the
//! language calls for it, run, capture output, clean up. Every failure mode
//! is normalized into an [`ExecutionResult`]; nothing escapes as an error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::languages::{self, CommandTemplate, ExecutionMode, LanguageSpec};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
    pub room_id: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub output: String,
    pub exit_code: i32,
    pub error: bool,
    pub language: String,
}

impl ExecutionResult {
    fn failed(language: &str, output: String) -> Self {
        ExecutionResult {
            output,
            exit_code: -1,
            error: true,
            language: language.to_string(),
        }
    }
}

/// Runs one request end to end. A single deadline spans compile and run;
/// temporary artifacts are removed on every exit path.
pub async fn execute(request: &ExecutionRequest) -> ExecutionResult {
    let Some(spec) =
        languages::resolve(request.language.as_deref(), request.filename.as_deref())
    else {
        let id = request.language.clone().unwrap_or_default();
        return ExecutionResult::failed(&id, format!("Unsupported language: {id}"));
    };

    let scratch = match Scratch::create().await {
        Ok(scratch) => scratch,
        Err(e) => {
            return ExecutionResult::failed(
                spec.id,
                format!("Could not prepare execution workspace: {e}"),
            )
        }
    };

    let result = run_pipeline(spec, &request.code, &scratch).await;
    scratch.cleanup().await;
    result
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Private scratch directory for one request. The name carries the epoch
/// millis plus a process-wide counter so concurrent requests never collide.
struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    async fn create() -> std::io::Result<Self> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("coderoom-{millis}-{seq}"));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Scratch { dir })
    }

    async fn cleanup(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            warn!("failed to remove scratch dir {}: {e}", self.dir.display());
        }
    }
}

struct TemplateContext {
    source: String,
    dir: String,
    class: String,
    exe: String,
}

impl TemplateContext {
    fn substitute(&self, input: &str) -> String {
        input
            .replace("{source}", &self.source)
            .replace("{dir}", &self.dir)
            .replace("{class}", &self.class)
            .replace("{exe}", &self.exe)
    }

    fn render(&self, template: &CommandTemplate) -> (String, Vec<String>) {
        let program = self.substitute(template.program);
        let args = template.args.iter().map(|a| self.substitute(a)).collect();
        (program, args)
    }
}

async fn run_pipeline(spec: &LanguageSpec, code: &str, scratch: &Scratch) -> ExecutionResult {
    let file_name = languages::source_file_name(spec, code);
    let source = scratch.dir.join(&file_name);
    if let Err(e) = tokio::fs::write(&source, code).await {
        return ExecutionResult::failed(spec.id, format!("Could not write source file: {e}"));
    }

    let class = Path::new(&file_name)
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let ctx = TemplateContext {
        source: source.display().to_string(),
        dir: scratch.dir.display().to_string(),
        class,
        exe: scratch.dir.join("main").display().to_string(),
    };

    let deadline = Instant::now() + spec.timeout;

    if let ExecutionMode::CompileThenRun { compile } = spec.mode {
        match run_phase(&compile, &ctx, &scratch.dir, deadline).await {
            Ok(phase) if phase.timed_out => return timeout_result(spec, &phase),
            Ok(phase) if !phase.succeeded() => {
                let exit_code = phase.exit_code();
                let diagnostics = if phase.stderr.is_empty() {
                    phase.stdout
                } else {
                    phase.stderr
                };
                return ExecutionResult {
                    output: diagnostics,
                    exit_code,
                    error: true,
                    language: spec.id.to_string(),
                };
            }
            Ok(_) => {}
            Err(e) => return launch_failure(spec, &compile, &ctx, &e),
        }
    }

    match run_phase(&spec.run, &ctx, &scratch.dir, deadline).await {
        Ok(phase) if phase.timed_out => timeout_result(spec, &phase),
        Ok(phase) => {
            let exit_code = phase.exit_code();
            ExecutionResult {
                output: combine_output(&phase.stdout, &phase.stderr),
                exit_code,
                error: exit_code != 0,
                language: spec.id.to_string(),
            }
        }
        Err(e) => launch_failure(spec, &spec.run, &ctx, &e),
    }
}

struct PhaseOutput {
    stdout: String,
    stderr: String,
    status: Option<i32>,
    timed_out: bool,
}

impl PhaseOutput {
    fn succeeded(&self) -> bool {
        self.status == Some(0)
    }

    /// Signal-terminated processes report no code; treat that as failure.
    fn exit_code(&self) -> i32 {
        self.status.unwrap_or(-1)
    }
}

/// Launches one process and accumulates its output streams until both close
/// and the process exits, or the deadline expires. On expiry the whole
/// process group is killed so compiler or runtime children do not linger,
/// and whatever output was captured so far is returned.
async fn run_phase(
    template: &CommandTemplate,
    ctx: &TemplateContext,
    dir: &Path,
    deadline: Instant,
) -> std::io::Result<PhaseOutput> {
    let (program, args) = ctx.render(template);
    debug!("launching {program} {args:?}");

    let mut command = Command::new(&program);
    command
        .args(&args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let stdout = collect_stream(child.stdout.take());
    let stderr = collect_stream(child.stderr.take());

    let (status, timed_out) = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(status) => (Some(status?), false),
        Err(_) => {
            kill_process_tree(&mut child).await;
            (None, true)
        }
    };

    let stdout = stdout.await.unwrap_or_default();
    let stderr = stderr.await.unwrap_or_default();

    Ok(PhaseOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        status: status.and_then(|s| s.code()),
        timed_out,
    })
}

fn collect_stream<R>(stream: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_end(&mut buf).await;
        }
        buf
    })
}

async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        if let Ok(pid) = i32::try_from(pid) {
            // the child runs in its own process group; take the group down
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    if let Err(e) = child.kill().await {
        warn!("failed to kill timed-out process: {e}");
    }
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        return stdout.to_string();
    }
    let mut out = stdout.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("--- stderr ---\n");
    out.push_str(stderr);
    out
}

fn timeout_result(spec: &LanguageSpec, phase: &PhaseOutput) -> ExecutionResult {
    let mut output = combine_output(&phase.stdout, &phase.stderr);
    output.push_str(&format!("\n[timed out after {:?}]", spec.timeout));
    ExecutionResult {
        output,
        exit_code: -1,
        error: true,
        language: spec.id.to_string(),
    }
}

fn launch_failure(
    spec: &LanguageSpec,
    template: &CommandTemplate,
    ctx: &TemplateContext,
    err: &std::io::Error,
) -> ExecutionResult {
    let (program, _) = ctx.render(template);
    ExecutionResult::failed(spec.id, format!("Failed to launch {program}: {err}"))
}
