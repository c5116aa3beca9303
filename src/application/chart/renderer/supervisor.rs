use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
};
use tracing::{debug, info, warn};

use super::{
    ChartRenderer, LineAccumulator, RenderJob, RenderOutcome, RendererError, classify,
    parse_milestone,
};
use crate::application::chart::channel::ProgressSink;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Runs the chart renderer jar as a child process.
#[derive(Debug, Clone)]
pub struct RendererSupervisor {
    java_path: PathBuf,
    jar_path: PathBuf,
    timeout: Duration,
}

impl RendererSupervisor {
    pub fn new(java_path: PathBuf, jar_path: PathBuf, timeout: Duration) -> Self {
        Self {
            java_path,
            jar_path,
            timeout,
        }
    }

    fn command(&self, job: &RenderJob) -> Command {
        let mut command = Command::new(&self.java_path);
        command
            .arg("-jar")
            .arg(&self.jar_path)
            .arg("-node")
            .arg("-s")
            .arg(&job.settings_path)
            .arg("-ss")
            .arg(&job.settings_path)
            .arg("-d")
            .args(&job.datapack_paths)
            .arg("-o")
            .arg(&job.output_path)
            .arg("-a");
        if job.is_cross_plot {
            command.arg("-cross");
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ChartRenderer for RendererSupervisor {
    async fn render(
        &self,
        job: &RenderJob,
        progress: &ProgressSink,
    ) -> Result<RenderOutcome, RendererError> {
        let started_at = Instant::now();
        let mut child = self.command(job).spawn().map_err(|source| {
            counter!("chartforge_render_failures_total", "kind" => "spawn").increment(1);
            warn!(
                target = "chartforge::application::chart::renderer",
                op = "renderer::render",
                result = "error",
                error_code = "spawn",
                program = %self.java_path.display(),
                error = %source,
                "Failed to spawn chart renderer"
            );
            RendererError::Spawn {
                program: self.java_path.clone(),
                source,
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(ErrorKind::BrokenPipe, "renderer stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(ErrorKind::BrokenPipe, "renderer stderr not captured"))?;
        let mut stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            stderr.read_to_end(&mut buffer).await.map(|_| buffer)
        });

        // A grandchild holding either pipe open must not outlive the deadline.
        let streamed = tokio::time::timeout(self.timeout, async {
            let (stdout, status) = stream_until_exit(&mut child, stdout, job, progress).await?;
            let stderr = (&mut stderr_task).await;
            Ok::<_, RendererError>((stdout, status, stderr))
        })
        .await;
        let (stdout, status, stderr) = match streamed {
            Ok(result) => result?,
            Err(_) => {
                if let Err(err) = child.start_kill() {
                    debug!(
                        target = "chartforge::application::chart::renderer",
                        op = "renderer::render",
                        error = %err,
                        "Renderer exited before it could be killed"
                    );
                }
                let _ = child.wait().await;
                stderr_task.abort();
                counter!("chartforge_render_failures_total", "kind" => "timeout").increment(1);
                warn!(
                    target = "chartforge::application::chart::renderer",
                    op = "renderer::render",
                    result = "timeout",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Chart renderer killed after timeout"
                );
                return Err(RendererError::Timeout(self.timeout));
            }
        };

        let stderr = match stderr {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(err)) => {
                warn!(
                    target = "chartforge::application::chart::renderer",
                    op = "renderer::render",
                    error = %err,
                    "Failed to read renderer stderr"
                );
                String::new()
            }
            Err(_) => String::new(),
        };

        let stdout = String::from_utf8_lossy(&stdout);
        let outcome = classify(&stdout, &stderr);
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!("chartforge_render_ms").record(elapsed_ms as f64);

        if outcome.is_success() {
            info!(
                target = "chartforge::application::chart::renderer",
                op = "renderer::render",
                result = "ok",
                elapsed_ms,
                exit_code = status.code().unwrap_or(-1),
                datapacks = job.datapack_paths.len(),
                "Chart renderer finished"
            );
        } else {
            counter!("chartforge_render_failures_total", "kind" => "reported").increment(1);
            warn!(
                target = "chartforge::application::chart::renderer",
                op = "renderer::render",
                result = "reported_error",
                elapsed_ms,
                exit_code = status.code().unwrap_or(-1),
                error_code = outcome.known_error_code,
                error = %outcome.error_message,
                stdout = %stdout,
                stderr = %stderr,
                "Chart renderer reported an error"
            );
        }

        Ok(outcome)
    }
}

/// Forward milestones as stdout arrives, then reap the child.
async fn stream_until_exit<R>(
    child: &mut Child,
    mut stdout: R,
    job: &RenderJob,
    progress: &ProgressSink,
) -> Result<(Vec<u8>, ExitStatus), RendererError>
where
    R: AsyncRead + Unpin,
{
    let mut transcript = Vec::new();
    let mut lines = LineAccumulator::default();
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];

    loop {
        let read = stdout.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let bytes = &chunk[..read];
        transcript.extend_from_slice(bytes);
        for line in lines.push(bytes) {
            report_line(&line, job, progress);
        }
    }
    if let Some(line) = lines.finish() {
        report_line(&line, job, progress);
    }

    let status = child.wait().await?;
    Ok((transcript, status))
}

fn report_line(line: &str, job: &RenderJob, progress: &ProgressSink) {
    if let Some(event) = parse_milestone(line, &job.display_names) {
        progress.emit(event);
    }
}
