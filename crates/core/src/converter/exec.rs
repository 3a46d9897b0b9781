//! In-memory piping through external tools.
//!
//! Conversions never touch disk: input bytes are fed to the child's
//! stdin and the artifact is collected from its stdout.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::error::ConverterError;
use crate::context::OpContext;

/// Run `program args...`, write `input` to its stdin and return its
/// stdout.
///
/// The child is killed when the context is cancelled or its deadline
/// elapses. A non-zero exit or empty stdout is an error carrying the
/// captured stderr.
pub(crate) async fn pipe_through(
    ctx: &OpContext,
    tool: &str,
    program: &Path,
    args: &[String],
    input: &[u8],
) -> Result<Vec<u8>, ConverterError> {
    ctx.check()?;
    debug!(tool, args = args.len(), input_bytes = input.len(), "spawning tool");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ConverterError::ToolNotFound {
                    tool: tool.to_string(),
                    path: program.to_path_buf(),
                }
            } else {
                ConverterError::Io(err)
            }
        })?;

    let mut stdin = child.stdin.take().expect("stdin was piped");

    // Feed stdin while draining stdout/stderr; writing sequentially
    // before waiting would deadlock once the pipe buffers fill.
    let write = async {
        // A child that exits early closes the pipe; the exit status is
        // what gets reported, not the broken write.
        let _ = stdin.write_all(input).await;
        let _ = stdin.shutdown().await;
        drop(stdin);
    };

    let output = match ctx
        .run(async {
            let ((), output) = tokio::join!(write, child.wait_with_output());
            output
        })
        .await
    {
        Ok(result) => result?,
        // kill_on_drop reaps the child once the future is dropped.
        Err(ctx_err) => return Err(ctx_err.into()),
    };

    if !output.status.success() {
        return Err(ConverterError::ToolFailed {
            tool: tool.to_string(),
            reason: format!("exit status {:?}", output.status.code()),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    if output.stdout.is_empty() {
        return Err(ConverterError::EmptyOutput {
            tool: tool.to_string(),
        });
    }

    Ok(output.stdout)
}

/// Whether `program` resolves to an executable, either as an absolute
/// path or through PATH.
pub(crate) fn tool_available(program: &Path) -> bool {
    if program.is_absolute() {
        return program.is_file();
    }

    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
}
