use thiserror::Error;

/// Anything that ends a job in `failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("manifest has no video source (hook, story, product demo or cta)")]
    NoVideoSource,

    #[error("failed to download {asset} from {url} after {attempts} attempts: {reason}")]
    AssetDownloadFailed {
        asset: String,
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("{step} failed (exit code {exit_code:?})\n\n{stderr_tail}")]
    SubprocessFailed {
        step: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("could not read media info for {path}: {reason}")]
    Probe { path: String, reason: String },

    #[error("upload failed: {0}")]
    PublishFailed(String),

    #[error("job was cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Lines and bytes of subprocess stderr kept in an error message.
const STDERR_TAIL_LINES: usize = 20;
const STDERR_TAIL_BYTES: usize = 2000;

pub fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");

    if tail.len() <= STDERR_TAIL_BYTES {
        return tail;
    }

    let mut cut = tail.len() - STDERR_TAIL_BYTES;
    while !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail[cut..].to_owned()
}
