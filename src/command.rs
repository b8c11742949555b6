use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::OnceLock;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ConfigError;
use crate::error::{stderr_tail, PipelineError, PipelineResult};

#[derive(Debug, Clone)]
struct Input {
    arguments: Vec<String>,
    path: PathBuf,
}

/// Argument-vector builder for one ffmpeg invocation. Paths are passed as
/// separate arguments, so nothing here is ever shell-quoted.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output_args: Vec<String>,
    output: PathBuf,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output_args: Vec::new(),
            output: output.as_ref().to_path_buf(),
        }
    }

    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with(Vec::<String>::new(), path)
    }

    /// Adds an input preceded by its own options (`-f concat`, `-safe 0`, ...).
    pub fn input_with<I, S>(mut self, arguments: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(Input {
            arguments: arguments.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    pub fn arg(mut self, argument: impl Into<String>) -> Self {
        self.output_args.push(argument.into());
        self
    }

    pub fn args<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(arguments.into_iter().map(Into::into));
        self
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.arg("-vf").arg(filter)
    }

    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.arg("-filter_complex").arg(filter)
    }

    pub fn map(self, stream: impl Into<String>) -> Self {
        self.arg("-map").arg(stream)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.arg("-preset").arg(preset)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.arg("-crf").arg(crf.to_string())
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn input_paths(&self) -> Vec<&Path> {
        self.inputs.iter().map(|input| input.path.as_path()).collect()
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        for input in &self.inputs {
            args.extend(input.arguments.iter().cloned());
            args.push("-i".to_owned());
            args.push(input.path.to_string_lossy().into_owned());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// The pipeline's only way of touching media binaries.
#[async_trait(?Send)]
pub trait MediaRunner {
    async fn run(
        &self,
        command: &FfmpegCommand,
        descriptor: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<()>;

    /// Container duration in seconds.
    async fn probe_duration(&self, path: &Path, cancel: &CancellationToken) -> PipelineResult<f64>;
}

/// ffmpeg/ffprobe executables, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Uses the explicit paths when given, otherwise looks the binaries up on `PATH`.
    pub fn resolve(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Result<Self, ConfigError> {
        let ffmpeg = match ffmpeg {
            Some(path) => path,
            None => which::which("ffmpeg").map_err(|_| ConfigError::MissingBinary {
                binary: "ffmpeg",
                key: "FFMPEG_PATH",
            })?,
        };
        let ffprobe = match ffprobe {
            Some(path) => path,
            None => which::which("ffprobe").map_err(|_| ConfigError::MissingBinary {
                binary: "ffprobe",
                key: "FFPROBE_PATH",
            })?,
        };
        Ok(Self::new(ffmpeg, ffprobe))
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }
}

#[async_trait(?Send)]
impl MediaRunner for Ffmpeg {
    async fn run(
        &self,
        command: &FfmpegCommand,
        descriptor: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        for input in command.input_paths() {
            if !tokio::fs::try_exists(input).await? {
                return Err(PipelineError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{descriptor}: input {} does not exist", input.display()),
                )));
            }
        }

        run_command(&self.ffmpeg, command.build_args(), descriptor, cancel).await?;
        Ok(())
    }

    async fn probe_duration(&self, path: &Path, cancel: &CancellationToken) -> PipelineResult<f64> {
        let arguments = vec!["-hide_banner".to_owned(), path.to_string_lossy().into_owned()];
        let output = run_command(&self.ffprobe, arguments, "ffprobe", cancel).await?;
        let text = String::from_utf8_lossy(&output.stderr);

        parse_duration(&text).ok_or_else(|| PipelineError::Probe {
            path: path.display().to_string(),
            reason: "no duration found".to_owned(),
        })
    }
}

/// Spawns the binary and waits for it, killing it if `cancel` fires first.
pub async fn run_command(
    executable: &Path,
    arguments: Vec<String>,
    descriptor: &str,
    cancel: &CancellationToken,
) -> PipelineResult<Output> {
    debug!(
        "running {descriptor}: {} {}",
        executable.display(),
        arguments.join(" ")
    );

    let child = Command::new(executable)
        .args(&arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::select! {
        output = child.wait_with_output() => output?,
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
    };

    if !output.status.success() {
        return Err(PipelineError::SubprocessFailed {
            step: descriptor.to_owned(),
            exit_code: output.status.code(),
            stderr_tail: stderr_tail(&output.stderr),
        });
    }

    Ok(output)
}

fn duration_regex() -> &'static Regex {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    DURATION.get_or_init(|| {
        Regex::new(r"(?m)^\s*Duration: (\d+):(\d\d):(\d\d(?:\.\d+)?),").expect("valid duration regex")
    })
}

pub fn parse_duration(probe_output: &str) -> Option<f64> {
    let cap = duration_regex().captures(probe_output)?;
    let hours: f64 = cap.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = cap.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = cap.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_argument_vector_in_order() {
        let args = FfmpegCommand::new("/scratch/out.mp4")
            .input_with(["-f", "concat", "-safe", "0"], "/scratch/list.txt")
            .input("/scratch/vo it's.mp3")
            .video_codec("copy")
            .build_args();

        assert_eq!(
            args,
            vec![
                "-y",
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                "/scratch/list.txt",
                "-i",
                "/scratch/vo it's.mp3",
                "-c:v",
                "copy",
                "/scratch/out.mp4",
            ]
        );
    }

    #[test]
    fn parses_probe_duration() {
        let banner = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'hook.mp4':\n  Duration: 00:01:02.50, start: 0.000000, bitrate: 1205 kb/s\n";
        assert_eq!(parse_duration(banner), Some(62.5));
        assert_eq!(parse_duration("  Duration: N/A, bitrate: N/A"), None);
    }

    #[tokio::test]
    async fn nonzero_exit_becomes_subprocess_failure() {
        let cancel = CancellationToken::new();
        let result = run_command(
            Path::new("sh"),
            vec!["-c".to_owned(), "echo boom >&2; exit 3".to_owned()],
            "shell",
            &cancel,
        )
        .await;

        match result {
            Err(PipelineError::SubprocessFailed {
                exit_code,
                stderr_tail,
                ..
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr_tail, "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_running_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = run_command(
            Path::new("sleep"),
            vec!["10".to_owned()],
            "sleep",
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_input_is_reported_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("hook.mp4");
        tokio::fs::write(&present, b"x").await.unwrap();

        // Spawning this ffmpeg would fail too, but without naming the input.
        let ffmpeg = Ffmpeg::new(dir.path().join("no-ffmpeg"), dir.path().join("no-ffprobe"));
        let command = FfmpegCommand::new(dir.path().join("out.mp4"))
            .input(&present)
            .input(dir.path().join("story.mp4"));

        match ffmpeg.run(&command, "concatenate clips", &CancellationToken::new()).await {
            Err(PipelineError::Io(err)) => {
                assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
                assert!(err.to_string().contains("story.mp4"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn missing_binary_names_the_setting() {
        let err = ConfigError::MissingBinary {
            binary: "ffprobe",
            key: "FFPROBE_PATH",
        };
        assert_eq!(
            err.to_string(),
            "ffprobe was not found on PATH; set FFPROBE_PATH explicitly"
        );
    }
}
