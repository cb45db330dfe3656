use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::adapters::binary_resolver::{BinaryResolver, BinaryRole};
use crate::domain::{classify_transcript, DomainError, NormalizedAudio, Transcript};
use crate::ports::{TranscribeConfig, Transcriber};

/// `-oj` output of the transcription CLI.
#[derive(Debug, Deserialize)]
struct CliOutput {
    #[serde(default)]
    transcription: Vec<CliSegment>,
    result: Option<CliResult>,
}

#[derive(Debug, Deserialize)]
struct CliSegment {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CliResult {
    language: Option<String>,
}

/// Transcribes by running the CLI once per request.
pub struct CliTranscriber {
    resolver: Arc<BinaryResolver>,
    timeout: Duration,
}

impl CliTranscriber {
    pub fn new(resolver: Arc<BinaryResolver>, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    fn args(
        audio: &Path,
        model: &Path,
        output_base: &Path,
        config: &TranscribeConfig,
    ) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            model.display().to_string(),
            "-f".to_string(),
            audio.display().to_string(),
            "-oj".to_string(),
            "-of".to_string(),
            output_base.display().to_string(),
            "-np".to_string(),
        ];
        if config.threads > 0 {
            args.push("-t".to_string());
            args.push(config.threads.to_string());
        }
        if let Some(language) = &config.language {
            args.push("-l".to_string());
            args.push(language.clone());
        }
        args
    }
}

#[async_trait]
impl Transcriber for CliTranscriber {
    async fn transcribe(
        &self,
        audio: &NormalizedAudio,
        config: &TranscribeConfig,
    ) -> Result<Transcript, DomainError> {
        let Some(model) = &config.model else {
            let message = "No model configured for local transcription".to_string();
            return Err(DomainError::Config(message));
        };
        let binary = self.resolver.resolve(BinaryRole::Cli)?;

        let scratch = audio
            .scratch_dir()
            .or_else(|| audio.path().parent())
            .unwrap_or_else(|| Path::new("."));
        let output_base = scratch.join("result");
        let args = Self::args(audio.path(), &model.file_path, &output_base, config);
        debug!(binary = ?binary, args = ?args, "Running transcription CLI");

        let start = Instant::now();
        let spawned = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let program = binary.display();
                return Err(DomainError::Io(format!("Failed to start {}: {}", program, e)));
            }
        };

        // On timeout the child is dropped, which kills it.
        let wait = child.wait_with_output();
        let output = match tokio::time::timeout(self.timeout, wait).await {
            Ok(output) => output?,
            Err(_) => {
                let secs = self.timeout.as_secs();
                warn!(timeout_secs = secs, "Transcription CLI timed out");
                return Err(DomainError::ProcessCrashed {
                    code: None,
                    diagnostics: format!("timed out after {}s", secs),
                });
            }
        };

        if !output.status.success() {
            return Err(DomainError::ProcessCrashed {
                code: output.status.code(),
                diagnostics: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let json_path = output_base.with_extension("json");
        let (text, detected_language) = match tokio::fs::read_to_string(&json_path).await {
            Ok(json) => {
                let parsed: CliOutput = match serde_json::from_str(&json) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        let message = format!("{}: {}", json_path.display(), e);
                        return Err(DomainError::ResponseParse(message));
                    }
                };
                let text = parsed
                    .transcription
                    .iter()
                    .map(|s| s.text.trim())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                (text, parsed.result.and_then(|r| r.language))
            }
            Err(e) => {
                debug!(path = ?json_path, error = %e, "No JSON output, reading stdout");
                (strip_timestamps(&String::from_utf8_lossy(&output.stdout)), None)
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let chars = text.len();
        info!(duration_ms, chars, "CLI transcription completed");

        classify_transcript(Transcript {
            text,
            detected_language,
            duration_ms,
        })
    }
}

/// Drop `[00:00:00.000 --> 00:00:02.000]` prefixes from CLI output lines.
fn strip_timestamps(stdout: &str) -> String {
    stdout
        .lines()
        .map(|line| {
            let line = line.trim();
            match (line.starts_with('['), line.find(']')) {
                (true, Some(end)) => line[end + 1..].trim(),
                _ => line,
            }
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelReference;

    #[test]
    fn test_strip_timestamps() {
        let stdout = concat!(
            "\n[00:00:00.000 --> 00:00:02.000]   Hello there.\n",
            "[00:00:02.000 --> 00:00:03.000]  General Kenobi.\n",
        );
        assert_eq!(strip_timestamps(stdout), "Hello there. General Kenobi.");
        assert_eq!(strip_timestamps("plain text"), "plain text");
    }

    #[test]
    fn test_args() {
        let config = TranscribeConfig {
            language: Some("en".to_string()),
            threads: 2,
            model: None,
        };
        let args = CliTranscriber::args(
            Path::new("/tmp/a/audio.wav"),
            Path::new("/models/ggml-base.bin"),
            Path::new("/tmp/a/result"),
            &config,
        );
        assert_eq!(
            args,
            vec![
                "-m",
                "/models/ggml-base.bin",
                "-f",
                "/tmp/a/audio.wav",
                "-oj",
                "-of",
                "/tmp/a/result",
                "-np",
                "-t",
                "2",
                "-l",
                "en",
            ]
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::path::PathBuf;

        struct Setup {
            _tools: tempfile::TempDir,
            transcriber: CliTranscriber,
            audio: NormalizedAudio,
            config: TranscribeConfig,
        }

        fn setup(script: &str, timeout: Duration) -> Setup {
            use std::os::unix::fs::PermissionsExt;

            let tools = tempfile::tempdir().unwrap();
            let cli = tools.path().join("whisper-cli");
            std::fs::write(&cli, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&cli, std::fs::Permissions::from_mode(0o755)).unwrap();
            let model = tools.path().join("ggml-base.bin");
            std::fs::write(&model, vec![0u8; 2048]).unwrap();

            let resolver = BinaryResolver::new(None)
                .with_override(BinaryRole::Cli, cli)
                .with_search_path("")
                .without_well_known_dirs();

            let scratch = tempfile::tempdir().unwrap();
            let audio_path: PathBuf = scratch.path().join("audio.wav");
            std::fs::write(&audio_path, b"RIFF").unwrap();

            Setup {
                _tools: tools,
                transcriber: CliTranscriber::new(Arc::new(resolver), timeout),
                audio: NormalizedAudio::new(scratch, audio_path, Vec::new(), false, 1.0),
                config: TranscribeConfig {
                    model: Some(ModelReference::new("base", model, 1)),
                    ..Default::default()
                },
            }
        }

        const WRITE_JSON: &str = r#"while [ $# -gt 0 ]; do
  case "$1" in
    -of) out="$2"; shift ;;
  esac
  shift
done
printf '{"result":{"language":"en"},' > "$out.json"
printf '"transcription":[{"text":" hello"},{"text":" world "}]}' >> "$out.json""#;

        #[tokio::test]
        async fn test_reads_json_output() {
            let s = setup(WRITE_JSON, Duration::from_secs(10));
            let transcript = s.transcriber.transcribe(&s.audio, &s.config).await.unwrap();
            assert_eq!(transcript.text, "hello world");
            assert_eq!(transcript.detected_language.as_deref(), Some("en"));
            s.audio.cleanup();
        }

        #[tokio::test]
        async fn test_falls_back_to_stdout() {
            let s = setup(
                "echo '[00:00:00.000 --> 00:00:01.000]   from stdout'",
                Duration::from_secs(10),
            );
            let transcript = s.transcriber.transcribe(&s.audio, &s.config).await.unwrap();
            assert_eq!(transcript.text, "from stdout");
        }

        #[tokio::test]
        async fn test_silent_output_is_no_audio() {
            let s = setup("exit 0", Duration::from_secs(10));
            let result = s.transcriber.transcribe(&s.audio, &s.config).await;
            let err = result.unwrap_err();
            assert!(err.is_no_audio());
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_crash_with_stderr() {
            let script = "echo 'failed to load model' >&2\nexit 2";
            let s = setup(script, Duration::from_secs(10));
            match s.transcriber.transcribe(&s.audio, &s.config).await {
                Err(DomainError::ProcessCrashed { code, diagnostics }) => {
                    assert_eq!(code, Some(2));
                    assert!(diagnostics.contains("failed to load model"));
                }
                other => panic!("expected ProcessCrashed, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_timeout_is_enforced() {
            let s = setup("sleep 10", Duration::from_millis(200));
            let start = Instant::now();
            let result = s.transcriber.transcribe(&s.audio, &s.config).await;
            let err = result.unwrap_err();
            assert!(start.elapsed() < Duration::from_secs(5));
            assert!(matches!(err, DomainError::ProcessCrashed { code: None, .. }));
        }
    }
}
