use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::adapters::binary_resolver::{BinaryResolver, BinaryRole};
use crate::domain::audio::{CANONICAL_BITS_PER_SAMPLE, CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE};
use crate::domain::config::AudioConfig;
use crate::domain::{
    AudioBuffer, AudioContainer, DomainError, EventBus, NormalizedAudio, PipelineEvent,
};

/// File name of the canonical output inside the scratch directory.
const OUTPUT_FILE: &str = "audio.wav";

/// Converts recordings into 16 kHz mono 16-bit PCM WAV files.
pub struct AudioNormalizer {
    resolver: Arc<BinaryResolver>,
    config: AudioConfig,
    events: EventBus,
}

impl AudioNormalizer {
    pub fn new(resolver: Arc<BinaryResolver>, config: AudioConfig, events: EventBus) -> Self {
        Self {
            resolver,
            config,
            events,
        }
    }

    /// Normalize a recording.
    ///
    /// Canonical WAV input is written verbatim without touching the
    /// conversion tool. On error nothing is left on disk.
    pub async fn normalize(&self, buffer: AudioBuffer) -> Result<NormalizedAudio, DomainError> {
        if buffer.len() < self.config.min_input_bytes {
            warn!(
                size = buffer.len(),
                min = self.config.min_input_bytes,
                "Recording too small, treating as failed recording"
            );
            return Err(DomainError::InputTooSmall {
                size: buffer.len(),
                min: self.config.min_input_bytes,
            });
        }

        let container = buffer.container();
        self.events.emit(PipelineEvent::ConversionStarted {
            container,
            bytes: buffer.len(),
        });

        let start = Instant::now();
        let result = self.normalize_inner(&buffer, container).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.events.emit(PipelineEvent::ConversionFinished {
            converted: result.as_ref().map(|a| a.was_converted()).unwrap_or(true),
            duration_ms,
            success: result.is_ok(),
        });

        match &result {
            Ok(audio) => info!(
                container = %container,
                converted = audio.was_converted(),
                duration_ms,
                "Audio normalized"
            ),
            Err(e) => warn!(container = %container, error = %e, "Audio normalization failed"),
        }

        result
    }

    async fn normalize_inner(
        &self,
        buffer: &AudioBuffer,
        container: AudioContainer,
    ) -> Result<NormalizedAudio, DomainError> {
        // Dropped on every early return, which removes input and output.
        let scratch = self.scratch_dir()?;
        let output = scratch.path().join(OUTPUT_FILE);

        if container == AudioContainer::Wav && is_canonical_wav(buffer.bytes()) {
            debug!("Input already canonical WAV, skipping conversion");
            tokio::fs::write(&output, buffer.bytes()).await?;
            return Ok(NormalizedAudio::new(
                scratch,
                output,
                Vec::new(),
                false,
                buffer.duration_secs(),
            ));
        }

        let input_name = format!("input.{}", container.extension());
        let input = scratch.path().join(input_name);
        tokio::fs::write(&input, buffer.bytes()).await?;

        let converter = self.resolver.resolve(BinaryRole::Converter).map_err(|e| {
            DomainError::ConversionFailed(format!(
                "{} is required to convert {} audio but is not installed ({})",
                BinaryRole::Converter,
                container,
                e
            ))
        })?;

        self.run_converter(&converter, &input, &output).await?;

        let size = match tokio::fs::metadata(&output).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };
        if size == 0 {
            return Err(DomainError::ConversionFailed(format!(
                "{} produced no output",
                BinaryRole::Converter
            )));
        }

        Ok(NormalizedAudio::new(scratch, output, vec![input], true, buffer.duration_secs()))
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, DomainError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("voxflow-");
        let dir = match &self.config.temp_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn run_converter(
        &self,
        converter: &Path,
        input: &Path,
        output: &Path,
    ) -> Result<(), DomainError> {
        let timeout = self.config.conversion_timeout();
        debug!(
            converter = ?converter,
            input = ?input,
            timeout_ms = timeout.as_millis() as u64,
            "Running audio conversion"
        );

        let spawned = Command::new(converter)
            .args(conversion_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DomainError::ConversionFailed(format!(
                    "{} is required for audio conversion but could not be executed: {}",
                    BinaryRole::Converter,
                    e
                )));
            }
            Err(e) => {
                let message = format!("Failed to start {}: {}", BinaryRole::Converter, e);
                return Err(DomainError::ConversionFailed(message));
            }
        };

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut captured = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut captured).await;
            }
            captured
        });

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let stderr = stderr_task.await.unwrap_or_default();
                if status.success() {
                    Ok(())
                } else {
                    Err(DomainError::ConversionFailed(format!(
                        "{} exited with {}: {}",
                        BinaryRole::Converter,
                        status,
                        stderr.trim()
                    )))
                }
            }
            Ok(Err(e)) => {
                stderr_task.abort();
                Err(DomainError::ConversionFailed(format!(
                    "Failed waiting for {}: {}",
                    BinaryRole::Converter,
                    e
                )))
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out conversion");
                }
                stderr_task.abort();
                Err(DomainError::ConversionFailed(format!(
                    "{} timed out after {}ms",
                    BinaryRole::Converter,
                    timeout.as_millis()
                )))
            }
        }
    }
}

/// Arguments converting `input` to canonical WAV at `output`.
fn conversion_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-ar".to_string(),
        CANONICAL_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        CANONICAL_CHANNELS.to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        output.display().to_string(),
    ]
}

/// True when the WAV header already describes the canonical format.
fn is_canonical_wav(bytes: &[u8]) -> bool {
    match hound::WavReader::new(Cursor::new(bytes)) {
        Ok(reader) => {
            let spec = reader.spec();
            spec.sample_rate == CANONICAL_SAMPLE_RATE
                && spec.channels == CANONICAL_CHANNELS
                && spec.bits_per_sample == CANONICAL_BITS_PER_SAMPLE
                && spec.sample_format == hound::SampleFormat::Int
        }
        Err(e) => {
            debug!(error = %e, "Unreadable WAV header, will convert");
            false
        }
    }
}

/// Directory holding the converter, for prepending to a child's `PATH`.
pub fn converter_dir(resolver: &BinaryResolver) -> Option<PathBuf> {
    resolver
        .resolve(BinaryRole::Converter)
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
}
