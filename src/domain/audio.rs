use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};
use zeroize::Zeroize;

/// Sample rate of the canonical audio format (Hz).
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;
/// Channel count of the canonical audio format.
pub const CANONICAL_CHANNELS: u16 = 1;
/// Bit depth of the canonical audio format.
pub const CANONICAL_BITS_PER_SAMPLE: u16 = 16;

/// Audio container formats we can recognise from their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioContainer {
    Wav,
    WebM,
    Ogg,
    Mp3,
    Mp4,
    Flac,
    Unknown,
}

impl AudioContainer {
    /// Identify a container from its magic signature.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return AudioContainer::Wav;
        }
        if bytes.len() >= 4 && bytes[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
            return AudioContainer::WebM;
        }
        if bytes.len() >= 4 && &bytes[0..4] == b"OggS" {
            return AudioContainer::Ogg;
        }
        if bytes.len() >= 4 && &bytes[0..4] == b"fLaC" {
            return AudioContainer::Flac;
        }
        if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
            return AudioContainer::Mp4;
        }
        if bytes.len() >= 3 && &bytes[0..3] == b"ID3" {
            return AudioContainer::Mp3;
        }
        if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
            return AudioContainer::Mp3;
        }
        AudioContainer::Unknown
    }

    /// Parse a declared hint such as a MIME type (`audio/webm;codecs=opus`)
    /// or a file extension (`m4a`).
    pub fn from_hint(hint: &str) -> Self {
        let hint = hint.trim().to_lowercase();
        let essence = hint.split(';').next().unwrap_or("").trim();
        let name = essence.rsplit('/').next().unwrap_or(essence);
        match name.trim_start_matches('.') {
            "wav" | "wave" | "x-wav" | "vnd.wave" => AudioContainer::Wav,
            "webm" | "mkv" | "x-matroska" => AudioContainer::WebM,
            "ogg" | "oga" | "opus" => AudioContainer::Ogg,
            "mp3" | "mpeg" => AudioContainer::Mp3,
            "mp4" | "m4a" | "aac" | "x-m4a" => AudioContainer::Mp4,
            "flac" | "x-flac" => AudioContainer::Flac,
            _ => AudioContainer::Unknown,
        }
    }

    /// File extension used for temporary files of this container.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioContainer::Wav => "wav",
            AudioContainer::WebM => "webm",
            AudioContainer::Ogg => "ogg",
            AudioContainer::Mp3 => "mp3",
            AudioContainer::Mp4 => "m4a",
            AudioContainer::Flac => "flac",
            AudioContainer::Unknown => "audio",
        }
    }
}

impl std::fmt::Display for AudioContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// A finished recording handed over by the recorder.
///
/// The bytes are zeroed when the buffer is dropped. The buffer is consumed
/// once by the normalizer and never mutated.
#[derive(Debug, Zeroize)]
#[zeroize(drop)]
pub struct AudioBuffer {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    declared: Option<AudioContainer>,
    duration_secs: f32,
}

impl AudioBuffer {
    /// Create a buffer without a declared container (it will be sniffed).
    pub fn new(bytes: Vec<u8>, duration_secs: f32) -> Self {
        Self {
            bytes,
            declared: None,
            duration_secs,
        }
    }

    /// Create a buffer with a container hint from the recorder.
    pub fn with_container(bytes: Vec<u8>, container: AudioContainer, duration_secs: f32) -> Self {
        Self {
            bytes,
            declared: Some(container),
            duration_secs,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Recording duration reported by the recorder.
    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }

    /// Container detected from the bytes, falling back to the declared hint.
    pub fn container(&self) -> AudioContainer {
        match AudioContainer::sniff(&self.bytes) {
            AudioContainer::Unknown => self.declared.unwrap_or(AudioContainer::Unknown),
            sniffed => sniffed,
        }
    }
}

/// Canonical WAV produced by the normalizer for one request.
///
/// Owns the scratch directory holding the output and any intermediate files.
/// Everything is removed by `cleanup` or, on early exit, when dropped.
#[derive(Debug)]
pub struct NormalizedAudio {
    dir: Option<TempDir>,
    path: PathBuf,
    intermediates: Vec<PathBuf>,
    converted: bool,
    duration_secs: f32,
}

impl NormalizedAudio {
    pub fn new(
        dir: TempDir,
        path: PathBuf,
        intermediates: Vec<PathBuf>,
        converted: bool,
        duration_secs: f32,
    ) -> Self {
        Self {
            dir: Some(dir),
            path,
            intermediates,
            converted,
            duration_secs,
        }
    }

    /// Path of the canonical WAV file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory owned by this handle.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(|d| d.path())
    }

    pub fn intermediates(&self) -> &[PathBuf] {
        &self.intermediates
    }

    /// Whether the conversion tool was used.
    pub fn was_converted(&self) -> bool {
        self.converted
    }

    pub fn duration_secs(&self) -> f32 {
        self.duration_secs
    }

    /// Delete all files. Failures are logged, never returned.
    pub fn cleanup(mut self) {
        if let Some(dir) = self.dir.take() {
            let dir_path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(dir = ?dir_path, "Removed normalized audio"),
                Err(e) => warn!(dir = ?dir_path, error = %e, "Failed to remove normalized audio"),
            }
        }
    }
}
