//! Encoder command assembly.

use std::path::{Path, PathBuf};

use crate::error::{MediaError, MediaResult};

/// Where the encoder writes its machine-readable progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressSink {
    /// Append `key=value` blocks to a side file.
    File(PathBuf),
    /// Write the stream to stdout.
    Stdout,
}

impl ProgressSink {
    fn as_arg(&self) -> String {
        match self {
            ProgressSink::File(path) => path.to_string_lossy().to_string(),
            ProgressSink::Stdout => "pipe:1".to_string(),
        }
    }
}

/// Builder for encoder invocations.
///
/// Caller-supplied arguments are kept verbatim and in order; the builder
/// only wraps them with the fixed flag set, the segment filename pattern
/// and the output path.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    /// Output manifest path
    output: PathBuf,
    /// Caller-supplied arguments, verbatim
    raw_args: Vec<String>,
    /// Progress stream sink
    progress: ProgressSink,
    /// Segment filename pattern, when producing segmented output
    segment_pattern: Option<String>,
}

impl EncoderCommand {
    /// Create a new encoder command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            output: output.as_ref().to_path_buf(),
            raw_args: Vec::new(),
            progress: ProgressSink::Stdout,
            segment_pattern: None,
        }
    }

    /// Append caller-supplied arguments. Relative order is preserved.
    pub fn raw_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the progress sink.
    pub fn progress(mut self, sink: ProgressSink) -> Self {
        self.progress = sink;
        self
    }

    /// Set the segment filename pattern, e.g. `/scratch/v.%05d.ts`.
    pub fn segment_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.segment_pattern = Some(pattern.into());
        self
    }

    /// Build the final argument vector.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Fixed flags: overwrite, quiet logs, no stdin, automatic thread
        // count, machine-readable progress.
        args.push("-y".to_string());
        args.push("-loglevel".to_string());
        args.push("error".to_string());
        args.push("-nostdin".to_string());
        args.push("-threads".to_string());
        args.push("0".to_string());
        args.push("-progress".to_string());
        args.push(self.progress.as_arg());

        // Caller arguments, verbatim
        args.extend(self.raw_args.clone());

        if let Some(ref pattern) = self.segment_pattern {
            args.push("-hls_segment_filename".to_string());
            args.push(pattern.clone());
        }

        // Output manifest
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Segment filename pattern for a manifest name: `v.m3u8` becomes
/// `v.%05d.ts`.
pub fn segment_pattern_for(manifest_name: &str) -> String {
    match manifest_name.strip_suffix(".m3u8") {
        Some(stem) => format!("{stem}.%05d.ts"),
        None => format!("{manifest_name}.%05d.ts"),
    }
}

/// Resolve the encoder executable, searching PATH for bare names.
pub fn check_encoder(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::EncoderNotFound(program.to_string()))
}

/// Resolve the probe executable, searching PATH for bare names.
pub fn check_probe(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::ProbeNotFound(program.to_string()))
}
