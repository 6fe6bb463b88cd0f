// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! External packet capture.
//!
//! Noise timestreams are streamed by the board as network packets and written
//! to disk by a separate parser process, one artifact per module. The parser's
//! on-disk format is known only to the [`CaptureReader`] implementation.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use num_complex::Complex64;
use readout_common::ModuleId;
use readout_log::{diagnostic, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureArgs {
    pub output_dir: PathBuf,
    pub interface: String,
    pub serial: u16,
    pub sample_count: u64,
}

impl CaptureArgs {
    /// Command line of the parser executable.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "-d".to_string(),
            self.output_dir.display().to_string(),
            "-i".to_string(),
            self.interface.clone(),
            "-s".to_string(),
            format!("{:04}", self.serial),
            "-n".to_string(),
            self.sample_count.to_string(),
        ]
    }
}

#[async_trait]
pub trait CaptureAgent: Send + Sync {
    /// Start a capture. Returns once the capture is running; completion is not
    /// reported.
    async fn launch(&self, args: &CaptureArgs) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CaptureReader: Send + Sync {
    /// Timestreams of the first `channels` channels of a module, in readout counts.
    async fn read_module(
        &self,
        output_dir: &Path,
        serial: u16,
        module: ModuleId,
        channels: usize,
    ) -> anyhow::Result<Vec<Vec<Complex64>>>;
}

/// Runs the parser executable as a child process.
///
/// The process is never killed. Its exit status is logged when it ends.
#[derive(Debug, Clone)]
pub struct ExternalParser {
    path: PathBuf,
}

impl ExternalParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ExternalParser { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CaptureAgent for ExternalParser {
    async fn launch(&self, args: &CaptureArgs) -> anyhow::Result<()> {
        let argv = args.to_args();
        diagnostic!("Launching {} {}", self.path.display(), argv.join(" "));
        let mut child = tokio::process::Command::new(&self.path)
            .args(&argv)
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| {
                anyhow::anyhow!("Failed to launch parser {}: {e}", self.path.display())
            })?;
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    warn!("Parser exited with {}", status);
                }
                Ok(_) => {
                    diagnostic!("Parser finished");
                }
                Err(e) => {
                    warn!("Failed to wait for parser: {}", e);
                }
            }
        });
        Ok(())
    }
}
