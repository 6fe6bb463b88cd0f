// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use readout_common::ModuleId;
use readout_log::diagnostic;

use crate::driver::{Command, ReadoutDriver};
use crate::error::ProtocolContext;
use crate::Result;

/// Channel commands collected client-side and sent as one atomic batch.
///
/// Nothing reaches the device before [`CommandBatch::commit`]. A batch that is
/// dropped without being committed is discarded.
pub struct CommandBatch<'a> {
    driver: &'a dyn ReadoutDriver,
    module: ModuleId,
    commands: Vec<Command>,
}

impl<'a> CommandBatch<'a> {
    pub fn new(driver: &'a dyn ReadoutDriver, module: ModuleId) -> Self {
        CommandBatch {
            driver,
            module,
            commands: vec![],
        }
    }

    /// Tone frequency relative to the NCO. Channels are numbered from 1.
    pub fn set_frequency(&mut self, offset_hz: f64, channel: u16) -> &mut Self {
        self.commands.push(Command::SetFrequency {
            offset_hz,
            channel,
            module: self.module,
        });
        self
    }

    pub fn set_amplitude(&mut self, normalized: f64, channel: u16) -> &mut Self {
        self.commands.push(Command::SetAmplitude {
            normalized,
            channel,
            module: self.module,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub async fn commit(mut self) -> Result<()> {
        let commands = std::mem::take(&mut self.commands);
        if commands.is_empty() {
            return Ok(());
        }
        self.driver.execute(commands).await.on_module(self.module)
    }
}

impl Drop for CommandBatch<'_> {
    fn drop(&mut self) {
        if !self.commands.is_empty() {
            diagnostic!(
                "Discarding {} uncommitted commands for module {}",
                self.commands.len(),
                self.module
            );
        }
    }
}
