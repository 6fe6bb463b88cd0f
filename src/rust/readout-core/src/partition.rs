// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Assignment of caller channels to readout modules.
//!
//! Every channel goes to the module whose NCO is closest to the channel's
//! frequencies, measured as the largest offset over the channel's span so that
//! the chosen module covers the whole span. The result carries an explicit
//! ownership table, which is used to restore the caller's channel order from
//! per-module results.
use readout_common::{DeviceTraits, ModuleId};

use crate::module_map::ModuleMap;
use crate::settings::AcquisitionSettings;
use crate::{Error, Result};

/// A caller channel: the frequencies it visits and its tone power.
///
/// A single tone is a request with one frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRequest {
    pub frequencies: Vec<f64>,
    pub amplitude_dbm: f64,
}

impl ChannelRequest {
    pub fn tone(frequency: f64, amplitude_dbm: f64) -> Self {
        ChannelRequest {
            frequencies: vec![frequency],
            amplitude_dbm,
        }
    }

    /// Largest offset of the span from `nco`.
    fn distance(&self, nco: f64) -> f64 {
        self.frequencies
            .iter()
            .fold(0.0, |acc: f64, f| acc.max((f - nco).abs()))
    }
}

/// Pair up frequencies and amplitudes given as separate columns.
pub fn tone_requests(frequencies: &[f64], amplitudes_dbm: &[f64]) -> Result<Vec<ChannelRequest>> {
    if frequencies.len() != amplitudes_dbm.len() {
        return Err(Error::configuration(format!(
            "Got {} frequencies but {} amplitudes",
            frequencies.len(),
            amplitudes_dbm.len()
        )));
    }
    Ok(frequencies
        .iter()
        .zip(amplitudes_dbm)
        .map(|(&f, &a)| ChannelRequest::tone(f, a))
        .collect())
}

pub fn sweep_requests(
    frequencies: &[Vec<f64>],
    amplitudes_dbm: &[f64],
) -> Result<Vec<ChannelRequest>> {
    if frequencies.len() != amplitudes_dbm.len() {
        return Err(Error::configuration(format!(
            "Got {} sweep channels but {} amplitudes",
            frequencies.len(),
            amplitudes_dbm.len()
        )));
    }
    if let Some(points) = frequencies.first().map(Vec::len) {
        if points == 0 {
            return Err(Error::configuration("Sweep channels have no points"));
        }
        if let Some((channel, f)) = frequencies
            .iter()
            .enumerate()
            .find(|(_, f)| f.len() != points)
        {
            return Err(Error::configuration(format!(
                "Channel {channel} has {} sweep points, expected {points}",
                f.len()
            )));
        }
    }
    Ok(frequencies
        .iter()
        .zip(amplitudes_dbm)
        .map(|(f, &a)| ChannelRequest {
            frequencies: f.clone(),
            amplitude_dbm: a,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionLimits {
    /// Largest allowed offset of any frequency from its module's NCO.
    pub bandwidth: f64,
    pub full_scale_dbm: f64,
    pub max_channels_per_module: usize,
}

impl PartitionLimits {
    pub fn new(traits: &DeviceTraits, settings: &AcquisitionSettings) -> Self {
        PartitionLimits {
            bandwidth: traits.nco_bandwidth.value(),
            full_scale_dbm: settings.full_scale_dbm,
            max_channels_per_module: traits.max_channels_per_module,
        }
    }
}

/// A channel as seen by the module that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleChannel {
    /// Index of the channel in the caller's request.
    pub channel: usize,
    pub frequencies: Vec<f64>,
    pub amplitude_dbm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    owners: Vec<ModuleId>,
    modules: ModuleMap<Vec<ModuleChannel>>,
}

impl Partition {
    /// Module owning the given caller channel.
    pub fn owner(&self, channel: usize) -> Option<ModuleId> {
        self.owners.get(channel).copied()
    }

    pub fn channel_count(&self) -> usize {
        self.owners.len()
    }

    /// Channels per module, in request order. Every configured module is
    /// present, possibly without channels.
    pub fn modules(&self) -> &ModuleMap<Vec<ModuleChannel>> {
        &self.modules
    }

    pub fn channels(&self, module: ModuleId) -> &[ModuleChannel] {
        self.modules.get(module).map_or(&[], Vec::as_slice)
    }

    /// Restore the caller's channel order from per-module results.
    ///
    /// Each module must deliver exactly one item per owned channel, in the
    /// order of [`Partition::channels`].
    pub fn merge<T>(&self, per_module: ModuleMap<Vec<T>>) -> Result<Vec<T>> {
        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None)
            .take(self.owners.len())
            .collect();
        for (module, items) in per_module {
            let channels = self.channels(module);
            if channels.len() != items.len() {
                return Err(Error::new(format!(
                    "Module {module} returned {} channels, expected {}",
                    items.len(),
                    channels.len()
                )));
            }
            for (channel, item) in channels.iter().zip(items) {
                slots[channel.channel] = Some(item);
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(channel, slot)| {
                slot.ok_or_else(|| Error::new(format!("No result for channel {channel}")))
            })
            .collect()
    }
}

/// Assign every request to the module with the nearest NCO.
///
/// Ties go to the lowest module. Fails before anything is sent to the device
/// if no NCO is configured, a channel has no frequencies, a frequency is out of
/// the module's bandwidth, an amplitude exceeds full scale, or a module would
/// need more channels than it has.
pub fn partition(
    nco: &ModuleMap<f64>,
    requests: &[ChannelRequest],
    limits: &PartitionLimits,
) -> Result<Partition> {
    if nco.is_empty() {
        return Err(Error::configuration("NCO frequencies are not set"));
    }
    let mut modules: ModuleMap<Vec<ModuleChannel>> = nco.modules().map(|m| (m, vec![])).collect();
    let mut owners = Vec::with_capacity(requests.len());
    for (channel, request) in requests.iter().enumerate() {
        if request.frequencies.is_empty() {
            return Err(Error::configuration(format!(
                "Channel {channel} has no frequencies"
            )));
        }
        if request.frequencies.iter().any(|f| !f.is_finite()) {
            return Err(Error::configuration(format!(
                "Channel {channel} has a non-finite frequency"
            )));
        }
        if request.amplitude_dbm.is_nan() || request.amplitude_dbm > limits.full_scale_dbm {
            return Err(Error::configuration(format!(
                "Amplitude {} dBm of channel {channel} exceeds the full scale of {} dBm: raise the full scale or lower the power",
                request.amplitude_dbm, limits.full_scale_dbm
            )));
        }
        let mut best: Option<(ModuleId, f64)> = None;
        for (module, &center) in nco.iter() {
            let distance = request.distance(center);
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((module, distance));
            }
        }
        let Some((module, distance)) = best else {
            return Err(Error::configuration("NCO frequencies are not set"));
        };
        if distance > limits.bandwidth {
            return Err(Error::configuration(format!(
                "Channel {channel} is {distance} Hz away from the nearest NCO (module {module}); all frequencies must be within {} Hz of an NCO",
                limits.bandwidth
            )));
        }
        let owned = modules
            .get_mut(module)
            .ok_or_else(|| Error::new(format!("Module {module} missing from partition")))?;
        if owned.len() == limits.max_channels_per_module {
            return Err(Error::configuration(format!(
                "Module {module} cannot hold more than {} channels",
                limits.max_channels_per_module
            )));
        }
        owned.push(ModuleChannel {
            channel,
            frequencies: request.frequencies.clone(),
            amplitude_dbm: request.amplitude_dbm,
        });
        owners.push(module);
    }
    Ok(Partition { owners, modules })
}
