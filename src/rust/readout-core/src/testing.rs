// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! In-memory collaborators for tests.
//!
//! The mock driver answers `i * (100 * module + channel)` counts on every
//! channel with normal routing and `2i` counts with loopback routing. Channels
//! count as active once a frequency was written to them.
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use num_complex::Complex64;
use readout_common::{AnalogBank, ClockSource, ModuleId, Routing, TimestampPort};

use crate::capture_agent::{CaptureAgent, CaptureArgs, CaptureReader};
use crate::driver::{Command, ReadoutDriver, SampleFrame};
use crate::fast_noise::{BinPolicy, PfbCorrection, PfbSpectrum};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Resolve,
    SetTimestampPort(TimestampPort),
    SetClockSource(ClockSource),
    SetAnalogBank(AnalogBank),
    SetDacScale { dbm: f64, converter: u8 },
    SetNco { hz: f64, converter: u8 },
    SetRouting(Routing, ModuleId),
    ClearChannels(ModuleId),
    Execute(Vec<Command>),
    GetSamples { count: usize, module: ModuleId },
    GetPfbSamples { count: usize, module: ModuleId },
    SetFirStage(u8),
}

pub(crate) fn normal_sample(module: ModuleId, channel: usize) -> Complex64 {
    Complex64::new(0.0, 100.0 * f64::from(module.index()) + channel as f64)
}

pub(crate) const LOOPBACK_SAMPLE: Complex64 = Complex64::new(0.0, 2.0);

struct State {
    calls: Vec<Call>,
    routing: HashMap<ModuleId, Routing>,
    channels: HashMap<ModuleId, usize>,
    nco: HashMap<u8, f64>,
    fir_stage: u8,
    timestamp_port: TimestampPort,
    clock_source: ClockSource,
    failing: HashSet<ModuleId>,
    sample_budget: HashMap<ModuleId, usize>,
    nco_readback_offset: f64,
}

pub(crate) struct MockDriver {
    state: Mutex<State>,
}

impl Default for MockDriver {
    fn default() -> Self {
        MockDriver {
            state: Mutex::new(State {
                calls: vec![],
                routing: HashMap::new(),
                channels: HashMap::new(),
                nco: HashMap::new(),
                fir_stage: 6,
                timestamp_port: TimestampPort::Backplane,
                clock_source: ClockSource::Vcxo,
                failing: HashSet::new(),
                sample_budget: HashMap::new(),
                nco_readback_offset: 0.0,
            }),
        }
    }
}

impl MockDriver {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Fail every call addressing the module.
    pub(crate) fn fail_module(&self, module: ModuleId) {
        self.state.lock().unwrap().failing.insert(module);
    }

    /// Fail sample reads on the module after `count` successful ones.
    pub(crate) fn fail_samples_after(&self, module: ModuleId, count: usize) {
        self.state.lock().unwrap().sample_budget.insert(module, count);
    }

    pub(crate) fn set_timestamp_port_state(&self, port: TimestampPort) {
        self.state.lock().unwrap().timestamp_port = port;
    }

    /// The device reads back NCO settings shifted by this amount.
    pub(crate) fn set_nco_readback_offset(&self, offset: f64) {
        self.state.lock().unwrap().nco_readback_offset = offset;
    }

    pub(crate) fn routing(&self, module: ModuleId) -> Routing {
        self.state
            .lock()
            .unwrap()
            .routing
            .get(&module)
            .copied()
            .unwrap_or(Routing::Normal)
    }

    pub(crate) fn nco(&self, converter: u8) -> Option<f64> {
        self.state.lock().unwrap().nco.get(&converter).copied()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn check(&self, module: ModuleId) -> anyhow::Result<()> {
        if self.state.lock().unwrap().failing.contains(&module) {
            anyhow::bail!("module {module} is not responding");
        }
        Ok(())
    }

    fn sample(&self, module: ModuleId, channel: usize) -> Complex64 {
        match self.routing(module) {
            Routing::Loopback => LOOPBACK_SAMPLE,
            Routing::Normal => normal_sample(module, channel),
        }
    }

    fn take_sample_budget(&self, module: ModuleId) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(budget) = state.sample_budget.get_mut(&module) {
            if *budget == 0 {
                anyhow::bail!("sample read on module {module} timed out");
            }
            *budget -= 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ReadoutDriver for MockDriver {
    async fn resolve(&self) -> anyhow::Result<()> {
        self.record(Call::Resolve);
        Ok(())
    }

    async fn timestamp_port(&self) -> anyhow::Result<TimestampPort> {
        Ok(self.state.lock().unwrap().timestamp_port)
    }

    async fn set_timestamp_port(&self, port: TimestampPort) -> anyhow::Result<()> {
        self.record(Call::SetTimestampPort(port));
        self.state.lock().unwrap().timestamp_port = port;
        Ok(())
    }

    async fn set_clock_source(&self, source: ClockSource) -> anyhow::Result<()> {
        self.record(Call::SetClockSource(source));
        self.state.lock().unwrap().clock_source = source;
        Ok(())
    }

    async fn clock_source(&self) -> anyhow::Result<ClockSource> {
        Ok(self.state.lock().unwrap().clock_source)
    }

    async fn set_analog_bank(&self, bank: AnalogBank) -> anyhow::Result<()> {
        self.record(Call::SetAnalogBank(bank));
        Ok(())
    }

    async fn set_dac_scale(&self, dbm: f64, converter: u8) -> anyhow::Result<()> {
        self.record(Call::SetDacScale { dbm, converter });
        Ok(())
    }

    async fn set_nco_frequency(&self, hz: f64, converter: u8) -> anyhow::Result<()> {
        self.record(Call::SetNco { hz, converter });
        self.state.lock().unwrap().nco.insert(converter, hz);
        Ok(())
    }

    async fn nco_frequency(&self, converter: u8) -> anyhow::Result<f64> {
        let state = self.state.lock().unwrap();
        let hz = state
            .nco
            .get(&converter)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("NCO {converter} was never set"))?;
        Ok(hz + state.nco_readback_offset)
    }

    async fn set_routing(&self, routing: Routing, module: ModuleId) -> anyhow::Result<()> {
        self.record(Call::SetRouting(routing, module));
        self.check(module)?;
        self.state.lock().unwrap().routing.insert(module, routing);
        Ok(())
    }

    async fn clear_channels(&self, module: ModuleId) -> anyhow::Result<()> {
        self.record(Call::ClearChannels(module));
        self.check(module)?;
        self.state.lock().unwrap().channels.remove(&module);
        Ok(())
    }

    async fn execute(&self, commands: Vec<Command>) -> anyhow::Result<()> {
        for command in &commands {
            self.check(command.module())?;
        }
        let mut state = self.state.lock().unwrap();
        for command in &commands {
            if let Command::SetFrequency {
                channel, module, ..
            } = command
            {
                let active = state.channels.entry(*module).or_default();
                *active = (*active).max(usize::from(*channel));
            }
        }
        state.calls.push(Call::Execute(commands));
        Ok(())
    }

    async fn get_samples(&self, count: usize, module: ModuleId) -> anyhow::Result<SampleFrame> {
        self.record(Call::GetSamples { count, module });
        self.check(module)?;
        self.take_sample_budget(module)?;
        let channels = self
            .state
            .lock()
            .unwrap()
            .channels
            .get(&module)
            .copied()
            .unwrap_or(0);
        let samples: Vec<Complex64> = (1..=channels).map(|ch| self.sample(module, ch)).collect();
        Ok(SampleFrame {
            i: samples.iter().map(|z| vec![z.re; count]).collect(),
            q: samples.iter().map(|z| vec![z.im; count]).collect(),
        })
    }

    async fn get_pfb_samples(
        &self,
        count: usize,
        module: ModuleId,
    ) -> anyhow::Result<Vec<Complex64>> {
        self.record(Call::GetPfbSamples { count, module });
        self.check(module)?;
        Ok(vec![self.sample(module, 1); count])
    }

    async fn set_fir_stage(&self, stage: u8) -> anyhow::Result<()> {
        self.record(Call::SetFirStage(stage));
        self.state.lock().unwrap().fir_stage = stage;
        Ok(())
    }

    async fn fir_stage(&self) -> anyhow::Result<u8> {
        Ok(self.state.lock().unwrap().fir_stage)
    }
}

/// Records launches and creates the output directory like the parser does.
#[derive(Default)]
pub(crate) struct MockAgent {
    launches: Mutex<Vec<CaptureArgs>>,
    fail: bool,
}

impl MockAgent {
    pub(crate) fn failing() -> Self {
        MockAgent {
            launches: Mutex::default(),
            fail: true,
        }
    }

    pub(crate) fn launches(&self) -> Vec<CaptureArgs> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureAgent for MockAgent {
    async fn launch(&self, args: &CaptureArgs) -> anyhow::Result<()> {
        self.launches.lock().unwrap().push(args.clone());
        if self.fail {
            anyhow::bail!("parser not found");
        }
        std::fs::create_dir_all(&args.output_dir)?;
        Ok(())
    }
}

/// Serves `normal_sample` timestreams with a configurable length per module.
pub(crate) struct MockReader {
    lengths: HashMap<ModuleId, usize>,
    default_length: usize,
    reads: Mutex<Vec<(PathBuf, u16, ModuleId, usize)>>,
}

impl MockReader {
    pub(crate) fn new(default_length: usize) -> Self {
        MockReader {
            lengths: HashMap::new(),
            default_length,
            reads: Mutex::default(),
        }
    }

    pub(crate) fn with_length(mut self, module: ModuleId, length: usize) -> Self {
        self.lengths.insert(module, length);
        self
    }

    pub(crate) fn reads(&self) -> Vec<(PathBuf, u16, ModuleId, usize)> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureReader for MockReader {
    async fn read_module(
        &self,
        output_dir: &Path,
        serial: u16,
        module: ModuleId,
        channels: usize,
    ) -> anyhow::Result<Vec<Vec<Complex64>>> {
        self.reads
            .lock()
            .unwrap()
            .push((output_dir.to_path_buf(), serial, module, channels));
        let length = self
            .lengths
            .get(&module)
            .copied()
            .unwrap_or(self.default_length);
        Ok((1..=channels)
            .map(|ch| vec![normal_sample(module, ch); length])
            .collect())
    }
}

/// Passes the samples through unchanged, one frequency bin per sample.
#[derive(Default)]
pub(crate) struct MockPfb {
    calls: Mutex<Vec<(usize, f64, f64, BinPolicy)>>,
}

impl MockPfb {
    pub(crate) fn calls(&self) -> Vec<(usize, f64, f64, BinPolicy)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PfbCorrection for MockPfb {
    fn correct(
        &self,
        samples: &[Complex64],
        nco_hz: f64,
        target_hz: f64,
        policy: &BinPolicy,
    ) -> anyhow::Result<PfbSpectrum> {
        self.calls
            .lock()
            .unwrap()
            .push((samples.len(), nco_hz, target_hz, *policy));
        Ok(PfbSpectrum {
            frequencies: (0..samples.len()).map(|i| i as f64).collect(),
            z: samples.to_vec(),
        })
    }
}
