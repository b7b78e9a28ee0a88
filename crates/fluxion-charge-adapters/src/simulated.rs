// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use async_trait::async_trait;
use chrono::Utc;
use fluxion_charge_core::{BatteryController, ExternalResult};
use fluxion_charge_types::{BatteryTelemetry, ChargeMode};
use parking_lot::Mutex;
use tracing::info;

/// Dry-run controller: logs every command and reports a grid-connected battery.
///
/// A charge command moves the simulated state of charge straight to the target, so the
/// target-reached path can be exercised without hardware.
#[derive(Debug)]
pub struct SimulatedController {
    soc: Mutex<u8>,
    last_command: Mutex<Option<(u8, ChargeMode)>>,
}

impl SimulatedController {
    pub fn new(initial_soc: u8) -> Self {
        Self {
            soc: Mutex::new(initial_soc.min(100)),
            last_command: Mutex::new(None),
        }
    }

    pub fn last_command(&self) -> Option<(u8, ChargeMode)> {
        *self.last_command.lock()
    }
}

#[async_trait]
impl BatteryController for SimulatedController {
    async fn read_status(&self) -> ExternalResult<BatteryTelemetry> {
        Ok(BatteryTelemetry {
            soc: *self.soc.lock(),
            power_flow_kw: 0.0,
            grid_connected: true,
            solar_power_kw: None,
            read_at: Utc::now(),
        })
    }

    async fn set_target(&self, target_soc: u8, mode: ChargeMode) -> ExternalResult<()> {
        info!(target_soc, ?mode, "[SIMULATION] Battery command");
        if mode == ChargeMode::Charge {
            let mut soc = self.soc.lock();
            *soc = (*soc).max(target_soc.min(100));
        }
        *self.last_command.lock() = Some((target_soc, mode));
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
