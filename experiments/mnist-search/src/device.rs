//! Process-wide compute device selection, applied once at startup.

use std::str::FromStr;

use anyhow::{anyhow, Error, Result};
use burn_candle::CandleDevice;
use tracing::info;

/// Which device the process is allowed to see.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceSelection {
    Cpu,
    /// A single accelerator, by ordinal.
    Accelerator(usize),
}

impl FromStr for DeviceSelection {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        if value == "cpu" {
            return Ok(Self::Cpu);
        }
        if let Some(ordinal) = value.strip_prefix("cuda:") {
            let ordinal = ordinal
                .parse()
                .map_err(|_| anyhow!("invalid accelerator ordinal in {value:?}"))?;
            return Ok(Self::Accelerator(ordinal));
        }
        Err(anyhow!(
            "invalid device selection: {value:?} (expected \"cpu\" or \"cuda:<n>\")"
        ))
    }
}

/// Resource policy applied before any evaluator exists. It never changes
/// outputs, only which device does the work and how memory is claimed.
#[derive(Clone, Copy, Debug)]
pub struct DevicePolicy {
    pub selection: DeviceSelection,
    /// Advisory: accelerator runtimes that support it grow their allocation
    /// incrementally instead of reserving the whole card up front.
    pub allow_growth: bool,
}

/// Resolve the policy into the backend device. Call once, before building
/// the evaluator.
pub fn init_device(policy: &DevicePolicy) -> CandleDevice {
    let device = match policy.selection {
        DeviceSelection::Cpu => CandleDevice::Cpu,
        DeviceSelection::Accelerator(ordinal) => CandleDevice::Cuda(ordinal),
    };
    info!(
        ?device,
        allow_growth = policy.allow_growth,
        "compute device initialized"
    );
    device
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu_and_accelerator_ordinals() {
        assert_eq!("cpu".parse::<DeviceSelection>().unwrap(), DeviceSelection::Cpu);
        assert_eq!(
            "cuda:0".parse::<DeviceSelection>().unwrap(),
            DeviceSelection::Accelerator(0)
        );
        assert_eq!(
            "cuda:3".parse::<DeviceSelection>().unwrap(),
            DeviceSelection::Accelerator(3)
        );
    }

    #[test]
    fn rejects_unknown_devices() {
        assert!("gpu".parse::<DeviceSelection>().is_err());
        assert!("cuda:".parse::<DeviceSelection>().is_err());
        assert!("cuda:x".parse::<DeviceSelection>().is_err());
    }

    #[test]
    fn cpu_policy_resolves_to_the_cpu_device() {
        let policy = DevicePolicy {
            selection: DeviceSelection::Cpu,
            allow_growth: true,
        };
        assert_eq!(init_device(&policy), CandleDevice::Cpu);
    }
}
