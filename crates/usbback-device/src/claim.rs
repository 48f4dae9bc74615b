use std::collections::HashSet;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::ClaimError;

/// Read-only view of a device's configuration/interface shape, standing
/// in for walking `udev->config[]`/`config->interface[]` directly.
pub trait UsbTopology: Send + Sync {
    fn configurations(&self) -> Vec<u8>;
    fn interfaces(&self, configuration: u8) -> Vec<u8>;
}

/// A deterministic [`UsbTopology`] for tests.
pub struct InMemoryTopology {
    configs: Vec<(u8, Vec<u8>)>,
}

impl InMemoryTopology {
    pub fn new(configs: Vec<(u8, Vec<u8>)>) -> Self {
        InMemoryTopology { configs }
    }
}

impl UsbTopology for InMemoryTopology {
    fn configurations(&self) -> Vec<u8> {
        self.configs.iter().map(|(c, _)| *c).collect()
    }

    fn interfaces(&self, configuration: u8) -> Vec<u8> {
        self.configs
            .iter()
            .find(|(c, _)| *c == configuration)
            .map(|(_, ifs)| ifs.clone())
            .unwrap_or_default()
    }
}

/// Tracks which (configuration, interface) pairs one connection's device
/// currently owns. Claiming walks every configuration's every interface,
/// mirroring `vusb_claim_dev`/`vusb_claim_config`/`vusb_claim_interface`.
///
/// Unlike the original, which releases only the currently active
/// configuration's interfaces on teardown even though it claimed every
/// configuration's interfaces up front, [`DeviceClaim::release_all`]
/// releases everything this claim holds, so a reprobe after a
/// configuration switch can never leave an orphaned claim behind.
pub struct DeviceClaim {
    claimed: Mutex<HashSet<(u8, u8)>>,
}

impl Default for DeviceClaim {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceClaim {
    pub fn new() -> Self {
        DeviceClaim { claimed: Mutex::new(HashSet::new()) }
    }

    /// Claims every interface of every configuration the topology
    /// reports. Fails without claiming anything further if an interface
    /// is already held by this same claim (a reprobe must `release_all`
    /// first).
    pub fn claim_all(&self, topology: &dyn UsbTopology) -> Result<usize, ClaimError> {
        let mut claimed = self.claimed.lock().unwrap();
        let mut count = 0;
        for configuration in topology.configurations() {
            for interface in topology.interfaces(configuration) {
                if !claimed.insert((configuration, interface)) {
                    warn!(configuration, interface, "interface already claimed");
                    return Err(ClaimError::InterfaceBusy { configuration, interface });
                }
                count += 1;
            }
        }
        debug!(interfaces = count, "claimed device");
        Ok(count)
    }

    /// Releases every interface this claim holds, as happens on device
    /// teardown or before a reprobe. Returns the number released.
    pub fn release_all(&self) -> usize {
        let mut claimed = self.claimed.lock().unwrap();
        let n = claimed.len();
        claimed.clear();
        debug!(interfaces = n, "released device");
        n
    }

    pub fn is_claimed(&self, configuration: u8, interface: u8) -> bool {
        self.claimed.lock().unwrap().contains(&(configuration, interface))
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_config_topology() -> InMemoryTopology {
        InMemoryTopology::new(vec![(1, vec![0, 1]), (2, vec![0])])
    }

    #[test]
    fn claim_all_claims_every_interface_of_every_configuration() {
        let claim = DeviceClaim::new();
        let claimed = claim.claim_all(&two_config_topology()).unwrap();
        assert_eq!(claimed, 3);
        assert!(claim.is_claimed(1, 0));
        assert!(claim.is_claimed(1, 1));
        assert!(claim.is_claimed(2, 0));
    }

    #[test]
    fn claiming_twice_without_releasing_fails() {
        let claim = DeviceClaim::new();
        claim.claim_all(&two_config_topology()).unwrap();
        let err = claim.claim_all(&two_config_topology()).unwrap_err();
        assert!(matches!(err, ClaimError::InterfaceBusy { .. }));
    }

    #[test]
    fn release_then_reclaim_succeeds_as_on_a_reprobe() {
        let claim = DeviceClaim::new();
        claim.claim_all(&two_config_topology()).unwrap();
        assert_eq!(claim.release_all(), 3);
        assert_eq!(claim.claimed_count(), 0);
        claim.claim_all(&two_config_topology()).unwrap();
        assert_eq!(claim.claimed_count(), 3);
    }
}
