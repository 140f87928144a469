//! Which providers are enabled for this process.

use crate::providers::ProviderId;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Immutable snapshot of provider enablement, built once at startup.
///
/// A provider is enabled iff its required credentials were configured. The
/// snapshot never changes at runtime; transient upstream failures do not
/// disable anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    enabled: BTreeMap<ProviderId, bool>,
}

impl ServiceStatus {
    pub fn new(enabled: impl IntoIterator<Item = (ProviderId, bool)>) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
        }
    }

    /// Providers missing from the snapshot count as disabled.
    pub fn is_enabled(&self, provider: ProviderId) -> bool {
        self.enabled.get(&provider).copied().unwrap_or(false)
    }

    /// Enabled providers in priority order.
    pub fn enabled(&self) -> impl Iterator<Item = ProviderId> + '_ {
        self.enabled
            .iter()
            .filter(|(_, on)| **on)
            .map(|(id, _)| *id)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled().count()
    }
}

impl Serialize for ServiceStatus {
    /// Serializes as `{"provider": bool}` for every known provider.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(ProviderId::ALL.len()))?;
        for id in ProviderId::ALL {
            map.serialize_entry(id.as_str(), &self.is_enabled(id))?;
        }
        map.end()
    }
}
