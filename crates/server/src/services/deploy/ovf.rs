use serde::Deserialize;
use vmctl_common::prelude::{Error, Result};

/// Name used when the descriptor names its virtual system neither way.
///
pub const FALLBACK_NAME: &str = "Virtual Appliance";

/// The parts of an OVF descriptor needed to build an import spec.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    system_name: Option<String>,
    system_id: Option<String>,
    /// Network names declared in the `NetworkSection`.
    pub networks: Vec<String>,
}

impl Envelope {
    /// Parses a raw OVF descriptor.
    ///
    pub fn parse(descriptor: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(descriptor);
        let text = text.trim_start_matches('\u{feff}');
        let raw: RawEnvelope =
            quick_xml::de::from_str(text).map_err(|error| Error::OvfMalformed(error.to_string()))?;

        let system = raw.virtual_system.or(raw.virtual_system_collection);
        let (system_name, system_id) = match system {
            Some(system) => (non_empty(system.name), non_empty(system.id)),
            None => (None, None),
        };
        let networks = raw
            .network_section
            .map(|section| section.networks)
            .unwrap_or_default()
            .into_iter()
            .map(|network| network.name)
            .collect();

        Ok(Self {
            system_name,
            system_id,
            networks,
        })
    }

    /// Best-effort name of the VM: `VirtualSystem.Name`, then its ID, then a
    /// fixed fallback.
    ///
    pub fn vm_name(&self) -> &str {
        self.system_name
            .as_deref()
            .or(self.system_id.as_deref())
            .unwrap_or(FALLBACK_NAME)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

// quick-xml matches on local names, so `ovf:` prefixed descriptors parse the
// same way as unprefixed ones.

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "NetworkSection", default)]
    network_section: Option<RawNetworkSection>,
    #[serde(rename = "VirtualSystem", default)]
    virtual_system: Option<RawVirtualSystem>,
    #[serde(rename = "VirtualSystemCollection", default)]
    virtual_system_collection: Option<RawVirtualSystem>,
}

#[derive(Debug, Deserialize)]
struct RawNetworkSection {
    #[serde(rename = "Network", default)]
    networks: Vec<RawNetwork>,
}

#[derive(Debug, Deserialize)]
struct RawNetwork {
    #[serde(rename = "@name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawVirtualSystem {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
}
