//! Network identity: protocol magic and slot-to-wall-clock mapping.
//!
//! Resolved once at startup into a [Network] value and handed to the components that
//! need it; there is no process-wide lookup table to consult later.

use crate::config::ConfigError;

/// Slot timing of a network (Shelley-era constants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    /// Unix time in milliseconds at `zero_slot`.
    pub zero_time_ms: i64,
    pub zero_slot: u64,
    pub slot_length_ms: i64,
}

impl SlotConfig {
    pub const MAINNET: Self = Self {
        zero_time_ms: 1_596_059_091_000,
        zero_slot: 4_492_800,
        slot_length_ms: 1000,
    };
    pub const PREVIEW: Self = Self {
        zero_time_ms: 1_666_656_000_000,
        zero_slot: 0,
        slot_length_ms: 1000,
    };
    pub const PREPROD: Self = Self {
        zero_time_ms: 1_654_041_600_000 + 1_728_000_000,
        zero_slot: 86_400,
        slot_length_ms: 1000,
    };

    /// Unix time in milliseconds at the beginning of `slot`.
    ///
    /// Slots before `zero_slot` map to earlier times (possibly negative).
    pub fn slot_to_unix_ms(&self, slot: u64) -> i64 {
        let offset = slot as i128 - self.zero_slot as i128;
        let ms = self.zero_time_ms as i128 + offset * self.slot_length_ms as i128;
        ms.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Unix time in nanoseconds at the beginning of `slot`, clamped at zero.
    pub fn slot_to_unix_nanos(&self, slot: u64) -> u64 {
        let ms = self.slot_to_unix_ms(slot).max(0) as u64;
        ms.saturating_mul(1_000_000)
    }
}

struct KnownNetwork {
    name: &'static str,
    magic: u32,
    slot_config: SlotConfig,
}

const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        name: "mainnet",
        magic: 764_824_073,
        slot_config: SlotConfig::MAINNET,
    },
    KnownNetwork {
        name: "preprod",
        magic: 1,
        slot_config: SlotConfig::PREPROD,
    },
    KnownNetwork {
        name: "preview",
        magic: 2,
        slot_config: SlotConfig::PREVIEW,
    },
];

/// A resolved network identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub magic: u32,
    pub slot_config: SlotConfig,
}

impl Network {
    /// Look up a well-known network by name.
    pub fn by_name(name: &str) -> Option<Self> {
        KNOWN_NETWORKS.iter().find(|n| n.name == name).map(|n| Self {
            name: n.name.to_string(),
            magic: n.magic,
            slot_config: n.slot_config,
        })
    }

    /// Resolve `(name, magic)`. A zero magic is taken from the named network; an explicit
    /// magic is kept as-is, falling back to mainnet slot timing when the name is unknown.
    pub fn resolve(name: &str, magic: u32) -> Result<Self, ConfigError> {
        match (Self::by_name(name), magic) {
            (Some(network), 0) => Ok(network),
            (Some(network), magic) => Ok(Self { magic, ..network }),
            (None, 0) => Err(ConfigError::UnknownNetwork(name.to_string())),
            (None, magic) => {
                tracing::warn!(network = name, magic, "unknown network, using mainnet slot config");
                Ok(Self {
                    name: name.to_string(),
                    magic,
                    slot_config: SlotConfig::MAINNET,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_magic_from_name() {
        assert_eq!(Network::resolve("mainnet", 0).unwrap().magic, 764_824_073);
        assert_eq!(Network::resolve("preprod", 0).unwrap().magic, 1);
        assert_eq!(Network::resolve("preview", 0).unwrap().magic, 2);
    }

    #[test]
    fn explicit_magic_wins() {
        let n = Network::resolve("preview", 42).unwrap();
        assert_eq!(n.magic, 42);
        assert_eq!(n.slot_config, SlotConfig::PREVIEW);
    }

    #[test]
    fn unknown_name_without_magic_is_config_error() {
        let err = Network::resolve("atlantis", 0).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownNetwork(ref n) if n == "atlantis"));
    }

    #[test]
    fn unknown_name_with_magic_uses_mainnet_timing() {
        let n = Network::resolve("devnet", 99).unwrap();
        assert_eq!(n.slot_config, SlotConfig::MAINNET);
        assert_eq!(n.name, "devnet");
    }

    #[test]
    fn slot_to_time() {
        let c = SlotConfig::PREVIEW;
        assert_eq!(c.slot_to_unix_ms(0), 1_666_656_000_000);
        assert_eq!(c.slot_to_unix_ms(10), 1_666_656_010_000);
        assert_eq!(c.slot_to_unix_nanos(10), 1_666_656_010_000_000_000);
        let m = SlotConfig::MAINNET;
        assert_eq!(m.slot_to_unix_ms(4_492_800), 1_596_059_091_000);
        assert_eq!(m.slot_to_unix_ms(4_492_799), 1_596_059_090_000);
    }
}
