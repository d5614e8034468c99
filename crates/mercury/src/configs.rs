//! Versioned protocol configuration table.
//!
//! Values are keyed by [`ConfigName`] and resolved for a protocol version;
//! a version inherits every value it does not override from the version
//! before it.

/// Denomination all contract deposits and settlements are made in.
pub const DENOM: &str = "umercury";

/// Denominator for every basis-point configuration value.
pub const MAX_BASIS_POINTS: u64 = 10_000;

/// Lowest protocol version with a configuration table.
pub const GENESIS_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigName {
    /// Share of settled debt routed to the reserve, in basis points.
    ReserveTax,
}

/// Configuration values resolved for a single protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValues {
    version: u32,
    reserve_tax: u64,
}

impl ConfigValues {
    /// Values in force at `version`. Versions below genesis resolve to genesis.
    pub fn for_version(version: u32) -> Self {
        let mut values = Self::genesis();
        values.version = version.max(GENESIS_VERSION);
        values
    }

    fn genesis() -> Self {
        Self {
            version: GENESIS_VERSION,
            reserve_tax: 1_000,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Look up a value by name.
    pub fn get_u64(&self, name: ConfigName) -> u64 {
        match name {
            ConfigName::ReserveTax => self.reserve_tax,
        }
    }

    /// Override the reserve tax, e.g. from a governance parameter change.
    pub fn with_reserve_tax(mut self, basis_points: u64) -> Self {
        self.reserve_tax = basis_points;
        self
    }
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self::for_version(GENESIS_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_values() {
        let values = ConfigValues::default();
        assert_eq!(values.version(), GENESIS_VERSION);
        assert_eq!(values.get_u64(ConfigName::ReserveTax), 1_000);
    }

    #[test]
    fn test_later_versions_inherit_genesis() {
        let v2 = ConfigValues::for_version(2);
        assert_eq!(v2.version(), 2);
        assert_eq!(v2.get_u64(ConfigName::ReserveTax), 1_000);

        let v0 = ConfigValues::for_version(0);
        assert_eq!(v0, ConfigValues::default());
    }

    #[test]
    fn test_reserve_tax_override() {
        let values = ConfigValues::default().with_reserve_tax(500);
        assert_eq!(values.get_u64(ConfigName::ReserveTax), 500);
    }
}
