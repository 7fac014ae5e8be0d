//! Behaviour toggles consumed by the reassembly engine.
//!
//! Preference storage lives outside this crate; callers fill a
//! [`ReassemblyConfig`] from wherever their settings come from.

/// Configuration for reassembly tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblyConfig {
    /// Treat the VLAN id as part of address-derived conversation keys.
    pub key_includes_vlan: bool,
    /// Treat the capture interface as part of address-derived conversation keys.
    pub key_includes_interface: bool,
    /// Skip fragments whose (frame, offset) pair was already added during the
    /// first pass. When false, `add` accepts several fragments at the same
    /// offset from the same frame.
    pub check_already_added: bool,
    /// Look-back window (in sequence numbers) for single-sequence reassembly.
    pub max_single_fragments: u32,
    /// Default frame-age threshold for aging; `None` disables aging.
    pub max_age: Option<u64>,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            key_includes_vlan: true,
            key_includes_interface: false,
            check_already_added: true,
            max_single_fragments: 64,
            max_age: None,
        }
    }
}

impl ReassemblyConfig {
    /// Configuration with aging enabled at the given frame threshold.
    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Loose conversation keys: addresses and ids only.
    pub fn loose_keys(mut self) -> Self {
        self.key_includes_vlan = false;
        self.key_includes_interface = false;
        self
    }
}
