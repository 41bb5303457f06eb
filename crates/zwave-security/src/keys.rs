//! Key material store for the granted security classes.

use std::collections::HashMap;

use zwave_core::SecurityClass;
use zwave_crypto::kdf;
use zwave_crypto::{NetworkKey, S0Keys, S2Keys};

/// Derived key material for every configured security class, plus the
/// temporary key used while bootstrapping a joining node.
///
/// Keys are derived once when the network key is stored; the raw network
/// keys are not retained.
#[derive(Default)]
pub struct Keyring {
    s0: Option<S0Keys>,
    s2: HashMap<SecurityClass, S2Keys>,
    temp: Option<S2Keys>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_s0_key(&mut self, network_key: &NetworkKey) {
        self.s0 = Some(kdf::derive_s0_keys(network_key));
    }

    /// Store the network key for an S2 class and derive its key set.
    ///
    /// S0 key material is held separately; passing `S0Legacy` here is a
    /// caller bug.
    pub fn set_s2_key(&mut self, class: SecurityClass, network_key: &NetworkKey) {
        debug_assert!(class.is_s2(), "S0 keys are stored via set_s0_key");
        self.s2
            .insert(class, kdf::ckdf_network_key_expand(network_key));
    }

    pub fn set_temp_key(&mut self, temp_key: &NetworkKey) {
        self.temp = Some(kdf::ckdf_temp_key_expand(temp_key));
    }

    pub fn clear_temp_key(&mut self) {
        self.temp = None;
    }

    pub fn remove_class(&mut self, class: SecurityClass) {
        match class {
            SecurityClass::S0Legacy => self.s0 = None,
            _ => {
                self.s2.remove(&class);
            }
        }
    }

    pub fn s0(&self) -> Option<&S0Keys> {
        self.s0.as_ref()
    }

    pub fn s2(&self, class: SecurityClass) -> Option<&S2Keys> {
        self.s2.get(&class)
    }

    pub fn temp(&self) -> Option<&S2Keys> {
        self.temp.as_ref()
    }

    pub fn has_class(&self, class: SecurityClass) -> bool {
        match class {
            SecurityClass::S0Legacy => self.s0.is_some(),
            _ => self.s2.contains_key(&class),
        }
    }
}
