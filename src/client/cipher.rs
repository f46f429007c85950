// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Cipher-suite negotiation against a candidate's advertisement.
//!
//! A station can only join an AP whose cipher configuration it does not
//! exceed, so negotiation starts from the station's configured ceiling and
//! downgrades to what the AP offers. The whole module is pure: given the
//! same policy and advertisement it always produces the same selection.

use super::bss::SecurityDescriptor;

/// The station's configured authentication mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Open,
    Shared,
    AutoSwitch,
    Wpa,
    WpaPsk,
    WpaNone,
    Wpa2,
    Wpa2Psk,
}

impl AuthMode {
    /// True for every mode whose keys come out of a WPA-style handshake or
    /// pre-shared master key, i.e. everything that is not open/static-WEP.
    pub fn is_wpa(&self) -> bool {
        match self {
            AuthMode::Wpa
            | AuthMode::WpaPsk
            | AuthMode::WpaNone
            | AuthMode::Wpa2
            | AuthMode::Wpa2Psk => true,
            AuthMode::Open | AuthMode::Shared | AuthMode::AutoSwitch => false,
        }
    }

    /// Modes that negotiate their pairwise/group ciphers against the AP's
    /// advertisement. WPA-None is excluded: its cipher is fixed by local
    /// configuration because there is no AP to negotiate with.
    pub fn negotiates_cipher(&self) -> bool {
        match self {
            AuthMode::Wpa | AuthMode::WpaPsk | AuthMode::Wpa2 | AuthMode::Wpa2Psk => true,
            _ => false,
        }
    }

    /// Shared-key and auto-switch stations attempt shared-key
    /// authentication before falling back to open system.
    pub fn shared_key_first(&self) -> bool {
        match self {
            AuthMode::Shared | AuthMode::AutoSwitch => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cipher {
    Disabled,
    Wep,
    Tkip,
    Ccmp,
}

/// The outcome of negotiating against one candidate. Scratch state: it is
/// recomputed from the configured ceiling for every candidate attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CipherSelection {
    pub group: Cipher,
    pub pairwise: Cipher,
    /// Set when unicast and broadcast traffic use different ciphers.
    pub mixed: bool,
    pub rsn_capability: u16,
}

impl CipherSelection {
    /// The selection before any negotiation: both roles at the configured
    /// ceiling.
    pub fn from_configured(cipher: Cipher) -> Self {
        CipherSelection {
            group: cipher,
            pairwise: cipher,
            mixed: false,
            rsn_capability: 0,
        }
    }
}

/// Pick the ciphers to use against `advertised`, given the station's auth
/// mode and configured cipher ceiling.
///
/// For WPA/WPA2 modes the group cipher is always the AP's. The pairwise
/// cipher is the ceiling when the AP offers it, otherwise the AP's
/// auxiliary suite, otherwise TKIP, which every mixed-mode AP accepts.
/// Other modes keep the configured cipher for both roles, untouched.
pub fn negotiate(
    auth_mode: AuthMode,
    configured: Cipher,
    advertised: &SecurityDescriptor,
) -> CipherSelection {
    if !auth_mode.negotiates_cipher() {
        return CipherSelection::from_configured(configured);
    }

    let group = advertised.group_cipher;
    let pairwise = if configured == advertised.pairwise_cipher {
        advertised.pairwise_cipher
    } else if advertised.pairwise_cipher_aux != Cipher::Disabled {
        advertised.pairwise_cipher_aux
    } else {
        Cipher::Tkip
    };

    CipherSelection {
        group,
        pairwise,
        mixed: pairwise != group,
        rsn_capability: advertised.rsn_capability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement(group: Cipher, pairwise: Cipher, aux: Cipher) -> SecurityDescriptor {
        SecurityDescriptor {
            group_cipher: group,
            pairwise_cipher: pairwise,
            pairwise_cipher_aux: aux,
            rsn_capability: 0x000c,
        }
    }

    #[test]
    fn ceiling_match_keeps_pairwise() {
        let adv = advertisement(Cipher::Ccmp, Cipher::Ccmp, Cipher::Disabled);
        let sel = negotiate(AuthMode::Wpa2Psk, Cipher::Ccmp, &adv);
        assert_eq!(sel.pairwise, Cipher::Ccmp);
        assert_eq!(sel.group, Cipher::Ccmp);
        assert!(!sel.mixed);
    }

    #[test]
    fn aux_suite_used_when_ceiling_differs() {
        // AP advertises CCMP primary with TKIP aux; a TKIP-limited station
        // takes the aux suite and ends up with mixed ciphers.
        let adv = advertisement(Cipher::Ccmp, Cipher::Ccmp, Cipher::Tkip);
        let sel = negotiate(AuthMode::Wpa2Psk, Cipher::Tkip, &adv);
        assert_eq!(sel.pairwise, Cipher::Tkip);
        assert_eq!(sel.group, Cipher::Ccmp);
        assert!(sel.mixed);
    }

    #[test]
    fn no_aux_downgrades_to_tkip() {
        let adv = advertisement(Cipher::Tkip, Cipher::Ccmp, Cipher::Disabled);
        let sel = negotiate(AuthMode::WpaPsk, Cipher::Wep, &adv);
        assert_eq!(sel.pairwise, Cipher::Tkip);
        assert_eq!(sel.group, Cipher::Tkip);
        assert!(!sel.mixed);
    }

    #[test]
    fn group_cipher_always_adopted_from_ap() {
        let adv = advertisement(Cipher::Tkip, Cipher::Ccmp, Cipher::Disabled);
        let sel = negotiate(AuthMode::Wpa2, Cipher::Ccmp, &adv);
        assert_eq!(sel.group, Cipher::Tkip);
        assert_eq!(sel.pairwise, Cipher::Ccmp);
        assert!(sel.mixed);
    }

    #[test]
    fn open_and_wep_modes_left_unchanged() {
        let adv = advertisement(Cipher::Ccmp, Cipher::Ccmp, Cipher::Tkip);
        for mode in [AuthMode::Open, AuthMode::Shared, AuthMode::AutoSwitch].iter() {
            let sel = negotiate(*mode, Cipher::Wep, &adv);
            assert_eq!(sel, CipherSelection::from_configured(Cipher::Wep));
        }
    }

    #[test]
    fn wpa_none_keeps_configured_cipher() {
        let adv = advertisement(Cipher::Ccmp, Cipher::Ccmp, Cipher::Disabled);
        let sel = negotiate(AuthMode::WpaNone, Cipher::Tkip, &adv);
        assert_eq!(sel.pairwise, Cipher::Tkip);
        assert_eq!(sel.group, Cipher::Tkip);
    }

    #[test]
    fn negotiation_is_idempotent() {
        let adv = advertisement(Cipher::Ccmp, Cipher::Ccmp, Cipher::Tkip);
        let first = negotiate(AuthMode::Wpa2Psk, Cipher::Tkip, &adv);
        let second = negotiate(AuthMode::Wpa2Psk, Cipher::Tkip, &adv);
        assert_eq!(first, second);
    }

    #[test]
    fn rsn_capability_carried_through() {
        let adv = advertisement(Cipher::Ccmp, Cipher::Ccmp, Cipher::Disabled);
        let sel = negotiate(AuthMode::Wpa2, Cipher::Ccmp, &adv);
        assert_eq!(sel.rsn_capability, 0x000c);
    }
}
