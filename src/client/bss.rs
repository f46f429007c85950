// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::{BssType, MacAddr, Ssid};

use super::cipher::Cipher;

/// Upper bound on entries a table will hold; older drivers cap their scan
/// table the same way and silently drop the overflow.
pub const MAX_BSS_ENTRIES: usize = 64;

/// Security parameters a BSS advertises in its beacon/probe response, as
/// extracted by the scanning collaborator. `pairwise_cipher_aux` is the
/// second pairwise suite of a mixed-mode advertisement, `Disabled` when
/// the AP offers only one.
#[derive(Clone, Debug, PartialEq)]
pub struct SecurityDescriptor {
    pub group_cipher: Cipher,
    pub pairwise_cipher: Cipher,
    pub pairwise_cipher_aux: Cipher,
    pub rsn_capability: u16,
}

impl SecurityDescriptor {
    pub fn open() -> Self {
        SecurityDescriptor {
            group_cipher: Cipher::Disabled,
            pairwise_cipher: Cipher::Disabled,
            pairwise_cipher_aux: Cipher::Disabled,
            rsn_capability: 0,
        }
    }
}

/// One discovered BSS. Immutable once produced by a scan; owned by the
/// table it sits in.
#[derive(Clone, Debug, PartialEq)]
pub struct BssDescriptor {
    pub ssid: Ssid,
    pub bssid: MacAddr,
    pub bss_type: BssType,
    pub channel: u8,
    pub capability_info: u16,
    pub rssi_dbm: i8,
    pub rates: Vec<u8>,
    pub security: SecurityDescriptor,
}

/// An ordered list of BSS descriptors. Order is insertion order until a
/// caller asks otherwise; the connect logic relies on tables sorted by
/// descending signal so that index 0 is the best candidate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateTable {
    entries: Vec<BssDescriptor>,
}

impl CandidateTable {
    pub fn new() -> Self {
        CandidateTable { entries: Vec::new() }
    }

    pub fn from_entries(entries: Vec<BssDescriptor>) -> Self {
        let mut table = CandidateTable::new();
        for bss in entries {
            table.upsert(bss);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BssDescriptor> {
        self.entries.get(index)
    }

    pub fn first(&self) -> Option<&BssDescriptor> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BssDescriptor> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Update the entry with the same BSSID and channel, or append. A full
    /// table drops the newcomer.
    pub fn upsert(&mut self, bss: BssDescriptor) {
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|e| e.bssid == bss.bssid && e.channel == bss.channel)
        {
            *slot = bss;
        } else if self.entries.len() < MAX_BSS_ENTRIES {
            self.entries.push(bss);
        }
    }

    pub fn find_by_bssid(&self, bssid: &MacAddr) -> Option<&BssDescriptor> {
        self.entries.iter().find(|e| &e.bssid == bssid)
    }

    pub fn find(&self, bssid: &MacAddr, ssid: &[u8], channel: u8) -> Option<&BssDescriptor> {
        self.entries
            .iter()
            .find(|e| &e.bssid == bssid && e.ssid == ssid && e.channel == channel)
    }

    /// All entries matching the SSID, strongest signal first. The result is
    /// a fresh table; this one is left untouched.
    pub fn matching_ssid(&self, ssid: &[u8]) -> CandidateTable {
        let mut matches: Vec<BssDescriptor> = self
            .entries
            .iter()
            .filter(|e| e.ssid == ssid)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.rssi_dbm.cmp(&a.rssi_dbm));
        CandidateTable { entries: matches }
    }

    pub fn sort_by_signal(&mut self) {
        self.entries.sort_by(|a, b| b.rssi_dbm.cmp(&a.rssi_dbm));
    }

    pub fn retain_bssid(&mut self, bssid: &MacAddr) {
        self.entries.retain(|e| &e.bssid == bssid);
    }

    pub fn remove(&mut self, bssid: &MacAddr, channel: u8) {
        self.entries
            .retain(|e| !(&e.bssid == bssid && e.channel == channel));
    }
}
