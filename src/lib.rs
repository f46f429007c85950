// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Connection management for an 802.11 station.
//!
//! This crate contains the control state machine that sits between the
//! configuration layer above and the MLME sub-state-machines below. It
//! decides which BSS to join, drives the join/authenticate/associate/roam
//! sequence by exchanging typed request/confirm messages with the
//! sub-machines, and performs the bookkeeping required to declare a link
//! up or down. It never touches frames or hardware itself: everything
//! side-effecting is expressed as a request pushed into one of the sinks
//! handed out at construction time.

pub mod client;
pub mod peer;

mod sink;

use futures::channel::mpsc;

use crate::client::bss::BssDescriptor;
use crate::client::cipher::Cipher;

pub type Ssid = Vec<u8>;
pub type MacAddr = [u8; 6];

pub const MAX_SSID_LEN: usize = 32;
pub const NULL_ADDR: MacAddr = [0x00; 6];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BssType {
    Infrastructure,
    Adhoc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanType {
    Active,
    Passive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthAlgorithm {
    OpenSystem,
    SharedKey,
}

/// Outcome of a sub-machine operation, as reported in its confirm message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    Refused,
    Timeout,
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        *self == ResultCode::Success
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    Unspecified,
    PrevAuthNoLongerValid,
    StaLeaving,
    Inactivity,
    MicFailure,
}

// Requests to the MLME sub-state-machines (scan/join/start/auth/assoc).
// Counterparts of the *ParmFill + MlmeEnqueue pairs of a fullmac driver.

#[derive(Clone, Debug, PartialEq)]
pub struct ScanRequest {
    /// Empty SSID scans for any network.
    pub ssid: Ssid,
    pub bss_type: Option<BssType>,
    pub scan_type: ScanType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinRequest {
    pub bss_index: usize,
    pub selected_bss: BssDescriptor,
    /// In beacon intervals.
    pub failure_timeout: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StartRequest {
    pub ssid: Ssid,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuthenticateRequest {
    pub peer_sta_address: MacAddr,
    pub algorithm: AuthAlgorithm,
    /// In beacon intervals.
    pub failure_timeout: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssociateRequest {
    pub peer_sta_address: MacAddr,
    pub capability_info: u16,
    /// In beacon intervals.
    pub failure_timeout: u32,
    pub listen_interval: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisassociateRequest {
    pub peer_sta_address: MacAddr,
    pub reason_code: ReasonCode,
}

#[derive(Debug, PartialEq)]
pub enum MlmeRequest {
    Scan(ScanRequest),
    Join(JoinRequest),
    Start(StartRequest),
    Authenticate(AuthenticateRequest),
    Associate(AssociateRequest),
    // A reassociation request has the same shape as an association request;
    // only the receiving sub-machine differs.
    Reassociate(AssociateRequest),
    Disassociate(DisassociateRequest),
}

// Requests to the driver/device layer: channel and LED control, the paused
// transmit queue, hardware key slots and the OS media-state indication.
// These are the collaborators LinkUp/LinkDown delegate to.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedState {
    LinkUp,
    LinkDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaState {
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyDescriptor {
    pub key_id: u8,
    pub cipher: Cipher,
    pub key: Vec<u8>,
}

#[derive(Debug, PartialEq)]
pub enum DeviceRequest {
    SwitchChannel(u8),
    ResumeTx,
    SetLed(LedState),
    /// Put the LED back into whatever state it showed before a scan.
    RestoreLed,
    InstallKeys(Vec<KeyDescriptor>),
    /// Purge every installed pairwise and group key.
    RemoveKeys,
    NotifyMediaState(MediaState),
}

// Confirm and indication messages delivered by the sub-machines. One event
// is processed to completion before the next is accepted; a confirm that
// does not match what the state machine is currently waiting for is
// discarded.

#[derive(Clone, Debug, PartialEq)]
pub struct ScanConfirm {
    pub result_code: ResultCode,
    pub bss_list: Vec<BssDescriptor>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinConfirm {
    pub result_code: ResultCode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StartConfirm {
    pub result_code: ResultCode,
    /// The BSSID generated for the started IBSS.
    pub bssid: MacAddr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuthenticateConfirm {
    pub peer_sta_address: MacAddr,
    pub result_code: ResultCode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssociateConfirm {
    pub result_code: ResultCode,
    pub association_id: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisassociateConfirm {
    pub peer_sta_address: MacAddr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisassociateIndication {
    pub peer_sta_address: MacAddr,
    pub reason_code: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeauthenticateIndication {
    pub peer_sta_address: MacAddr,
    pub reason_code: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MlmeEvent {
    ScanConf { resp: ScanConfirm },
    JoinConf { resp: JoinConfirm },
    StartConf { resp: StartConfirm },
    AuthConf { resp: AuthenticateConfirm },
    AssocConf { resp: AssociateConfirm },
    ReassocConf { resp: AssociateConfirm },
    DisassocConf { resp: DisassociateConfirm },
    DisassocInd { ind: DisassociateIndication },
    DeauthInd { ind: DeauthenticateIndication },
}

pub type MlmeStream = mpsc::UnboundedReceiver<MlmeRequest>;
pub type DeviceStream = mpsc::UnboundedReceiver<DeviceRequest>;

/// Anything that can absorb MLME confirmations and indications.
pub trait Station {
    fn on_mlme_event(&mut self, event: MlmeEvent);
}

pub fn is_valid_ssid(ssid: &[u8]) -> bool {
    !ssid.is_empty() && ssid.len() <= MAX_SSID_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssid_length_limits() {
        assert!(!is_valid_ssid(b""));
        assert!(is_valid_ssid(b"a"));
        assert!(is_valid_ssid(&[b'x'; 32]));
        assert!(!is_valid_ssid(&[b'x'; 33]));
    }
}
