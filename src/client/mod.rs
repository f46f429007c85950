// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod bss;
pub mod cipher;

mod link;
mod state;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use failure::{Error, Fail};
use futures::channel::mpsc;
use parking_lot::Mutex;

use crate::peer::{PeerTable, PortState};
use crate::sink::{DeviceSink, InfoSink, MlmeSink, UnboundedSink};
use crate::{
    AuthAlgorithm, BssType, DeviceStream, MacAddr, MlmeEvent, MlmeStream, ReasonCode, Ssid,
    Station, NULL_ADDR,
};

use self::bss::{BssDescriptor, CandidateTable};
use self::cipher::{AuthMode, Cipher, CipherSelection};
use self::state::State;

pub use self::bss::SecurityDescriptor;

pub type InfoStream = mpsc::UnboundedReceiver<InfoEvent>;

/// A configuration request from the layer above. Requests are accepted one
/// at a time and only while the state machine is idle; anything arriving
/// mid-attempt is logged and dropped.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigRequest {
    SetSsid(Ssid),
    SetBssid(MacAddr),
    Scan(Option<Ssid>),
    Disassociate(ReasonCode),
    /// Candidates for a roam attempt, produced by the roam monitor.
    Roam(CandidateTable),
    /// Periodic reconnect trigger fired by an external timer while the
    /// station is disconnected.
    AutoReconnect,
    MicFailureReport,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectResult {
    Success,
    Failed,
}

/// Telemetry and completion notifications for whoever is listening.
#[derive(Clone, Debug, PartialEq)]
pub enum InfoEvent {
    ConnectFinished { result: ConnectResult },
    RoamFinished { result: ConnectResult },
    ScanFinished { bss_count: usize },
    MicFailure { count: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct BssInfo {
    pub bssid: MacAddr,
    pub ssid: Ssid,
    pub channel: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub connected_to: Option<BssInfo>,
    pub connecting_to: Option<Ssid>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HtConfig {
    pub cbw40: bool,
    /// Extension channel above the primary (below when false).
    pub ext_above: bool,
}

/// Station-level knobs. The defaults reproduce the stock behavior of the
/// drivers this component descends from.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    pub bss_type: BssType,
    /// The channel used before any connection and for starting an IBSS.
    pub channel: u8,
    pub auto_reconnect: bool,
    /// Same-algorithm authentication retries before the auto-switch
    /// fallback (or the next candidate) is considered.
    pub auth_retries: u8,
    pub listen_interval: u16,
    /// Timeouts in beacon intervals, enforced by the sub-machines.
    pub join_failure_timeout: u32,
    pub auth_failure_timeout: u32,
    pub assoc_failure_timeout: u32,
    /// Honor radar-channel restrictions (no ad-hoc on DFS channels).
    pub ieee80211h: bool,
    pub ht: Option<HtConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            bss_type: BssType::Infrastructure,
            channel: 1,
            auto_reconnect: true,
            auth_retries: 1,
            listen_interval: 3,
            join_failure_timeout: 20,
            auth_failure_timeout: 20,
            assoc_failure_timeout: 120,
            ieee80211h: true,
            ht: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WepKey {
    pub key_id: u8,
    pub key: Vec<u8>,
}

#[derive(Debug, Fail)]
pub enum PolicyError {
    #[fail(display = "WEP key {} has invalid length {} (expected 5 or 13)", key_id, len)]
    InvalidWepKeyLength { key_id: u8, len: usize },
    #[fail(display = "WEP key id {} out of range", key_id)]
    InvalidKeyId { key_id: u8 },
    #[fail(display = "auth mode {:?} requires a 32-byte pre-shared key", auth_mode)]
    MissingPsk { auth_mode: AuthMode },
}

/// The station's configured security settings. `cipher` is the ceiling for
/// negotiation: the station never selects anything stronger, and starts
/// over from it for every candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct SecurityPolicy {
    pub auth_mode: AuthMode,
    pub cipher: Cipher,
    pub wep_keys: Vec<WepKey>,
    pub default_key_id: u8,
    pub psk: Option<Vec<u8>>,
}

impl SecurityPolicy {
    pub fn open() -> Self {
        SecurityPolicy {
            auth_mode: AuthMode::Open,
            cipher: Cipher::Disabled,
            wep_keys: vec![],
            default_key_id: 0,
            psk: None,
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for k in &self.wep_keys {
            if k.key_id >= 4 {
                return Err(PolicyError::InvalidKeyId { key_id: k.key_id });
            }
            if k.key.len() != 5 && k.key.len() != 13 {
                return Err(PolicyError::InvalidWepKeyLength {
                    key_id: k.key_id,
                    len: k.key.len(),
                });
            }
        }
        if self.auth_mode == AuthMode::WpaNone
            && self.psk.as_ref().map(|p| p.len()) != Some(32)
        {
            return Err(PolicyError::MissingPsk { auth_mode: self.auth_mode });
        }
        Ok(())
    }
}

/// The in-progress connection parameters, distinct from the committed
/// `ActiveConfig`. Only the state machine mutates this, and only through
/// the methods below; everything else reads through accessors.
#[derive(Debug)]
pub struct ConnectionContext {
    ssid: Ssid,
    bssid: MacAddr,
    desired_bssid: Option<MacAddr>,
    bss_type: BssType,
    candidates: CandidateTable,
    bss_idx: usize,
    roam: CandidateTable,
    roam_idx: usize,
    auto_reconnect_ssid: Option<Ssid>,
    channel: u8,
    central_channel: u8,
    capability_info: u16,
    aid: u16,
    rates: Vec<u8>,
    selection: CipherSelection,
    auth_algorithm: AuthAlgorithm,
    auth_attempts: u8,
    /// The pending link teardown was asked for by the configuration layer,
    /// not by the AP. Consumed by LinkDown.
    req_from_user: bool,
    /// A disassociation request is outstanding; its timeout must not tear
    /// down a link that comes up in the meantime.
    disassoc_pending: bool,
}

impl ConnectionContext {
    fn new(channel: u8, configured_cipher: Cipher) -> Self {
        ConnectionContext {
            ssid: vec![],
            bssid: NULL_ADDR,
            desired_bssid: None,
            bss_type: BssType::Infrastructure,
            candidates: CandidateTable::new(),
            bss_idx: 0,
            roam: CandidateTable::new(),
            roam_idx: 0,
            auto_reconnect_ssid: None,
            channel,
            central_channel: channel,
            capability_info: 0,
            aid: 0,
            rates: vec![],
            selection: CipherSelection::from_configured(configured_cipher),
            auth_algorithm: AuthAlgorithm::OpenSystem,
            auth_attempts: 0,
            req_from_user: false,
            disassoc_pending: false,
        }
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid
    }

    pub fn bssid(&self) -> MacAddr {
        self.bssid
    }

    pub fn desired_bssid(&self) -> Option<MacAddr> {
        self.desired_bssid
    }

    pub fn bss_type(&self) -> BssType {
        self.bss_type
    }

    pub fn candidates(&self) -> &CandidateTable {
        &self.candidates
    }

    pub fn bss_idx(&self) -> usize {
        self.bss_idx
    }

    pub fn roam_candidates(&self) -> &CandidateTable {
        &self.roam
    }

    pub fn roam_idx(&self) -> usize {
        self.roam_idx
    }

    pub fn auto_reconnect_ssid(&self) -> Option<&[u8]> {
        self.auto_reconnect_ssid.as_ref().map(|s| &s[..])
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn central_channel(&self) -> u8 {
        self.central_channel
    }

    pub fn capability_info(&self) -> u16 {
        self.capability_info
    }

    pub fn aid(&self) -> u16 {
        self.aid
    }

    pub fn rates(&self) -> &[u8] {
        &self.rates
    }

    pub fn selection(&self) -> CipherSelection {
        self.selection
    }

    pub fn auth_algorithm(&self) -> AuthAlgorithm {
        self.auth_algorithm
    }

    pub fn auth_attempts(&self) -> u8 {
        self.auth_attempts
    }

    pub fn disassoc_pending(&self) -> bool {
        self.disassoc_pending
    }

    pub(crate) fn set_desired_ssid(&mut self, ssid: Ssid, bss_type: BssType) {
        self.auto_reconnect_ssid = Some(ssid.clone());
        self.ssid = ssid;
        self.bssid = NULL_ADDR;
        self.desired_bssid = None;
        self.bss_type = bss_type;
    }

    pub(crate) fn set_desired_bssid(&mut self, bssid: MacAddr, bss_type: BssType) {
        self.desired_bssid = Some(bssid);
        self.bssid = bssid;
        self.bss_type = bss_type;
    }

    pub(crate) fn adopt_ssid(&mut self, ssid: Ssid) {
        self.ssid = ssid;
    }

    pub(crate) fn set_auto_reconnect_ssid(&mut self, ssid: Option<Ssid>) {
        self.auto_reconnect_ssid = ssid;
    }

    pub(crate) fn set_candidates(&mut self, candidates: CandidateTable) {
        self.candidates = candidates;
        self.bss_idx = 0;
    }

    pub(crate) fn rewind_candidates(&mut self) {
        self.bss_idx = 0;
    }

    pub(crate) fn advance_candidate(&mut self) {
        self.bss_idx += 1;
    }

    pub(crate) fn set_roam_candidates(&mut self, candidates: CandidateTable) {
        self.roam = candidates;
        self.roam_idx = 0;
    }

    pub(crate) fn advance_roam(&mut self) {
        self.roam_idx += 1;
    }

    /// Adopt a candidate as the current join/reassociation target.
    pub(crate) fn record_candidate(&mut self, bss: &BssDescriptor) {
        self.ssid = bss.ssid.clone();
        self.bssid = bss.bssid;
        self.channel = bss.channel;
        self.central_channel = bss.channel;
        self.capability_info = bss.capability_info;
        self.rates = bss.rates.clone();
    }

    pub(crate) fn set_bssid(&mut self, bssid: MacAddr) {
        self.bssid = bssid;
    }

    pub(crate) fn set_central_channel(&mut self, channel: u8) {
        self.central_channel = channel;
    }

    pub(crate) fn set_aid(&mut self, aid: u16) {
        self.aid = aid;
    }

    pub(crate) fn set_selection(&mut self, selection: CipherSelection) {
        self.selection = selection;
    }

    pub(crate) fn set_auth_algorithm(&mut self, algorithm: AuthAlgorithm) {
        self.auth_algorithm = algorithm;
    }

    pub(crate) fn reset_auth_attempts(&mut self) {
        self.auth_attempts = 0;
    }

    pub(crate) fn note_auth_retry(&mut self) {
        self.auth_attempts += 1;
    }

    pub(crate) fn mark_req_from_user(&mut self) {
        self.req_from_user = true;
    }

    pub(crate) fn take_req_from_user(&mut self) -> bool {
        std::mem::replace(&mut self.req_from_user, false)
    }

    pub(crate) fn mark_disassoc_pending(&mut self) {
        self.disassoc_pending = true;
    }

    pub(crate) fn clear_disassoc_pending(&mut self) {
        self.disassoc_pending = false;
    }

    /// Seed the context for starting an own IBSS on the given channel.
    pub(crate) fn prepare_ibss_start(&mut self, channel: u8, privacy: bool) {
        const CAP_IBSS: u16 = 1 << 1;
        const CAP_PRIVACY: u16 = 1 << 4;

        self.bssid = NULL_ADDR;
        self.channel = channel;
        self.central_channel = channel;
        self.aid = 0;
        // 1, 2, 5.5 and 11 Mbps, all basic.
        self.rates = vec![0x82, 0x84, 0x8b, 0x96];
        self.capability_info = CAP_IBSS | if privacy { CAP_PRIVACY } else { 0 };
    }

    /// Drop everything that only applied to the torn-down link.
    pub(crate) fn clear_link_scratch(&mut self) {
        self.capability_info = 0;
        self.aid = 0;
        self.central_channel = self.channel;
    }
}

/// The committed configuration observed by other layers. Replaced as a
/// whole on LinkUp and left alone by failed attempts, so the previous
/// connection's observable state survives until LinkDown clears it.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveConfig {
    ssid: Ssid,
    bssid: MacAddr,
    channel: u8,
    central_channel: u8,
    capability_info: u16,
    aid: u16,
    rates: Vec<u8>,
    last_ssid: Ssid,
    last_bssid: MacAddr,
}

impl ActiveConfig {
    fn new(channel: u8) -> Self {
        ActiveConfig {
            ssid: vec![],
            bssid: NULL_ADDR,
            channel,
            central_channel: channel,
            capability_info: 0,
            aid: 0,
            rates: vec![],
            last_ssid: vec![],
            last_bssid: NULL_ADDR,
        }
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid
    }

    pub fn bssid(&self) -> MacAddr {
        self.bssid
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn central_channel(&self) -> u8 {
        self.central_channel
    }

    pub fn capability_info(&self) -> u16 {
        self.capability_info
    }

    pub fn aid(&self) -> u16 {
        self.aid
    }

    pub fn rates(&self) -> &[u8] {
        &self.rates
    }

    pub fn last_ssid(&self) -> &[u8] {
        &self.last_ssid
    }

    pub fn last_bssid(&self) -> MacAddr {
        self.last_bssid
    }

    /// Commit the negotiated settings in one step.
    pub(crate) fn commit(&mut self, aux: &ConnectionContext) {
        let last_ssid = std::mem::replace(&mut self.last_ssid, vec![]);
        let last_bssid = self.last_bssid;
        *self = ActiveConfig {
            ssid: aux.ssid().to_vec(),
            bssid: aux.bssid(),
            channel: aux.channel(),
            central_channel: aux.central_channel(),
            capability_info: aux.capability_info(),
            aid: aux.aid(),
            rates: aux.rates().to_vec(),
            last_ssid,
            last_bssid,
        };
    }

    pub(crate) fn record_last_bssid(&mut self) {
        self.last_bssid = self.bssid;
    }

    /// Remember the dying link for later network-change comparisons.
    pub(crate) fn save_last_link(&mut self) {
        self.last_ssid = self.ssid.clone();
        self.last_bssid = self.bssid;
    }

    pub(crate) fn clear_link(&mut self) {
        self.ssid.clear();
        self.bssid = NULL_ADDR;
        self.capability_info = 0;
        self.aid = 0;
        self.rates.clear();
    }
}

/// Operational state that other layers may observe. Each field is an
/// independent concern; none of them overlap the way a flags word would.
#[derive(Clone, Debug, PartialEq)]
pub struct OpState {
    link_mode: Option<BssType>,
    port: PortState,
    monitor: bool,
    config_changed: bool,
}

impl OpState {
    fn new(port: PortState) -> Self {
        OpState {
            link_mode: None,
            port,
            monitor: false,
            config_changed: false,
        }
    }

    pub fn link_mode(&self) -> Option<BssType> {
        self.link_mode
    }

    pub fn media_connected(&self) -> bool {
        self.link_mode.is_some()
    }

    pub fn infra_on(&self) -> bool {
        self.link_mode == Some(BssType::Infrastructure)
    }

    pub fn adhoc_on(&self) -> bool {
        self.link_mode == Some(BssType::Adhoc)
    }

    pub fn port(&self) -> PortState {
        self.port
    }

    pub fn monitor(&self) -> bool {
        self.monitor
    }

    pub fn config_changed(&self) -> bool {
        self.config_changed
    }

    pub(crate) fn set_link_mode(&mut self, mode: Option<BssType>) {
        self.link_mode = mode;
    }

    pub(crate) fn set_port(&mut self, port: PortState) {
        self.port = port;
    }

    pub(crate) fn set_monitor(&mut self, monitor: bool) {
        self.monitor = monitor;
    }

    pub(crate) fn set_config_changed(&mut self, changed: bool) {
        self.config_changed = changed;
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinkStats {
    mic_failures: u32,
}

impl LinkStats {
    pub fn mic_failures(&self) -> u32 {
        self.mic_failures
    }

    pub(crate) fn record_mic_failure(&mut self) -> u32 {
        self.mic_failures += 1;
        self.mic_failures
    }

    pub(crate) fn reset(&mut self) {
        self.mic_failures = 0;
    }
}

/// Everything a transition handler needs, owned by the manager and passed
/// down explicitly.
pub(crate) struct Context {
    pub cfg: ConnectionConfig,
    pub policy: SecurityPolicy,
    pub aux: ConnectionContext,
    pub active: ActiveConfig,
    pub scan_tab: CandidateTable,
    pub op: OpState,
    pub stats: LinkStats,
    pub peers: Arc<Mutex<PeerTable>>,
    pub mlme_sink: MlmeSink,
    pub device_sink: DeviceSink,
    pub info_sink: InfoSink,
}

/// The connection manager: sole owner of the state machine and its
/// context. One event is fully processed before the next is accepted.
pub struct ConnectionManager {
    state: Option<State>,
    context: Context,
}

impl ConnectionManager {
    pub fn new(
        cfg: ConnectionConfig,
        policy: SecurityPolicy,
    ) -> Result<(Self, MlmeStream, DeviceStream, InfoStream), Error> {
        policy.validate()?;
        let (mlme_sink, mlme_stream) = mpsc::unbounded();
        let (device_sink, device_stream) = mpsc::unbounded();
        let (info_sink, info_stream) = mpsc::unbounded();
        let port = if policy.auth_mode.is_wpa() {
            PortState::NotSecured
        } else {
            PortState::Secured
        };
        let context = Context {
            aux: ConnectionContext::new(cfg.channel, policy.cipher),
            active: ActiveConfig::new(cfg.channel),
            scan_tab: CandidateTable::new(),
            op: OpState::new(port),
            stats: LinkStats::default(),
            peers: Arc::new(Mutex::new(PeerTable::new())),
            mlme_sink: UnboundedSink::new(mlme_sink),
            device_sink: UnboundedSink::new(device_sink),
            info_sink: UnboundedSink::new(info_sink),
            cfg,
            policy,
        };
        let manager = ConnectionManager {
            state: Some(State::Idle),
            context,
        };
        Ok((manager, mlme_stream, device_stream, info_stream))
    }

    pub fn on_config_request(&mut self, req: ConfigRequest) {
        let context = &mut self.context;
        self.state = self
            .state
            .take()
            .map(|state| state.on_config_request(req, context));
    }

    pub fn status(&self) -> Status {
        let state = self
            .state
            .as_ref()
            .expect("expected state to be always present");
        let connected_to = if self.context.op.media_connected() {
            Some(BssInfo {
                bssid: self.context.active.bssid(),
                ssid: self.context.active.ssid().to_vec(),
                channel: self.context.active.channel(),
            })
        } else {
            None
        };
        Status {
            connected_to,
            connecting_to: state.connecting_to(&self.context),
        }
    }

    /// The peer table shared with the data path. Lock it briefly.
    pub fn peer_table(&self) -> Arc<Mutex<PeerTable>> {
        Arc::clone(&self.context.peers)
    }

    pub fn active_config(&self) -> &ActiveConfig {
        &self.context.active
    }

    pub fn op_state(&self) -> &OpState {
        &self.context.op
    }

    pub fn set_monitor_mode(&mut self, monitor: bool) {
        self.context.op.set_monitor(monitor);
    }

    /// The configuration layer changed a setting that requires rejoining
    /// the current network.
    pub fn note_config_changed(&mut self) {
        self.context.op.set_config_changed(true);
    }
}

impl Station for ConnectionManager {
    fn on_mlme_event(&mut self, event: MlmeEvent) {
        let context = &mut self.context;
        self.state = self
            .state
            .take()
            .map(|state| state.on_mlme_event(event, context));
    }
}
