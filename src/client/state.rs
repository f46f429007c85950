// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The control state machine.
//!
//! Configuration requests are accepted while idle; every other state is
//! waiting for exactly one kind of confirmation from a sub-machine.
//! Handlers consume the current state and return the next one. All
//! mutable attempt state lives in the ConnectionContext, so the states
//! themselves carry no data. Confirmations that do not match the awaited
//! kind are logged and dropped without touching the context; the one
//! standing exception is a scan confirm, whose BSS list always refreshes
//! the scan table because scanning runs independently of connecting.

use log::{debug, info, warn};

use crate::{
    is_valid_ssid, AssociateConfirm, AssociateRequest, AuthAlgorithm, AuthenticateConfirm,
    AuthenticateRequest, BssType, DeviceRequest, DisassociateRequest, JoinConfirm, JoinRequest,
    MediaState, MlmeEvent, MlmeRequest, ReasonCode, ScanConfirm, ScanRequest, ScanType, Ssid,
    StartConfirm, StartRequest,
};

use super::cipher::{self, CipherSelection};
use super::link::{link_down, link_up};
use super::{ConfigRequest, ConnectResult, Context, InfoEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    WaitDisassoc,
    WaitJoin,
    WaitStart,
    WaitAuth,
    WaitAuth2,
    WaitAssoc,
    WaitReassoc,
    WaitOidScan,
    WaitOidDisassoc,
    WaitScanForConnect,
}

impl State {
    pub(crate) fn on_config_request(self, req: ConfigRequest, ctx: &mut Context) -> State {
        match self {
            State::Idle => match req {
                ConfigRequest::SetSsid(ssid) => on_set_ssid(ctx, ssid),
                ConfigRequest::SetBssid(bssid) => on_set_bssid(ctx, bssid),
                ConfigRequest::Scan(filter) => on_scan_request(ctx, filter),
                ConfigRequest::Disassociate(reason) => on_disassociate_request(ctx, reason),
                ConfigRequest::Roam(candidates) => on_roam_request(ctx, candidates),
                ConfigRequest::AutoReconnect => on_auto_reconnect(ctx),
                ConfigRequest::MicFailureReport => on_mic_failure(ctx),
            },
            busy => {
                warn!("CNTL - configuration request {:?} ignored while in {:?}", req, busy);
                busy
            }
        }
    }

    pub(crate) fn on_mlme_event(self, event: MlmeEvent, ctx: &mut Context) -> State {
        match (self, event) {
            (state, MlmeEvent::ScanConf { resp }) => on_scan_conf(ctx, state, resp),
            (state, MlmeEvent::DisassocInd { ind }) => {
                on_peer_teardown(ctx, state, ind.reason_code)
            }
            (state, MlmeEvent::DeauthInd { ind }) => {
                on_peer_teardown(ctx, state, ind.reason_code)
            }
            (State::WaitDisassoc, MlmeEvent::DisassocConf { .. }) => {
                on_disassoc_conf_reconnect(ctx)
            }
            (State::WaitOidDisassoc, MlmeEvent::DisassocConf { .. }) => {
                ctx.aux.clear_disassoc_pending();
                link_down(ctx, false);
                State::Idle
            }
            (State::WaitJoin, MlmeEvent::JoinConf { resp }) => on_join_conf(ctx, resp),
            (State::WaitStart, MlmeEvent::StartConf { resp }) => on_start_conf(ctx, resp),
            (State::WaitAuth, MlmeEvent::AuthConf { resp }) => on_auth_conf(ctx, resp),
            (State::WaitAuth2, MlmeEvent::AuthConf { resp }) => on_auth_conf(ctx, resp),
            (State::WaitAssoc, MlmeEvent::AssocConf { resp }) => on_assoc_conf(ctx, resp),
            (State::WaitReassoc, MlmeEvent::ReassocConf { resp }) => on_reassoc_conf(ctx, resp),
            (state, event) => {
                debug!("CNTL - event {:?} discarded while in {:?}", event, state);
                state
            }
        }
    }

    /// The SSID of an attempt in progress, if any.
    pub(crate) fn connecting_to(&self, ctx: &Context) -> Option<Ssid> {
        match self {
            State::WaitDisassoc
            | State::WaitJoin
            | State::WaitStart
            | State::WaitAuth
            | State::WaitAuth2
            | State::WaitAssoc
            | State::WaitReassoc => Some(ctx.aux.ssid().to_vec()),
            State::WaitScanForConnect => ctx.aux.auto_reconnect_ssid().map(|s| s.to_vec()),
            State::Idle | State::WaitOidScan | State::WaitOidDisassoc => None,
        }
    }
}

// Ad-hoc operation is not permitted on DFS channels: W53 (52-64) and
// W56 (100-140).
fn is_radar_channel(channel: u8) -> bool {
    (channel >= 52 && channel <= 64) || (channel >= 100 && channel <= 140)
}

fn first_auth_algorithm(ctx: &Context) -> AuthAlgorithm {
    if ctx.policy.auth_mode.shared_key_first() {
        AuthAlgorithm::SharedKey
    } else {
        AuthAlgorithm::OpenSystem
    }
}

fn request_scan(ctx: &mut Context, ssid: Ssid, next: State) -> State {
    ctx.mlme_sink.send(MlmeRequest::Scan(ScanRequest {
        ssid,
        bss_type: None,
        scan_type: ScanType::Active,
    }));
    next
}

fn disassociate_current(ctx: &mut Context, next: State) -> State {
    info!("CNTL - disassociate with current AP");
    ctx.aux.mark_disassoc_pending();
    ctx.mlme_sink.send(MlmeRequest::Disassociate(DisassociateRequest {
        peer_sta_address: ctx.active.bssid(),
        reason_code: ReasonCode::StaLeaving,
    }));
    next
}

fn on_set_ssid(ctx: &mut Context, ssid: Ssid) -> State {
    if !is_valid_ssid(&ssid) {
        warn!("CNTL - rejecting SSID of length {}", ssid.len());
        return State::Idle;
    }
    ctx.aux.set_desired_ssid(ssid, ctx.cfg.bss_type);
    let matches = ctx.scan_tab.matching_ssid(ctx.aux.ssid());
    info!(
        "CNTL - {} of {} scanned BSS match the desired SSID",
        matches.len(),
        ctx.scan_tab.len()
    );
    ctx.aux.set_candidates(matches);

    let best_is_current = ctx.op.media_connected()
        && match ctx.aux.candidates().first() {
            Some(best) => {
                best.ssid == ctx.active.ssid() && best.bssid == ctx.active.bssid()
            }
            None => false,
        };

    if best_is_current {
        if ctx.policy.auth_mode.is_wpa()
            && ctx.op.port() == crate::peer::PortState::NotSecured
        {
            // The key exchange never completed; the association has to be
            // redone from scratch.
            return disassociate_current(ctx, State::WaitDisassoc);
        }
        if ctx.op.config_changed() {
            return disassociate_current(ctx, State::WaitDisassoc);
        }
        info!("CNTL - already associated with the best matching BSS");
        if ctx.op.infra_on() {
            // Upper layers expect the connect event to be repeated even
            // though nothing changed.
            ctx.device_sink
                .send(DeviceRequest::NotifyMediaState(MediaState::Connected));
        }
        return State::Idle;
    }

    if ctx.op.infra_on() {
        if ctx.active.ssid() != ctx.aux.ssid() {
            // A different SSID is a fresh connect, not a roam: the coming
            // LinkDown must announce the disconnection.
            ctx.aux.mark_req_from_user();
        }
        return disassociate_current(ctx, State::WaitDisassoc);
    }

    if ctx.op.adhoc_on() {
        info!("CNTL - dropping current ad-hoc link");
        link_down(ctx, false);
    }

    if ctx.aux.candidates().is_empty()
        && ctx.cfg.auto_reconnect
        && ctx.aux.bss_type() == BssType::Infrastructure
    {
        info!("CNTL - no matching BSS, starting a scan");
        let ssid = ctx.aux.ssid().to_vec();
        return request_scan(ctx, ssid, State::WaitOidScan);
    }

    iterate_candidates(ctx)
}

fn on_set_bssid(ctx: &mut Context, bssid: crate::MacAddr) -> State {
    ctx.aux.set_desired_bssid(bssid, ctx.cfg.bss_type);

    let found = ctx.scan_tab.find_by_bssid(&bssid).cloned();
    let bss = match found {
        None => {
            info!("CNTL - desired BSSID not in the last scan, scanning first");
            let ssid = ctx.aux.ssid().to_vec();
            return request_scan(ctx, ssid, State::WaitOidScan);
        }
        Some(bss) => bss,
    };

    ctx.aux.set_auto_reconnect_ssid(Some(bss.ssid.clone()));
    // The matched entry becomes the single join target; adopting its SSID
    // also covers joining a hidden network by address.
    ctx.aux.adopt_ssid(bss.ssid.clone());
    ctx.aux
        .set_candidates(super::bss::CandidateTable::from_entries(vec![bss]));

    if ctx.op.infra_on() {
        return disassociate_current(ctx, State::WaitDisassoc);
    }
    if ctx.op.adhoc_on() {
        info!("CNTL - dropping current ad-hoc link");
        link_down(ctx, false);
    }
    iterate_candidates(ctx)
}

fn on_scan_request(ctx: &mut Context, filter: Option<Ssid>) -> State {
    // If a network is joined, its entry must survive the table swap: an AP
    // that a fresh scan misses would otherwise vanish from view while we
    // are still associated with it.
    let current = if ctx.op.media_connected() {
        ctx.scan_tab
            .find(&ctx.active.bssid(), ctx.active.ssid(), ctx.active.channel())
            .cloned()
    } else {
        None
    };
    ctx.scan_tab.clear();
    if let Some(bss) = current {
        ctx.scan_tab.upsert(bss);
    }
    request_scan(ctx, filter.unwrap_or_default(), State::WaitOidScan)
}

fn on_disassociate_request(ctx: &mut Context, reason: ReasonCode) -> State {
    info!("CNTL - disassociating on request ({:?})", reason);
    ctx.aux.mark_req_from_user();
    ctx.aux.mark_disassoc_pending();
    ctx.mlme_sink.send(MlmeRequest::Disassociate(DisassociateRequest {
        peer_sta_address: ctx.active.bssid(),
        reason_code: reason,
    }));
    // The user walked away from this network; auto-reconnect must not
    // drag the station back.
    ctx.aux.set_auto_reconnect_ssid(None);
    State::WaitOidDisassoc
}

fn on_roam_request(ctx: &mut Context, mut candidates: super::bss::CandidateTable) -> State {
    info!("CNTL - roaming among {} candidates", candidates.len());
    candidates.sort_by_signal();
    ctx.aux.set_roam_candidates(candidates);
    iterate_roam(ctx)
}

fn on_auto_reconnect(ctx: &mut Context) -> State {
    if ctx.op.media_connected() {
        return State::Idle;
    }
    match ctx.aux.auto_reconnect_ssid().map(|s| s.to_vec()) {
        Some(ssid) if is_valid_ssid(&ssid) => {
            info!("CNTL - auto-reconnect scan for the last SSID");
            request_scan(ctx, ssid, State::WaitScanForConnect)
        }
        _ => State::Idle,
    }
}

fn on_mic_failure(ctx: &mut Context) -> State {
    if ctx.op.media_connected() && ctx.policy.auth_mode.is_wpa() {
        let count = ctx.stats.record_mic_failure();
        warn!("CNTL - MIC failure #{} reported", count);
        ctx.info_sink.send(InfoEvent::MicFailure { count });
    }
    State::Idle
}

fn on_disassoc_conf_reconnect(ctx: &mut Context) -> State {
    info!("CNTL - disassociation successful");
    ctx.aux.clear_disassoc_pending();
    link_down(ctx, false);

    if ctx.aux.candidates().is_empty() && ctx.cfg.bss_type == BssType::Adhoc {
        start_own_network(ctx)
    } else {
        ctx.aux.rewind_candidates();
        iterate_candidates(ctx)
    }
}

fn on_join_conf(ctx: &mut Context, resp: JoinConfirm) -> State {
    if !resp.result_code.is_success() {
        info!("CNTL - join failed on BSS #{}", ctx.aux.bss_idx());
        ctx.aux.advance_candidate();
        return iterate_candidates(ctx);
    }

    if ctx.aux.bss_type() == BssType::Adhoc {
        if ctx.cfg.ieee80211h && is_radar_channel(ctx.aux.channel()) {
            info!(
                "CNTL - channel {} is radar restricted, ad-hoc join rejected",
                ctx.aux.channel()
            );
            ctx.info_sink
                .send(InfoEvent::ConnectFinished { result: ConnectResult::Failed });
            return State::Idle;
        }
        link_up(ctx, BssType::Adhoc);
        ctx.info_sink
            .send(InfoEvent::ConnectFinished { result: ConnectResult::Success });
        State::Idle
    } else {
        let algorithm = first_auth_algorithm(ctx);
        ctx.aux.reset_auth_attempts();
        send_auth_request(ctx, algorithm);
        State::WaitAuth
    }
}

fn on_start_conf(ctx: &mut Context, resp: StartConfirm) -> State {
    if !resp.result_code.is_success() {
        warn!("CNTL - failed to start an IBSS");
        ctx.info_sink
            .send(InfoEvent::ConnectFinished { result: ConnectResult::Failed });
        return State::Idle;
    }
    if ctx.cfg.ieee80211h && is_radar_channel(ctx.aux.channel()) {
        info!(
            "CNTL - channel {} is radar restricted, refusing to start an IBSS",
            ctx.aux.channel()
        );
        ctx.info_sink
            .send(InfoEvent::ConnectFinished { result: ConnectResult::Failed });
        return State::Idle;
    }

    ctx.aux.set_bssid(resp.bssid);
    if let Some(ht) = ctx.cfg.ht {
        if ht.cbw40 {
            let central = if ht.ext_above {
                ctx.aux.channel() + 2
            } else {
                ctx.aux.channel().saturating_sub(2)
            };
            ctx.aux.set_central_channel(central);
        }
    }
    link_up(ctx, BssType::Adhoc);
    ctx.info_sink
        .send(InfoEvent::ConnectFinished { result: ConnectResult::Success });
    State::Idle
}

fn on_auth_conf(ctx: &mut Context, resp: AuthenticateConfirm) -> State {
    if resp.result_code.is_success() {
        info!("CNTL - authentication successful");
        send_assoc_request(ctx);
        return State::WaitAssoc;
    }

    if ctx.aux.auth_attempts() < ctx.cfg.auth_retries {
        // The AP may still hold a stale entry for us from a previous
        // attempt; an immediate retry is often enough to get in.
        info!("CNTL - authentication failed, trying again");
        ctx.aux.note_auth_retry();
        let algorithm = ctx.aux.auth_algorithm();
        send_auth_request(ctx, algorithm);
        State::WaitAuth2
    } else if ctx.policy.auth_mode == super::cipher::AuthMode::AutoSwitch
        && ctx.aux.auth_algorithm() == AuthAlgorithm::SharedKey
    {
        info!("CNTL - shared-key authentication refused, trying open system");
        send_auth_request(ctx, AuthAlgorithm::OpenSystem);
        State::WaitAuth2
    } else {
        info!("CNTL - authentication failed, giving up on BSS #{}", ctx.aux.bss_idx());
        ctx.aux.advance_candidate();
        iterate_candidates(ctx)
    }
}

fn on_assoc_conf(ctx: &mut Context, resp: AssociateConfirm) -> State {
    if resp.result_code.is_success() {
        info!("CNTL - association successful on BSS #{}", ctx.aux.bss_idx());
        ctx.aux.set_aid(resp.association_id);
        link_up(ctx, BssType::Infrastructure);
        ctx.info_sink
            .send(InfoEvent::ConnectFinished { result: ConnectResult::Success });
        State::Idle
    } else {
        info!("CNTL - association failed on BSS #{}", ctx.aux.bss_idx());
        ctx.aux.advance_candidate();
        iterate_candidates(ctx)
    }
}

fn on_reassoc_conf(ctx: &mut Context, resp: AssociateConfirm) -> State {
    if resp.result_code.is_success() {
        info!("CNTL - reassociation successful on BSS #{}", ctx.aux.roam_idx());
        ctx.aux.set_aid(resp.association_id);
        // A roam produces a fresh link-up with no link-down in between.
        link_up(ctx, BssType::Infrastructure);
        ctx.info_sink
            .send(InfoEvent::RoamFinished { result: ConnectResult::Success });
        State::Idle
    } else {
        info!("CNTL - reassociation failed on BSS #{}", ctx.aux.roam_idx());
        ctx.aux.advance_roam();
        iterate_roam(ctx)
    }
}

fn on_scan_conf(ctx: &mut Context, state: State, resp: ScanConfirm) -> State {
    let scan_ok = resp.result_code.is_success();
    if scan_ok {
        // Scan results refresh the table no matter what the machine is
        // doing; scanning is driven independently of connecting.
        for bss in resp.bss_list {
            ctx.scan_tab.upsert(bss);
        }
    } else {
        warn!("CNTL - scan failed with {:?}", resp.result_code);
    }

    match state {
        State::WaitOidScan => finish_scan(ctx, scan_ok, true),
        State::WaitScanForConnect => finish_scan(ctx, scan_ok, false),
        other => other,
    }
}

fn finish_scan(ctx: &mut Context, scan_ok: bool, report: bool) -> State {
    // Frames held back during the scan can flow again, and the LED goes
    // back to showing the link state.
    ctx.device_sink.send(DeviceRequest::ResumeTx);
    ctx.device_sink.send(DeviceRequest::RestoreLed);
    if report {
        ctx.info_sink
            .send(InfoEvent::ScanFinished { bss_count: ctx.scan_tab.len() });
    }
    if !scan_ok || ctx.op.media_connected() {
        return State::Idle;
    }

    let ssid = match ctx.aux.auto_reconnect_ssid() {
        Some(ssid) => ssid.to_vec(),
        None => return State::Idle,
    };
    let mut matches = ctx.scan_tab.matching_ssid(&ssid);
    if let Some(bssid) = ctx.aux.desired_bssid() {
        matches.retain_bssid(&bssid);
    }
    if matches.is_empty() {
        info!("CNTL - scan finished with nothing to reconnect to");
        return State::Idle;
    }
    info!("CNTL - reconnecting to the last SSID after scan");
    ctx.aux.adopt_ssid(ssid);
    ctx.aux.set_candidates(matches);
    iterate_candidates(ctx)
}

fn on_peer_teardown(ctx: &mut Context, state: State, reason_code: u16) -> State {
    if state == State::Idle && ctx.op.media_connected() {
        warn!("CNTL - connection terminated by peer (reason {})", reason_code);
        link_down(ctx, true);
        State::Idle
    } else {
        debug!("CNTL - peer indication (reason {}) discarded in {:?}", reason_code, state);
        state
    }
}

fn send_auth_request(ctx: &mut Context, algorithm: AuthAlgorithm) {
    ctx.aux.set_auth_algorithm(algorithm);
    ctx.mlme_sink.send(MlmeRequest::Authenticate(AuthenticateRequest {
        peer_sta_address: ctx.aux.bssid(),
        algorithm,
        failure_timeout: ctx.cfg.auth_failure_timeout,
    }));
}

fn send_assoc_request(ctx: &mut Context) {
    ctx.mlme_sink.send(MlmeRequest::Associate(AssociateRequest {
        peer_sta_address: ctx.aux.bssid(),
        capability_info: ctx.aux.capability_info(),
        failure_timeout: ctx.cfg.assoc_failure_timeout,
        listen_interval: ctx.cfg.listen_interval,
    }));
}

fn start_own_network(ctx: &mut Context) -> State {
    info!("CNTL - no BSS left, starting a new IBSS");
    let privacy = ctx.policy.cipher != super::cipher::Cipher::Disabled;
    ctx.aux.prepare_ibss_start(ctx.active.channel(), privacy);
    ctx.mlme_sink
        .send(MlmeRequest::Start(StartRequest { ssid: ctx.aux.ssid().to_vec() }));
    State::WaitStart
}

/// Try the candidate at the current index, or fall back: an ad-hoc
/// station starts its own network, an infrastructure station restores the
/// committed channel and gives up until the next trigger.
fn iterate_candidates(ctx: &mut Context) -> State {
    // Every attempt negotiates from the configured ceiling again.
    ctx.aux
        .set_selection(CipherSelection::from_configured(ctx.policy.cipher));

    let index = ctx.aux.bss_idx();
    match ctx.aux.candidates().get(index).cloned() {
        Some(bss) => {
            info!(
                "CNTL - trying BSS #{} of {}",
                index,
                ctx.aux.candidates().len()
            );
            ctx.aux.set_selection(cipher::negotiate(
                ctx.policy.auth_mode,
                ctx.policy.cipher,
                &bss.security,
            ));
            ctx.aux.record_candidate(&bss);
            ctx.mlme_sink.send(MlmeRequest::Join(JoinRequest {
                bss_index: index,
                selected_bss: bss,
                failure_timeout: ctx.cfg.join_failure_timeout,
            }));
            State::WaitJoin
        }
        None if ctx.cfg.bss_type == BssType::Adhoc => start_own_network(ctx),
        None => {
            info!(
                "CNTL - no BSS left to try, restoring channel {}",
                ctx.active.channel()
            );
            ctx.device_sink
                .send(DeviceRequest::SwitchChannel(ctx.active.channel()));
            ctx.info_sink
                .send(InfoEvent::ConnectFinished { result: ConnectResult::Failed });
            State::Idle
        }
    }
}

/// The roam variant walks the roam table and never starts an own network;
/// an exhausted table restores the committed channel.
fn iterate_roam(ctx: &mut Context) -> State {
    let index = ctx.aux.roam_idx();
    match ctx.aux.roam_candidates().get(index).cloned() {
        Some(bss) => {
            info!(
                "CNTL - roaming to BSS #{} of {}",
                index,
                ctx.aux.roam_candidates().len()
            );
            ctx.device_sink.send(DeviceRequest::SwitchChannel(bss.channel));
            ctx.aux.record_candidate(&bss);
            ctx.mlme_sink.send(MlmeRequest::Reassociate(AssociateRequest {
                peer_sta_address: bss.bssid,
                capability_info: bss.capability_info,
                failure_timeout: ctx.cfg.assoc_failure_timeout,
                listen_interval: ctx.cfg.listen_interval,
            }));
            State::WaitReassoc
        }
        None => {
            info!(
                "CNTL - all roam candidates failed, restoring channel {}",
                ctx.active.channel()
            );
            ctx.device_sink
                .send(DeviceRequest::SwitchChannel(ctx.active.channel()));
            ctx.info_sink
                .send(InfoEvent::RoamFinished { result: ConnectResult::Failed });
            State::Idle
        }
    }
}
