// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Link lifecycle handlers.
//!
//! `link_up` turns the negotiated in-progress settings into the committed
//! configuration and brings the observable link state up; `link_down`
//! tears it back down. Both delegate every hardware effect (channel, LED,
//! key slots, media indication) to the device sink and touch the shared
//! peer table only briefly under its lock.

use log::info;

use crate::peer::{PeerEntry, PortState, WpaHandshakeState};
use crate::{BssType, DeviceRequest, KeyDescriptor, LedState, MediaState};

use super::cipher::{AuthMode, Cipher};
use super::Context;

pub(crate) fn link_up(ctx: &mut Context, bss_type: BssType) {
    // A disassociation timeout racing with this link-up must not tear the
    // new link down again.
    ctx.aux.clear_disassoc_pending();
    ctx.stats.reset();

    ctx.active.commit(&ctx.aux);
    ctx.op.set_link_mode(Some(bss_type));

    ctx.device_sink
        .send(DeviceRequest::SwitchChannel(ctx.active.central_channel()));

    match bss_type {
        BssType::Adhoc => {
            info!(
                "CNTL - ad-hoc link up (channel {}, aid {})",
                ctx.active.channel(),
                ctx.active.aid()
            );
            install_adhoc_keys(ctx);
            ctx.op.set_port(PortState::Secured);
        }
        BssType::Infrastructure => {
            info!(
                "CNTL - infrastructure link up (channel {}, aid {})",
                ctx.active.channel(),
                ctx.active.aid()
            );
            if !ctx.active.last_ssid().is_empty()
                && ctx.active.last_ssid() != ctx.active.ssid()
            {
                // Joining a different network: the old link's loss has not
                // been announced yet.
                ctx.device_sink
                    .send(DeviceRequest::NotifyMediaState(MediaState::Disconnected));
            }
            if ctx.policy.auth_mode.is_wpa() {
                // Keys from an earlier association would make the coming
                // 4-way handshake fail; they are installed again once it
                // completes.
                ctx.device_sink.send(DeviceRequest::RemoveKeys);
                ctx.op.set_port(PortState::NotSecured);
            } else {
                if ctx.policy.cipher == Cipher::Wep {
                    install_wep_keys(ctx);
                }
                ctx.op.set_port(PortState::Secured);
            }
            seed_peer_entry(ctx);
        }
    }

    ctx.active.record_last_bssid();
    ctx.op.set_config_changed(false);
    ctx.device_sink.send(DeviceRequest::SetLed(LedState::LinkUp));
    ctx.device_sink
        .send(DeviceRequest::NotifyMediaState(MediaState::Connected));
}

pub(crate) fn link_down(ctx: &mut Context, from_peer: bool) {
    if ctx.op.monitor() {
        return;
    }
    info!(
        "CNTL - link down{}",
        if from_peer { " (requested by peer)" } else { "" }
    );

    let was_adhoc = ctx.op.adhoc_on();
    ctx.aux.clear_disassoc_pending();

    if was_adhoc {
        ctx.scan_tab
            .remove(&ctx.active.bssid(), ctx.active.channel());
    } else {
        ctx.active.save_last_link();
        if ctx.aux.take_req_from_user() {
            // The configuration layer asked to leave; the cached entry has
            // to stay visible so a later roam scan can still find the AP.
        } else {
            // Lost beacon or kicked by the AP. The stale entry would
            // shadow a rescan, so it goes.
            ctx.scan_tab
                .remove(&ctx.active.bssid(), ctx.active.channel());
        }
    }
    ctx.op.set_link_mode(None);

    if from_peer && ctx.policy.auth_mode.is_wpa() {
        // Without this, leftover keys break the 4-way handshake of the
        // next association.
        ctx.device_sink.send(DeviceRequest::RemoveKeys);
    }
    ctx.op.set_port(if ctx.policy.auth_mode.is_wpa() {
        PortState::NotSecured
    } else {
        PortState::Secured
    });

    {
        let mut peers = ctx.peers.lock();
        peers.clear();
    }

    if ctx.cfg.bss_type == BssType::Infrastructure {
        ctx.active.clear_link();
    }
    ctx.aux.clear_link_scratch();
    ctx.stats.reset();

    ctx.device_sink.send(DeviceRequest::SetLed(LedState::LinkDown));
    ctx.device_sink
        .send(DeviceRequest::NotifyMediaState(MediaState::Disconnected));
}

fn install_wep_keys(ctx: &mut Context) {
    let keys: Vec<KeyDescriptor> = ctx
        .policy
        .wep_keys
        .iter()
        .map(|k| KeyDescriptor {
            key_id: k.key_id,
            cipher: Cipher::Wep,
            key: k.key.clone(),
        })
        .collect();
    if !keys.is_empty() {
        ctx.device_sink.send(DeviceRequest::InstallKeys(keys));
    }
}

fn install_adhoc_keys(ctx: &mut Context) {
    if ctx.policy.cipher == Cipher::Wep {
        install_wep_keys(ctx);
        return;
    }
    if ctx.policy.auth_mode == AuthMode::WpaNone {
        // The group key of a WPA-None IBSS comes straight out of the
        // pre-shared key; there is no handshake to derive anything.
        if let Some(psk) = &ctx.policy.psk {
            let cipher = match ctx.aux.selection().pairwise {
                Cipher::Ccmp => Cipher::Ccmp,
                _ => Cipher::Tkip,
            };
            ctx.device_sink.send(DeviceRequest::InstallKeys(vec![KeyDescriptor {
                key_id: 0,
                cipher,
                key: psk.clone(),
            }]));
        }
    }
}

fn seed_peer_entry(ctx: &mut Context) {
    let entry = PeerEntry {
        addr: ctx.active.bssid(),
        aid: ctx.active.aid(),
        auth_mode: ctx.policy.auth_mode,
        cipher: ctx.aux.selection().pairwise,
        associated: true,
        wpa_handshake: if ctx.policy.auth_mode.is_wpa() {
            WpaHandshakeState::PtkStart
        } else {
            WpaHandshakeState::NotUsed
        },
        port: ctx.op.port(),
    };
    // An infrastructure link tracks exactly one peer: the AP.
    let mut peers = ctx.peers.lock();
    peers.reset_to(entry);
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::super::{ConnectionConfig, SecurityPolicy, WepKey};
    use super::*;
    use crate::client::cipher::CipherSelection;

    #[test]
    fn link_up_commits_context_to_active_config() {
        let mut h = TestHelper::new(ConnectionConfig::default(), SecurityPolicy::open());
        let bss = fake_bss(b"office", [7; 6], 11, -40);
        h.context.aux.record_candidate(&bss);
        h.context.aux.set_aid(5);

        link_up(&mut h.context, BssType::Infrastructure);

        assert_eq!(h.context.active.ssid(), b"office");
        assert_eq!(h.context.active.bssid(), [7; 6]);
        assert_eq!(h.context.active.channel(), 11);
        assert_eq!(h.context.active.aid(), 5);
        assert_eq!(h.context.active.last_bssid(), [7; 6]);
        assert!(h.context.op.infra_on());
        let device = h.drain_device();
        assert!(device.contains(&DeviceRequest::SwitchChannel(11)));
        assert!(device.contains(&DeviceRequest::SetLed(LedState::LinkUp)));
        assert!(device.contains(&DeviceRequest::NotifyMediaState(MediaState::Connected)));
    }

    #[test]
    fn link_up_under_wpa_purges_keys_and_seeds_unsecured_peer() {
        let mut h = TestHelper::new(ConnectionConfig::default(), wpa2_psk_policy());
        let bss = fake_wpa2_bss(b"office", [7; 6], 1, -40);
        h.context.aux.record_candidate(&bss);
        h.context.aux.set_selection(crate::client::cipher::negotiate(
            h.context.policy.auth_mode,
            h.context.policy.cipher,
            &bss.security,
        ));

        link_up(&mut h.context, BssType::Infrastructure);

        assert!(h.drain_device().contains(&DeviceRequest::RemoveKeys));
        assert_eq!(h.context.op.port(), PortState::NotSecured);
        let peers = h.context.peers.lock();
        let entry = peers.get(&[7; 6]).expect("expected a peer entry for the AP");
        assert!(entry.associated);
        assert_eq!(entry.port, PortState::NotSecured);
        assert_eq!(entry.wpa_handshake, WpaHandshakeState::PtkStart);
    }

    #[test]
    fn link_up_installs_static_wep_keys() {
        let policy = SecurityPolicy {
            auth_mode: AuthMode::Shared,
            cipher: Cipher::Wep,
            wep_keys: vec![WepKey { key_id: 0, key: vec![1, 2, 3, 4, 5] }],
            default_key_id: 0,
            psk: None,
        };
        let mut h = TestHelper::new(ConnectionConfig::default(), policy);
        let bss = fake_bss(b"legacy", [7; 6], 1, -40);
        h.context.aux.record_candidate(&bss);

        link_up(&mut h.context, BssType::Infrastructure);

        let device = h.drain_device();
        assert!(device.iter().any(|req| match req {
            DeviceRequest::InstallKeys(keys) => {
                keys.len() == 1 && keys[0].cipher == Cipher::Wep && keys[0].key.len() == 5
            }
            _ => false,
        }));
        assert_eq!(h.context.op.port(), PortState::Secured);
    }

    #[test]
    fn wpa_none_ibss_installs_psk_key() {
        let policy = SecurityPolicy {
            auth_mode: AuthMode::WpaNone,
            cipher: Cipher::Tkip,
            wep_keys: vec![],
            default_key_id: 0,
            psk: Some(vec![0xAA; 32]),
        };
        let mut h = TestHelper::new(ConnectionConfig::default(), policy);
        h.context
            .aux
            .set_selection(CipherSelection::from_configured(Cipher::Tkip));
        h.context.aux.prepare_ibss_start(6, true);
        h.context.aux.set_bssid([3; 6]);

        link_up(&mut h.context, BssType::Adhoc);

        let device = h.drain_device();
        assert!(device.iter().any(|req| match req {
            DeviceRequest::InstallKeys(keys) => {
                keys.len() == 1
                    && keys[0].key_id == 0
                    && keys[0].cipher == Cipher::Tkip
                    && keys[0].key == vec![0xAA; 32]
            }
            _ => false,
        }));
        assert!(h.context.op.adhoc_on());
    }

    #[test]
    fn network_change_announces_old_link_loss_first() {
        let mut h = TestHelper::new_connected(
            ConnectionConfig::default(),
            SecurityPolicy::open(),
            fake_bss(b"office", [7; 6], 1, -40),
        );
        // Tear the link down as the user asked, then bring up another
        // network.
        h.context.aux.mark_req_from_user();
        link_down(&mut h.context, false);
        h.drain_device();

        let cafe = fake_bss(b"cafe", [8; 6], 6, -50);
        h.context.aux.record_candidate(&cafe);
        link_up(&mut h.context, BssType::Infrastructure);

        let device = h.drain_device();
        let disconnect = device
            .iter()
            .position(|r| *r == DeviceRequest::NotifyMediaState(MediaState::Disconnected));
        let connect = device
            .iter()
            .position(|r| *r == DeviceRequest::NotifyMediaState(MediaState::Connected));
        match (disconnect, connect) {
            (Some(d), Some(c)) => assert!(d < c),
            other => panic!("expected both media indications, got {:?}", other),
        }
    }

    #[test]
    fn link_down_saves_last_link_and_clears_active() {
        let mut h = TestHelper::new_connected(
            ConnectionConfig::default(),
            SecurityPolicy::open(),
            fake_bss(b"office", [7; 6], 1, -40),
        );

        link_down(&mut h.context, false);

        assert_eq!(h.context.active.last_ssid(), b"office");
        assert_eq!(h.context.active.last_bssid(), [7; 6]);
        assert!(h.context.active.ssid().is_empty());
        assert_eq!(h.context.active.bssid(), crate::NULL_ADDR);
        assert!(!h.context.op.media_connected());
        let device = h.drain_device();
        assert!(device.contains(&DeviceRequest::SetLed(LedState::LinkDown)));
        assert!(device.contains(&DeviceRequest::NotifyMediaState(MediaState::Disconnected)));
    }

    #[test]
    fn link_down_clears_peer_table() {
        let mut h = TestHelper::new_connected(
            ConnectionConfig::default(),
            SecurityPolicy::open(),
            fake_bss(b"office", [7; 6], 1, -40),
        );
        {
            let peers = h.context.peers.clone();
            let mut table = peers.lock();
            table.upsert(crate::peer::PeerEntry {
                addr: [7; 6],
                aid: 1,
                auth_mode: AuthMode::Open,
                cipher: Cipher::Disabled,
                associated: true,
                wpa_handshake: WpaHandshakeState::NotUsed,
                port: PortState::Secured,
            });
        }

        link_down(&mut h.context, false);
        assert!(h.context.peers.lock().is_empty());
    }

    #[test]
    fn peer_initiated_link_down_purges_keys_only_under_wpa() {
        let mut wpa = TestHelper::new_connected(
            ConnectionConfig::default(),
            wpa2_psk_policy(),
            fake_wpa2_bss(b"office", [7; 6], 1, -40),
        );
        link_down(&mut wpa.context, true);
        assert!(wpa.drain_device().contains(&DeviceRequest::RemoveKeys));

        let mut open = TestHelper::new_connected(
            ConnectionConfig::default(),
            SecurityPolicy::open(),
            fake_bss(b"office", [7; 6], 1, -40),
        );
        link_down(&mut open.context, true);
        assert!(!open.drain_device().contains(&DeviceRequest::RemoveKeys));
    }

    #[test]
    fn link_down_is_noop_in_monitor_mode() {
        let mut h = TestHelper::new_connected(
            ConnectionConfig::default(),
            SecurityPolicy::open(),
            fake_bss(b"office", [7; 6], 1, -40),
        );
        h.context.op.set_monitor(true);

        link_down(&mut h.context, false);

        assert!(h.context.op.media_connected());
        assert!(h.device_stream.try_next().is_err());
    }
}
