// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;

use futures::channel::mpsc;
use parking_lot::Mutex;

use crate::peer::{PeerTable, PortState};
use crate::sink::UnboundedSink;
use crate::{BssType, DeviceRequest, DeviceStream, MacAddr, MlmeRequest, MlmeStream};

use super::bss::{BssDescriptor, CandidateTable, SecurityDescriptor};
use super::cipher::{AuthMode, Cipher};
use super::{
    ActiveConfig, ConnectionConfig, ConnectionContext, Context, InfoEvent, InfoStream, LinkStats,
    OpState, SecurityPolicy,
};

pub fn fake_bss(ssid: &[u8], bssid: MacAddr, channel: u8, rssi_dbm: i8) -> BssDescriptor {
    BssDescriptor {
        ssid: ssid.to_vec(),
        bssid,
        bss_type: BssType::Infrastructure,
        channel,
        capability_info: 0x0401,
        rssi_dbm,
        rates: vec![0x82, 0x84, 0x8b, 0x96, 0x0c, 0x18, 0x30, 0x60],
        security: SecurityDescriptor::open(),
    }
}

pub fn fake_wpa2_bss(ssid: &[u8], bssid: MacAddr, channel: u8, rssi_dbm: i8) -> BssDescriptor {
    BssDescriptor {
        capability_info: 0x0411,
        security: SecurityDescriptor {
            group_cipher: Cipher::Ccmp,
            pairwise_cipher: Cipher::Ccmp,
            pairwise_cipher_aux: Cipher::Tkip,
            rsn_capability: 0x000c,
        },
        ..fake_bss(ssid, bssid, channel, rssi_dbm)
    }
}

pub fn fake_adhoc_bss(ssid: &[u8], bssid: MacAddr, channel: u8, rssi_dbm: i8) -> BssDescriptor {
    BssDescriptor {
        bss_type: BssType::Adhoc,
        capability_info: 0x0002,
        ..fake_bss(ssid, bssid, channel, rssi_dbm)
    }
}

pub fn wpa2_psk_policy() -> SecurityPolicy {
    SecurityPolicy {
        auth_mode: AuthMode::Wpa2Psk,
        cipher: Cipher::Ccmp,
        wep_keys: vec![],
        default_key_id: 0,
        psk: Some(vec![0xBB; 32]),
    }
}

pub struct TestHelper {
    pub context: Context,
    pub mlme_stream: MlmeStream,
    pub device_stream: DeviceStream,
    pub info_stream: InfoStream,
}

impl TestHelper {
    pub fn new(cfg: ConnectionConfig, policy: SecurityPolicy) -> Self {
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
        TestHelper { context, mlme_stream, device_stream, info_stream }
    }

    /// A helper whose context already holds a committed, media-connected
    /// infrastructure link to `bss`.
    pub fn new_connected(cfg: ConnectionConfig, policy: SecurityPolicy, bss: BssDescriptor) -> Self {
        let mut helper = TestHelper::new(cfg, policy);
        helper.context.aux.record_candidate(&bss);
        helper.context.aux.set_aid(1);
        helper.context.active.commit(&helper.context.aux);
        helper.context.op.set_link_mode(Some(BssType::Infrastructure));
        helper
    }

    pub fn expect_mlme(&mut self) -> MlmeRequest {
        match self.mlme_stream.try_next() {
            Ok(Some(req)) => req,
            other => panic!("expected an MLME request, got {:?}", other),
        }
    }

    pub fn drain_mlme(&mut self) {
        while let Ok(Some(_)) = self.mlme_stream.try_next() {}
    }

    pub fn drain_device(&mut self) -> Vec<DeviceRequest> {
        let mut requests = vec![];
        while let Ok(Some(req)) = self.device_stream.try_next() {
            requests.push(req);
        }
        requests
    }

    pub fn drain_info(&mut self) -> Vec<InfoEvent> {
        let mut events = vec![];
        while let Ok(Some(event)) = self.info_stream.try_next() {
            events.push(event);
        }
        events
    }
}
