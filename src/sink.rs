// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use futures::channel::mpsc;

use crate::client::InfoEvent;
use crate::{DeviceRequest, MlmeRequest};

/// A sink over an unbounded channel. Sending never blocks; if the receiving
/// side has gone away the message is dropped, since the sender can still
/// operate meaningfully without a listener.
pub struct UnboundedSink<T> {
    sink: mpsc::UnboundedSender<T>,
}

impl<T> UnboundedSink<T> {
    pub fn new(sink: mpsc::UnboundedSender<T>) -> Self {
        UnboundedSink { sink }
    }

    pub fn send(&self, msg: T) {
        match self.sink.unbounded_send(msg) {
            Ok(()) => {}
            Err(e) => {
                if e.is_full() {
                    panic!("did not expect an unbounded channel to be full: {:?}", e);
                }
            }
        }
    }
}

pub type MlmeSink = UnboundedSink<MlmeRequest>;
pub type DeviceSink = UnboundedSink<DeviceRequest>;
pub type InfoSink = UnboundedSink<InfoEvent>;
