// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! L2 forwarding.
//!
//! The output port is resolved in the calc table and remembered in the
//! port cache register. The out table then sends every packet with the
//! port-found flag set to whatever port the cache holds. Tables placed
//! between the two can act on the decision without repeating it.

use super::L2_FORWARDING_CALC_TABLE;
use super::L2_FORWARDING_OUT_TABLE;
use super::PORT_FOUND;
use super::PRIORITY_NORMAL;
use super::Pipeline;
use super::PipelineError;
use super::RegField;
use ovp::api::MacAddr;
use ovp::api::OfPort;
use ovp::engine::Flow;
use ovp::engine::MatchField;
use ovp::engine::Protocol;

impl Pipeline {
    pub fn l2_forward_calc_flow(
        &self,
        dst_mac: MacAddr,
        port: OfPort,
    ) -> Result<Flow, PipelineError> {
        let t = self.table(L2_FORWARDING_CALC_TABLE)?;
        let b = t
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_field(MatchField::EthDst(dst_mac));
        let b = self.load_reg(b, RegField::PortCache, port.get())?;
        let b = self.load_reg(b, RegField::PortFound, PORT_FOUND)?;
        Ok(b.resubmit(t.next()).done()?)
    }

    pub fn l2_forward_output_flow(&self) -> Result<Flow, PipelineError> {
        let found = RegField::PortFound;
        let cache = RegField::PortCache;
        Ok(self
            .table(L2_FORWARDING_OUT_TABLE)?
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_reg_range(found.register().nx(), PORT_FOUND, found.range())
            .output_reg_range(cache.register().nx(), cache.range())
            .done()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn calc() {
        let pl = Pipeline::new("br-int").unwrap();
        let f = pl
            .l2_forward_calc_flow(
                "02:00:0a:0a:00:05".parse().unwrap(),
                OfPort::new(5),
            )
            .unwrap();
        assert_eq!(
            f.to_string(),
            "table=80,priority=200,dl_dst=02:00:0a:0a:00:05,\
             actions=load:0x5->NXM_NX_REG1[0..31],\
             load:0x1->NXM_NX_REG0[16..31],resubmit(,110)"
        );
    }

    #[test]
    fn output() {
        let pl = Pipeline::new("br-int").unwrap();
        let f = pl.l2_forward_output_flow().unwrap();
        assert_eq!(
            f.to_string(),
            "table=110,priority=200,ip,reg0=0x10000/0xffff0000,\
             actions=output:NXM_NX_REG1[0..31]"
        );
    }
}
