use std::net::Ipv4Addr;

use netlink::consts::*;
use netlink::{MsgBuilder, NetlinkError, NetlinkSocket};

use crate::consts::*;
use crate::NftError;

/// Builds and submits batched nftables transactions.
///
/// Each operation is wrapped in `NFNL_MSG_BATCH_BEGIN` / `BATCH_END` and
/// acknowledged by the kernel. Numeric nf_tables attributes are big-endian.
pub struct Nftables {
    sock: NetlinkSocket,
}

fn nfgenmsg(msg: &mut MsgBuilder, family: u8) {
    msg.push_u8(family);
    msg.push_u8(NFNETLINK_V0);
    msg.push_u16_be(0); // res_id
}

impl Nftables {
    pub fn connect() -> Result<Self, NetlinkError> {
        Ok(Nftables { sock: NetlinkSocket::connect(NETLINK_NETFILTER)? })
    }

    fn batch<F>(&mut self, fill: F) -> Result<(), NetlinkError>
    where
        F: FnOnce(&mut NetlinkSocket, &mut MsgBuilder),
    {
        let mut msg = MsgBuilder::new();
        let begin = msg.message(NFNL_MSG_BATCH_BEGIN, NLM_F_REQUEST, 0);
        nfgenmsg(&mut msg, NFPROTO_UNSPEC);
        msg.finish(begin);

        fill(&mut self.sock, &mut msg);

        let end = msg.message(NFNL_MSG_BATCH_END, NLM_F_REQUEST, 0);
        nfgenmsg(&mut msg, NFPROTO_UNSPEC);
        msg.finish(end);

        self.sock.send(&msg)?;
        self.sock.receive_ack()
    }

    pub fn new_table(&mut self, family: u8, name: &str) -> Result<(), NetlinkError> {
        self.batch(|sock, msg| {
            let seq = sock.next_seq();
            let m = msg.message(
                nfnl_msg_type(NFNL_SUBSYS_NFTABLES, NFT_MSG_NEWTABLE),
                NLM_F_REQUEST | NLM_F_ACK,
                seq,
            );
            nfgenmsg(msg, family);
            msg.attr_str(NFTA_TABLE_NAME, name);
            msg.finish(m);
        })
    }

    pub fn del_table(&mut self, family: u8, name: &str) -> Result<(), NetlinkError> {
        self.batch(|sock, msg| {
            let seq = sock.next_seq();
            let m = msg.message(
                nfnl_msg_type(NFNL_SUBSYS_NFTABLES, NFT_MSG_DELTABLE),
                NLM_F_REQUEST | NLM_F_ACK,
                seq,
            );
            nfgenmsg(msg, family);
            msg.attr_str(NFTA_TABLE_NAME, name);
            msg.finish(m);
        })
    }

    /// Create a chain, optionally as a base chain bound to a hook with a
    /// priority, optionally forcing an accept policy.
    pub fn new_chain(
        &mut self,
        family: u8,
        table: &str,
        chain: &str,
        hook: Option<(u32, i32)>,
        policy_accept: Option<bool>,
    ) -> Result<(), NetlinkError> {
        self.batch(|sock, msg| {
            let seq = sock.next_seq();
            let m = msg.message(
                nfnl_msg_type(NFNL_SUBSYS_NFTABLES, NFT_MSG_NEWCHAIN),
                NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE,
                seq,
            );
            nfgenmsg(msg, family);
            msg.attr_str(NFTA_CHAIN_TABLE, table);
            msg.attr_str(NFTA_CHAIN_NAME, chain);
            if let Some((hooknum, priority)) = hook {
                let nested = msg.begin_nested(NFTA_CHAIN_HOOK);
                msg.attr_u32_be(NFTA_HOOK_HOOKNUM, hooknum);
                msg.attr_u32_be(NFTA_HOOK_PRIORITY, priority as u32);
                msg.end_nested(nested);
            }
            if let Some(accept) = policy_accept {
                msg.attr_u32_be(NFTA_CHAIN_POLICY, accept as u32);
            }
            msg.finish(m);
        })
    }

    /// Append a rule whose expressions are supplied as a pre-encoded
    /// attribute buffer (see [`queue_rule`]).
    pub fn new_rule(
        &mut self,
        family: u8,
        table: &str,
        chain: &str,
        expressions: &[u8],
    ) -> Result<(), NetlinkError> {
        self.batch(|sock, msg| {
            let seq = sock.next_seq();
            let m = msg.message(
                nfnl_msg_type(NFNL_SUBSYS_NFTABLES, NFT_MSG_NEWRULE),
                NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_APPEND,
                seq,
            );
            nfgenmsg(msg, family);
            msg.attr_str(NFTA_RULE_TABLE, table);
            msg.attr_str(NFTA_RULE_CHAIN, chain);
            let nested = msg.begin_nested(NFTA_RULE_EXPRESSIONS);
            msg.push_bytes(expressions);
            msg.end_nested(nested);
            msg.finish(m);
        })
    }
}

fn expression<F>(out: &mut MsgBuilder, name: &str, data: Option<F>)
where
    F: FnOnce(&mut MsgBuilder),
{
    let elem = out.begin_nested(NFTA_LIST_ELEM);
    out.attr_str(NFTA_EXPR_NAME, name);
    match data {
        Some(fill) => {
            let nested = out.begin_nested(NFTA_EXPR_DATA);
            fill(out);
            out.end_nested(nested);
        }
        None => {}
    }
    out.end_nested(elem);
}

/// Which side of the packet the queue rule matches on.
pub enum RuleMatch {
    /// `iif != <lan> ip daddr <wan_ip>` - WAN-sourced inbound traffic.
    InboundToWanIp { lan_ifindex: u32, wan_ip: Ipv4Addr },
    /// `oif != <lan> ip saddr <lan_net prefix>` - WAN-bound outbound traffic.
    OutboundFromLan { lan_ifindex: u32, net_addr: Ipv4Addr, prefix_bytes: usize },
}

/// Encode the expression list of one queue rule, equivalent to
///
/// ```text
/// iif != <lan> ip daddr <wan-ip>  notrack counter queue num 1337 bypass
/// oif != <lan> ip saddr <lan-net> notrack counter queue num 1337 bypass
/// ```
pub fn queue_rule(rule: &RuleMatch, queue_num: u16) -> Vec<u8> {
    let mut out = MsgBuilder::new();
    let (meta_key, ifindex) = match rule {
        RuleMatch::InboundToWanIp { lan_ifindex, .. } => (NFT_META_IIF, *lan_ifindex),
        RuleMatch::OutboundFromLan { lan_ifindex, .. } => (NFT_META_OIF, *lan_ifindex),
    };
    expression(&mut out, "meta", Some(|m: &mut MsgBuilder| {
        m.attr_u32_be(NFTA_META_KEY, meta_key);
        m.attr_u32_be(NFTA_META_DREG, NFT_REG_1);
    }));
    expression(&mut out, "cmp", Some(|m: &mut MsgBuilder| {
        m.attr_u32_be(NFTA_CMP_SREG, NFT_REG_1);
        m.attr_u32_be(NFTA_CMP_OP, NFT_CMP_NEQ);
        let nested = m.begin_nested(NFTA_CMP_DATA);
        // Interface indexes are compared in host byte order.
        m.attr(NFTA_DATA_VALUE, &ifindex.to_ne_bytes());
        m.end_nested(nested);
    }));
    let (offset, value): (u32, Vec<u8>) = match rule {
        RuleMatch::InboundToWanIp { wan_ip, .. } => (16, wan_ip.octets().to_vec()),
        RuleMatch::OutboundFromLan { net_addr, prefix_bytes, .. } => {
            (12, net_addr.octets()[..*prefix_bytes].to_vec())
        }
    };
    expression(&mut out, "payload", Some(|m: &mut MsgBuilder| {
        m.attr_u32_be(NFTA_PAYLOAD_DREG, NFT_REG_1);
        m.attr_u32_be(NFTA_PAYLOAD_BASE, NFT_PAYLOAD_NETWORK_HEADER);
        m.attr_u32_be(NFTA_PAYLOAD_OFFSET, offset);
        m.attr_u32_be(NFTA_PAYLOAD_LEN, value.len() as u32);
    }));
    expression(&mut out, "cmp", Some(|m: &mut MsgBuilder| {
        m.attr_u32_be(NFTA_CMP_SREG, NFT_REG_1);
        m.attr_u32_be(NFTA_CMP_OP, NFT_CMP_EQ);
        let nested = m.begin_nested(NFTA_CMP_DATA);
        m.attr(NFTA_DATA_VALUE, &value);
        m.end_nested(nested);
    }));
    expression(&mut out, "notrack", None::<fn(&mut MsgBuilder)>);
    expression(&mut out, "counter", Some(|_: &mut MsgBuilder| {}));
    expression(&mut out, "queue", Some(|m: &mut MsgBuilder| {
        m.attr_u16_be(NFTA_QUEUE_NUM, queue_num);
        m.attr_u16_be(NFTA_QUEUE_FLAGS, NFT_QUEUE_FLAG_BYPASS);
    }));
    out.bytes().to_vec()
}

pub use nftables_hook::NftablesHook;

mod nftables_hook {
    use std::net::Ipv4Addr;

    use netcfg::Ipv4Net;
    use tracing::{error, info};

    use super::{queue_rule, Nftables, RuleMatch};
    use crate::consts::*;
    use crate::{NftError, QUEUE_NUMBER};

    pub const TABLE_NAME: &str = "gatekeeper";

    /// Installs the `gatekeeper` nftables table on construction and removes
    /// it on drop.
    pub struct NftablesHook {
        _private: (),
    }

    impl NftablesHook {
        pub fn install(
            lan_ifindex: u32,
            lan_network: Ipv4Net,
            wan_ip: Ipv4Addr,
        ) -> Result<Self, NftError> {
            let mut nft = Nftables::connect()?;

            // A previous run may have left its table behind.
            let _ = nft.del_table(NFPROTO_IPV4, TABLE_NAME);

            nft.new_table(NFPROTO_IPV4, TABLE_NAME)
                .map_err(|source| NftError::CreateTable { name: "gatekeeper", source })?;
            nft.new_chain(
                NFPROTO_IPV4,
                TABLE_NAME,
                "POSTROUTING",
                Some((NF_INET_POST_ROUTING, -300)),
                None,
            )
            .map_err(|source| NftError::CreateChain {
                table: "gatekeeper",
                chain: "POSTROUTING",
                source,
            })?;
            nft.new_chain(
                NFPROTO_IPV4,
                TABLE_NAME,
                "PREROUTING",
                Some((NF_INET_PRE_ROUTING, -300)),
                None,
            )
            .map_err(|source| NftError::CreateChain {
                table: "gatekeeper",
                chain: "PREROUTING",
                source,
            })?;

            let prefix_bytes = ((32 - lan_network.host_bits()) as usize + 7) / 8;
            let outbound = queue_rule(
                &RuleMatch::OutboundFromLan {
                    lan_ifindex,
                    net_addr: lan_network.addr,
                    prefix_bytes,
                },
                QUEUE_NUMBER,
            );
            nft.new_rule(NFPROTO_IPV4, TABLE_NAME, "POSTROUTING", &outbound)
                .map_err(|source| NftError::CreateRule { chain: "POSTROUTING", source })?;

            let inbound = queue_rule(
                &RuleMatch::InboundToWanIp { lan_ifindex, wan_ip },
                QUEUE_NUMBER,
            );
            nft.new_rule(NFPROTO_IPV4, TABLE_NAME, "PREROUTING", &inbound)
                .map_err(|source| NftError::CreateRule { chain: "PREROUTING", source })?;

            // Some distributions default the filter/FORWARD policy to drop.
            // Not every machine has that table, so errors are ignored.
            let _ = nft.new_chain(NFPROTO_IPV4, "filter", "FORWARD", None, Some(true));

            // OpenWRT ships with its own firewall. Its rules would interfere
            // with the userspace NAT, so they are cleared.
            if nft.del_table(NFPROTO_INET, "fw4").is_ok() {
                info!("disabled the OpenWRT fw4 firewall; gatekeeper takes over from here");
            }

            Ok(NftablesHook { _private: () })
        }
    }

    impl Drop for NftablesHook {
        fn drop(&mut self) {
            match Nftables::connect() {
                Ok(mut nft) => {
                    if let Err(err) = nft.del_table(NFPROTO_IPV4, TABLE_NAME) {
                        error!(%err, "couldn't remove the gatekeeper nftables table");
                    }
                }
                Err(err) => error!(%err, "couldn't reconnect to netfilter for cleanup"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_rule_expressions_are_well_formed() {
        let rule = queue_rule(
            &RuleMatch::OutboundFromLan {
                lan_ifindex: 3,
                net_addr: Ipv4Addr::new(10, 1, 0, 0),
                prefix_bytes: 2,
            },
            1337,
        );
        // Walk the LIST_ELEM chain and collect expression names.
        let mut names = Vec::new();
        for (atype, payload) in netlink::NestedIter::new(&rule) {
            assert_eq!(atype, NFTA_LIST_ELEM);
            for (inner, data) in netlink::NestedIter::new(payload) {
                if inner == NFTA_EXPR_NAME {
                    let end = data.iter().position(|&b| b == 0).unwrap();
                    names.push(String::from_utf8_lossy(&data[..end]).into_owned());
                }
            }
        }
        assert_eq!(names, ["meta", "cmp", "payload", "cmp", "notrack", "counter", "queue"]);
    }

    #[test]
    fn queue_number_is_big_endian() {
        let rule = queue_rule(
            &RuleMatch::InboundToWanIp {
                lan_ifindex: 3,
                wan_ip: Ipv4Addr::new(203, 0, 113, 5),
            },
            1337,
        );
        // 1337 = 0x0539 must appear in network order somewhere in the
        // queue expression.
        assert!(rule.windows(2).any(|w| w == [0x05, 0x39]));
        // The WAN IP literal must be present for the daddr comparison.
        assert!(rule.windows(4).any(|w| w == [203, 0, 113, 5]));
    }
}
