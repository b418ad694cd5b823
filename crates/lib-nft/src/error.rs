use thiserror::Error;

#[derive(Debug, Error)]
pub enum NftError {
    #[error("netlink: {0}")]
    Netlink(#[from] netlink::NetlinkError),

    #[error("couldn't create netfilter table \"{name}\": {source}")]
    CreateTable {
        name: &'static str,
        #[source]
        source: netlink::NetlinkError,
    },

    #[error("couldn't create chain \"{chain}\" in table \"{table}\": {source}")]
    CreateChain {
        table: &'static str,
        chain: &'static str,
        #[source]
        source: netlink::NetlinkError,
    },

    #[error(
        "couldn't create rule in chain \"{chain}\": {source}. \
         This is known to happen when the kernel lacks support for packet \
         processing in userspace; make sure the nfnetlink_queue and \
         nft_queue modules are loaded"
    )]
    CreateRule {
        chain: &'static str,
        #[source]
        source: netlink::NetlinkError,
    },
}
