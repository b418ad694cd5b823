/// UDP port the server listens on.
pub const SERVER_PORT: u16 = 67;

/// UDP port client replies are sent to.
pub const CLIENT_PORT: u16 = 68;

/// Magic cookie separating the BOOTP header from the DHCP options.
pub const DHCP_MAGIC_COOKIE: u32 = 0x6382_5363;

/// Fixed BOOTP header size, magic cookie excluded.
pub const HEADER_SIZE: usize = 236;

/// Lease granted with an OFFER; just enough to complete the exchange.
pub const OFFER_LEASE_SECS: u32 = 10;

/// Lease granted with an ACK.
pub const ACK_LEASE_SECS: u32 = 60;
