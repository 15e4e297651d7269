use std::time::Duration;

/// Wire protocol id of the request/response sync protocol.
pub const BLOCKSYNC_PROTOCOL_ID: &str = "/fil/sync/blk/0.0.1";
/// Wire protocol id of the generic content-addressed graph transfer protocol.
pub const GRAPHSYNC_PROTOCOL_ID: &str = "/ipfs/graphsync/1.0.0";

// Transport settings
pub const WRITE_DEADLINE: Duration = Duration::from_secs(5);
pub const READ_THROTTLE_BYTES: usize = 50 << 10;
pub const READ_THROTTLE_WINDOW: Duration = Duration::from_secs(5);

// Codec bounds
pub const MAX_ARRAY_LENGTH: usize = 8192;
pub const MAX_REQUEST_LENGTH: u64 = 8192;

// Peer selection settings

// How many of the preference-sorted peers are shuffled so that identical
// scores do not always pick the same peer.
pub const SHUFFLE_PREFIX: usize = 5;
// Latency assumed for a peer before its first observed round trip.
pub const NEUTRAL_LATENCY: Duration = Duration::from_secs(1);

// Connection manager tag protecting sync peers from pruning.
pub const SYNC_PEER_TAG: &str = "bsync";
pub const SYNC_PEER_TAG_WEIGHT: u32 = 25;
