mod channel;
mod codec;
mod connection;
mod endpoint;
mod protocol;
mod speed;
mod stats;
mod tracking;

pub use channel::Channel;
pub use codec::CodecError;
pub use connection::{ClientConnection, ConnectionManager, ConnectionState};
pub use endpoint::{NetworkEndpoint, Received};
pub use protocol::{
    ArchivedPacket, BaseRecord, BodyRecord, CharacterChoice, CharacterSelectData, ChatMessage,
    DEFAULT_PORT, EntityIdRecord, EntityRecord, FinalResult, GameConfigData, MAX_PACKET_SIZE,
    MessageTag, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketError, PacketFlags, PacketHeader,
    PacketType, PrepareData, RosterEntry, WorldSnapshot, sequence_greater_than,
};
pub use speed::{MAX_SEND_FPS, SendRate};
pub use stats::{NetworkStats, PacketLossSimulation, rand_u64};
pub use tracking::{AckTracker, PendingPacket, ReceiveTracker};
