pub mod arena;
pub mod config;
pub mod delta;
pub mod net;
pub mod snapshot;
pub mod transport;

pub use arena::{Arena, Handle};
pub use config::{
    DEFAULT_JITTER_BUFFER_TICKS, DEFAULT_KEYFRAME_INTERVAL, DEFAULT_TICK_SCALE, SyncConfig,
    TransportConfig,
};
pub use delta::{
    DeltaEncoder, KeyframeClock, MAX_RECORDS_PER_SNAPSHOT, OutboundSnapshot, SnapshotSource,
};
pub use net::{
    Channel, ClientConnection, ConnectionManager, ConnectionState, DEFAULT_PORT, FinalResult,
    GameConfigData, MAX_PACKET_SIZE, NetworkEndpoint, NetworkStats, Packet, PacketError,
    PacketFlags, PacketHeader, PacketLossSimulation, PacketType, SendRate, WorldSnapshot,
};
pub use snapshot::{
    BaseAttrs, BaseData, Body, BodyFlags, CurrentSnapshot, EntityId, EntityKind, FullSnapshot,
    Interpolation, SnapshotError, SnapshotStore, Stage,
};
pub use transport::{AdapterEvent, GameState, TransportAdapter, TransportError};
