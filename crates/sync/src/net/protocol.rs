use bitflags::bitflags;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u16 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x52504753;
pub const DEFAULT_PORT: u16 = 27016;
pub const PRELUDE_SIZE: usize = 8;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        const RELIABLE = 1 << 0;
        const KEYFRAME = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    ConnectionRequest = 1,
    ConnectionChallenge = 2,
    ChallengeResponse = 3,
    ConnectionAccepted = 4,
    ConnectionDenied = 5,
    Roster = 10,
    CharacterSelect = 11,
    Prepare = 12,
    Ready = 13,
    WorldSnapshot = 20,
    ClientState = 21,
    RequestFull = 22,
    Finished = 30,
    Ping = 40,
    Pong = 41,
    Disconnect = 50,
}

impl TryFrom<u8> for MessageTag {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MessageTag::ConnectionRequest,
            2 => MessageTag::ConnectionChallenge,
            3 => MessageTag::ChallengeResponse,
            4 => MessageTag::ConnectionAccepted,
            5 => MessageTag::ConnectionDenied,
            10 => MessageTag::Roster,
            11 => MessageTag::CharacterSelect,
            12 => MessageTag::Prepare,
            13 => MessageTag::Ready,
            20 => MessageTag::WorldSnapshot,
            21 => MessageTag::ClientState,
            22 => MessageTag::RequestFull,
            30 => MessageTag::Finished,
            40 => MessageTag::Ping,
            41 => MessageTag::Pong,
            50 => MessageTag::Disconnect,
            other => return Err(PacketError::UnknownTag(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
    /// Authority tick this packet was produced at.
    pub tick: i64,
}

impl PacketHeader {
    pub fn new(sequence: u32, ack: u32, ack_bitfield: u32) -> Self {
        Self {
            sequence,
            ack,
            ack_bitfield,
            tick: 0,
        }
    }

    pub fn with_tick(mut self, tick: i64) -> Self {
        self.tick = tick;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityIdRecord {
    pub kind: u8,
    pub owner: i32,
    pub index: i32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum BaseRecord {
    Plain,
    Armored {
        damage_factor: f32,
        protect_factor: f32,
    },
    Projectile {
        weapon: u8,
        origin: EntityIdRecord,
        targets: u8,
    },
    Control {
        lock: Option<String>,
    },
}

/// Per-tick payload. Every field but `frame` may be omitted; an omitted field
/// keeps the receiver's previous value.
#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct BodyRecord {
    pub frame: i64,
    pub scene: Option<i32>,
    pub position: Option<[f32; 2]>,
    pub velocity: Option<[f32; 2]>,
    pub facing: Option<f32>,
    pub hp: Option<i32>,
    pub max_hp: Option<i32>,
    pub ammo: Option<i32>,
    pub stage: Option<u8>,
    pub flags: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityRecord {
    pub id: EntityIdRecord,
    pub tick: i64,
    pub base: Option<BaseRecord>,
    pub state: BodyRecord,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ChatMessage {
    pub sender: i32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct FinalResult {
    pub success: bool,
    pub score: i64,
    pub duration_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct WorldSnapshot {
    pub tick: i64,
    /// Every live transient identity, sent with keyframes. Receivers retire
    /// transient identities missing from it.
    pub present: Option<Vec<EntityIdRecord>>,
    pub players: Vec<EntityRecord>,
    pub enemies: Vec<EntityRecord>,
    pub bullets: Vec<EntityRecord>,
    pub controls: Vec<EntityRecord>,
    pub message: Option<ChatMessage>,
    pub result: Option<FinalResult>,
}

impl WorldSnapshot {
    pub fn new(tick: i64) -> Self {
        Self {
            tick,
            ..Default::default()
        }
    }

    pub fn record_count(&self) -> usize {
        self.players.len() + self.enemies.len() + self.bullets.len() + self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
            && self.present.is_none()
            && self.message.is_none()
            && self.result.is_none()
    }

    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.players
            .iter()
            .chain(&self.enemies)
            .chain(&self.bullets)
            .chain(&self.controls)
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct RosterEntry {
    pub player_id: i32,
    pub name: String,
    pub ready: bool,
    pub host: bool,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct CharacterChoice {
    pub player_id: i32,
    pub character: String,
    pub weapons: Vec<u8>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct CharacterSelectData {
    pub players: Vec<CharacterChoice>,
    pub locked: bool,
    pub max_players: u8,
}

#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct GameConfigData {
    pub map: String,
    pub duration_secs: u32,
    pub tick_scale: i64,
    pub frame_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PrepareData {
    pub config: GameConfigData,
    pub snapshot: WorldSnapshot,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    ConnectionRequest {
        client_salt: u64,
        session_token: Option<u64>,
    },
    ConnectionChallenge {
        server_salt: u64,
        challenge: u64,
    },
    ChallengeResponse {
        combined_salt: u64,
    },
    ConnectionAccepted {
        client_id: u32,
        player_id: i32,
        session_token: u64,
        resumed: bool,
    },
    ConnectionDenied {
        reason: String,
    },
    Roster(Vec<RosterEntry>),
    CharacterSelect(CharacterSelectData),
    Prepare(PrepareData),
    Ready,
    WorldSnapshot(WorldSnapshot),
    ClientState(WorldSnapshot),
    RequestFull,
    Finished(FinalResult),
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Disconnect,
}

impl PacketType {
    pub fn tag(&self) -> MessageTag {
        match self {
            PacketType::ConnectionRequest { .. } => MessageTag::ConnectionRequest,
            PacketType::ConnectionChallenge { .. } => MessageTag::ConnectionChallenge,
            PacketType::ChallengeResponse { .. } => MessageTag::ChallengeResponse,
            PacketType::ConnectionAccepted { .. } => MessageTag::ConnectionAccepted,
            PacketType::ConnectionDenied { .. } => MessageTag::ConnectionDenied,
            PacketType::Roster(_) => MessageTag::Roster,
            PacketType::CharacterSelect(_) => MessageTag::CharacterSelect,
            PacketType::Prepare(_) => MessageTag::Prepare,
            PacketType::Ready => MessageTag::Ready,
            PacketType::WorldSnapshot(_) => MessageTag::WorldSnapshot,
            PacketType::ClientState(_) => MessageTag::ClientState,
            PacketType::RequestFull => MessageTag::RequestFull,
            PacketType::Finished(_) => MessageTag::Finished,
            PacketType::Ping { .. } => MessageTag::Ping,
            PacketType::Pong { .. } => MessageTag::Pong,
            PacketType::Disconnect => MessageTag::Disconnect,
        }
    }

    /// Game data, as opposed to handshake and keepalive traffic.
    pub fn is_game_data(&self) -> bool {
        matches!(
            self,
            PacketType::Roster(_)
                | PacketType::CharacterSelect(_)
                | PacketType::Prepare(_)
                | PacketType::WorldSnapshot(_)
                | PacketType::ClientState(_)
                | PacketType::Finished(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported protocol version {0}")]
    Version(u16),
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("tag {tag:?} does not match payload {payload:?}")]
    TagMismatch {
        tag: MessageTag,
        payload: MessageTag,
    },
    #[error("packet of {0} bytes exceeds MTU")]
    Oversize(usize),
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn tag(&self) -> MessageTag {
        self.payload.tag()
    }

    /// Prelude (magic, version, tag, flags) followed by the archived packet.
    pub fn encode(&self, flags: PacketFlags) -> Result<Vec<u8>, PacketError> {
        let body = rkyv::to_bytes::<rancor::Error>(self).map_err(PacketError::Serialize)?;

        let mut data = Vec::with_capacity(PRELUDE_SIZE + body.len());
        data.extend_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
        data.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        data.push(self.tag() as u8);
        data.push(flags.bits());
        data.extend_from_slice(&body);

        if data.len() > MAX_PACKET_SIZE {
            return Err(PacketError::Oversize(data.len()));
        }
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<(Self, PacketFlags), PacketError> {
        if data.len() < PRELUDE_SIZE {
            return Err(PacketError::Truncated(data.len()));
        }

        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if magic != PROTOCOL_MAGIC {
            return Err(PacketError::BadMagic(magic));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != PROTOCOL_VERSION {
            return Err(PacketError::Version(version));
        }
        let tag = MessageTag::try_from(data[6])?;
        let flags = PacketFlags::from_bits_truncate(data[7]);

        // rkyv validation needs an aligned buffer
        let mut aligned = AlignedVec::<16>::with_capacity(data.len() - PRELUDE_SIZE);
        aligned.extend_from_slice(&data[PRELUDE_SIZE..]);
        let packet =
            rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(PacketError::Deserialize)?;

        if packet.tag() != tag {
            return Err(PacketError::TagMismatch {
                tag,
                payload: packet.tag(),
            });
        }

        Ok((packet, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_packet_encoding() {
        let header = PacketHeader::new(7, 3, 0b101).with_tick(420);
        let mut snapshot = WorldSnapshot::new(420);
        snapshot.players.push(EntityRecord {
            id: EntityIdRecord {
                kind: 0,
                owner: 2,
                index: 0,
            },
            tick: 420,
            base: None,
            state: BodyRecord {
                frame: 42,
                position: Some([1.5, -2.0]),
                ..Default::default()
            },
        });
        let packet = Packet::new(header, PacketType::WorldSnapshot(snapshot));

        let data = packet.encode(PacketFlags::KEYFRAME).unwrap();
        assert_eq!(data[6], MessageTag::WorldSnapshot as u8);

        let (decoded, flags) = Packet::decode(&data).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(flags, PacketFlags::KEYFRAME);
    }

    #[test]
    fn test_rejects_unknown_tag() {
        let packet = Packet::new(PacketHeader::new(1, 0, 0), PacketType::Ready);
        let mut data = packet.encode(PacketFlags::empty()).unwrap();
        data[6] = 0xEE;
        assert!(matches!(
            Packet::decode(&data),
            Err(PacketError::UnknownTag(0xEE))
        ));
    }

    #[test]
    fn test_rejects_tag_mismatch() {
        let packet = Packet::new(PacketHeader::new(1, 0, 0), PacketType::Ready);
        let mut data = packet.encode(PacketFlags::empty()).unwrap();
        data[6] = MessageTag::Disconnect as u8;
        assert!(matches!(
            Packet::decode(&data),
            Err(PacketError::TagMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_prelude() {
        let packet = Packet::new(PacketHeader::new(1, 0, 0), PacketType::Ready);
        let mut data = packet.encode(PacketFlags::empty()).unwrap();

        assert!(matches!(
            Packet::decode(&data[..4]),
            Err(PacketError::Truncated(4))
        ));

        data[4] = 9;
        assert!(matches!(Packet::decode(&data), Err(PacketError::Version(9))));

        data[0] = 0;
        assert!(matches!(Packet::decode(&data), Err(PacketError::BadMagic(_))));
    }
}
