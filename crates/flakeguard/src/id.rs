use core::fmt;

use crate::time::EPOCH_SECS;

/// A 64-bit, second-resolution ID.
///
/// - 6 bits reserved (the sign bit plus 5 unused bits, always zero)
/// - 29 bits timestamp (seconds since [`EPOCH`])
/// - 6 bits machine ID
/// - 6 bits node ID
/// - 17 bits sequence
///
/// ```text
///  Bit Index:  63           58 57            29 28           23 22        17 16             0
///              +--------------+----------------+---------------+------------+---------------+
///  Field:      | reserved (6) | timestamp (29) | machine ID (6)| node ID (6)| sequence (17) |
///              +--------------+----------------+---------------+------------+---------------+
///              |<-------------- MSB -------------- 64 bits -------------- LSB -------------->|
/// ```
///
/// The layout is a compatibility contract: IDs minted by any process in the
/// cluster must stay comparable, so none of the widths or shifts below may
/// change.
///
/// [`EPOCH`]: crate::EPOCH
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlakeId {
    id: u64,
}

impl FlakeId {
    /// Bitmask for extracting the 29-bit timestamp field. Occupies bits 29
    /// through 57.
    pub const TIMESTAMP_MASK: u64 = (1 << 29) - 1;

    /// Bitmask for extracting the 6-bit machine ID field. Occupies bits 23
    /// through 28.
    pub const MACHINE_ID_MASK: u64 = (1 << 6) - 1;

    /// Bitmask for extracting the 6-bit node ID field. Occupies bits 17
    /// through 22.
    pub const NODE_ID_MASK: u64 = (1 << 6) - 1;

    /// Bitmask for extracting the 17-bit sequence field. Occupies bits 0
    /// through 16.
    pub const SEQUENCE_MASK: u64 = (1 << 17) - 1;

    /// Number of bits to shift the timestamp to its correct position (bit 29).
    pub const TIMESTAMP_SHIFT: u64 = 29;

    /// Number of bits to shift the machine ID to its correct position (bit 23).
    pub const MACHINE_ID_SHIFT: u64 = 23;

    /// Number of bits to shift the node ID to its correct position (bit 17).
    pub const NODE_ID_SHIFT: u64 = 17;

    /// Number of bits to shift the sequence field (bit 0).
    pub const SEQUENCE_SHIFT: u64 = 0;

    /// Packs the four fields into an ID, masking each to its width.
    pub const fn from(timestamp: u64, machine_id: u64, node_id: u64, sequence: u64) -> Self {
        let timestamp = (timestamp & Self::TIMESTAMP_MASK) << Self::TIMESTAMP_SHIFT;
        let machine_id = (machine_id & Self::MACHINE_ID_MASK) << Self::MACHINE_ID_SHIFT;
        let node_id = (node_id & Self::NODE_ID_MASK) << Self::NODE_ID_SHIFT;
        let sequence = (sequence & Self::SEQUENCE_MASK) << Self::SEQUENCE_SHIFT;
        Self {
            id: timestamp | machine_id | node_id | sequence,
        }
    }

    /// Constructs an ID from components that the caller has already
    /// validated.
    ///
    /// Unlike [`FlakeId::from`], out-of-range components are a logic error
    /// and trip a debug assertion instead of being masked.
    pub fn from_components(timestamp: u64, machine_id: u64, node_id: u64, sequence: u64) -> Self {
        debug_assert!(timestamp <= Self::TIMESTAMP_MASK, "timestamp overflow");
        debug_assert!(machine_id <= Self::MACHINE_ID_MASK, "machine_id overflow");
        debug_assert!(node_id <= Self::NODE_ID_MASK, "node_id overflow");
        debug_assert!(sequence <= Self::SEQUENCE_MASK, "sequence overflow");
        Self::from(timestamp, machine_id, node_id, sequence)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }

    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Extracts the timestamp offset (seconds since [`crate::EPOCH`]).
    pub const fn timestamp(&self) -> u64 {
        (self.id >> Self::TIMESTAMP_SHIFT) & Self::TIMESTAMP_MASK
    }

    /// Extracts the machine ID from the packed ID.
    pub const fn machine_id(&self) -> u64 {
        (self.id >> Self::MACHINE_ID_SHIFT) & Self::MACHINE_ID_MASK
    }

    /// Extracts the node ID from the packed ID.
    pub const fn node_id(&self) -> u64 {
        (self.id >> Self::NODE_ID_SHIFT) & Self::NODE_ID_MASK
    }

    /// Extracts the sequence number from the packed ID.
    pub const fn sequence(&self) -> u64 {
        (self.id >> Self::SEQUENCE_SHIFT) & Self::SEQUENCE_MASK
    }

    /// The Unix time, in seconds, at which this ID was minted.
    pub const fn unix_secs(&self) -> u64 {
        self.timestamp() + EPOCH_SECS
    }

    pub const fn max_timestamp() -> u64 {
        Self::TIMESTAMP_MASK
    }

    pub const fn max_machine_id() -> u64 {
        Self::MACHINE_ID_MASK
    }

    pub const fn max_node_id() -> u64 {
        Self::NODE_ID_MASK
    }

    pub const fn max_sequence() -> u64 {
        Self::SEQUENCE_MASK
    }

    /// Returns the ID as a zero-padded 20-digit string.
    pub fn to_padded_string(&self) -> String {
        format!("{:020}", self.id)
    }

    fn fields(&self) -> [FieldLayout; 5] {
        [
            FieldLayout {
                name: "reserved",
                bits: 6,
                value: self.id >> 58,
            },
            FieldLayout {
                name: "timestamp",
                bits: 29,
                value: self.timestamp(),
            },
            FieldLayout {
                name: "machine_id",
                bits: 6,
                value: self.machine_id(),
            },
            FieldLayout {
                name: "node_id",
                bits: 6,
                value: self.node_id(),
            },
            FieldLayout {
                name: "sequence",
                bits: 17,
                value: self.sequence(),
            },
        ]
    }
}

/// Packs `(timestamp offset, machine id, node id, sequence)` into the raw
/// 64-bit layout described on [`FlakeId`].
pub const fn encode(timestamp: u64, machine_id: u64, node_id: u64, sequence: u64) -> u64 {
    FlakeId::from(timestamp, machine_id, node_id, sequence).to_raw()
}

/// Splits a raw ID back into `(timestamp offset, machine id, node id,
/// sequence)`.
pub const fn decode(raw: u64) -> (u64, u64, u64, u64) {
    let id = FlakeId::from_raw(raw);
    (id.timestamp(), id.machine_id(), id.node_id(), id.sequence())
}

impl From<FlakeId> for u64 {
    fn from(id: FlakeId) -> Self {
        id.to_raw()
    }
}

impl From<u64> for FlakeId {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_bit_layout_debug(f, self, "FlakeId")
    }
}

struct FieldLayout {
    name: &'static str,
    bits: u8,
    value: u64,
}

fn write_bit_layout_debug(f: &mut fmt::Formatter<'_>, id: &FlakeId, type_name: &str) -> fmt::Result {
    fn center(s: impl ToString, width: usize) -> String {
        let s = s.to_string();
        let len = s.len();
        if len >= width {
            return s;
        }
        let pad = width - len;
        let left = pad / 2;
        let right = pad - left;
        format!("{}{}{}", " ".repeat(left), s, " ".repeat(right))
    }

    fn border(f: &mut fmt::Formatter<'_>, columns: &[usize]) -> fmt::Result {
        write!(f, "        +")?;
        for &w in columns {
            write!(f, "{}+", "-".repeat(w))?;
        }
        writeln!(f)
    }

    let fields = id.fields();

    // Compute max width per column: label, dec, hex
    let columns: Vec<usize> = fields
        .iter()
        .map(|field| {
            let label_len = format!("{} ({})", field.name, field.bits).len();
            let dec_len = field.value.to_string().len();
            let hex_len = format!("0x{:x}", field.value).len();
            label_len.max(dec_len).max(hex_len) + 2
        })
        .collect();

    writeln!(f, "{type_name} {{")?;
    writeln!(f, "    raw id     : 0x{:016x} ({})", id.id, id.id)?;
    writeln!(f, "    padded     : {}", id.to_padded_string())?;
    writeln!(f, "    unix secs  : {}", id.unix_secs())?;
    writeln!(f, "    layout     :")?;

    border(f, &columns)?;

    write!(f, "        |")?;
    for (field, &w) in fields.iter().zip(&columns) {
        write!(f, "{}|", center(format!("{} ({})", field.name, field.bits), w))?;
    }
    writeln!(f)?;

    border(f, &columns)?;

    write!(f, "        |")?;
    for (field, &w) in fields.iter().zip(&columns) {
        write!(f, "{}|", center(field.value, w))?;
    }
    writeln!(f)?;

    write!(f, "        |")?;
    for (field, &w) in fields.iter().zip(&columns) {
        write!(f, "{}|", center(format!("0x{:x}", field.value), w))?;
    }
    writeln!(f)?;

    border(f, &columns)?;

    write!(f, "}}")
}
