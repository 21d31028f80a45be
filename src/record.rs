//! Variable-width tagged market event records.
//!
//! Every record starts with a packed 8-byte header that doubles as its
//! sort key. Payload slots (8 bytes each) follow the header back to
//! back; the total slot count (1, 2 or 4) is derivable from the header
//! alone.
//!
//! ## Header layout (one u64 slot)
//!
//! ```text
//! Bits    Size  Field
//! 63..32  32    seconds since Unix epoch
//! 31..22  10    sub-second millis, or status sentinel (1020..=1023)
//! 21..6   16    symbol index (0 = invalid/unassigned)
//! 5..0    6     kind (low 4 bits) + width flags (bit 4 = double,
//!               bit 5 = quad; both set is invalid)
//! ```
//!
//! The raw u64 value compared unsigned is the global ordering key:
//! seconds dominate, then sub-second, then symbol index, then kind.
//! Records with identical header values have unspecified relative
//! order.

use crate::error::{Result, StoreError};

// ── Constants ──────────────────────────────────────────────────────

/// One slot is 8 bytes; all records are a whole number of slots.
pub const SLOT_BYTES: usize = 8;

/// Free-slot pattern marking unused trailing space in a page.
pub const FREE_SLOT: u64 = u64::MAX;

/// Sub-second sentinel: padding record, carries no market data.
pub const SUBSEC_PADDING: u16 = 1020;
/// Sub-second sentinel: market halted.
pub const SUBSEC_HALTED: u16 = 1021;
/// Sub-second sentinel: market continues (resume after halt).
pub const SUBSEC_CONTINUES: u16 = 1022;
/// Sub-second sentinel: no timestamp available.
pub const SUBSEC_NOT_PRESENT: u16 = 1023;

const FLAG_DOUBLE: u64 = 0b01_0000;
const FLAG_QUAD: u64 = 0b10_0000;
const KIND_MASK: u64 = 0b00_1111;

// ── Sub-second field ───────────────────────────────────────────────

/// Closed enumeration over the 10-bit sub-second field.
///
/// Values 0..=1019 are a valid sub-second offset (milliseconds);
/// 1020..=1023 are reserved status sentinels and never appear as raw
/// integers in the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubSecond {
    /// Valid sub-second offset in milliseconds (0..=1019).
    Millis(u16),
    /// Padding record, no payload meaning.
    Padding,
    /// Market halted.
    Halted,
    /// Market continues.
    Continues,
    /// No timestamp present.
    NotPresent,
}

impl SubSecond {
    /// Raw 10-bit encoding.
    pub fn to_raw(self) -> u16 {
        match self {
            SubSecond::Millis(ms) => ms,
            SubSecond::Padding => SUBSEC_PADDING,
            SubSecond::Halted => SUBSEC_HALTED,
            SubSecond::Continues => SUBSEC_CONTINUES,
            SubSecond::NotPresent => SUBSEC_NOT_PRESENT,
        }
    }

    /// Decode the raw 10-bit field.
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            SUBSEC_PADDING => SubSecond::Padding,
            SUBSEC_HALTED => SubSecond::Halted,
            SUBSEC_CONTINUES => SubSecond::Continues,
            SUBSEC_NOT_PRESENT => SubSecond::NotPresent,
            ms => SubSecond::Millis(ms),
        }
    }

    /// Construct a validated millis value.
    pub fn millis(ms: u16) -> Result<Self> {
        if ms >= SUBSEC_PADDING {
            return Err(StoreError::InvalidRecord(format!(
                "sub-second offset {} collides with reserved range 1020..=1023",
                ms
            )));
        }
        Ok(SubSecond::Millis(ms))
    }
}

// ── Record kind ────────────────────────────────────────────────────

/// Record type tag (low 4 bits of the kind+flags field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Header-only market status / padding marker (1 slot).
    Status = 0,
    /// Bid tick: price + size (2 slots).
    Bid = 1,
    /// Ask tick: price + size (2 slots).
    Ask = 2,
    /// Trade tick: price + size (2 slots).
    Trade = 3,
    /// Fixed price (2 slots).
    FixedPrice = 4,
    /// Settlement price (2 slots).
    SettlementPrice = 5,
    /// Auction price (2 slots).
    AuctionPrice = 6,
    /// Cumulative volume (2 slots).
    Volume = 7,
    /// Open interest (2 slots).
    OpenInterest = 8,
    /// Two-sided quote with order counts (4 slots).
    Quote = 9,
    /// OHLC aggregate with start timestamp and tick count (4 slots).
    Candle = 10,
    /// Book snapshot: bid/ask price+size plus trade-weighted price and
    /// quantity (4 slots).
    Snapshot = 11,
}

impl RecordKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Status),
            1 => Some(Self::Bid),
            2 => Some(Self::Ask),
            3 => Some(Self::Trade),
            4 => Some(Self::FixedPrice),
            5 => Some(Self::SettlementPrice),
            6 => Some(Self::AuctionPrice),
            7 => Some(Self::Volume),
            8 => Some(Self::OpenInterest),
            9 => Some(Self::Quote),
            10 => Some(Self::Candle),
            11 => Some(Self::Snapshot),
            _ => None,
        }
    }

    /// Slot count inherent to the kind (header included).
    pub fn slot_count(self) -> usize {
        match self {
            RecordKind::Status => 1,
            RecordKind::Bid
            | RecordKind::Ask
            | RecordKind::Trade
            | RecordKind::FixedPrice
            | RecordKind::SettlementPrice
            | RecordKind::AuctionPrice
            | RecordKind::Volume
            | RecordKind::OpenInterest => 2,
            RecordKind::Quote | RecordKind::Candle | RecordKind::Snapshot => 4,
        }
    }

    fn width_flags(self) -> u64 {
        match self.slot_count() {
            1 => 0,
            2 => FLAG_DOUBLE,
            _ => FLAG_QUAD,
        }
    }
}

// ── Record header ──────────────────────────────────────────────────

/// Packed 8-byte record header. The wrapped u64 is the sort key;
/// `Ord` on this type is the global record ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordHeader(u64);

impl RecordHeader {
    /// Pack a header from its fields.
    pub fn new(seconds: u32, subsec: SubSecond, symbol: u16, kind: RecordKind) -> Self {
        let raw = ((seconds as u64) << 32)
            | ((subsec.to_raw() as u64 & 0x3ff) << 22)
            | ((symbol as u64) << 6)
            | kind.width_flags()
            | (kind as u64 & KIND_MASK);
        Self(raw)
    }

    /// Reconstruct from the raw slot value. No validation; call
    /// [`RecordHeader::slot_count`] to detect the reserved flag
    /// combination.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw sort key.
    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn subsec(self) -> SubSecond {
        SubSecond::from_raw(((self.0 >> 22) & 0x3ff) as u16)
    }

    pub fn symbol(self) -> u16 {
        ((self.0 >> 6) & 0xffff) as u16
    }

    /// Record kind, or None for an unknown tag.
    pub fn kind(self) -> Option<RecordKind> {
        RecordKind::from_u8((self.0 & KIND_MASK) as u8)
    }

    /// Total slot count (header included), derived from the width
    /// flags alone. The reserved combination (double and quad both
    /// set) is a fatal input error.
    pub fn slot_count(self) -> Result<usize> {
        match self.0 & (FLAG_DOUBLE | FLAG_QUAD) {
            0 => Ok(1),
            FLAG_DOUBLE => Ok(2),
            FLAG_QUAD => Ok(4),
            _ => Err(StoreError::InvalidRecord(format!(
                "reserved width flag combination in header {:#018x}",
                self.0
            ))),
        }
    }

    /// Encoded byte size.
    pub fn byte_size(self) -> Result<usize> {
        Ok(self.slot_count()? * SLOT_BYTES)
    }

    /// True for the all-ones free pattern.
    pub fn is_free(self) -> bool {
        self.0 == FREE_SLOT
    }

    /// True for the all-zero pattern (never a valid record).
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }
}

// ── Payload ────────────────────────────────────────────────────────

/// Typed payload of a record; variant must agree with the header kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    /// Header-only records (Status).
    None,
    /// Single-value price ticks: price + size in one slot.
    PriceSize { price: f32, size: u32 },
    /// Volume / open interest: a single u64 value.
    Scalar(u64),
    /// Two-sided quote.
    Quote {
        bid: f32,
        bid_size: u32,
        ask: f32,
        ask_size: u32,
        bid_orders: u32,
        ask_orders: u32,
    },
    /// OHLC aggregate covering [start_seconds, header.seconds].
    Candle {
        open: f32,
        high: f32,
        low: f32,
        close: f32,
        start_seconds: u32,
        count: u32,
    },
    /// Book snapshot with trade-weighted price/quantity.
    Snapshot {
        bid: f32,
        bid_size: u32,
        ask: f32,
        ask_size: u32,
        vwap: f32,
        vwap_qty: u32,
    },
}

// ── Record ─────────────────────────────────────────────────────────

/// A complete market event record: header slot + payload slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: Payload,
}

#[inline]
fn lanes(lo: u32, hi: u32) -> u64 {
    lo as u64 | ((hi as u64) << 32)
}

#[inline]
fn lane_lo(slot: u64) -> u32 {
    slot as u32
}

#[inline]
fn lane_hi(slot: u64) -> u32 {
    (slot >> 32) as u32
}

impl Record {
    /// Build a record, checking that the payload variant matches the
    /// header kind.
    pub fn new(header: RecordHeader, payload: Payload) -> Result<Self> {
        let record = Self { header, payload };
        record.validate()?;
        Ok(record)
    }

    /// Check that the header kind is known and the payload variant
    /// agrees with it. [`Record::new`] upholds this; records assembled
    /// field-wise can break it, and a broken pair would encode fewer
    /// or more slots than the header promises.
    pub fn validate(&self) -> Result<()> {
        let kind = self.header.kind().ok_or_else(|| {
            StoreError::InvalidRecord(format!(
                "unknown record kind in header {:#018x}",
                self.header.raw()
            ))
        })?;
        let ok = matches!(
            (kind, &self.payload),
            (RecordKind::Status, Payload::None)
                | (RecordKind::Bid, Payload::PriceSize { .. })
                | (RecordKind::Ask, Payload::PriceSize { .. })
                | (RecordKind::Trade, Payload::PriceSize { .. })
                | (RecordKind::FixedPrice, Payload::PriceSize { .. })
                | (RecordKind::SettlementPrice, Payload::PriceSize { .. })
                | (RecordKind::AuctionPrice, Payload::PriceSize { .. })
                | (RecordKind::Volume, Payload::Scalar(_))
                | (RecordKind::OpenInterest, Payload::Scalar(_))
                | (RecordKind::Quote, Payload::Quote { .. })
                | (RecordKind::Candle, Payload::Candle { .. })
                | (RecordKind::Snapshot, Payload::Snapshot { .. })
        );
        if !ok {
            return Err(StoreError::InvalidRecord(format!(
                "payload does not match record kind {:?}",
                kind
            )));
        }
        Ok(())
    }

    /// Shorthand for a price+size tick of the given kind.
    pub fn tick(
        kind: RecordKind,
        seconds: u32,
        subsec: SubSecond,
        symbol: u16,
        price: f32,
        size: u32,
    ) -> Result<Self> {
        Record::new(
            RecordHeader::new(seconds, subsec, symbol, kind),
            Payload::PriceSize { price, size },
        )
    }

    /// Total slot count including the header.
    pub fn slot_count(&self) -> usize {
        // Kind validated at construction; width flags always coherent.
        self.header.slot_count().unwrap_or(1)
    }

    /// Append the record's slots to `out`.
    pub fn encode_into(&self, out: &mut Vec<u64>) {
        out.push(self.header.raw());
        match self.payload {
            Payload::None => {}
            Payload::PriceSize { price, size } => {
                out.push(lanes(price.to_bits(), size));
            }
            Payload::Scalar(v) => {
                out.push(v);
            }
            Payload::Quote {
                bid,
                bid_size,
                ask,
                ask_size,
                bid_orders,
                ask_orders,
            } => {
                out.push(lanes(bid.to_bits(), bid_size));
                out.push(lanes(ask.to_bits(), ask_size));
                out.push(lanes(bid_orders, ask_orders));
            }
            Payload::Candle {
                open,
                high,
                low,
                close,
                start_seconds,
                count,
            } => {
                out.push(lanes(open.to_bits(), high.to_bits()));
                out.push(lanes(low.to_bits(), close.to_bits()));
                out.push(lanes(start_seconds, count));
            }
            Payload::Snapshot {
                bid,
                bid_size,
                ask,
                ask_size,
                vwap,
                vwap_qty,
            } => {
                out.push(lanes(bid.to_bits(), bid_size));
                out.push(lanes(ask.to_bits(), ask_size));
                out.push(lanes(vwap.to_bits(), vwap_qty));
            }
        }
    }

    /// Decode a record from the slots starting at `slots[0]`.
    ///
    /// `slots` must contain at least `slot_count` slots; errors on the
    /// reserved flag combination, unknown kinds and short input.
    pub fn decode(slots: &[u64]) -> Result<Self> {
        if slots.is_empty() {
            return Err(StoreError::InvalidRecord("empty slot run".into()));
        }
        let header = RecordHeader::from_raw(slots[0]);
        let n = header.slot_count()?;
        if slots.len() < n {
            return Err(StoreError::InvalidRecord(format!(
                "record needs {} slots, {} available",
                n,
                slots.len()
            )));
        }
        let kind = header.kind().ok_or_else(|| {
            StoreError::InvalidRecord(format!("unknown record kind in header {:#018x}", header.raw()))
        })?;
        if kind.slot_count() != n {
            return Err(StoreError::InvalidRecord(format!(
                "width flags say {} slots but kind {:?} needs {}",
                n,
                kind,
                kind.slot_count()
            )));
        }
        let payload = match kind {
            RecordKind::Status => Payload::None,
            RecordKind::Bid
            | RecordKind::Ask
            | RecordKind::Trade
            | RecordKind::FixedPrice
            | RecordKind::SettlementPrice
            | RecordKind::AuctionPrice => Payload::PriceSize {
                price: f32::from_bits(lane_lo(slots[1])),
                size: lane_hi(slots[1]),
            },
            RecordKind::Volume | RecordKind::OpenInterest => Payload::Scalar(slots[1]),
            RecordKind::Quote => Payload::Quote {
                bid: f32::from_bits(lane_lo(slots[1])),
                bid_size: lane_hi(slots[1]),
                ask: f32::from_bits(lane_lo(slots[2])),
                ask_size: lane_hi(slots[2]),
                bid_orders: lane_lo(slots[3]),
                ask_orders: lane_hi(slots[3]),
            },
            RecordKind::Candle => Payload::Candle {
                open: f32::from_bits(lane_lo(slots[1])),
                high: f32::from_bits(lane_hi(slots[1])),
                low: f32::from_bits(lane_lo(slots[2])),
                close: f32::from_bits(lane_hi(slots[2])),
                start_seconds: lane_lo(slots[3]),
                count: lane_hi(slots[3]),
            },
            RecordKind::Snapshot => Payload::Snapshot {
                bid: f32::from_bits(lane_lo(slots[1])),
                bid_size: lane_hi(slots[1]),
                ask: f32::from_bits(lane_lo(slots[2])),
                ask_size: lane_hi(slots[2]),
                vwap: f32::from_bits(lane_lo(slots[3])),
                vwap_qty: lane_hi(slots[3]),
            },
        };
        Ok(Self { header, payload })
    }
}

// ── Tilman compression ─────────────────────────────────────────────

/// Collapse compatible neighboring snapshot records.
///
/// A run of adjacent Snapshot records for the same symbol within the
/// same second is replaced by the last record of the run (the most
/// recent book state; earlier intra-second snapshots carry no extra
/// information). Other kinds are never touched. Returns the number of
/// records removed.
pub fn collapse_adjacent_snapshots(records: &mut Vec<Record>) -> usize {
    let before = records.len();
    let mut out: Vec<Record> = Vec::with_capacity(before);
    for rec in records.drain(..) {
        let replace = match out.last() {
            Some(prev) => {
                prev.header.kind() == Some(RecordKind::Snapshot)
                    && rec.header.kind() == Some(RecordKind::Snapshot)
                    && prev.header.symbol() == rec.header.symbol()
                    && prev.header.seconds() == rec.header.seconds()
            }
            None => false,
        };
        if replace {
            *out.last_mut().expect("non-empty") = rec;
        } else {
            out.push(rec);
        }
    }
    *records = out;
    before - records.len()
}

// ── Tests ──────────────────────────────────────────────────────────
