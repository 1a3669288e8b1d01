//! Domain vocabulary shared by the cache, the transport and the decoder.
//!
//! Prices are fixed-point [`Decimal`] values so that level comparison never
//! drifts the way binary floating point does.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-point price.
pub type Price = Decimal;

/// Aggregate quantity at a price level.
pub type Quantity = u64;

/// Exchange-assigned instrument identifier.
pub type InstrumentId = String;

/// Book side (bid or ask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Bid (buy) side.
    Bid,
    /// Ask (sell) side.
    Ask,
}

impl Side {
    /// Returns the lowercase wire name of the side.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bid" | "buy" | "BID" | "BUY" => Ok(Self::Bid),
            "ask" | "sell" | "ASK" | "SELL" => Ok(Self::Ask),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrument kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// Future contract.
    Future,
    /// Call option.
    Call,
    /// Put option.
    Put,
    /// Identifier outside the exchange naming convention.
    Other,
}

impl InstrumentKind {
    /// Returns the lowercase wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Future => "future",
            Self::Call => "call",
            Self::Put => "put",
            Self::Other => "other",
        }
    }

    /// Returns true for call and put options.
    #[must_use]
    pub const fn is_option(&self) -> bool {
        matches!(self, Self::Call | Self::Put)
    }
}

impl FromStr for InstrumentKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "future" => Ok(Self::Future),
            "call" => Ok(Self::Call),
            "put" => Ok(Self::Put),
            "other" => Ok(Self::Other),
            _ => Err(()),
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrument definition.
///
/// Immutable once discovered. The exchange names instruments
/// `<underlying>_future_<expiry>`, `<underlying>_call_<strike>_<expiry>` and
/// `<underlying>_put_<strike>_<expiry>`; [`Instrument::from_id`] recovers the
/// attributes from such an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Unique instrument identifier.
    pub id: InstrumentId,
    /// Contract kind.
    pub kind: InstrumentKind,
    /// Underlying symbol.
    pub underlying: String,
    /// Strike price (options only).
    pub strike: Option<Price>,
    /// Expiry in exchange time units, when known.
    pub expiry: Option<u64>,
}

impl Instrument {
    /// Creates a future definition.
    #[must_use]
    pub fn future(id: impl Into<String>, underlying: impl Into<String>, expiry: u64) -> Self {
        Self {
            id: id.into(),
            kind: InstrumentKind::Future,
            underlying: underlying.into(),
            strike: None,
            expiry: Some(expiry),
        }
    }

    /// Creates a call or put definition.
    #[must_use]
    pub fn option(
        id: impl Into<String>,
        kind: InstrumentKind,
        underlying: impl Into<String>,
        strike: Price,
        expiry: u64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            underlying: underlying.into(),
            strike: Some(strike),
            expiry: Some(expiry),
        }
    }

    /// Builds a definition from an identifier alone.
    ///
    /// Identifiers that do not follow the naming convention yield an
    /// [`InstrumentKind::Other`] instrument whose underlying is the id itself.
    #[must_use]
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        match parse_id(&id) {
            Some((kind, underlying, strike, expiry)) => Self {
                underlying: underlying.to_string(),
                kind,
                strike,
                expiry: Some(expiry),
                id,
            },
            None => Self {
                underlying: id.clone(),
                kind: InstrumentKind::Other,
                strike: None,
                expiry: None,
                id,
            },
        }
    }
}

fn parse_id(id: &str) -> Option<(InstrumentKind, &str, Option<Price>, u64)> {
    const MARKERS: [(&str, InstrumentKind); 3] = [
        ("_future_", InstrumentKind::Future),
        ("_call_", InstrumentKind::Call),
        ("_put_", InstrumentKind::Put),
    ];

    for (marker, kind) in MARKERS {
        let Some(idx) = id.rfind(marker) else {
            continue;
        };
        let underlying = &id[..idx];
        if underlying.is_empty() {
            return None;
        }
        let rest = &id[idx + marker.len()..];
        return if kind == InstrumentKind::Future {
            let expiry = rest.parse().ok()?;
            Some((kind, underlying, None, expiry))
        } else {
            let (strike, expiry) = rest.split_once('_')?;
            let strike = Decimal::from_str(strike).ok()?;
            let expiry = expiry.parse().ok()?;
            Some((kind, underlying, Some(strike), expiry))
        };
    }
    None
}

/// Price level in an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Fixed-point price.
    pub price: Price,
    /// Total quantity at this level.
    pub quantity: Quantity,
}

impl PriceLevel {
    /// Creates a new price level.
    #[must_use]
    pub const fn new(price: Price, quantity: Quantity) -> Self {
        Self { price, quantity }
    }
}

/// Feed connection state.
///
/// `Disconnected -> Connecting -> Authenticating -> Streaming`, and on any
/// failure `Reconnecting -> Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected = 0,
    /// Opening the transport connection.
    Connecting = 1,
    /// Exchanging credentials.
    Authenticating = 2,
    /// Receiving market frames.
    Streaming = 3,
    /// Waiting out the backoff delay before the next attempt.
    Reconnecting = 4,
}

impl ConnectionState {
    /// Returns the compact representation used for atomic storage.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Restores a state from its compact representation.
    ///
    /// Unknown values map to [`ConnectionState::Disconnected`].
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Streaming,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    /// Returns true if the transition `self -> next` is part of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Authenticating)
                | (Self::Connecting, Self::Reconnecting)
                | (Self::Authenticating, Self::Streaming)
                | (Self::Authenticating, Self::Reconnecting)
                | (Self::Streaming, Self::Reconnecting)
                | (Self::Reconnecting, Self::Connecting)
                | (_, Self::Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}
