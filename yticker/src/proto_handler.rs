//! # Yahoo Finance Protobuf Messages
//!
//! Typed `prost` mirror of `proto/yticker.proto`. The streaming pipeline decodes
//! against the schema file at runtime; these types are for callers that want a
//! typed view of a captured frame or need to produce frames: replaying a
//! recorded session through [`crate::transport::MemoryPeer::push_quote`], or
//! feeding quotes to a test peer.

use prost::Message;

use crate::decoder::payload_from_text;
use crate::error::DecodeError;

/// The `yticker` quote message.
#[derive(Clone, PartialEq, Message)]
pub struct PricingData {
    /// The ticker symbol (e.g., "AAPL", "BTC-USD")
    #[prost(string, tag = "1")]
    pub id: String,

    #[prost(float, tag = "2")]
    pub price: f32,

    /// Quote time in milliseconds since Unix Epoch
    #[prost(sint64, tag = "3")]
    pub time: i64,

    #[prost(string, tag = "4")]
    pub currency: String,

    /// Exchange code (e.g., "NMS", "NYQ")
    #[prost(string, tag = "5")]
    pub exchange: String,

    #[prost(enumeration = "QuoteType", tag = "6")]
    pub quote_type: i32,

    #[prost(enumeration = "MarketHoursType", tag = "7")]
    pub market_hours: i32,

    #[prost(float, tag = "8")]
    pub change_percent: f32,

    #[prost(sint64, tag = "9")]
    pub day_volume: i64,

    #[prost(float, tag = "10")]
    pub day_high: f32,

    #[prost(float, tag = "11")]
    pub day_low: f32,

    #[prost(float, tag = "12")]
    pub change: f32,

    #[prost(string, tag = "13")]
    pub short_name: String,

    /// Expiration for options and futures (Unix timestamp)
    #[prost(sint64, tag = "14")]
    pub expire_date: i64,

    #[prost(float, tag = "15")]
    pub open_price: f32,

    #[prost(float, tag = "16")]
    pub previous_close: f32,

    #[prost(float, tag = "17")]
    pub strike_price: f32,

    #[prost(string, tag = "18")]
    pub underlying_symbol: String,

    #[prost(sint64, tag = "19")]
    pub open_interest: i64,

    #[prost(enumeration = "OptionType", tag = "20")]
    pub options_type: i32,

    #[prost(sint64, tag = "21")]
    pub mini_option: i64,

    #[prost(sint64, tag = "22")]
    pub last_size: i64,

    #[prost(float, tag = "23")]
    pub bid: f32,

    #[prost(sint64, tag = "24")]
    pub bid_size: i64,

    #[prost(float, tag = "25")]
    pub ask: f32,

    #[prost(sint64, tag = "26")]
    pub ask_size: i64,

    #[prost(sint64, tag = "27")]
    pub price_hint: i64,

    /// 24h volume (crypto)
    #[prost(sint64, tag = "28")]
    pub vol_24hr: i64,

    #[prost(sint64, tag = "29")]
    pub vol_all_currencies: i64,

    #[prost(string, tag = "30")]
    pub fromcurrency: String,

    #[prost(string, tag = "31")]
    pub last_market: String,

    #[prost(double, tag = "32")]
    pub circulating_supply: f64,

    #[prost(double, tag = "33")]
    pub marketcap: f64,
}

impl PricingData {
    /// Encodes the message and wraps it the way the streamer sends it: one
    /// base64 text frame.
    pub fn to_frame_text(&self) -> String {
        use base64::{engine::general_purpose, Engine as _};
        general_purpose::STANDARD.encode(self.encode_to_vec())
    }

    /// Typed view of one text frame, bare base64 or JSON envelope. Unknown
    /// tags are skipped here, unlike in the schema-driven decoder.
    pub fn from_frame_text(text: &str) -> Result<Self, DecodeError> {
        let bytes = payload_from_text(text)?;
        Ok(Self::decode(bytes.as_slice())?)
    }
}

/// Categorizes the type of financial instrument providing the data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum QuoteType {
    None = 0,
    Altsymbol = 5,
    /// Keep-alive sent by the streamer
    Heartbeat = 7,
    Equity = 8,
    Index = 9,
    Mutualfund = 11,
    Moneymarket = 12,
    Option = 13,
    Currency = 14,
    Warrant = 15,
    Bond = 17,
    Future = 18,
    Etf = 20,
    Commodity = 23,
    Ecnquote = 28,
    Cryptocurrency = 41,
    Indicator = 42,
    Industry = 1000,
}

/// Trading session of the quote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MarketHoursType {
    PreMarket = 0,
    RegularMarket = 1,
    PostMarket = 2,
    ExtendedHoursMarket = 3,
}

/// Distinguishes between Call and Put options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OptionType {
    Call = 0,
    Put = 1,
}
