use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pricing::variant::VariantKey;

// ---------------------------------------------------------------------------
// Upstream payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

/// `GET /data/wow/realm/{slug}`
#[derive(Debug, Clone, Deserialize)]
pub struct RealmResponse {
    pub name: String,
    pub connected_realm: Link,
}

/// `GET {connected_realm.href}`
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedRealmResponse {
    pub id: i64,
}

/// `POST /oauth/token`
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
}

/// `GET /data/wow/connected-realm/{id}/auctions`
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionsResponse {
    #[serde(default)]
    pub auctions: Vec<Auction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Auction {
    pub id: i64,
    pub item: RawItem,
    #[serde(default)]
    pub buyout: i64,
    #[serde(default)]
    pub bid: i64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub time_left: TimeLeft,
    #[serde(default)]
    pub unit_price: i64,
}

impl Auction {
    /// Commodities carry `unit_price`; everything else is priced by `buyout`.
    pub fn price(&self) -> i64 {
        match self.unit_price {
            0 => self.buyout,
            unit_price => unit_price,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItem {
    pub id: i64,
    pub context: Option<i64>,
    pub modifiers: Option<Vec<Modifier>>,
    pub bonus_lists: Option<Vec<i64>>,
    pub pet_breed_id: Option<i64>,
    pub pet_level: Option<i64>,
    pub pet_quality_id: Option<i64>,
    pub pet_species_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Modifier {
    #[serde(rename = "type")]
    pub kind: i64,
    pub value: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeLeft {
    Short,
    Medium,
    Long,
    VeryLong,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TimeLeft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimeLeft::Short => "SHORT",
            TimeLeft::Medium => "MEDIUM",
            TimeLeft::Long => "LONG",
            TimeLeft::VeryLong => "VERY_LONG",
            TimeLeft::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Normalized records
// ---------------------------------------------------------------------------

/// One auction with its item reduced to a variant identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub auction_id: i64,
    pub variant: VariantKey,
    pub bid: i64,
    pub price: i64,
    pub quantity: i64,
    pub time_left: TimeLeft,
}

impl From<&Auction> for Listing {
    fn from(auction: &Auction) -> Self {
        Self {
            auction_id: auction.id,
            variant: VariantKey::from(&auction.item),
            bid: auction.bid,
            price: auction.price(),
            quantity: auction.quantity,
            time_left: auction.time_left,
        }
    }
}

/// A market value estimate for one item variant, ready to append.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketValueSample {
    pub shard_id: i64,
    pub item_variant_id: i64,
    pub market_value: f64,
    pub quantity: i64,
    pub sample_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auction_payload() {
        let raw = r#"{"auctions":[
            {"id":1,"item":{"id":19019,"context":3,"bonus_lists":[6654,1679],"modifiers":[{"type":9,"value":60}]},"buyout":250000,"bid":200000,"quantity":1,"time_left":"VERY_LONG"},
            {"id":2,"item":{"id":2589},"quantity":200,"unit_price":1500,"time_left":"SHORT"}
        ]}"#;
        let resp: AuctionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.auctions.len(), 2);

        let gear = &resp.auctions[0];
        assert_eq!(gear.item.modifiers.as_ref().unwrap()[0], Modifier { kind: 9, value: 60 });
        assert_eq!(gear.time_left, TimeLeft::VeryLong);
        assert_eq!(gear.price(), 250000);

        let commodity = &resp.auctions[1];
        assert_eq!(commodity.bid, 0);
        assert_eq!(commodity.price(), 1500);
    }

    #[test]
    fn unknown_time_left_does_not_fail_payload() {
        let raw = r#"{"id":7,"item":{"id":1},"quantity":1,"buyout":10,"time_left":"FOREVER"}"#;
        let auction: Auction = serde_json::from_str(raw).unwrap();
        assert_eq!(auction.time_left, TimeLeft::Unknown);
    }

    #[test]
    fn listing_takes_unit_price_over_buyout() {
        let auction = Auction {
            id: 10,
            item: RawItem { id: 5, ..Default::default() },
            buyout: 900,
            bid: 0,
            quantity: 3,
            time_left: TimeLeft::Long,
            unit_price: 300,
        };
        let listing = Listing::from(&auction);
        assert_eq!(listing.price, 300);
        assert_eq!(listing.quantity, 3);
        assert_eq!(listing.variant.item_id, 5);
    }

    #[test]
    fn missing_quantity_defaults_to_zero() {
        let raw = r#"{"auctions":[
            {"id":1,"item":{"id":2589},"unit_price":100,"time_left":"LONG"},
            {"id":2,"item":{"id":2589},"quantity":4,"unit_price":100,"time_left":"LONG"}
        ]}"#;
        let resp: AuctionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.auctions[0].quantity, 0);
        assert_eq!(resp.auctions[1].quantity, 4);
    }

    #[test]
    fn empty_payload_has_no_auctions() {
        let resp: AuctionsResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.auctions.is_empty());
    }
}
