//! The closed set of WebSocket topic identifiers and the static bijection
//! between channel prefixes and topics. Grounded on the general
//! enum-with-`as_str`/`from_str` idiom used throughout `arkin-core`'s
//! domain types.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    MarketData,
    MarketHistory,
    AccountSummary,
    AccountLedger,
    PriceLadder,
    Orders,
    ProfitAndLoss,
    Trades,
    AccountUpdates,
    Authentication,
    Bulletins,
    Error,
    System,
    Notifications,
}

impl Topic {
    /// The channel prefix that routes to this topic (everything before an
    /// optional `+<suffix>` in the wire `topic` field).
    pub fn prefix(&self) -> &'static str {
        match self {
            Topic::MarketData => "md",
            Topic::MarketHistory => "mh",
            Topic::AccountSummary => "sd",
            Topic::AccountLedger => "ld",
            Topic::PriceLadder => "bd",
            Topic::Orders => "or",
            Topic::ProfitAndLoss => "pl",
            Topic::Trades => "tr",
            Topic::AccountUpdates => "act",
            Topic::Authentication => "sts",
            Topic::Bulletins => "blt",
            Topic::Error => "error",
            Topic::System => "system",
            Topic::Notifications => "ntf",
        }
    }

    /// Whether this topic is only ever server-initiated ("unsolicited")
    /// and therefore queued only if the caller opted in via
    /// `unsolicited_channels_to_be_queued`.
    pub fn is_unsolicited(&self) -> bool {
        matches!(
            self,
            Topic::Authentication | Topic::Bulletins | Topic::Error | Topic::System | Topic::Notifications
        )
    }

    pub const ALL: [Topic; 14] = [
        Topic::MarketData,
        Topic::MarketHistory,
        Topic::AccountSummary,
        Topic::AccountLedger,
        Topic::PriceLadder,
        Topic::Orders,
        Topic::ProfitAndLoss,
        Topic::Trades,
        Topic::AccountUpdates,
        Topic::Authentication,
        Topic::Bulletins,
        Topic::Error,
        Topic::System,
        Topic::Notifications,
    ];

    /// Resolves the channel string's prefix (the part before an optional
    /// `+<suffix>`) to a topic. Returns `None` for prefixes outside the
    /// closed set.
    pub fn from_channel(channel: &str) -> Option<Topic> {
        let prefix = channel.split('+').next().unwrap_or(channel);
        Topic::ALL.into_iter().find(|t| t.prefix() == prefix)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_data_channel_with_suffix_resolves_to_market_data_topic() {
        assert_eq!(Topic::from_channel("md+265598"), Some(Topic::MarketData));
    }

    #[test]
    fn bare_prefix_without_suffix_resolves() {
        assert_eq!(Topic::from_channel("system"), Some(Topic::System));
    }

    #[test]
    fn unknown_prefix_resolves_to_none() {
        assert_eq!(Topic::from_channel("zz+1"), None);
    }

    #[test]
    fn unsolicited_topics_are_flagged() {
        assert!(Topic::Bulletins.is_unsolicited());
        assert!(!Topic::MarketData.is_unsolicited());
    }

    #[test]
    fn every_topic_has_a_distinct_prefix() {
        let mut prefixes: Vec<&str> = Topic::ALL.iter().map(|t| t.prefix()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), Topic::ALL.len());
    }
}
