//! Conversion between canonical `BASE/QUOTE` symbols and venue tickers.

const QUOTE_ASSETS: [&str; 3] = ["USDT", "USDC", "BUSD"];

/// `BTC/USDT` and `BTC/USDT:USDT` both become `BTCUSDT`.
#[must_use]
pub fn venue_symbol(symbol: &str) -> String {
    let pair = symbol.split(':').next().unwrap_or(symbol);
    pair.replace('/', "").to_ascii_uppercase()
}

/// `BTCUSDT` becomes `BTC/USDT`; unknown quote assets are returned unchanged.
#[must_use]
pub fn canonical_symbol(venue: &str) -> String {
    let upper = venue.to_ascii_uppercase();
    for quote in QUOTE_ASSETS {
        if let Some(base) = upper.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{base}/{quote}");
            }
        }
    }
    upper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_symbol() {
        assert_eq!(venue_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(venue_symbol("eth/usdt:USDT"), "ETHUSDT");
        assert_eq!(venue_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn test_canonical_symbol() {
        assert_eq!(canonical_symbol("BTCUSDT"), "BTC/USDT");
        assert_eq!(canonical_symbol("1000PEPEUSDC"), "1000PEPE/USDC");
        assert_eq!(canonical_symbol("BTCDOMEUR"), "BTCDOMEUR");
    }

    #[test]
    fn test_round_trip_of_configured_symbols() {
        for symbol in ["BTC/USDT", "ETH/USDT", "BNB/USDT", "SOL/USDT", "DOGE/USDT"] {
            assert_eq!(canonical_symbol(&venue_symbol(symbol)), symbol);
        }
    }
}
