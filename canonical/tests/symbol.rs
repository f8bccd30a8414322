use canonical::symbol::{exchange_alias, load_from_path, normalize_symbol, Pair};

#[test]
fn parse_accepts_common_separators() {
    for raw in ["BTC/USDT", "btc-usdt", "BTC_USDT", "BTCUSDT", "BTC-USDT-SWAP"] {
        let pair = Pair::parse(raw).unwrap();
        assert_eq!(pair, Pair::new("BTC", "USDT"), "{raw}");
    }
    assert_eq!(Pair::parse("ETHBTC").unwrap().to_string(), "ETH/BTC");
    assert_eq!(Pair::parse("BTCUSD_PERP").unwrap(), Pair::new("BTC", "USD"));
    assert_eq!(Pair::parse("ETHUSD_240628").unwrap(), Pair::new("ETH", "USD"));
    assert!(Pair::parse("BTC").is_err());
    assert!(Pair::parse("/USDT").is_err());
}

#[test]
fn normalize_and_alias_lookup() {
    // Prepare a temporary file with minimal symbol table
    let mut path = std::env::temp_dir();
    path.push(format!(
        "symbols_{}.json",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));

    let data = r#"
        [
            {
                "id": "BTC/USDT",
                "aliases": { "kucoin_futures": ["XBTUSDTM"] }
            }
        ]
    "#;

    std::fs::write(&path, data).unwrap();

    load_from_path(path.to_str().unwrap()).unwrap();
    assert_eq!(normalize_symbol("kucoin_futures", "XBTUSDTM"), "BTC/USDT");
    assert_eq!(normalize_symbol("binance", "ETHUSDT"), "ETH/USDT");
    assert_eq!(
        exchange_alias("kucoin_futures", &Pair::new("BTC", "USDT")).as_deref(),
        Some("XBTUSDTM")
    );
    assert!(exchange_alias("binance", &Pair::new("BTC", "USDT")).is_none());

    // Clean up temporary file
    let _ = std::fs::remove_file(path);
}
