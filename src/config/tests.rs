use std::io::Write;

use uuid::Uuid;

use super::*;

const USER: &str = "6f1c2a3b-0d4e-4f50-8a6b-7c8d9e0f1a2b";

#[test]
fn defaults_match_documented_intervals() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.counters.cart_poll, Duration::from_secs(10));
    assert_eq!(settings.counters.unread_poll, Duration::from_secs(5));
    assert_eq!(settings.counters.pending_orders_poll, Duration::from_secs(30));
    assert_eq!(settings.counters.delivery_orders_poll, Duration::from_secs(15));
    assert_eq!(settings.counters, CounterSettings::default());
    assert_eq!(settings.cart.stock_cap_debounce, Duration::from_millis(300));
    assert_eq!(settings.store.feed_capacity.get(), 256);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
}

#[test]
fn zero_poll_interval_is_rejected() {
    let mut raw = RawSettings::default();
    raw.counters.unread_poll_seconds = Some(0);

    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "counters.unread_poll_seconds"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn zero_feed_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.store.feed_capacity = Some(0);

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "store.feed_capacity",
            ..
        })
    ));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.counters.cart_poll_seconds = Some(20);
    raw.logging.level = Some("info".to_string());

    let overrides = WatchOverrides {
        logging: LoggingOverrides {
            log_level: Some("debug".to_string()),
            log_json: Some(true),
        },
        cart_poll_seconds: Some(2),
        ..Default::default()
    };

    raw.apply_watch_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.counters.cart_poll, Duration::from_secs(2));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn invalid_log_level_is_reported() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn parse_watch_arguments() {
    let args = CliArgs::parse_from([
        "harvestline",
        "watch",
        "--fixture",
        "/tmp/market.toml",
        "--user",
        USER,
        "--seconds",
        "30",
        "--unread-poll-seconds",
        "2",
    ]);

    match args.command {
        Command::Watch(watch) => {
            assert_eq!(watch.target.fixture, std::path::Path::new("/tmp/market.toml"));
            assert_eq!(watch.target.user, Uuid::parse_str(USER).unwrap());
            assert_eq!(watch.seconds, Some(30));
            assert_eq!(watch.overrides.unread_poll_seconds, Some(2));
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}

#[test]
fn parse_cart_arguments() {
    let args = CliArgs::parse_from([
        "harvestline",
        "cart",
        "--fixture",
        "market.toml",
        "--user",
        USER,
        "--log-json",
        "true",
    ]);

    match args.command {
        Command::Cart(cart) => {
            assert_eq!(cart.target.user, Uuid::parse_str(USER).unwrap());
            assert_eq!(cart.logging.log_json, Some(true));
        }
        other => panic!("wrong command parsed: {other:?}"),
    }
}

#[test]
fn config_file_layer_is_applied() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    writeln!(
        file,
        "[counters]\npending_orders_poll_seconds = 45\n\n[cart]\nstock_cap_debounce_ms = 50"
    )
    .expect("write config");

    let path = file.path().to_string_lossy().into_owned();
    let args = CliArgs::parse_from([
        "harvestline",
        "--config-file",
        path.as_str(),
        "cart",
        "--fixture",
        "market.toml",
        "--user",
        USER,
    ]);

    let settings = load(&args).expect("settings load");
    assert_eq!(settings.counters.pending_orders_poll, Duration::from_secs(45));
    assert_eq!(settings.cart.stock_cap_debounce, Duration::from_millis(50));
}
