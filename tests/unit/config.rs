use nods::config::{apply_env_overrides, expand_tilde, resolve_database_url, Config};

#[test]
fn test_default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 8800);
    assert_eq!(cfg.auth.otp_ttl_minutes, 10);
    assert!(cfg.auth.otp_webhook_url.is_none());
    assert_eq!(cfg.carrier.base_url, "https://api.twilio.com");
    assert_eq!(cfg.carrier.rate_per_second, 1.0);
    assert_eq!(cfg.carrier.burst, 1);
    assert!(cfg.carrier.account_sid.is_none());
    assert_eq!(cfg.http.timeout_seconds, 30);
}

#[test]
fn test_default_database_config() {
    let cfg = Config::default();
    assert!(cfg.database.url.is_none());
    assert_eq!(cfg.database.sqlite_path, "~/.nods/state.sqlite");
}

#[test]
fn test_default_receipt_endpoints() {
    let cfg = Config::default();
    assert!(cfg.receipts.apple_url.starts_with("https://buy.itunes.apple.com"));
    assert!(cfg.receipts.apple_sandbox_url.starts_with("https://sandbox.itunes.apple.com"));
    assert!(cfg.receipts.google_access_token.is_none());
}

#[test]
fn test_partial_config_file_keeps_defaults() {
    let raw = r#"{"server": {"port": 9000}, "carrier": {
        "account_sid": "AC1", "auth_token": "t", "from_number": "+15550000000"}}"#;
    let cfg: Config = serde_json::from_str(raw).unwrap();
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.carrier.account_sid.as_deref(), Some("AC1"));
    assert_eq!(cfg.carrier.from_number.as_deref(), Some("+15550000000"));
    assert_eq!(cfg.carrier.base_url, "https://api.twilio.com");
    assert_eq!(cfg.carrier.rate_per_second, 1.0);
    assert_eq!(cfg.carrier.burst, 1);
    assert_eq!(cfg.database.sqlite_path, "~/.nods/state.sqlite");
    assert_eq!(cfg.stripe.base_url, "https://api.stripe.com");
}

#[test]
fn test_partial_receipts_section() {
    let cfg: Config = serde_json::from_str(r#"{"receipts": {"google_access_token": "ya29"}}"#).unwrap();
    assert_eq!(cfg.receipts.google_access_token.as_deref(), Some("ya29"));
    assert!(cfg.receipts.apple_url.starts_with("https://buy.itunes.apple.com"));
    assert_eq!(cfg.auth.otp_ttl_minutes, 10);
}

#[test]
fn test_expand_tilde() {
    let expanded = expand_tilde("~/nods/state.sqlite");
    assert!(!expanded.to_string_lossy().starts_with('~'));
    assert!(expanded.to_string_lossy().ends_with("nods/state.sqlite"));

    let absolute = expand_tilde("/var/lib/nods.sqlite");
    assert_eq!(absolute.to_string_lossy(), "/var/lib/nods.sqlite");
}

#[test]
fn test_resolve_database_url_prefers_explicit_url() {
    let mut cfg = Config::default();
    cfg.database.url = Some("postgres://localhost/nods".to_string());
    assert_eq!(resolve_database_url(&cfg), "postgres://localhost/nods");
}

#[test]
fn test_resolve_database_url_sqlite_path() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut cfg = Config::default();
    cfg.database.sqlite_path = dir.path().join("sub/state.sqlite").to_string_lossy().to_string();
    let url = resolve_database_url(&cfg);
    assert!(url.starts_with("sqlite://"));
    assert!(url.ends_with("state.sqlite?mode=rwc"));
    assert!(dir.path().join("sub").exists());
}

// Only this test touches these variables, so parallel tests do not race on them.
#[test]
fn test_env_overrides() {
    std::env::set_var("TWILIO_ACCOUNT_SID", "AC_env");
    std::env::set_var("STRIPE_SECRET_KEY", "sk_env");
    std::env::set_var("PORT", "9911");

    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);

    std::env::remove_var("TWILIO_ACCOUNT_SID");
    std::env::remove_var("STRIPE_SECRET_KEY");
    std::env::remove_var("PORT");

    assert_eq!(cfg.carrier.account_sid.as_deref(), Some("AC_env"));
    assert_eq!(cfg.stripe.secret_key.as_deref(), Some("sk_env"));
    assert_eq!(cfg.server.port, 9911);
}
