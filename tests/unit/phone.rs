use nods::phone::{
    already_international, clean, north_america_ten_digit, normalize, normalize_with, pk_trunk_prefixed, PhoneRule,
};

#[test]
fn test_pk_trunk_prefixed() {
    assert_eq!(normalize("0301-2345678"), "+923012345678");
}

#[test]
fn test_pk_mobile_bare() {
    assert_eq!(normalize("3001234567"), "+923001234567");
}

#[test]
fn test_north_america_ten_digit() {
    assert_eq!(normalize("5551234567"), "+15551234567");
    assert_eq!(normalize("(555) 123-4567"), "+15551234567");
}

#[test]
fn test_pk_country_code_without_plus() {
    assert_eq!(normalize("923001234567"), "+923001234567");
}

#[test]
fn test_already_international_kept() {
    assert_eq!(normalize("+44 7700 900123"), "+447700900123");
}

#[test]
fn test_unrecognized_returns_cleaned() {
    assert_eq!(normalize("0044 12"), "004412");
    assert_eq!(normalize(""), "");
}

#[test]
fn test_idempotent_on_international_numbers() {
    for raw in ["+923012345678", "+1 555 123 4567", "+44-7700-900123"] {
        let once = normalize(raw);
        assert_eq!(normalize(&once), once);
    }
}

#[test]
fn test_idempotent_after_any_rule_fires() {
    for raw in ["0301-2345678", "3001234567", "5551234567", "923001234567"] {
        let once = normalize(raw);
        assert!(once.starts_with('+'));
        assert_eq!(normalize(&once), once);
    }
}

#[test]
fn test_clean_removes_only_formatting() {
    assert_eq!(clean("+1 (555) 123-4567"), "+15551234567");
    assert_eq!(clean("555.123"), "555.123");
}

#[test]
fn test_rule_table_is_ordered() {
    // Without the Pakistani mobile rule a bare 3XXXXXXXXX falls through to +1.
    let rules: &[PhoneRule] = &[already_international, pk_trunk_prefixed, north_america_ten_digit];
    assert_eq!(normalize_with(rules, "3001234567"), "+13001234567");
}
