//! `Settings::from_env` reads the real process environment, so these run
//! one at a time.

use ai_snapper_lib::config::{Settings, API_KEY_VAR, BASE_URL_VAR, DEFAULT_BASE_URL, MODEL_VAR};
use serial_test::serial;

fn clear() {
    for var in [API_KEY_VAR, MODEL_VAR, BASE_URL_VAR] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn reads_process_environment() {
    clear();
    std::env::set_var(API_KEY_VAR, "sk-from-env");
    std::env::set_var(MODEL_VAR, "gpt-4o-mini");

    let settings = Settings::from_env();
    assert_eq!(settings.api_key.as_deref(), Some("sk-from-env"));
    assert_eq!(settings.default_model(), "gpt-4o-mini");
    assert_eq!(settings.base_url, DEFAULT_BASE_URL);
    clear();
}

#[test]
#[serial]
fn unset_key_is_none() {
    clear();
    std::env::set_var(API_KEY_VAR, "");

    let settings = Settings::from_env();
    assert!(settings.api_key.is_none());
    assert_eq!(settings.default_model(), "gpt-4o");
    clear();
}
