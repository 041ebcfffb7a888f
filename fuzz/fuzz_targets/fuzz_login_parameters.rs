#![no_main]

use polld_core::entities::{LoginParameters, UiPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|pairs: Vec<(String, String)>| {
    let parameters = LoginParameters::from_pairs(pairs.clone());

    // The OAuth 2 names always win over the OAuth 1 names.
    let lookup = |name: &str| pairs.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.clone());
    let expected_id = lookup(LoginParameters::CLIENT_ID).or_else(|| lookup(LoginParameters::CONSUMER_KEY));
    assert_eq!(parameters.client_id, expected_id);

    // Whatever the directory says, the caller's policy is the one sent.
    let flattened = parameters
        .with_ui_policy(UiPolicy::NoUserInteraction)
        .to_map();
    assert_eq!(flattened.get(LoginParameters::UI_POLICY).map(String::as_str), Some("2"));
});
