//! Layered JSON configuration.
//!
//! Layers are folded left to right: objects merge key by key, recursively, and anything else
//! (scalars, arrays, null) from a later layer replaces what was there.

use serde_json::{json, Map, Value};

pub type ConfigLayer = Map<String, Value>;

pub const STRATEGY_PARAMS_KEY: &str = "strategy_params";
pub const DEFAULT_PAIR: &str = "BTC/USDT";
pub const DEFAULT_MAX_OPEN_TRADES: i64 = 5;
/// The engine's "no limit" value for `max_open_trades`.
pub const UNLIMITED_OPEN_TRADES: i64 = -1;

pub fn merge_layers<I>(layers: I) -> ConfigLayer
where
    I: IntoIterator<Item = ConfigLayer>,
{
    let mut merged = ConfigLayer::new();
    for layer in layers {
        merge_into(&mut merged, layer);
    }
    merged
}

fn merge_into(target: &mut ConfigLayer, layer: ConfigLayer) {
    for (key, value) in layer {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming)
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Pulls the nested `strategy_params` object out of a user layer so it can be applied as a
/// layer of its own. Non-object values are dropped.
pub fn take_strategy_params(user: &mut ConfigLayer) -> ConfigLayer {
    match user.remove(STRATEGY_PARAMS_KEY) {
        Some(Value::Object(params)) => params,
        _ => ConfigLayer::new(),
    }
}

/// Defaults that keep a merged config launchable even when the layers left gaps.
///
/// `fallback` is consulted, in order, for a usable `max_open_trades` and, with a
/// `StaticPairList`, for a `pairs` list to seed an empty whitelist.
pub fn apply_safety_defaults(config: &mut ConfigLayer, fallback: &[&ConfigLayer]) {
    if !has_valid_pairlists(config.get("pairlists")) {
        config.insert("pairlists".to_string(), json!([{ "method": "StaticPairList" }]));
    }

    let whitelist_missing = !config
        .get("exchange")
        .and_then(|exchange| exchange.get("pair_whitelist"))
        .map(is_non_empty_array)
        .unwrap_or(false);
    if whitelist_missing {
        let static_pairlist = config
            .get("pairlists")
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("method"))
            .and_then(Value::as_str)
            == Some("StaticPairList");
        let pairs = std::iter::once(&*config)
            .chain(fallback.iter().copied())
            .filter(|_| static_pairlist)
            .filter_map(|layer| layer.get("pairs"))
            .find(|pairs| is_non_empty_array(pairs))
            .cloned()
            .unwrap_or_else(|| json!([DEFAULT_PAIR]));

        let exchange = config
            .entry("exchange")
            .or_insert_with(|| Value::Object(Map::new()));
        if !exchange.is_object() {
            *exchange = Value::Object(Map::new());
        }
        if let Value::Object(exchange) = exchange {
            exchange.insert("pair_whitelist".to_string(), pairs);
        }
    }

    let max_open_trades = std::iter::once(&*config)
        .chain(fallback.iter().copied())
        .filter_map(|layer| layer.get("max_open_trades"))
        .find_map(normalize_max_open_trades)
        .unwrap_or(DEFAULT_MAX_OPEN_TRADES);
    config.insert("max_open_trades".to_string(), json!(max_open_trades));

    if !config.get("entry_pricing").map(Value::is_object).unwrap_or(false) {
        config.insert(
            "entry_pricing".to_string(),
            json!({
                "price_side": "same",
                "use_order_book": false,
                "order_book_top": 1,
                "price_last_balance": 0.0,
                "check_depth_of_market": { "enabled": false, "bids_to_ask_delta": 1 }
            }),
        );
    }
    if !config.get("exit_pricing").map(Value::is_object).unwrap_or(false) {
        config.insert(
            "exit_pricing".to_string(),
            json!({
                "price_side": "same",
                "use_order_book": false,
                "order_book_top": 1
            }),
        );
    }
}

fn has_valid_pairlists(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Array(items)) if !items.is_empty() => items.iter().all(|item| {
            item.get("method")
                .and_then(Value::as_str)
                .map(|method| !method.trim().is_empty())
                .unwrap_or(false)
        }),
        _ => false,
    }
}

fn is_non_empty_array(value: &Value) -> bool {
    value.as_array().map(|a| !a.is_empty()).unwrap_or(false)
}

/// Positive integers are kept, `-1` and `"unlimited"` mean no limit, anything else is unusable.
pub fn normalize_max_open_trades(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .filter(|v| *v > 0 || *v == UNLIMITED_OPEN_TRADES),
        Value::String(s) if s.trim().eq_ignore_ascii_case("unlimited") => {
            Some(UNLIMITED_OPEN_TRADES)
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|v| *v > 0 || *v == UNLIMITED_OPEN_TRADES),
        _ => None,
    }
}
