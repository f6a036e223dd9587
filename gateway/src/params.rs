//! Parameter normalization and per-endpoint defaulting.
//!
//! Callers send loosely typed key/value pairs; the upstream expects a flat
//! set of non-empty string headers with endpoint-specific names. Both
//! passes are pure so they can be tested without a server.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use contract::clock::{format_ymd, month_start};
use serde_json::{Map, Value};

pub type ParamSet = BTreeMap<String, String>;

/// Endpoints whose upstream reports spell paging keys in snake case.
const SNAKE_PAGING: [&str; 2] = ["mhpl0005", "mhpl0006"];

/// Fallback value per endpoint for a key the caller left out.
const ENDPOINT_DEFAULTS: [(&str, &str, &str); 5] = [
    ("mhpl0003", "PatCat", "IPD"),
    ("mhpl0004", "PatCat", "IPD,OPD"),
    ("mhpl0005", "ServiceTypes", "IPD"),
    ("mhpl0006", "InsuranceProviders", "MetLife Alico"),
    ("mhpl0007", "Threshold", "70"),
];

/// Drop empty values, apply paging aliases and the zero-page-size rule,
/// then stringify everything that is left.
pub fn normalize(endpoint_id: &str, raw: &Map<String, Value>) -> ParamSet {
    let mut out: ParamSet = raw
        .iter()
        .filter_map(|(k, v)| stringify(v).map(|s| (k.clone(), s)))
        .collect();

    let (size_key, number_key) = if SNAKE_PAGING.contains(&endpoint_id) {
        rename_if_absent(&mut out, "PageSize", "Page_Size");
        rename_if_absent(&mut out, "PageNumber", "Page_Number");
        ("Page_Size", "Page_Number")
    } else {
        ("PageSize", "PageNumber")
    };

    // A page size of zero means "all rows, unpaged".
    if out.get(size_key).is_some_and(|v| v.parse::<f64>() == Ok(0.0)) {
        out.remove(size_key);
        out.remove(number_key);
    }

    out
}

/// Fill in missing dates (independently) and endpoint-specific fallbacks.
pub fn apply_defaults(endpoint_id: &str, mut params: ParamSet, today: NaiveDate) -> ParamSet {
    if is_blank(params.get("StartDate")) {
        params.insert("StartDate".into(), format_ymd(month_start(today)));
    }
    if is_blank(params.get("EndDate")) {
        params.insert("EndDate".into(), format_ymd(today));
    }

    for (_, key, value) in ENDPOINT_DEFAULTS.iter().filter(|(id, ..)| *id == endpoint_id) {
        if is_blank(params.get(*key)) {
            params.insert((*key).to_string(), (*value).to_string());
        }
    }

    params
}

/// Both passes, in order.
pub fn prepare(endpoint_id: &str, raw: &Map<String, Value>, today: NaiveDate) -> ParamSet {
    apply_defaults(endpoint_id, normalize(endpoint_id, raw), today)
}

fn stringify(value: &Value) -> Option<String> {
    let s = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(stringify)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    };
    (!s.is_empty()).then_some(s)
}

fn rename_if_absent(params: &mut ParamSet, from: &str, to: &str) {
    if params.contains_key(to) {
        return;
    }
    if let Some(v) = params.remove(from) {
        params.insert(to.to_string(), v);
    }
}

fn is_blank(value: Option<&String>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn mid_march() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    #[test]
    fn drops_null_and_blank_values() {
        let out = normalize(
            "mhpl0001",
            &raw(json!({"PatCat": null, "Dept": "   ", "Division": " Dhaka "})),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out["Division"], "Dhaka");
    }

    #[test]
    fn stringifies_scalars_and_lists() {
        let out = normalize(
            "mhpl0001",
            &raw(json!({"PageSize": 10, "Flag": true, "PatCat": ["IPD", "OPD"]})),
        );
        assert_eq!(out["PageSize"], "10");
        assert_eq!(out["Flag"], "true");
        assert_eq!(out["PatCat"], "IPD,OPD");
    }

    #[test]
    fn snake_case_paging_alias() {
        let out = normalize("mhpl0005", &raw(json!({"PageSize": 5, "PageNumber": 2})));
        assert_eq!(out.get("Page_Size").map(String::as_str), Some("5"));
        assert_eq!(out.get("Page_Number").map(String::as_str), Some("2"));
        assert!(!out.contains_key("PageSize"));
    }

    #[test]
    fn existing_snake_key_wins_over_alias() {
        let out = normalize("mhpl0006", &raw(json!({"PageSize": 5, "Page_Size": 20})));
        assert_eq!(out["Page_Size"], "20");
        assert_eq!(out["PageSize"], "5");
    }

    #[test]
    fn zero_page_size_drops_paging_on_aliased_endpoints() {
        for id in SNAKE_PAGING {
            for size in [json!(0), json!("0")] {
                let out = normalize(id, &raw(json!({"PageSize": size, "PageNumber": 3})));
                assert!(!out.contains_key("Page_Size"), "{id}");
                assert!(!out.contains_key("Page_Number"), "{id}");
                assert!(!out.contains_key("PageSize"), "{id}");
                assert!(!out.contains_key("PageNumber"), "{id}");
            }
        }
    }

    #[test]
    fn fractional_zero_page_size_counts_as_zero() {
        for size in [json!(0.0), json!("0.0"), json!("-0")] {
            let out = normalize("mhpl0007", &raw(json!({"PageSize": size, "PageNumber": 2})));
            assert!(!out.contains_key("PageSize"));
            assert!(!out.contains_key("PageNumber"));
        }

        let out = normalize("mhpl0007", &raw(json!({"PageSize": 0.5, "PageNumber": 2})));
        assert_eq!(out["PageSize"], "0.5");
        assert_eq!(out["PageNumber"], "2");
    }

    #[test]
    fn zero_page_size_on_other_endpoints_uses_original_names() {
        let out = normalize("mhpl0009", &raw(json!({"PageSize": "0", "PageNumber": 1})));
        assert!(out.is_empty());

        let out = normalize("mhpl0009", &raw(json!({"Page_Size": "0", "Page_Number": 1})));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn bed_occupancy_scenario() {
        let out = prepare("mhpl0007", &raw(json!({"PageSize": 0, "PageNumber": 1})), mid_march());
        assert_eq!(out["Threshold"], "70");
        assert!(!out.contains_key("PageSize"));
        assert!(!out.contains_key("PageNumber"));
    }

    #[test]
    fn dates_default_to_month_to_date() {
        let out = apply_defaults("mhpl0001", ParamSet::new(), mid_march());
        assert_eq!(out["StartDate"], "2025-03-01");
        assert_eq!(out["EndDate"], "2025-03-15");
    }

    #[test]
    fn dates_default_independently() {
        let mut only_start = ParamSet::new();
        only_start.insert("StartDate".into(), "2024-01-01".into());
        let out = apply_defaults("mhpl0001", only_start, mid_march());
        assert_eq!(out["StartDate"], "2024-01-01");
        assert_eq!(out["EndDate"], "2025-03-15");

        let mut only_end = ParamSet::new();
        only_end.insert("EndDate".into(), "2024-01-31".into());
        let out = apply_defaults("mhpl0001", only_end, mid_march());
        assert_eq!(out["StartDate"], "2025-03-01");
        assert_eq!(out["EndDate"], "2024-01-31");
    }

    #[test]
    fn endpoint_fallbacks_only_fill_missing_keys() {
        let cases = [
            ("mhpl0003", "PatCat", "IPD"),
            ("mhpl0004", "PatCat", "IPD,OPD"),
            ("mhpl0005", "ServiceTypes", "IPD"),
            ("mhpl0006", "InsuranceProviders", "MetLife Alico"),
            ("mhpl0007", "Threshold", "70"),
        ];
        for (id, key, expected) in cases {
            let out = apply_defaults(id, ParamSet::new(), mid_march());
            assert_eq!(out[key], expected, "{id}");
        }

        let mut given = ParamSet::new();
        given.insert("PatCat".into(), "OPD".into());
        assert_eq!(apply_defaults("mhpl0004", given, mid_march())["PatCat"], "OPD");
    }

    #[test]
    fn endpoints_without_fallbacks_get_dates_only() {
        let out = apply_defaults("mhpl0010", ParamSet::new(), mid_march());
        assert_eq!(out.len(), 2);
    }
}
