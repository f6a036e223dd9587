//! KPI records, endpoint ownership and the display-order merge.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Display priority of the dashboard grid.
pub const KPI_ORDER: [&str; 10] = [
    "patient-revisit-rate",
    "payroll-expense",
    "geographic-distribution",
    "total-patient-spending",
    "consultant-revenue",
    "employee-salary",
    "insurance-claims",
    "bed-occupancy",
    "employee-attendance",
    "medicine-waste",
];

/// Which KPI ids each endpoint produces.
pub const ENDPOINT_KPIS: [(&str, &[&str]); 10] = [
    ("mhpl0001", &["patient-revisit-rate"]),
    ("mhpl0002", &["payroll-expense"]),
    ("mhpl0003", &["geographic-distribution"]),
    ("mhpl0004", &["total-patient-spending"]),
    ("mhpl0005", &["consultant-revenue"]),
    ("mhpl0006", &["insurance-claims"]),
    ("mhpl0007", &["bed-occupancy"]),
    ("mhpl0008", &["employee-attendance"]),
    ("mhpl0009", &["medicine-waste"]),
    ("mhpl0010", &["employee-salary"]),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiRecord {
    pub id: String,
    pub title: String,
    /// Either a number or an already formatted string such as `"82%"`.
    pub value: Value,
    pub color: String,
    pub endpoint_id: String,
    #[serde(default)]
    pub local_filters: Vec<LocalFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<KpiAlert>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hover_data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

impl KpiRecord {
    pub fn new(id: &str, title: &str, value: Value, color: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            value,
            color: color.to_string(),
            endpoint_id: endpoint_of(id).unwrap_or_default().to_string(),
            local_filters: Vec::new(),
            alert: None,
            hover_data: BTreeMap::new(),
            trend: None,
        }
    }

    pub fn hover(mut self, label: &str, value: impl Into<String>) -> Self {
        self.hover_data.insert(label.to_string(), value.into());
        self
    }

    pub fn filter(mut self, label: &str, value: impl Into<String>) -> Self {
        self.local_filters.push(LocalFilter {
            label: label.to_string(),
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFilter {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiAlert {
    pub message: String,
    pub threshold: f64,
    pub current_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
}

/// Month-over-month change in percent (absolute value) and its direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub change: f64,
    pub trend: TrendDirection,
}

// ------------------------------------------------------------------ //
//  Ownership lookups                                                  //
// ------------------------------------------------------------------ //

pub fn kpis_for(endpoint_id: &str) -> &'static [&'static str] {
    ENDPOINT_KPIS
        .iter()
        .find(|(id, _)| *id == endpoint_id)
        .map(|(_, kpis)| *kpis)
        .unwrap_or(&[])
}

pub fn endpoint_of(kpi_id: &str) -> Option<&'static str> {
    ENDPOINT_KPIS
        .iter()
        .find(|(_, kpis)| kpis.contains(&kpi_id))
        .map(|(id, _)| *id)
}

/// Only ids with a slot in [`KPI_ORDER`] are ever shown.
pub fn is_known(kpi_id: &str) -> bool {
    KPI_ORDER.contains(&kpi_id)
}

fn priority(kpi_id: &str) -> usize {
    KPI_ORDER
        .iter()
        .position(|id| *id == kpi_id)
        .unwrap_or(KPI_ORDER.len())
}

// ------------------------------------------------------------------ //
//  Merge                                                              //
// ------------------------------------------------------------------ //

/// Keep known ids only, one record per id (the last one seen), ordered by
/// [`KPI_ORDER`].
pub fn sort_and_filter(records: Vec<KpiRecord>) -> Vec<KpiRecord> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<KpiRecord> = Vec::with_capacity(records.len());
    for record in records.into_iter().filter(|r| is_known(&r.id)) {
        match slots.get(&record.id) {
            Some(&i) => unique[i] = record,
            None => {
                slots.insert(record.id.clone(), unique.len());
                unique.push(record);
            }
        }
    }
    unique.sort_by_key(|r| priority(&r.id));
    unique
}

/// Replace every record whose id is in `replaced` with `fresh`, leave the
/// rest alone, then re-sort.
pub fn splice(current: &[KpiRecord], replaced: &HashSet<String>, fresh: Vec<KpiRecord>) -> Vec<KpiRecord> {
    let kept = current
        .iter()
        .filter(|r| !replaced.contains(&r.id))
        .cloned();
    sort_and_filter(kept.chain(fresh).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(id: &str, v: i64) -> KpiRecord {
        KpiRecord::new(id, id, json!(v), "blue")
    }

    fn ids(records: &[KpiRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn ownership() {
        assert_eq!(kpis_for("mhpl0002"), ["payroll-expense"]);
        assert_eq!(endpoint_of("bed-occupancy"), Some("mhpl0007"));
        assert_eq!(endpoint_of("nope"), None);
        assert!(kpis_for("mhplXXXX").is_empty());
    }

    #[test]
    fn every_owned_id_has_a_display_slot() {
        let owned: Vec<&str> = ENDPOINT_KPIS.iter().flat_map(|(_, kpis)| kpis.iter().copied()).collect();
        assert_eq!(owned.len(), KPI_ORDER.len());
        assert!(owned.iter().all(|id| is_known(id)));
        assert!(KPI_ORDER.iter().all(|id| endpoint_of(id).is_some()));
    }

    #[test]
    fn order_follows_priority_regardless_of_input() {
        let out = sort_and_filter(vec![
            rec("medicine-waste", 1),
            rec("bed-occupancy", 2),
            rec("patient-revisit-rate", 3),
        ]);
        assert_eq!(ids(&out), ["patient-revisit-rate", "bed-occupancy", "medicine-waste"]);
    }

    #[test]
    fn duplicates_keep_the_latest_record() {
        let out = sort_and_filter(vec![rec("bed-occupancy", 1), rec("bed-occupancy", 2)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, json!(2));
    }

    #[test]
    fn ids_outside_the_display_order_are_dropped() {
        let out = sort_and_filter(vec![
            rec("total-allowance", 1),
            rec("mystery", 1),
            rec("total-salary", 1),
            rec("payroll-expense", 1),
        ]);
        assert_eq!(ids(&out), ["payroll-expense"]);
    }

    #[test]
    fn splice_replaces_only_target_ids() {
        let current = vec![rec("bed-occupancy", 1), rec("medicine-waste", 1)];
        let replaced: HashSet<String> = ["bed-occupancy".to_string()].into();
        let out = splice(&current, &replaced, vec![rec("bed-occupancy", 9)]);
        assert_eq!(ids(&out), ["bed-occupancy", "medicine-waste"]);
        assert_eq!(out[0].value, json!(9));
    }

    #[test]
    fn splice_removes_ids_the_endpoint_no_longer_produces() {
        let current = vec![rec("payroll-expense", 1), rec("bed-occupancy", 1)];
        let replaced: HashSet<String> = kpis_for("mhpl0002").iter().map(|s| s.to_string()).collect();
        let out = splice(&current, &replaced, Vec::new());
        assert_eq!(ids(&out), ["bed-occupancy"]);
    }

    #[test]
    fn record_round_trips_through_json() {
        let r = rec("bed-occupancy", 80).filter("Threshold", "70%").hover("Total Beds", "120");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["endpointId"], "mhpl0007");
        assert_eq!(v["localFilters"][0]["label"], "Threshold");
        let back: KpiRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }
}
