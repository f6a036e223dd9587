//! Global filter state and per-endpoint request parameters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::NaiveDate;
use contract::clock::{default_date_range, format_ymd, month_start};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::overrides::{OverrideStore, ParamMap};

/// Dashboard-wide filters shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFilters {
    pub start_date: String,
    pub end_date: String,
    pub page_number: String,
    pub page_size: String,
    pub patient_category: Vec<String>,
    pub divisions: Vec<String>,
    pub districts: Vec<String>,
    pub spending_categories: Vec<String>,
    pub departments: Vec<String>,
    pub employee_types: Vec<String>,
    pub medicine_categories: Vec<String>,
    pub summary_types: Vec<String>,
    pub service_types: Vec<String>,
    pub consultants: Vec<String>,
    pub medicine_name: String,
}

impl GlobalFilters {
    /// Month-to-date window, first page of ten, monthly summaries.
    pub fn for_today(today: NaiveDate) -> Self {
        let (start_date, end_date) = default_date_range(today);
        Self {
            start_date,
            end_date,
            page_number: "1".into(),
            page_size: "10".into(),
            patient_category: Vec::new(),
            divisions: Vec::new(),
            districts: Vec::new(),
            spending_categories: Vec::new(),
            departments: Vec::new(),
            employee_types: Vec::new(),
            medicine_categories: Vec::new(),
            summary_types: vec!["Monthly".into()],
            service_types: Vec::new(),
            consultants: Vec::new(),
            medicine_name: String::new(),
        }
    }

    /// Parameters each endpoint takes from the global filters.
    pub fn base_params(&self, endpoint_id: &str) -> ParamMap {
        let dates = [
            ("StartDate", self.start_date.clone()),
            ("EndDate", self.end_date.clone()),
        ];
        let paging = [
            ("PageNumber", self.page_number.clone()),
            ("PageSize", self.page_size.clone()),
        ];
        let pairs: Vec<(&str, String)> = match endpoint_id {
            "mhpl0002" | "mhpl0003" | "mhpl0004" | "mhpl0006" | "mhpl0007" => dates.to_vec(),
            "mhpl0005" => [dates.as_slice(), paging.as_slice()]
                .concat()
                .into_iter()
                .chain([
                    ("ServiceTypes", self.service_types.join(",")),
                    ("Consultants", self.consultants.join(",")),
                    ("Page_Number", self.page_number.clone()),
                    ("Page_Size", self.page_size.clone()),
                ])
                .collect(),
            "mhpl0008" => [dates.as_slice(), paging.as_slice()].concat(),
            "mhpl0009" => [dates.as_slice(), paging.as_slice()]
                .concat()
                .into_iter()
                .chain([
                    ("medicine_categories", self.medicine_categories.join(",")),
                    ("medicine_name", self.medicine_name.clone()),
                ])
                .collect(),
            "mhpl0010" => [dates.as_slice(), paging.as_slice()]
                .concat()
                .into_iter()
                .chain([
                    ("Departments", self.departments.join(",")),
                    ("EmpType", self.employee_types.join(",")),
                    ("SummType", self.summary_types.join(",")),
                ])
                .collect(),
            _ => [dates.as_slice(), paging.as_slice()]
                .concat()
                .into_iter()
                .chain([
                    ("PatCat", self.patient_category.join(",")),
                    ("Division", self.divisions.join(",")),
                    ("District", self.districts.join(",")),
                    ("SpendCat", self.spending_categories.join(",")),
                    ("Dept", self.departments.join(",")),
                    ("EmpType", self.employee_types.join(",")),
                ])
                .collect(),
        };
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

// ------------------------------------------------------------------ //
//  FilterStore                                                        //
// ------------------------------------------------------------------ //

/// Shared global filters plus a "presets loaded" flag the orchestrator
/// waits on (bounded) before a full load.
#[derive(Debug)]
pub struct FilterStore {
    filters: RwLock<GlobalFilters>,
    loaded: AtomicBool,
}

impl FilterStore {
    pub fn new(filters: GlobalFilters) -> Self {
        Self {
            filters: RwLock::new(filters),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn loaded(filters: GlobalFilters) -> Self {
        let store = Self::new(filters);
        store.mark_loaded();
        store
    }

    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::SeqCst);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> GlobalFilters {
        self.filters.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut GlobalFilters)) {
        f(&mut self.filters.write().unwrap_or_else(|p| p.into_inner()));
    }

    pub fn set_date_range(&self, start: impl Into<String>, end: impl Into<String>) {
        let (start, end) = (start.into(), end.into());
        self.update(|f| {
            f.start_date = start;
            f.end_date = end;
        });
    }
}

// ------------------------------------------------------------------ //
//  Client-side defaults                                               //
// ------------------------------------------------------------------ //

/// `(endpoint, key, value)` filled when the key is missing or blank and
/// written back to the override store so filter chips show it.
const STAGED_DEFAULTS: [(&str, &str, &str); 9] = [
    ("mhpl0001", "PatCat", "INPATIENT"),
    ("mhpl0003", "PatCat", "IPD"),
    ("mhpl0004", "PatCat", "IPD"),
    ("mhpl0005", "ServiceTypes", "IPD"),
    ("mhpl0006", "InsuranceProviders", "MetLife Alico"),
    ("mhpl0007", "Threshold", "70"),
    ("mhpl0009", "medicine_categories", "tablet"),
    ("mhpl0010", "EmpType", "worker"),
    ("mhpl0010", "Departments", "billing, monthly"),
];

/// Endpoints that fall back to a small first page when no paging is given.
const PAGED_BY_DEFAULT: [&str; 2] = ["mhpl0005", "mhpl0006"];

/// Final parameters for one endpoint: global filters, then staged
/// overrides, then the global date range, then client defaults for
/// anything still missing. Overrides are read at call time.
pub fn request_params(
    endpoint_id: &str,
    filters: &GlobalFilters,
    overrides: &OverrideStore,
    today: NaiveDate,
) -> ParamMap {
    let mut params = filters.base_params(endpoint_id);
    params.extend(overrides.get(endpoint_id));
    for (key, value) in [("StartDate", &filters.start_date), ("EndDate", &filters.end_date)] {
        if !value.trim().is_empty() {
            params.insert(key.to_string(), value.clone());
        }
    }
    apply_client_defaults(endpoint_id, &mut params, today, overrides);
    params
}

pub fn apply_client_defaults(
    endpoint_id: &str,
    params: &mut ParamMap,
    today: NaiveDate,
    overrides: &OverrideStore,
) {
    if is_blank(params, "StartDate") {
        params.insert("StartDate".into(), format_ymd(month_start(today)));
    }
    if is_blank(params, "EndDate") {
        params.insert("EndDate".into(), format_ymd(today));
    }

    for (_, key, value) in STAGED_DEFAULTS.iter().filter(|(id, ..)| *id == endpoint_id) {
        if is_blank(params, key) {
            debug!(endpoint_id, key, value, "staging client default");
            params.insert((*key).to_string(), (*value).to_string());
            overrides.set(endpoint_id, key, *value);
        }
    }

    if PAGED_BY_DEFAULT.contains(&endpoint_id) {
        if is_blank(params, "PageSize") && is_blank(params, "Page_Size") {
            params.insert("PageSize".into(), "5".into());
        }
        if is_blank(params, "PageNumber") && is_blank(params, "Page_Number") {
            params.insert("PageNumber".into(), "1".into());
        }
    }

    if endpoint_id == "mhpl0010" && is_blank(params, "SummType") {
        params.insert("SummType".into(), "Monthly".into());
    }
}

fn is_blank(params: &ParamMap, key: &str) -> bool {
    params.get(key).map_or(true, |v| v.trim().is_empty())
}
