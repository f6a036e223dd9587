//! Turns gateway payloads into [`KpiRecord`]s.
//!
//! Upstream reports are loosely shaped: the same figure may sit under a
//! snake-case or an upper-case key, groups arrive either as arrays or as
//! `{items: [...]}` objects, and numbers are often strings. The helpers at
//! the bottom absorb that; each `shape_*` function reads one report.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::kpi::{KpiAlert, KpiRecord, Trend, TrendDirection};
use crate::overrides::ParamMap;

static NULL: Value = Value::Null;

const MONTH_KEYS: [&str; 4] = ["MONTH", "month", "period", "periods"];
const PATIENT_KEYS: [&str; 3] = ["UNIQUE_PATIENT", "UNIQUE_PATIENTS", "TOTAL_UNIQUE_PATIENTS"];

/// Build the KPI records one endpoint contributes. `overrides` are the
/// staged overrides of that endpoint, shown as local filter chips.
pub fn shape(endpoint_id: &str, payload: &Value, overrides: &ParamMap) -> Vec<KpiRecord> {
    // Most reports wrap their body in a `data` field.
    let data = match payload.get("data") {
        Some(inner) if !inner.is_null() => inner,
        _ => payload,
    };
    let chip = |key: &str, fallback: &str| {
        overrides
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    };

    match endpoint_id {
        "mhpl0001" => shape_revisits(data, &chip("PatCat", "INPATIENT")),
        "mhpl0002" => shape_payroll(data),
        "mhpl0003" => shape_geography(data),
        "mhpl0004" => shape_spending(data, &chip("PatCat", "IPD")),
        "mhpl0005" => shape_consultants(data, &chip("ServiceTypes", "IPD")),
        "mhpl0006" => shape_insurance(
            data,
            &chip("InsuranceProviders", "MetLife Alico"),
            &chip("Department", ""),
        ),
        "mhpl0007" => shape_bed_occupancy(data, &chip("Threshold", "70")),
        "mhpl0008" => shape_attendance(data),
        "mhpl0009" => shape_medicine_waste(data, &chip("medicine_categories", "tablet")),
        "mhpl0010" => shape_salary(
            data,
            &chip("Departments", "billing, monthly"),
            &chip("EmpType", "worker"),
            &chip("SummType", "Monthly"),
        ),
        _ => Vec::new(),
    }
}

/// Cards that must exist after a full load even when no report produced them.
pub fn placeholders() -> Vec<KpiRecord> {
    vec![
        KpiRecord::new("patient-revisit-rate", "Patient Revisit Rate", json!("0.0%"), "green"),
        KpiRecord::new("geographic-distribution", "Total Districts", json!(0), "red"),
        KpiRecord::new("total-patient-spending", "Total Patient Spending", json!(0), "purple"),
    ]
}

/// True for an untouched placeholder card.
pub fn is_placeholder(record: &KpiRecord) -> bool {
    placeholders().iter().any(|p| p == record)
}

// ------------------------------------------------------------------ //
//  Per-endpoint shaping                                               //
// ------------------------------------------------------------------ //

fn shape_revisits(data: &Value, pat_cat: &str) -> Vec<KpiRecord> {
    let Some(totals) = items(data.get("totals")).into_iter().next() else {
        return Vec::new();
    };

    let selected = pat_cat.trim().to_uppercase();
    let monthly: Vec<&Value> = flatten_groups(data.get("groupByMonth"))
        .into_iter()
        .filter(|it| {
            selected.is_empty()
                || selected == "INPATIENT,OUTPATIENT"
                || text(it.get("PATIENT_CATEGORY")).to_uppercase() == selected
        })
        .collect();

    let rate_by_month = monthly_ratio(&monthly, &["REVISIT_COUNT", "TOTAL_REVISIT_COUNT"], &PATIENT_KEYS);
    let latest_rate = rate_by_month.values().next_back().copied();

    let avg_from_totals = num(totals.get("AVERAGE_REVISIT_RATE"));
    let rate = if avg_from_totals != 0.0 {
        as_fraction(avg_from_totals)
    } else if let Some(latest) = latest_rate {
        latest
    } else {
        let revisits = first_num(totals, &["TOTAL_REVISIT_COUNT", "REVISIT_COUNT"]);
        let patients = first_num(totals, &["TOTAL_UNIQUE_PATIENTS", "UNIQUE_PATIENTS", "UNIQUE_PATIENT"]);
        if patients > 0.0 {
            revisits / patients.abs()
        } else {
            0.0
        }
    };

    let mut record = KpiRecord::new(
        "patient-revisit-rate",
        "Patient Revisit Rate",
        json!(format!("{:.1}%", rate * 100.0)),
        "green",
    )
    .hover("Total Unique Patients", group_thousands(num(totals.get("TOTAL_UNIQUE_PATIENTS"))))
    .hover("Revisit Count", group_thousands(num(totals.get("TOTAL_REVISIT_COUNT"))));
    let label = upper_list(pat_cat);
    if !label.is_empty() {
        record = record.filter("Patient Type", label);
    }
    record.trend = month_over_month(&rate_by_month);
    vec![record]
}

fn shape_payroll(data: &Value) -> Vec<KpiRecord> {
    let totals = data.get("totals").unwrap_or(&NULL);
    let (has_grand, grand, salary, allowance) = match totals {
        Value::Array(rows) => {
            let amount_of = |kind: &str| {
                rows.iter()
                    .find(|t| {
                        text(t.get("Expense_Type")) == kind || text(t.get("EXPENSE_TYPE")) == kind
                    })
                    .map(|t| first_nonzero(t, &["Total_Amount", "TOTAL_AMOUNT"]))
            };
            let grand = amount_of("Grand_Total_Expense");
            (
                grand.is_some(),
                grand.unwrap_or(0.0),
                amount_of("Total_Salary").unwrap_or(0.0),
                amount_of("Total_Allowance").unwrap_or(0.0),
            )
        }
        Value::Object(_) => {
            let raw_grand = present(totals, &["grand_total_expense", "Grand_Total_Expense"]);
            (
                raw_grand.is_some_and(|v| !text(Some(v)).trim().is_empty()),
                num(raw_grand),
                first_nonzero(totals, &["total_salary", "Total_Salary"]),
                first_nonzero(totals, &["total_allowance", "Total_Allowance"]),
            )
        }
        _ => return Vec::new(),
    };

    let mut expense_by_month = BTreeMap::new();
    let monthly = data
        .get("summaryByPeriod")
        .and_then(|s| s.get("monthly"))
        .and_then(|m| m.get("items"));
    for it in items(monthly) {
        let Some(month) = month_key(first_present(it, &["periods", "MONTH", "month"])) else {
            continue;
        };
        *expense_by_month.entry(month).or_insert(0.0) +=
            first_nonzero(it, &["total_expense", "grand_total_expense"]);
    }

    if !has_grand {
        return Vec::new();
    }
    let mut record = KpiRecord::new("payroll-expense", "Total Payroll Expense", json!(grand), "purple")
        .hover("Total Salary", taka(salary))
        .hover("Total Allowance", taka(allowance));
    record.trend = month_over_month(&expense_by_month);
    vec![record]
}

fn shape_geography(data: &Value) -> Vec<KpiRecord> {
    let divisions = items(data.get("groupByLocation"));
    if divisions.is_empty() {
        return Vec::new();
    }
    let districts: Vec<&Value> = divisions
        .iter()
        .flat_map(|d| items(d.get("DISTRICTS")))
        .collect();
    let patients: f64 = districts.iter().map(|d| num(d.get("PATIENT_COUNT"))).sum();

    vec![
        KpiRecord::new("geographic-distribution", "Total Districts", json!(districts.len()), "red")
            .hover("Divisions Covered", divisions.len().to_string())
            .hover("Districts", districts.len().to_string())
            .hover("Total Patients", group_thousands(patients)),
    ]
}

fn shape_spending(data: &Value, pat_cat: &str) -> Vec<KpiRecord> {
    let categories = items(data.get("groupBySpendingCategory"));
    if categories.is_empty() {
        return Vec::new();
    }
    let total: f64 = categories.iter().map(|c| num(c.get("TOTAL_BILLED_AMOUNT"))).sum();
    let average = (total / categories.len() as f64).floor();

    let billed_from_totals = items(data.get("totals"))
        .first()
        .map(|t| first_nonzero(t, &["TOTAL_BILLED_AMOUNT", "total_billed_amount"]))
        .unwrap_or(0.0);
    let billed_by_month = monthly_sum(
        &flatten_groups(data.get("groupByMonth")),
        &["TOTAL_BILLED_AMOUNT", "total_billed_amount"],
    );
    let latest = latest_nonzero(&billed_by_month).unwrap_or(total);
    let value = if billed_from_totals > 0.0 { billed_from_totals } else { latest };

    let mut record = KpiRecord::new("total-patient-spending", "Total Patient Spending", json!(value), "purple")
        .hover("Spending Categories", categories.len().to_string())
        .hover("Average Category", taka(average));
    let label = upper_list(pat_cat);
    if !label.is_empty() {
        record = record.filter("Patient Type", label);
    }
    record.trend = month_over_month(&billed_by_month);
    vec![record]
}

fn shape_consultants(data: &Value, service_types: &str) -> Vec<KpiRecord> {
    if data.get("groupByConsultant").is_none() && data.get("totals").is_none() {
        return Vec::new();
    }
    let consultants = data
        .get("groupByConsultant")
        .and_then(|g| g.get(0))
        .map(|g| items(g.get("items")))
        .unwrap_or_default();
    let from_totals = items(data.get("totals"))
        .first()
        .map(|t| num(present(t, &["total_revenue", "TOTAL_REVENUE"])))
        .unwrap_or(0.0);
    let total = if from_totals > 0.0 {
        from_totals
    } else {
        consultants.iter().map(|c| num(c.get("total_revenue"))).sum()
    };
    if total <= 0.0 {
        return Vec::new();
    }

    let revenue_by_month = monthly_sum(
        &flatten_groups(data.get("groupByMonth")),
        &["daily_revenue", "total_revenue", "revenue"],
    );
    let value = if from_totals > 0.0 {
        from_totals
    } else {
        latest_nonzero(&revenue_by_month).unwrap_or(total)
    };
    let average = (total / consultants.len().max(1) as f64).floor();

    let mut record = KpiRecord::new("consultant-revenue", "Consultant Revenue", json!(value), "purple")
        .hover("Total Consultants", consultants.len().to_string())
        .hover("Avg Revenue", taka(average));
    let label = upper_list(service_types);
    if !label.is_empty() {
        record = record.filter("Service Type", label);
    }
    record.trend = month_over_month(&revenue_by_month);
    vec![record]
}

fn shape_insurance(data: &Value, providers: &str, department: &str) -> Vec<KpiRecord> {
    let claims: f64 = data
        .get("groupByInsuranceProvider")
        .and_then(|g| g.get(0))
        .map(|g| {
            items(g.get("items"))
                .iter()
                .map(|it| num(present(it, &["claim_count", "CLAIM_COUNT"])))
                .sum()
        })
        .unwrap_or(0.0);
    let totals = data.get("totals").unwrap_or(&NULL);
    let claimed = num(present(totals, &["total_claimed_amount", "TOTAL_CLAIMED_AMOUNT"]));
    let pending = num(present(totals, &["total_pending_receivable", "TOTAL_PENDING_RECEIVABLE"]));
    if claims <= 0.0 && claimed <= 0.0 {
        return Vec::new();
    }

    let value = if claims > 0.0 { claims } else { claimed };
    let mut record = KpiRecord::new("insurance-claims", "Insurance Claims", json!(value), "purple")
        .hover("Total Claims", group_thousands(claims))
        .hover("Claimed Amount", group_thousands(claimed))
        .hover("Pending Receivable", group_thousands(pending))
        .filter("Insurance Providers", tidy_list(providers));
    if !department.trim().is_empty() {
        record = record.filter("Department", tidy_list(department));
    }
    vec![record]
}

fn shape_bed_occupancy(data: &Value, threshold: &str) -> Vec<KpiRecord> {
    let totals = items(data.get("totals")).into_iter().next().unwrap_or(&NULL);
    let alerts = data.get("alerts").unwrap_or(&NULL);

    let rate = num(present(totals, &["occupancy_rate", "OCCUPANCY_RATE"]));
    let beds = num(present(totals, &["total_beds", "TOTAL_BEDS"]));
    let threshold = num_str(threshold);

    let below_standard = text(alerts.get("occupancy_below_standard")).to_lowercase() == "true";
    let alert = (below_standard && beds > 0.0).then(|| {
        let message = text(alerts.get("message"));
        KpiAlert {
            message: if message.is_empty() {
                format!("Current {}% vs threshold {}%", rate.round(), plain(threshold))
            } else {
                message
            },
            threshold,
            current_value: rate,
        }
    });

    let mut record = KpiRecord::new("bed-occupancy", "Bed Occupancy Rate", json!(format!("{}%", rate.round())), "red")
        .hover("Total Beds", group_thousands(beds))
        .hover("Occupied", group_thousands(num(present(totals, &["occupied_beds", "OCCUPIED_BEDS"]))))
        .hover("Available", group_thousands(num(present(totals, &["available_beds", "AVAILABLE_BEDS"]))))
        .hover(
            "Unavailable",
            group_thousands(num(present(totals, &["unavailable_beds", "UNAVAILABLE_BEDS"]))),
        )
        .filter("Threshold", format!("{}%", plain(threshold)));
    record.alert = alert;
    vec![record]
}

fn shape_attendance(data: &Value) -> Vec<KpiRecord> {
    let mut present_days = 0.0;
    let mut working_days = 0.0;
    let mut employees = 0.0;

    let departments = flatten_groups(data.get("groupByDepartment"));
    if !departments.is_empty() {
        for dept in departments {
            let headcount = num(dept.get("total_employees"));
            let avg_present = num(dept.get("average_present_days"));
            let sample_working = flatten_groups(dept.get("employees"))
                .first()
                .map(|e| num(e.get("working_days")))
                .unwrap_or(0.0);
            present_days += (avg_present * headcount).round();
            working_days += (sample_working * headcount).round();
            employees += headcount;
        }
    } else if let Some(group) = data.get("groupByEmployee").and_then(|g| g.get(0)) {
        let staff = items(group.get("items"));
        employees = staff.len() as f64;
        for emp in staff {
            present_days += num(emp.get("present_days"));
            working_days += num(emp.get("working_days"));
        }
    }
    if employees <= 0.0 {
        return Vec::new();
    }

    let pct = if working_days > 0.0 { present_days / working_days * 100.0 } else { 0.0 };
    let shown = format!("{}%", pct.round());
    vec![
        KpiRecord::new("employee-attendance", "Average Attendance Percentage", json!(shown.clone()), "purple")
            .hover("Total Employees", plain(employees))
            .hover("Present Days", group_thousands(present_days))
            .hover("Total Working Days", group_thousands(working_days))
            .hover("Average Attendance Percentage", shown),
    ]
}

fn shape_medicine_waste(data: &Value, categories: &str) -> Vec<KpiRecord> {
    let totals = items(data.get("totals")).into_iter().next().unwrap_or(&NULL);
    let loss = num(present(totals, &["total_loss_value", "TOTAL_LOSS_VALUE"]));
    if loss <= 0.0 {
        return Vec::new();
    }
    let mut record = KpiRecord::new("medicine-waste", "Medicine Waste Value", json!(loss), "orange")
        .hover("Expired Value", group_thousands(num(totals.get("total_expired_value"))))
        .hover("Wasted Value", group_thousands(num(totals.get("total_wasted_value"))))
        .hover("Total Quantity", group_thousands(num(totals.get("total_loss_quantity"))));
    let label = upper_list(categories);
    if !label.is_empty() {
        record = record.filter("Medicine Categories", label);
    }
    vec![record]
}

fn shape_salary(data: &Value, departments: &str, emp_type: &str, summ_type: &str) -> Vec<KpiRecord> {
    let totals = items(data.get("totals")).into_iter().next().unwrap_or(&NULL);
    let overall = num(present(totals, &["overall_salary", "OVERALL_SALARY"]));
    if overall <= 0.0 {
        return Vec::new();
    }
    let headcount = num(present(totals, &["total_employees", "TOTAL_EMPLOYEES"]));
    vec![
        KpiRecord::new("employee-salary", "Total Employee Salary", json!(overall), "blue")
            .hover("Total Employees", group_thousands(headcount))
            .filter("Departments", departments)
            .filter("Emp Type", emp_type.to_uppercase())
            .filter("Summ Type", summ_type),
    ]
}

// ------------------------------------------------------------------ //
//  Month series                                                       //
// ------------------------------------------------------------------ //

/// `YYYY-MM` from `YYYY-MM`, `YYYYMM`, `YYYY/MM` or the same with a day.
pub fn month_key(raw: Option<&Value>) -> Option<String> {
    let s = text(raw);
    let s = s.trim();
    let bytes = s.as_bytes();
    let digits = |range: std::ops::Range<usize>| {
        bytes.get(range.clone()).filter(|b| b.iter().all(u8::is_ascii_digit)).map(|_| &s[range])
    };
    let year = digits(0..4)?;
    let sep = matches!(bytes.get(4), Some(b'-' | b'/'));
    let m_start = if sep { 5 } else { 4 };
    let month = digits(m_start..m_start + 2)?;
    let rest = &bytes[m_start + 2..];
    let day_ok = rest.is_empty()
        || (rest.len() == 3 && matches!(rest[0], b'-' | b'/') && rest[1..].iter().all(u8::is_ascii_digit));
    day_ok.then(|| format!("{year}-{month}"))
}

fn monthly_sum(rows: &[&Value], value_keys: &[&str]) -> BTreeMap<String, f64> {
    let mut acc = BTreeMap::new();
    for row in rows {
        if let Some(month) = month_key(first_present(row, &MONTH_KEYS)) {
            *acc.entry(month).or_insert(0.0) += num(first_present(row, value_keys));
        }
    }
    acc
}

/// Per-month numerator/denominator ratio; an explicit `REVISIT_RATE` on a
/// row wins for its month.
fn monthly_ratio(rows: &[&Value], numerator: &[&str], denominator: &[&str]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    let mut explicit: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows {
        let Some(month) = month_key(first_present(row, &MONTH_KEYS)) else {
            continue;
        };
        match first_present(row, &["REVISIT_RATE", "revisit_rate"]) {
            Some(rate) if !text(Some(rate)).trim().is_empty() => {
                explicit.insert(month, num(Some(rate)));
            }
            _ => {
                let entry = sums.entry(month).or_insert((0.0, 0.0));
                entry.0 += num(first_present(row, numerator));
                entry.1 += num(first_present(row, denominator));
            }
        }
    }
    let mut out: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(m, (n, d))| (m, if d > 0.0 { n / d } else { 0.0 }))
        .collect();
    out.extend(explicit);
    out
}

/// Change between the last two months, rounded to one decimal. Hidden with
/// fewer than two months or a zero previous month.
pub fn month_over_month(series: &BTreeMap<String, f64>) -> Option<Trend> {
    let mut recent = series.values().rev();
    let current = *recent.next()?;
    let previous = *recent.next()?;
    if previous == 0.0 {
        return None;
    }
    let rounded = ((current - previous) / previous.abs() * 1000.0).round() / 10.0;
    Some(Trend {
        change: rounded.abs(),
        trend: if rounded >= 0.0 { TrendDirection::Up } else { TrendDirection::Down },
    })
}

fn latest_nonzero(series: &BTreeMap<String, f64>) -> Option<f64> {
    series.values().next_back().copied().filter(|v| *v != 0.0)
}

// ------------------------------------------------------------------ //
//  Loose JSON helpers                                                 //
// ------------------------------------------------------------------ //

/// Rows of a group that is either an array or `{items: [...]}`; a lone
/// object counts as one row.
fn items(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(rows)) => rows.iter().collect(),
        Some(Value::Object(obj)) => match obj.get("items") {
            Some(Value::Array(rows)) => rows.iter().collect(),
            _ => vec![value.unwrap_or(&NULL)],
        },
        _ => Vec::new(),
    }
}

/// Like [`items`] but an array of groups is flattened one level.
fn flatten_groups(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(groups)) => groups
            .iter()
            .flat_map(|g| match g.get("items") {
                Some(Value::Array(rows)) => rows.iter().collect(),
                _ => vec![g],
            })
            .collect(),
        Some(Value::Object(obj)) => match obj.get("items") {
            Some(Value::Array(rows)) => rows.iter().collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn first_present<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let obj: &Map<String, Value> = row.as_object()?;
    keys.iter().find_map(|k| obj.get(*k))
}

/// First key that is present and not null.
fn present<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| row.get(*k).filter(|v| !v.is_null()))
}

fn first_num(row: &Value, keys: &[&str]) -> f64 {
    num(present(row, keys))
}

/// First key whose numeric value is non-zero.
fn first_nonzero(row: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .map(|k| num(row.get(*k)))
        .find(|v| *v != 0.0)
        .unwrap_or(0.0)
}

/// Numeric reading of a loose value; anything unparsable is zero.
fn num(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => num_str(s),
        Some(Value::Bool(true)) => 1.0,
        _ => 0.0,
    }
}

fn num_str(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Percentages above 1 are treated as already scaled by 100.
fn as_fraction(v: f64) -> f64 {
    if v > 1.0 {
        v / 100.0
    } else {
        v
    }
}

// ------------------------------------------------------------------ //
//  Display formatting                                                 //
// ------------------------------------------------------------------ //

fn upper_list(raw: &str) -> String {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn tidy_list(raw: &str) -> String {
    raw.split(',').map(str::trim).collect::<Vec<_>>().join(", ")
}

/// Whole numbers without a trailing `.0`.
fn plain(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn taka(v: f64) -> String {
    format!("৳{}", group_thousands(v))
}

/// `1234567.891` → `1,234,567.891` (at most three decimals).
pub fn group_thousands(v: f64) -> String {
    let rounded = (v * 1000.0).round() / 1000.0;
    let negative = rounded < 0.0;
    let abs = rounded.abs();
    let whole = abs.trunc() as u64;
    let frac = format!("{:.3}", abs.fract());
    let frac = frac.trim_start_matches('0').trim_end_matches('0').trim_end_matches('.');

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}{grouped}{frac}", if negative { "-" } else { "" })
}
