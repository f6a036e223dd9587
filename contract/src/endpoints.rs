//! Static registry of the upstream KPI report endpoints.

/// One upstream report endpoint. Immutable; the registry never changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Short identifier used by callers, e.g. `mhpl0007`.
    pub id: &'static str,
    /// Path relative to the upstream base URL.
    pub upstream_path: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// The ten report endpoints exposed by the upstream service.
pub const ENDPOINTS: [EndpointDescriptor; 10] = [
    EndpointDescriptor {
        id: "mhpl0001",
        upstream_path: "/xapi/xapp/mhpl0001",
        name: "Patient Revisit Analysis",
        description: "Patient revisit rates and admission data analysis",
    },
    EndpointDescriptor {
        id: "mhpl0002",
        upstream_path: "/xapi/xapp/mhpl0002",
        name: "Payroll Total Expense",
        description: "Track payroll expenses by department and period",
    },
    EndpointDescriptor {
        id: "mhpl0003",
        upstream_path: "/ords/xapi/xapp/mhpl0003",
        name: "Patient Location Analysis",
        description: "Patient geographical distribution by division/district",
    },
    EndpointDescriptor {
        id: "mhpl0004",
        upstream_path: "/ords/xapi/xapp/mhpl0004",
        name: "Patient Spending Analysis",
        description: "Patient spending patterns and categories",
    },
    EndpointDescriptor {
        id: "mhpl0005",
        upstream_path: "/ords/xapi/xapp/mhpl0005",
        name: "Revenue Driver Consultant Analysis",
        description: "Consultant revenue analysis and performance",
    },
    EndpointDescriptor {
        id: "mhpl0006",
        upstream_path: "/ords/xapi/xapp/mhpl0006",
        name: "IPD Insurance Claims",
        description: "Insurance provider claims and settlements",
    },
    EndpointDescriptor {
        id: "mhpl0007",
        upstream_path: "/ords/xapi/xapp/mhpl0007",
        name: "IPD Bed Occupancy",
        description: "Real-time bed occupancy monitoring",
    },
    EndpointDescriptor {
        id: "mhpl0008",
        upstream_path: "/ords/xapi/xapp/mhpl0008",
        name: "Employee Performance",
        description: "Employee attendance and performance tracking",
    },
    EndpointDescriptor {
        id: "mhpl0009",
        upstream_path: "/ords/xapi/xapp/mhpl0009",
        name: "Pharmacy Expired Medicine",
        description: "Medicine expiration and waste tracking",
    },
    EndpointDescriptor {
        id: "mhpl0010",
        upstream_path: "/ords/xapi/xapp/mhpl0010",
        name: "Employee Salary Summary",
        description: "Employee salary distribution and analysis",
    },
];

/// Resolve an endpoint identifier to its descriptor.
pub fn lookup(id: &str) -> Option<&'static EndpointDescriptor> {
    ENDPOINTS.iter().find(|e| e.id == id)
}

/// All endpoint identifiers in registry order.
pub fn ids() -> impl Iterator<Item = &'static str> {
    ENDPOINTS.iter().map(|e| e.id)
}
