//! Service Layer entity catalog.
//!
//! A fixed enumeration of the collections queries may target. Resolver
//! output is validated against it and never passed through to the upstream
//! uncontrolled.

use serde::Serialize;
use strsim::jaro_winkler;

#[derive(Debug, Clone, Serialize)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub keywords: &'static [&'static str],
    /// Field names for this collection vary between installations; filters
    /// against it get one degraded retry on invalid-property errors.
    pub volatile_schema: bool,
}

pub static ENTITY_CATALOG: &[EntityDescriptor] = &[
    EntityDescriptor {
        name: "Orders",
        description: "Sales orders",
        keywords: &["order", "sales order", "backlog"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "Invoices",
        description: "AR invoices",
        keywords: &["invoice", "billing", "revenue", "sales total"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "Quotations",
        description: "Sales quotations",
        keywords: &["quotation", "quote"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "DeliveryNotes",
        description: "Deliveries",
        keywords: &["delivery", "shipment", "shipped"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "CreditNotes",
        description: "AR credit memos",
        keywords: &["credit note", "credit memo", "refund"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "BusinessPartners",
        description: "Customers and vendors",
        keywords: &["customer", "vendor", "supplier", "partner", "client", "account"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "Items",
        description: "Item master data",
        keywords: &["item", "product", "stock", "inventory", "material", "warehouse"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "PurchaseOrders",
        description: "Purchase orders",
        keywords: &["purchase order", "procurement", "buying"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "PurchaseInvoices",
        description: "AP invoices",
        keywords: &["purchase invoice", "ap invoice", "vendor bill", "payable"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "IncomingPayments",
        description: "Incoming payments",
        keywords: &["incoming payment", "receipt", "collection", "received payment"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "VendorPayments",
        description: "Outgoing payments",
        keywords: &["outgoing payment", "vendor payment", "paid to vendor"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "JournalEntries",
        description: "Journal entries",
        keywords: &["journal", "ledger", "accounting entry", "posting"],
        volatile_schema: false,
    },
    EntityDescriptor {
        name: "Employees",
        description: "Employee master data",
        keywords: &["employee", "staff", "headcount"],
        volatile_schema: false,
    },
    // Schemas for these vary noticeably across installations and patch
    // levels; filters against them are the usual invalid-property culprits.
    EntityDescriptor {
        name: "Activities",
        description: "Activities and tasks",
        keywords: &["activity", "meeting", "task", "phone call", "appointment"],
        volatile_schema: true,
    },
    EntityDescriptor {
        name: "SalesOpportunities",
        description: "Sales opportunities",
        keywords: &["opportunity", "pipeline", "deal", "prospect"],
        volatile_schema: true,
    },
    EntityDescriptor {
        name: "ServiceCalls",
        description: "Service calls",
        keywords: &["service call", "ticket", "support case", "complaint"],
        volatile_schema: true,
    },
];

const SIMILARITY_THRESHOLD: f64 = 0.85;

pub fn lookup(name: &str) -> Option<&'static EntityDescriptor> {
    let name = name.trim();
    ENTITY_CATALOG
        .iter()
        .find(|entity| entity.name.eq_ignore_ascii_case(name))
}

/// Resolves a possibly-wrong resource name. Exact match wins; otherwise the
/// question's keywords decide (longest keyword first, so "purchase order"
/// beats "order"); as a last resort the candidate itself is fuzzy-matched
/// against known names.
pub fn resolve(candidate: &str, question: &str) -> Option<&'static EntityDescriptor> {
    if let Some(entity) = lookup(candidate) {
        return Some(entity);
    }

    let question_lower = question.to_lowercase();
    let mut best_keyword: Option<(&'static EntityDescriptor, usize)> = None;
    for entity in ENTITY_CATALOG {
        for keyword in entity.keywords {
            if question_lower.contains(keyword) {
                let better = best_keyword.map_or(true, |(_, len)| keyword.len() > len);
                if better {
                    best_keyword = Some((entity, keyword.len()));
                }
            }
        }
    }
    if let Some((entity, _)) = best_keyword {
        return Some(entity);
    }

    let candidate_lower = candidate.trim().to_lowercase();
    if candidate_lower.is_empty() {
        return None;
    }
    let mut best: Option<(&'static EntityDescriptor, f64)> = None;
    for entity in ENTITY_CATALOG {
        let score = jaro_winkler(&candidate_lower, &entity.name.to_lowercase());
        if score >= SIMILARITY_THRESHOLD && best.map_or(true, |(_, s)| score > s) {
            best = Some((entity, score));
        }
    }
    best.map(|(entity, _)| entity)
}

/// User-defined objects (`U_*`) also carry installation-specific schemas.
pub fn has_volatile_schema(resource: &str) -> bool {
    if resource.starts_with("U_") {
        return true;
    }
    lookup(resource).map_or(false, |entity| entity.volatile_schema)
}
