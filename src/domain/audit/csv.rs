use super::value_objects::ProductAuditRow;

const HEADER: [&str; 7] = [
    "Produit",
    "Stock Initial",
    "Commandé",
    "Restant",
    "Attendu",
    "Différence",
    "Anomalie",
];

/// Admin export of an audit run, one line per product.
pub fn audit_csv(rows: &[ProductAuditRow]) -> String {
    let mut out = HEADER.join(",");
    out.push('\n');

    for row in rows {
        let s = &row.stock;
        let fields = [
            escape(&row.title),
            s.stock_initial.to_string(),
            s.total_ordered.to_string(),
            s.actual_remaining.to_string(),
            s.expected_remaining.to_string(),
            s.difference.to_string(),
            if s.anomaly { "Oui" } else { "Non" }.to_string(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
