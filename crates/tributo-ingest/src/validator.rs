//! Structural validation of raw documents before persistence.
//!
//! Dispatches on the incoming shape and checks the minimum a row must
//! satisfy to be mappable. Rejections carry a stable reason string that is
//! counted into the sync log's error details; the amount-coherence check
//! (total ≈ net + tax) only warns, never rejects.

use tributo_core::parse::is_numeric_like;
use tributo_core::OperationKind;
use tributo_portal::{CanonicalDocument, NumberOrText, PortalDocument, RawDocument, TaggedDocument};

/// Why a record was rejected. The reason is stable across runs so error
/// details aggregate meaningfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub reason: String,
}

impl ValidationFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Validate one tagged raw document.
pub fn validate_document(tagged: &TaggedDocument) -> Result<(), ValidationFailure> {
    match &tagged.document {
        RawDocument::Portal(doc) => validate_portal(doc, tagged.operation),
        RawDocument::Canonical(doc) => validate_canonical(doc),
    }
}

fn validate_portal(
    doc: &PortalDocument,
    operation: OperationKind,
) -> Result<(), ValidationFailure> {
    let folio = doc
        .det_folio
        .as_ref()
        .ok_or_else(|| ValidationFailure::new("portal row is missing its folio"))?;
    validate_folio(folio)?;

    if let Some(type_code) = doc.det_tipo_doc.as_ref().or(doc.cod_t_doc.as_ref()) {
        validate_type_code(type_code)?;
    }

    for (field, value) in [
        ("detMntNeto", &doc.det_mnt_neto),
        ("detMntIVA", &doc.det_mnt_iva),
        ("detMntExe", &doc.det_mnt_exe),
        ("detMntTotal", &doc.det_mnt_total),
    ] {
        if let Some(amount) = value {
            validate_amount(field, amount)?;
        }
    }
    check_amount_coherence(doc);

    // Received documents carry the counterparty's numeric identifier.
    if operation == OperationKind::Received {
        if let Some(issuer) = &doc.det_rut_doc {
            let digits = issuer.as_i64().unwrap_or(-1);
            if digits <= 0 || digits >= 100_000_000 {
                return Err(ValidationFailure::new(format!(
                    "issuer identifier out of range: {}",
                    issuer.as_text()
                )));
            }
        }
    }

    Ok(())
}

fn validate_canonical(doc: &CanonicalDocument) -> Result<(), ValidationFailure> {
    let folio = doc
        .folio
        .as_ref()
        .ok_or_else(|| ValidationFailure::new("canonical row is missing its folio"))?;
    validate_folio(folio)?;

    if let Some(type_code) = &doc.tipo_documento {
        validate_type_code(type_code)?;
    }

    if let Some(issuer) = &doc.rut_emisor {
        if !issuer.is_empty() && tributo_core::Rut::parse(issuer).is_err() {
            return Err(ValidationFailure::new(format!(
                "issuer tax id is malformed: {issuer}"
            )));
        }
    }

    for (field, value) in [
        ("monto_neto", &doc.monto_neto),
        ("monto_iva", &doc.monto_iva),
        ("monto_exento", &doc.monto_exento),
        ("monto_total", &doc.monto_total),
    ] {
        if let Some(amount) = value {
            validate_amount(field, amount)?;
        }
    }

    Ok(())
}

fn validate_folio(folio: &NumberOrText) -> Result<(), ValidationFailure> {
    match folio {
        NumberOrText::Int(n) if *n < 0 => {
            Err(ValidationFailure::new(format!("folio cannot be negative: {n}")))
        }
        NumberOrText::Text(s) if s.trim().is_empty() => {
            Err(ValidationFailure::new("folio is an empty string"))
        }
        NumberOrText::Float(f) if f.fract() != 0.0 || *f < 0.0 => {
            Err(ValidationFailure::new(format!("folio is not an integer: {f}")))
        }
        _ => Ok(()),
    }
}

fn validate_type_code(type_code: &NumberOrText) -> Result<(), ValidationFailure> {
    match type_code {
        NumberOrText::Text(s) if s.trim().is_empty() => {
            Err(ValidationFailure::new("document type code is empty"))
        }
        _ => Ok(()),
    }
}

fn validate_amount(field: &str, amount: &NumberOrText) -> Result<(), ValidationFailure> {
    match amount {
        NumberOrText::Int(_) | NumberOrText::Float(_) => Ok(()),
        NumberOrText::Text(s) => {
            if is_numeric_like(s) {
                Ok(())
            } else {
                Err(ValidationFailure::new(format!(
                    "amount in {field} is not numeric: {s}"
                )))
            }
        }
    }
}

/// Warn when total deviates from net + tax by more than one peso. Rounding
/// differences of a peso are routine; anything larger is suspicious but
/// never fatal.
fn check_amount_coherence(doc: &PortalDocument) {
    let (Some(net), Some(tax), Some(total)) = (
        doc.det_mnt_neto.as_ref().and_then(number_of),
        doc.det_mnt_iva.as_ref().and_then(number_of),
        doc.det_mnt_total.as_ref().and_then(number_of),
    ) else {
        return;
    };
    let expected = net + tax;
    if (total - expected).abs() > 1.0 {
        tracing::warn!(
            net,
            tax,
            total,
            expected,
            "document amounts are potentially inconsistent"
        );
    }
}

fn number_of(value: &NumberOrText) -> Option<f64> {
    match value {
        NumberOrText::Int(n) => Some(*n as f64),
        NumberOrText::Float(f) => Some(*f),
        NumberOrText::Text(s) => s.trim().parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tributo_core::TaxPeriod;

    fn tag(doc: RawDocument, operation: OperationKind) -> TaggedDocument {
        TaggedDocument {
            operation,
            company_tax_id: "77794858-K".into(),
            period: TaxPeriod::new(2024, 1).unwrap(),
            task_id: None,
            document: doc,
        }
    }

    fn portal(value: serde_json::Value) -> RawDocument {
        RawDocument::from_value(&value).expect("test row must be recognisable")
    }

    #[test]
    fn valid_portal_row_passes() {
        let doc = portal(json!({
            "detNroDoc": 4155, "detTipoDoc": 33, "detRutDoc": 76543210,
            "detMntNeto": 100000, "detMntIVA": 19000, "detMntTotal": 119000
        }));
        assert!(validate_document(&tag(doc, OperationKind::Received)).is_ok());
    }

    #[test]
    fn negative_folio_is_rejected() {
        let doc = portal(json!({"detNroDoc": -5}));
        let failure = validate_document(&tag(doc, OperationKind::Received)).unwrap_err();
        assert!(failure.reason.contains("negative"));
    }

    #[test]
    fn string_folio_is_accepted_when_non_empty() {
        let doc = portal(json!({"detNroDoc": "4155"}));
        assert!(validate_document(&tag(doc, OperationKind::Received)).is_ok());
        let doc = portal(json!({"detNroDoc": "  "}));
        assert!(validate_document(&tag(doc, OperationKind::Received)).is_err());
    }

    #[test]
    fn textual_amounts_pass_when_chilean_rendered() {
        let doc = portal(json!({"detNroDoc": 1, "detMntTotal": "1.190.000"}));
        assert!(validate_document(&tag(doc, OperationKind::Received)).is_ok());
        let doc = portal(json!({"detNroDoc": 1, "detMntTotal": "no-un-monto"}));
        let failure = validate_document(&tag(doc, OperationKind::Received)).unwrap_err();
        assert!(failure.reason.contains("detMntTotal"));
    }

    #[test]
    fn issuer_range_is_checked_for_received_only() {
        let row = json!({"detNroDoc": 1, "detRutDoc": 100000000});
        let doc = portal(row.clone());
        assert!(validate_document(&tag(doc, OperationKind::Received)).is_err());
        // The same row on the sales side carries the recipient, which is
        // not range-checked here.
        let doc = portal(row);
        assert!(validate_document(&tag(doc, OperationKind::Issued)).is_ok());
    }

    #[test]
    fn canonical_row_with_bad_issuer_is_rejected() {
        let doc = portal(json!({"folio": 9, "rut_emisor": "sin-forma"}));
        assert!(validate_document(&tag(doc, OperationKind::Received)).is_err());
        let doc = portal(json!({"folio": 9, "rut_emisor": "76543210-5"}));
        assert!(validate_document(&tag(doc, OperationKind::Received)).is_ok());
    }

    #[test]
    fn incoherent_totals_only_warn() {
        // total != net + tax by more than 1: still valid.
        let doc = portal(json!({
            "detNroDoc": 1, "detMntNeto": 100, "detMntIVA": 19, "detMntTotal": 500
        }));
        assert!(validate_document(&tag(doc, OperationKind::Received)).is_ok());
    }
}
