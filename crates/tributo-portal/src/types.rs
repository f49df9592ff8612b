//! Typed rows returned by the portal.
//!
//! Documents arrive in one of two shapes, discriminated by key presence:
//! the *portal* shape (field names straight off the listing endpoint,
//! `detNroDoc` as the folio key) and the *canonical* shape (pre-processed
//! rows with a generic `folio` key). [`RawDocument`] is the tagged sum of
//! the two; [`RawDocument::from_value`] picks the variant by discriminator,
//! and downstream validation/mapping dispatches on it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tributo_core::{OperationKind, TaxPeriod};

/// A scalar that may arrive as an integer, a float, or a string.
///
/// Portal listings are inconsistent about numeric rendering; this keeps
/// the raw shape intact so the validator can apply its own rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Int(i64),
    Float(f64),
    Text(String),
}

impl NumberOrText {
    /// The value as an integer, when it is one or renders as one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The value rendered as text.
    pub fn as_text(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }
}

/// The structured taxpayer identity blob.
///
/// The full portal response is retained in `raw`; the typed fields are the
/// subset the pipeline consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxpayerProfile {
    /// Business name as registered with the authority.
    pub razon_social: String,
    /// Canonical tax id, `"<digits>-<DV>"`.
    pub tax_id: String,
    /// Date the taxpayer started activities, when known. Bounds full-history
    /// ingestion.
    pub activity_start_date: Option<NaiveDate>,
    /// Registered economic activity descriptions.
    #[serde(default)]
    pub activities: Vec<String>,
    /// Registered addresses.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Full structured response as returned by the portal.
    pub raw: Value,
}

/// One row of the per-period purchase/sales summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEntry {
    /// Document type code.
    #[serde(rename = "rsmnTipoDocInteger")]
    pub type_code: i32,
    /// Human-readable type name.
    #[serde(rename = "dcvNombreTipoDoc", default)]
    pub type_name: String,
    /// Number of documents of this type in the period.
    #[serde(rename = "rsmnTotDoc", default)]
    pub count: u32,
}

/// The per-period document discovery summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentsSummary {
    #[serde(default)]
    pub purchases: Vec<SummaryEntry>,
    #[serde(default)]
    pub sales: Vec<SummaryEntry>,
}

impl DocumentsSummary {
    /// Type codes with at least one document on the purchase side.
    pub fn purchase_codes(&self) -> Vec<i32> {
        self.purchases
            .iter()
            .filter(|e| e.count > 0)
            .map(|e| e.type_code)
            .collect()
    }

    /// Type codes with at least one document on the sales side.
    pub fn sales_codes(&self) -> Vec<i32> {
        self.sales
            .iter()
            .filter(|e| e.count > 0)
            .map(|e| e.type_code)
            .collect()
    }
}

/// A document row in portal shape, field names as the listing endpoint
/// returns them. `det_folio` (`detNroDoc`) is the shape discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalDocument {
    /// Folio. Present on every well-formed row; the discriminator key.
    #[serde(rename = "detNroDoc")]
    pub det_folio: Option<NumberOrText>,
    /// Document type code.
    #[serde(rename = "detTipoDoc")]
    pub det_tipo_doc: Option<NumberOrText>,
    /// Alternate type code key some listings use.
    #[serde(rename = "codTDoc")]
    pub cod_t_doc: Option<NumberOrText>,
    /// Issue date, day-first rendering.
    #[serde(rename = "detFchDoc")]
    pub det_fch_doc: Option<String>,
    /// Counterparty tax-id digits.
    #[serde(rename = "detRutDoc")]
    pub det_rut_doc: Option<NumberOrText>,
    /// Counterparty check digit.
    #[serde(rename = "detDvDoc")]
    pub det_dv_doc: Option<String>,
    /// Counterparty business name.
    #[serde(rename = "detRznSoc")]
    pub det_rzn_soc: Option<String>,
    /// Net amount.
    #[serde(rename = "detMntNeto")]
    pub det_mnt_neto: Option<NumberOrText>,
    /// VAT amount.
    #[serde(rename = "detMntIVA")]
    pub det_mnt_iva: Option<NumberOrText>,
    /// Exempt amount.
    #[serde(rename = "detMntExe")]
    pub det_mnt_exe: Option<NumberOrText>,
    /// Total amount.
    #[serde(rename = "detMntTotal")]
    pub det_mnt_total: Option<NumberOrText>,
    /// Folio of a referenced document (credit/debit notes).
    #[serde(rename = "detNroDocRef")]
    pub det_folio_ref: Option<NumberOrText>,
    /// Type code of the referenced document.
    #[serde(rename = "detTipoDocRef")]
    pub det_tipo_doc_ref: Option<NumberOrText>,
}

/// A document row in canonical (pre-processed) shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Folio. The discriminator key for this shape.
    pub folio: Option<NumberOrText>,
    /// Type, as a code or a free-text name.
    pub tipo_documento: Option<NumberOrText>,
    /// Issue date rendering.
    pub fecha_emision: Option<String>,
    /// Issuer tax id, canonical `"<digits>-<DV>"` form.
    pub rut_emisor: Option<String>,
    pub razon_social_emisor: Option<String>,
    /// Recipient tax id, canonical form.
    pub rut_receptor: Option<String>,
    pub razon_social_receptor: Option<String>,
    pub monto_neto: Option<NumberOrText>,
    pub monto_iva: Option<NumberOrText>,
    pub monto_exento: Option<NumberOrText>,
    pub monto_total: Option<NumberOrText>,
}

/// A raw document in either of the two incoming shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawDocument {
    Portal(PortalDocument),
    Canonical(CanonicalDocument),
}

impl RawDocument {
    /// Parse a JSON object into the shape its discriminator key announces:
    /// `detNroDoc` → portal, `folio` → canonical. Objects with neither key
    /// (or non-objects) are unrecognisable and yield `None`; the validator
    /// reports those with a stable reason.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.contains_key("detNroDoc") {
            serde_json::from_value(value.clone()).ok().map(Self::Portal)
        } else if map.contains_key("folio") {
            serde_json::from_value(value.clone())
                .ok()
                .map(Self::Canonical)
        } else {
            None
        }
    }

    /// The folio in whichever shape it arrived.
    pub fn folio(&self) -> Option<&NumberOrText> {
        match self {
            Self::Portal(d) => d.det_folio.as_ref(),
            Self::Canonical(d) => d.folio.as_ref(),
        }
    }
}

/// A raw document tagged with its extraction context.
///
/// Tags are attached by the coordinator after each fetch: the operation
/// side the listing came from, the owning company, the period, and the
/// job correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedDocument {
    pub operation: OperationKind,
    pub company_tax_id: String,
    pub period: TaxPeriod,
    pub task_id: Option<String>,
    pub document: RawDocument,
}

/// One declared-form row from a forms search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawForm {
    /// Portal folio of the declaration.
    pub folio: String,
    /// Covered period, `"YYYY-MM"`.
    pub period: String,
    /// Contributor tax id.
    #[serde(default)]
    pub contributor: String,
    /// Submission date, `DD/MM/YYYY`, when submitted.
    #[serde(default)]
    pub submission_date: Option<String>,
    /// Portal status label (e.g. `"Vigente"`).
    #[serde(default)]
    pub status: String,
    /// Declared amount.
    pub amount: Option<NumberOrText>,
}

/// One field of a form's field-level detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDetailField {
    /// Authority field code.
    pub code: String,
    /// Field label as rendered on the form.
    #[serde(default)]
    pub label: String,
    /// Raw value string, Chilean rendering.
    #[serde(default)]
    pub value: String,
}

/// Field-level detail of one declared form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormDetail {
    pub folio: String,
    pub period: String,
    #[serde(default)]
    pub fields: Vec<FormDetailField>,
    #[serde(default)]
    pub subtables: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn portal_shape_is_picked_by_discriminator() {
        let value = json!({
            "detNroDoc": 4155,
            "detTipoDoc": 33,
            "detFchDoc": "15/01/2024",
            "detRutDoc": 76543210,
            "detDvDoc": "5",
            "detRznSoc": "Proveedor SpA",
            "detMntNeto": 100000,
            "detMntIVA": 19000,
            "detMntTotal": 119000
        });
        match RawDocument::from_value(&value) {
            Some(RawDocument::Portal(doc)) => {
                assert_eq!(doc.det_folio.unwrap().as_i64(), Some(4155));
                assert_eq!(doc.det_mnt_total.unwrap().as_i64(), Some(119000));
            }
            other => panic!("expected portal shape, got {other:?}"),
        }
    }

    #[test]
    fn canonical_shape_is_picked_by_discriminator() {
        let value = json!({
            "folio": "882",
            "tipo_documento": "Factura Electrónica",
            "fecha_emision": "2024-01-15",
            "rut_emisor": "77794858-K",
            "monto_total": "1.190.000"
        });
        match RawDocument::from_value(&value) {
            Some(RawDocument::Canonical(doc)) => {
                assert_eq!(doc.folio.unwrap().as_text(), "882");
            }
            other => panic!("expected canonical shape, got {other:?}"),
        }
    }

    #[test]
    fn unrecognisable_shapes_yield_none() {
        assert!(RawDocument::from_value(&json!({"algo": 1})).is_none());
        assert!(RawDocument::from_value(&json!([1, 2])).is_none());
        assert!(RawDocument::from_value(&json!("texto")).is_none());
    }

    #[test]
    fn summary_codes_skip_empty_types() {
        let summary = DocumentsSummary {
            purchases: vec![
                SummaryEntry { type_code: 33, type_name: "Factura".into(), count: 2 },
                SummaryEntry { type_code: 61, type_name: "NC".into(), count: 0 },
            ],
            sales: vec![],
        };
        assert_eq!(summary.purchase_codes(), vec![33]);
        assert!(summary.sales_codes().is_empty());
    }

    #[test]
    fn number_or_text_coercions() {
        assert_eq!(NumberOrText::Int(42).as_i64(), Some(42));
        assert_eq!(NumberOrText::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(NumberOrText::Float(42.0).as_i64(), Some(42));
        assert_eq!(NumberOrText::Float(42.5).as_i64(), None);
        assert!(NumberOrText::Text("  ".into()).is_empty_text());
    }
}
