//! Mapping raw documents into canonical document records.
//!
//! Direction disambiguation: the listing side the row was fetched from
//! decides which tuple is the company. Received rows put the company on
//! the recipient side; issued rows on the issuer side. Document types are
//! resolved through the fixed name table and created on first use.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use tributo_core::parse::{first_integer, parse_amount_lenient, parse_flexible_date};
use tributo_core::{DocumentCategory, DocumentId, DocumentStatus, OperationKind, Rut};
use tributo_portal::{CanonicalDocument, NumberOrText, PortalDocument, RawDocument, TaggedDocument};
use tributo_store::{CompanyRecord, DocumentRecord, DocumentTypeRecord};

/// Why a validated record still could not be mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingFailure {
    pub reason: String,
}

impl MappingFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// A mapped record plus the type-catalogue row it requires.
#[derive(Debug, Clone)]
pub struct MappedDocument {
    pub record: DocumentRecord,
    pub document_type: DocumentTypeRecord,
}

/// Substring table mapping free-text type names to codes. Matched
/// case-insensitively, first hit wins.
const TYPE_NAME_TABLE: &[(&str, i32)] = &[
    ("factura electrónica", 33),
    ("factura no afecta", 34),
    ("factura exenta", 34),
    ("factura de compra", 46),
    ("liquidación factura", 43),
    ("liquidacion factura", 43),
    ("factura", 33),
    ("nota de crédito", 61),
    ("nota credito", 61),
    ("nota de débito", 56),
    ("nota debito", 56),
    ("boleta exenta", 41),
    ("boleta", 39),
    ("guía de despacho", 52),
    ("guia de despacho", 52),
];

/// Descriptive names for the known codes; unseen codes get a generic name.
fn type_name(code: i32) -> String {
    match code {
        33 => "Factura Electrónica",
        34 => "Factura Exenta Electrónica",
        35 => "Boleta Electrónica",
        38 => "Boleta Exenta Electrónica",
        39 => "Boleta Electrónica",
        40 | 43 => "Liquidación Factura Electrónica",
        45 => "Factura de Compra Electrónica",
        46 => "Factura de Compra",
        48 => "Comprobante de Pago Electrónico",
        52 => "Guía de Despacho",
        56 => "Nota de Débito Electrónica",
        60 => "Nota de Crédito",
        61 => "Nota de Crédito Electrónica",
        110 => "Factura de Exportación Electrónica",
        111 => "Nota de Débito de Exportación Electrónica",
        112 => "Nota de Crédito de Exportación Electrónica",
        other => return format!("DTE Tipo {other}"),
    }
    .to_string()
}

/// Maps raw documents for one company.
#[derive(Debug, Clone)]
pub struct DocumentMapper {
    company: CompanyRecord,
}

impl DocumentMapper {
    pub fn new(company: CompanyRecord) -> Self {
        Self { company }
    }

    /// Map a validated raw document into a complete record, dispatching on
    /// the incoming shape.
    pub fn map(
        &self,
        tagged: &TaggedDocument,
        now: DateTime<Utc>,
    ) -> Result<MappedDocument, MappingFailure> {
        match &tagged.document {
            RawDocument::Portal(doc) => self.map_portal(doc, tagged.operation, now),
            RawDocument::Canonical(doc) => self.map_canonical(doc, tagged.operation, now),
        }
    }

    fn map_portal(
        &self,
        doc: &PortalDocument,
        operation: OperationKind,
        now: DateTime<Utc>,
    ) -> Result<MappedDocument, MappingFailure> {
        let folio = doc
            .det_folio
            .as_ref()
            .and_then(NumberOrText::as_i64)
            .unwrap_or(0);
        let type_code = doc
            .det_tipo_doc
            .as_ref()
            .or(doc.cod_t_doc.as_ref())
            .map(resolve_type_code)
            .unwrap_or(33);
        let issue_date = self.parse_issue_date(doc.det_fch_doc.as_deref(), folio, now);

        let counterparty = self.portal_counterparty(doc)?;
        let counterparty_name = doc
            .det_rzn_soc
            .clone()
            .unwrap_or_else(|| match operation {
                OperationKind::Received => "Proveedor".to_string(),
                OperationKind::Issued => "Cliente".to_string(),
            });

        let (issuer, issuer_name, recipient, recipient_name) = match operation {
            OperationKind::Received => (
                counterparty,
                counterparty_name,
                self.company.tax_id,
                self.company_name(),
            ),
            OperationKind::Issued => (
                self.company.tax_id,
                self.company_name(),
                counterparty,
                counterparty_name,
            ),
        };

        let net_amount = self.amount(doc.det_mnt_neto.as_ref(), folio, "detMntNeto");
        let tax_amount = self.amount(doc.det_mnt_iva.as_ref(), folio, "detMntIVA");
        let exempt_amount = self.amount(doc.det_mnt_exe.as_ref(), folio, "detMntExe");
        let total_amount = self.amount(doc.det_mnt_total.as_ref(), folio, "detMntTotal");

        let record = DocumentRecord {
            id: DocumentId::new(),
            company_id: Some(self.company.id),
            issuer,
            issuer_name,
            issuer_address: String::new(),
            issuer_activity: String::new(),
            recipient,
            recipient_name,
            recipient_address: String::new(),
            type_code,
            folio,
            issue_date,
            status: DocumentStatus::Accepted,
            net_amount,
            tax_amount,
            exempt_amount,
            total_amount,
            sii_track_id: track_id(folio, now),
            raw_data: raw_payload(doc),
            reference_folio: doc.det_folio_ref.as_ref().and_then(NumberOrText::as_i64),
            reference_type_code: doc
                .det_tipo_doc_ref
                .as_ref()
                .and_then(NumberOrText::as_i64)
                .map(|c| c as i32),
            reference_document: None,
            created_at: now,
            updated_at: now,
        };

        Ok(MappedDocument {
            document_type: catalogue_row(type_code),
            record,
        })
    }

    fn map_canonical(
        &self,
        doc: &CanonicalDocument,
        operation: OperationKind,
        now: DateTime<Utc>,
    ) -> Result<MappedDocument, MappingFailure> {
        let folio = doc.folio.as_ref().and_then(NumberOrText::as_i64).unwrap_or(0);
        let type_code = doc
            .tipo_documento
            .as_ref()
            .map(resolve_type_code)
            .unwrap_or(33);
        let issue_date = self.parse_issue_date(doc.fecha_emision.as_deref(), folio, now);

        let (issuer, issuer_name, recipient, recipient_name) = match operation {
            OperationKind::Received => {
                let issuer = parse_counterparty(doc.rut_emisor.as_deref(), "issuer")?;
                (
                    issuer,
                    doc.razon_social_emisor
                        .clone()
                        .unwrap_or_else(|| "Proveedor".to_string()),
                    self.company.tax_id,
                    self.company_name(),
                )
            }
            OperationKind::Issued => {
                let recipient = parse_counterparty(doc.rut_receptor.as_deref(), "recipient")?;
                (
                    self.company.tax_id,
                    self.company_name(),
                    recipient,
                    doc.razon_social_receptor
                        .clone()
                        .unwrap_or_else(|| "Cliente".to_string()),
                )
            }
        };

        let total_amount = self.amount(doc.monto_total.as_ref(), folio, "monto_total");
        // Rows without an explicit net fall back to the total.
        let net_amount = match &doc.monto_neto {
            Some(value) => self.amount(Some(value), folio, "monto_neto"),
            None => total_amount,
        };
        let tax_amount = self.amount(doc.monto_iva.as_ref(), folio, "monto_iva");
        let exempt_amount = self.amount(doc.monto_exento.as_ref(), folio, "monto_exento");

        let record = DocumentRecord {
            id: DocumentId::new(),
            company_id: Some(self.company.id),
            issuer,
            issuer_name,
            issuer_address: String::new(),
            issuer_activity: String::new(),
            recipient,
            recipient_name,
            recipient_address: String::new(),
            type_code,
            folio,
            issue_date,
            status: DocumentStatus::Accepted,
            net_amount,
            tax_amount,
            exempt_amount,
            total_amount,
            sii_track_id: track_id(folio, now),
            raw_data: raw_payload(doc),
            reference_folio: None,
            reference_type_code: None,
            reference_document: None,
            created_at: now,
            updated_at: now,
        };

        Ok(MappedDocument {
            document_type: catalogue_row(type_code),
            record,
        })
    }

    fn company_name(&self) -> String {
        if self.company.business_name.is_empty() {
            self.company.display_name.clone()
        } else {
            self.company.business_name.clone()
        }
    }

    fn portal_counterparty(&self, doc: &PortalDocument) -> Result<Rut, MappingFailure> {
        let digits = doc
            .det_rut_doc
            .as_ref()
            .and_then(NumberOrText::as_i64)
            .ok_or_else(|| MappingFailure::new("row is missing the counterparty identifier"))?;
        let digits = u32::try_from(digits)
            .map_err(|_| MappingFailure::new(format!("counterparty digits out of range: {digits}")))?;
        let dv = doc
            .det_dv_doc
            .as_deref()
            .and_then(|s| s.trim().chars().next())
            .ok_or_else(|| MappingFailure::new("row is missing the counterparty check digit"))?;
        Rut::new(digits, dv)
            .map_err(|e| MappingFailure::new(format!("counterparty tax id invalid: {e}")))
    }

    fn parse_issue_date(
        &self,
        rendered: Option<&str>,
        folio: i64,
        now: DateTime<Utc>,
    ) -> NaiveDate {
        match rendered {
            Some(text) => match parse_flexible_date(text) {
                Ok(date) => date,
                Err(_) => {
                    tracing::warn!(folio, date = text, "unparseable issue date, using today");
                    now.date_naive()
                }
            },
            None => now.date_naive(),
        }
    }

    fn amount(&self, value: Option<&NumberOrText>, folio: i64, field: &str) -> Decimal {
        let Some(value) = value else {
            return Decimal::ZERO;
        };
        match value {
            NumberOrText::Int(n) => Decimal::from(*n),
            NumberOrText::Float(f) => Decimal::try_from(*f).unwrap_or(Decimal::ZERO),
            NumberOrText::Text(s) => {
                let (amount, degraded) = parse_amount_lenient(s);
                if degraded {
                    tracing::warn!(folio, field, value = s, "unparseable amount, using zero");
                }
                amount
            }
        }
    }
}

/// Resolve a raw type value to a numeric code: integers pass through,
/// strings go through the name table, then digit extraction, then the
/// electronic-invoice default.
fn resolve_type_code(value: &NumberOrText) -> i32 {
    if let Some(code) = value.as_i64() {
        return code as i32;
    }
    let text = value.as_text().to_lowercase();
    for (needle, code) in TYPE_NAME_TABLE {
        if text.contains(needle) {
            return *code;
        }
    }
    first_integer(&text).unwrap_or(33)
}

fn parse_counterparty(rendered: Option<&str>, side: &str) -> Result<Rut, MappingFailure> {
    let rendered =
        rendered.ok_or_else(|| MappingFailure::new(format!("row is missing the {side} tax id")))?;
    Rut::parse(rendered)
        .map_err(|e| MappingFailure::new(format!("{side} tax id invalid ({rendered}): {e}")))
}

/// Every mapped document carries a synthetic portal correlation id.
fn track_id(folio: i64, now: DateTime<Utc>) -> String {
    let folio_part = if folio > 0 {
        folio.to_string()
    } else {
        "NA".to_string()
    };
    format!("TRK{}{}", now.timestamp(), folio_part)
}

fn catalogue_row(code: i32) -> DocumentTypeRecord {
    DocumentTypeRecord {
        code,
        name: type_name(code),
        category: DocumentCategory::from_code(code),
        is_dte: true,
        requires_recipient: true,
        is_active: true,
    }
}

fn raw_payload<T: serde::Serialize>(doc: &T) -> Value {
    serde_json::to_value(doc).unwrap_or(Value::Null)
}
