//! # EPCIS Commissioning Documents
//!
//! Renders PRINTED serials into an EPCIS 2.0 commissioning `ObjectEvent`,
//! either as XML or as JSON-LD.
//!
//! ## Event Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ObjectEvent                                                            │
//! │  ├── WHAT   epcList      urn:epc:id:sgtin:<prefix>.<itemref>.<serial>  │
//! │  ├── WHEN   eventTime    + eventTimeZoneOffset                         │
//! │  ├── WHERE  bizLocation  facility GLN (+ optional readPoint)           │
//! │  ├── WHY    action=ADD, bizStep=commissioning                          │
//! │  └── ILMD   lotNumber, itemExpirationDate                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Facility and company identifiers come in through [`EpcisConfig`] at call
//! time; nothing here reads global settings.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use thiserror::Error;

use crate::error::ValidationError;
use crate::types::{SerialNumber, SerialStatus};
use crate::validation::{normalize_gtin, validate_company_prefix, validate_gtin};

/// EPCIS 2.0 XML namespace.
pub const EPCIS_XML_NAMESPACE: &str = "urn:epcglobal:epcis:xsd:2";

/// CBV master data namespace used for ILMD fields in XML.
pub const CBV_MDA_NAMESPACE: &str = "urn:epcglobal:cbv:mda";

/// EPCIS 2.0 JSON-LD context.
pub const EPCIS_JSON_CONTEXT: &str = "https://ref.gs1.org/standards/epcis/2.0.0/epcis-context.jsonld";

const COMMISSIONING_BIZ_STEP: &str = "urn:epcglobal:cbv:bizstep:commissioning";
const UTC_OFFSET: &str = "+00:00";
const ROOT_ELEMENT: &str = "epcis:EPCISDocument";

// =============================================================================
// Errors
// =============================================================================

/// Reasons a set of serials can't be encoded.
#[derive(Debug, Error)]
pub enum EpcisError {
    #[error("No serials to encode")]
    Empty,

    #[error("Serial {serial} is {status}, only PRINTED serials can be commissioned")]
    NotPrinted { serial: String, status: SerialStatus },

    #[error("Serial {0} has no lot or expiration date")]
    MissingLot(String),

    #[error("Serials belong to different lots ({first} and {other})")]
    MixedLots { first: String, other: String },

    #[error("GTIN {gtin} does not start with company prefix {prefix}")]
    PrefixMismatch { gtin: String, prefix: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("XML rendering failed: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Rendered XML is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("JSON rendering failed: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Configuration
// =============================================================================

/// Facility and company identifiers used when building events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpcisConfig {
    /// Business location, e.g. `urn:epc:id:sgln:4006381.00000.0`.
    pub facility_gln: String,

    /// GS1 company prefix (6 to 12 digits).
    pub company_prefix: String,

    /// Optional read point; omitted from the event when absent.
    pub read_point: Option<String>,
}

impl EpcisConfig {
    /// Creates a validated configuration.
    pub fn new(facility_gln: impl Into<String>, company_prefix: impl Into<String>) -> Result<Self, EpcisError> {
        let facility_gln = facility_gln.into();
        let company_prefix = company_prefix.into();

        if facility_gln.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "facility_gln".to_string(),
            }
            .into());
        }
        validate_company_prefix(&company_prefix)?;

        Ok(EpcisConfig {
            facility_gln,
            company_prefix,
            read_point: None,
        })
    }

    /// Sets the read point.
    pub fn with_read_point(mut self, read_point: impl Into<String>) -> Self {
        self.read_point = Some(read_point.into());
        self
    }
}

/// Output format of [`encode_commissioning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Xml,
    Json,
}

// =============================================================================
// SGTIN
// =============================================================================

/// Builds the SGTIN EPC URI for one serial.
///
/// The GTIN is padded to 14 digits; its indicator digit is moved in front of
/// the item reference as GS1 requires.
///
/// ```rust
/// use xtrace_core::epcis::sgtin_uri;
///
/// let uri = sgtin_uri("4006381", "4006381333931", "Ab12").unwrap();
/// assert_eq!(uri, "urn:epc:id:sgtin:4006381.033393.Ab12");
/// ```
pub fn sgtin_uri(company_prefix: &str, gtin: &str, serial: &str) -> Result<String, EpcisError> {
    validate_company_prefix(company_prefix)?;
    validate_gtin(gtin)?;

    let gtin14 = normalize_gtin(gtin);
    let prefix_end = 1 + company_prefix.len();

    if &gtin14[1..prefix_end] != company_prefix {
        return Err(EpcisError::PrefixMismatch {
            gtin: gtin14,
            prefix: company_prefix.to_string(),
        });
    }

    let item_reference = format!("{}{}", &gtin14[..1], &gtin14[prefix_end..13]);
    Ok(format!(
        "urn:epc:id:sgtin:{}.{}.{}",
        company_prefix, item_reference, serial
    ))
}

// =============================================================================
// Commissioning Event
// =============================================================================

/// A commissioning event over one lot of PRINTED serials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissioningEvent {
    pub event_time: DateTime<Utc>,
    pub epcs: Vec<String>,
    pub batch_lot: String,
    pub expiration_date: NaiveDate,
    pub biz_location: String,
    pub read_point: Option<String>,
}

impl CommissioningEvent {
    /// Builds the event; every serial must be PRINTED and share one lot and
    /// expiration date.
    pub fn from_serials(
        config: &EpcisConfig,
        product_gtin: &str,
        serials: &[SerialNumber],
        event_time: DateTime<Utc>,
    ) -> Result<Self, EpcisError> {
        let first = serials.first().ok_or(EpcisError::Empty)?;
        let (batch_lot, expiration_date) = lot_of(first)?;

        let mut epcs = Vec::with_capacity(serials.len());
        for serial in serials {
            if serial.status != SerialStatus::Printed {
                return Err(EpcisError::NotPrinted {
                    serial: serial.full_serial_number.clone(),
                    status: serial.status,
                });
            }

            let (lot, expiry) = lot_of(serial)?;
            if lot != batch_lot || expiry != expiration_date {
                return Err(EpcisError::MixedLots {
                    first: batch_lot.to_string(),
                    other: lot.to_string(),
                });
            }

            epcs.push(sgtin_uri(
                &config.company_prefix,
                product_gtin,
                &serial.full_serial_number,
            )?);
        }

        Ok(CommissioningEvent {
            event_time,
            epcs,
            batch_lot: batch_lot.to_string(),
            expiration_date,
            biz_location: config.facility_gln.clone(),
            read_point: config.read_point.clone(),
        })
    }

    /// Renders the event as an EPCIS 2.0 XML document.
    pub fn to_xml(&self, creation_date: DateTime<Utc>) -> Result<String, EpcisError> {
        let mut w = Writer::new_with_indent(Vec::with_capacity(512 + self.epcs.len() * 64), b' ', 2);

        write(&mut w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let created = timestamp(creation_date);
        let root = BytesStart::new(ROOT_ELEMENT).with_attributes([
            ("xmlns:epcis", EPCIS_XML_NAMESPACE),
            ("xmlns:cbvmda", CBV_MDA_NAMESPACE),
            ("schemaVersion", "2.0"),
            ("creationDate", created.as_str()),
        ]);
        write(&mut w, Event::Start(root))?;
        open(&mut w, "EPCISBody")?;
        open(&mut w, "EventList")?;
        open(&mut w, "ObjectEvent")?;

        text_element(&mut w, "eventTime", &timestamp(self.event_time))?;
        text_element(&mut w, "eventTimeZoneOffset", UTC_OFFSET)?;

        open(&mut w, "epcList")?;
        for epc in &self.epcs {
            text_element(&mut w, "epc", epc)?;
        }
        close(&mut w, "epcList")?;

        text_element(&mut w, "action", "ADD")?;
        text_element(&mut w, "bizStep", COMMISSIONING_BIZ_STEP)?;

        if let Some(read_point) = &self.read_point {
            open(&mut w, "readPoint")?;
            text_element(&mut w, "id", read_point)?;
            close(&mut w, "readPoint")?;
        }

        open(&mut w, "bizLocation")?;
        text_element(&mut w, "id", &self.biz_location)?;
        close(&mut w, "bizLocation")?;

        open(&mut w, "ilmd")?;
        text_element(&mut w, "cbvmda:lotNumber", &self.batch_lot)?;
        text_element(
            &mut w,
            "cbvmda:itemExpirationDate",
            &self.expiration_date.format("%Y-%m-%d").to_string(),
        )?;
        close(&mut w, "ilmd")?;

        close(&mut w, "ObjectEvent")?;
        close(&mut w, "EventList")?;
        close(&mut w, "EPCISBody")?;
        close(&mut w, ROOT_ELEMENT)?;

        Ok(String::from_utf8(w.into_inner())?)
    }

    /// Renders the event as an EPCIS 2.0 JSON-LD document.
    pub fn to_json(&self, creation_date: DateTime<Utc>) -> Result<serde_json::Value, EpcisError> {
        let document = JsonDocument {
            context: [EPCIS_JSON_CONTEXT],
            kind: "EPCISDocument",
            schema_version: "2.0",
            creation_date: timestamp(creation_date),
            epcis_body: JsonBody {
                event_list: vec![JsonObjectEvent {
                    kind: "ObjectEvent",
                    event_time: timestamp(self.event_time),
                    event_time_zone_offset: UTC_OFFSET,
                    epc_list: &self.epcs,
                    action: "ADD",
                    biz_step: "commissioning",
                    read_point: self.read_point.as_deref().map(|id| JsonId { id }),
                    biz_location: JsonId {
                        id: &self.biz_location,
                    },
                    ilmd: JsonIlmd {
                        lot_number: &self.batch_lot,
                        item_expiration_date: self.expiration_date.format("%Y-%m-%d").to_string(),
                    },
                }],
            },
        };

        Ok(serde_json::to_value(&document)?)
    }
}

/// Builds and renders a commissioning document in one call.
pub fn encode_commissioning(
    config: &EpcisConfig,
    product_gtin: &str,
    serials: &[SerialNumber],
    format: DocumentFormat,
    now: DateTime<Utc>,
) -> Result<String, EpcisError> {
    let event = CommissioningEvent::from_serials(config, product_gtin, serials, now)?;

    Ok(match format {
        DocumentFormat::Xml => event.to_xml(now)?,
        DocumentFormat::Json => serde_json::to_string_pretty(&event.to_json(now)?)?,
    })
}

// =============================================================================
// JSON-LD Shapes
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonDocument<'a> {
    #[serde(rename = "@context")]
    context: [&'static str; 1],
    #[serde(rename = "type")]
    kind: &'static str,
    schema_version: &'static str,
    creation_date: String,
    epcis_body: JsonBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonBody<'a> {
    event_list: Vec<JsonObjectEvent<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonObjectEvent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    event_time: String,
    event_time_zone_offset: &'static str,
    epc_list: &'a [String],
    action: &'static str,
    biz_step: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    read_point: Option<JsonId<'a>>,
    biz_location: JsonId<'a>,
    ilmd: JsonIlmd<'a>,
}

#[derive(Serialize)]
struct JsonId<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct JsonIlmd<'a> {
    #[serde(rename = "cbvmda:lotNumber")]
    lot_number: &'a str,
    #[serde(rename = "cbvmda:itemExpirationDate")]
    item_expiration_date: String,
}

// =============================================================================
// Helpers
// =============================================================================

fn lot_of(serial: &SerialNumber) -> Result<(&str, NaiveDate), EpcisError> {
    match (&serial.batch_lot, serial.expiration_date) {
        (Some(lot), Some(expiry)) => Ok((lot.as_str(), expiry)),
        _ => Err(EpcisError::MissingLot(serial.full_serial_number.clone())),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

type XmlWriter = Writer<Vec<u8>>;

fn write(w: &mut XmlWriter, event: Event<'_>) -> Result<(), EpcisError> {
    w.write_event(event).map_err(quick_xml::Error::from)?;
    Ok(())
}

fn open(w: &mut XmlWriter, name: &str) -> Result<(), EpcisError> {
    write(w, Event::Start(BytesStart::new(name)))
}

fn close(w: &mut XmlWriter, name: &str) -> Result<(), EpcisError> {
    write(w, Event::End(BytesEnd::new(name)))
}

/// `<name>text</name>` with the text escaped.
fn text_element(w: &mut XmlWriter, name: &str, text: &str) -> Result<(), EpcisError> {
    open(w, name)?;
    write(w, Event::Text(BytesText::new(text)))?;
    close(w, name)
}

// =============================================================================
// Unit Tests
// =============================================================================
