//! Request message builders
//!
//! Each builder is a pure function of its input. Invalid input produces an
//! empty buffer and a logged diagnostic; the `try_` variants expose the error
//! instead.

use crate::bitmap::Bitmap;
use crate::de48::{SubElement, build_de48, tags};
use crate::field;
use crate::mti::Mti;
use crate::stan::synthetic_stan;
use bytes::{BufMut, BytesMut};
use chrono::NaiveDateTime;
use powercard_core::encoding::{is_digits, is_hex, mask_pan};
use powercard_core::{PowerCardError, PowerCardResult};
use std::collections::BTreeMap;

/// Processing code sent on reversals
pub const REVERSAL_PROCESSING_CODE: &str = "000000";

/// POS entry mode sent on reversals
pub const REVERSAL_POS_ENTRY_MODE: &str = "051";

/// DE2 value used when a reversal is built without the card number
pub const PLACEHOLDER_PAN: &str = "0000000000000000";

/// Length of a PIN block in hex characters (8 bytes)
pub const PIN_BLOCK_HEX_LEN: usize = 16;

/// One data element value together with its encoding rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataElement {
    /// Right-justified, zero-padded ASCII digits
    Numeric { value: String, width: usize },
    /// Left-justified, space-padded ASCII text
    Alpha { value: String, width: usize },
    /// Fixed number of raw bytes given as hex
    Binary { hex: String, len: usize },
    /// One length byte and raw bytes given as hex
    LlHex(String),
    /// Primary account number, possibly containing mask characters
    Pan(String),
    /// DE48 sub-element block
    AdditionalData(Vec<SubElement>),
}

impl DataElement {
    pub fn numeric(value: impl Into<String>, width: usize) -> Self {
        DataElement::Numeric { value: value.into(), width }
    }

    pub fn alpha(value: impl Into<String>, width: usize) -> Self {
        DataElement::Alpha { value: value.into(), width }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> PowerCardResult<Vec<u8>> {
        match self {
            DataElement::Numeric { value, width } => field::fixed_numeric(value, *width),
            DataElement::Alpha { value, width } => {
                if !value.is_ascii() || value.len() > *width {
                    return Err(PowerCardError::InvalidData(format!(
                        "Text of {} bytes does not fit {}-character field",
                        value.len(),
                        width
                    )));
                }
                Ok(format!("{:<width$}", value, width = *width).into_bytes())
            }
            DataElement::Binary { hex, len } => field::binary_fixed(hex, *len),
            DataElement::LlHex(hex) => field::ll_hex(hex),
            DataElement::Pan(pan) => field::pan(pan),
            DataElement::AdditionalData(elements) => build_de48(elements),
        }
    }
}

/// Ordered mapping from field number to data element
///
/// The bitmap is always derived from the keys, so the two cannot disagree.
/// Field 1 is refused: only the primary bitmap is ever produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataElementSet {
    elements: BTreeMap<u8, DataElement>,
}

impl DataElementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a data element
    pub fn insert(&mut self, field: u8, element: DataElement) -> PowerCardResult<()> {
        if !(2..=64).contains(&field) {
            return Err(PowerCardError::InvalidData(format!(
                "Field {} cannot be set in a primary-bitmap message",
                field
            )));
        }
        self.elements.insert(field, element);
        Ok(())
    }

    pub fn get(&self, field: u8) -> Option<&DataElement> {
        self.elements.get(&field)
    }

    pub fn contains(&self, field: u8) -> bool {
        self.elements.contains_key(&field)
    }

    /// Present field numbers, ascending
    pub fn fields(&self) -> Vec<u8> {
        self.elements.keys().copied().collect()
    }

    pub fn bitmap(&self) -> Bitmap {
        let mut bitmap = Bitmap::new();
        for &field in self.elements.keys() {
            // keys are range-checked on insert
            let _ = bitmap.set(field);
        }
        bitmap
    }

    /// Encode as application data: MTI, bitmap, then elements in field order
    pub fn encode(&self, mti: Mti) -> PowerCardResult<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_slice(mti.as_str().as_bytes());
        buf.put_slice(&self.bitmap().to_bytes());
        for (field, element) in &self.elements {
            let encoded = element.encode().map_err(|e| {
                PowerCardError::InvalidData(format!("DE{}: {}", field, e))
            })?;
            buf.put_slice(&encoded);
        }
        Ok(buf.to_vec())
    }
}

/// Input for an authorization (0100) request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub pan: String,
    pub processing_code: String,
    /// Amount in minor currency units
    pub amount: u64,
    pub stan: String,
    pub pos_entry_mode: String,
    pub currency_code: String,
    /// ICC (EMV TLV) data as hex
    pub icc_data_hex: String,
    /// Encrypted PIN block as hex, when a PIN was entered
    pub pin_block_hex: Option<String>,
}

/// Input for a reversal (0400) request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalRequest {
    pub rrn: String,
    /// Amount in minor currency units
    pub amount: u64,
    pub stan: Option<String>,
    pub currency_code: String,
    pub reason: Option<String>,
    /// Card number of the original transaction, if the terminal still has it
    pub pan: Option<String>,
}

/// Input for a network management (1804) request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkManagementRequest {
    /// Function code, e.g. `831` for an echo test
    pub function_code: String,
    pub stan: String,
    /// Local transmission date and time
    pub transmission_time: NaiveDateTime,
}

/// Build a 0100 authorization request; empty on invalid input
pub fn build_authorization_request(request: &AuthorizationRequest) -> Vec<u8> {
    match try_build_authorization_request(request) {
        Ok(data) => data,
        Err(e) => {
            log::error!(
                "Failed to build authorization request for PAN {}: {}",
                mask_pan(&request.pan),
                e
            );
            Vec::new()
        }
    }
}

pub fn try_build_authorization_request(request: &AuthorizationRequest) -> PowerCardResult<Vec<u8>> {
    let mut set = DataElementSet::new();
    set.insert(2, DataElement::Pan(request.pan.clone()))?;
    set.insert(3, DataElement::numeric(&request.processing_code, 6))?;
    set.insert(4, DataElement::numeric(request.amount.to_string(), 12))?;
    set.insert(11, DataElement::numeric(&request.stan, 6))?;
    set.insert(22, DataElement::numeric(&request.pos_entry_mode, 3))?;
    set.insert(49, DataElement::numeric(&request.currency_code, 3))?;

    match request.pin_block_hex.as_deref() {
        Some(pin) if !pin.is_empty() => {
            if pin.len() == PIN_BLOCK_HEX_LEN && is_hex(pin) {
                set.insert(
                    52,
                    DataElement::Binary {
                        hex: pin.to_string(),
                        len: PIN_BLOCK_HEX_LEN / 2,
                    },
                )?;
            } else {
                log::warn!(
                    "PIN block must be {} hex characters, got {}; DE52 omitted",
                    PIN_BLOCK_HEX_LEN,
                    pin.len()
                );
            }
        }
        _ => {}
    }

    set.insert(55, DataElement::LlHex(request.icc_data_hex.clone()))?;
    let data = set.encode(Mti::AuthorizationRequest)?;
    log::debug!(
        "Built 0100 for PAN {} with bitmap {}",
        mask_pan(&request.pan),
        set.bitmap().to_hex()
    );
    Ok(data)
}

/// Build a 0400 reversal request; empty on invalid input
pub fn build_reversal_request(request: &ReversalRequest) -> Vec<u8> {
    match try_build_reversal_request(request) {
        Ok(data) => data,
        Err(e) => {
            log::error!("Failed to build reversal for RRN {}: {}", request.rrn, e);
            Vec::new()
        }
    }
}

pub fn try_build_reversal_request(request: &ReversalRequest) -> PowerCardResult<Vec<u8>> {
    let stan = match request.stan.as_deref() {
        Some(stan) if !stan.trim().is_empty() => stan.to_string(),
        _ => {
            let stan = synthetic_stan();
            log::warn!(
                "No STAN for reversal of RRN {}; using clock-derived {}",
                request.rrn,
                stan
            );
            stan
        }
    };
    let pan = request.pan.as_deref().unwrap_or(PLACEHOLDER_PAN);

    let mut set = DataElementSet::new();
    set.insert(2, DataElement::Pan(pan.to_string()))?;
    set.insert(3, DataElement::numeric(REVERSAL_PROCESSING_CODE, 6))?;
    set.insert(4, DataElement::numeric(request.amount.to_string(), 12))?;
    set.insert(11, DataElement::numeric(stan, 6))?;
    set.insert(22, DataElement::numeric(REVERSAL_POS_ENTRY_MODE, 3))?;
    set.insert(37, DataElement::alpha(&request.rrn, 12))?;
    set.insert(49, DataElement::numeric(&request.currency_code, 3))?;

    let data = set.encode(Mti::ReversalRequest)?;
    log::debug!(
        "Built 0400 for RRN {} (reason: {})",
        request.rrn,
        request.reason.as_deref().unwrap_or("unspecified")
    );
    Ok(data)
}

/// Build a 1804 network management request; empty on invalid input
pub fn build_network_management_request(request: &NetworkManagementRequest) -> Vec<u8> {
    let mut set = DataElementSet::new();
    let result = set
        .insert(11, DataElement::numeric(&request.stan, 6))
        .and_then(|_| {
            set.insert(
                12,
                DataElement::numeric(request.transmission_time.format("%y%m%d%H%M%S").to_string(), 12),
            )
        })
        .and_then(|_| set.insert(24, DataElement::numeric(&request.function_code, 3)))
        .and_then(|_| set.encode(Mti::NetworkManagementRequest));
    match result {
        Ok(data) => data,
        Err(e) => {
            log::error!(
                "Failed to build network management request {}: {}",
                request.function_code,
                e
            );
            Vec::new()
        }
    }
}

/// Optional inputs to [`build_de48_for_authorization`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct De48Options {
    pub network_id: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_facilitator_id: Option<String>,
    pub sub_merchant_id: Option<String>,
    pub dcc_indicator: Option<String>,
}

const TRANSACTION_ID_LEN: usize = 15;
const PAYMENT_FACILITATOR_ID_LEN: usize = 11;
const SUB_MERCHANT_ID_LEN: usize = 15;
const ARQC_RESULTS: [&str; 4] = ["0", "1", "2", "3"];
const DCC_INDICATORS: [&str; 3] = ["0", "1", "2"];

/// Two-digit brand code guessed from the kernel's card brand label
pub fn brand_code(card_brand: &str) -> &'static str {
    let brand = card_brand.to_ascii_lowercase();
    if brand.contains("master") || brand.contains("maestro") || brand == "mc" {
        "02"
    } else if brand.contains("amex") || brand.contains("american") {
        "03"
    } else if brand.contains("diners") {
        "04"
    } else if brand.contains("jcb") {
        "05"
    } else {
        "01"
    }
}

/// Network id implied by the brand label: Plus `0004`, Visa `0002`
pub fn derived_network_id(card_brand: &str) -> Option<&'static str> {
    let brand = card_brand.to_ascii_lowercase();
    if brand.contains("plus") {
        Some("0004")
    } else if brand.contains("visa") {
        Some("0002")
    } else {
        None
    }
}

/// Assemble the authorization DE48 sub-elements
///
/// Brand, ARQC result and message reason code are mandatory; if any of them
/// is invalid the result is empty. Optional sub-elements are dropped with a
/// warning when they fail their length or value check.
pub fn build_de48_for_authorization(
    card_brand: &str,
    arqc_result: &str,
    message_reason_code: &str,
    options: &De48Options,
) -> Vec<SubElement> {
    match try_build_de48_for_authorization(card_brand, arqc_result, message_reason_code, options) {
        Ok(elements) => elements,
        Err(e) => {
            log::error!("Failed to build DE48 for {}: {}", card_brand, e);
            Vec::new()
        }
    }
}

fn try_build_de48_for_authorization(
    card_brand: &str,
    arqc_result: &str,
    message_reason_code: &str,
    options: &De48Options,
) -> PowerCardResult<Vec<SubElement>> {
    if !ARQC_RESULTS.contains(&arqc_result) {
        return Err(PowerCardError::InvalidData(format!(
            "Unknown ARQC result {:?}",
            arqc_result
        )));
    }
    if message_reason_code.len() != 4 || !is_digits(message_reason_code) {
        return Err(PowerCardError::InvalidData(format!(
            "Message reason code must be 4 digits: {:?}",
            message_reason_code
        )));
    }

    let mut elements = vec![
        SubElement::new(tags::CARD_BRAND, brand_code(card_brand))?,
        SubElement::new(tags::ARQC_RESULT, arqc_result)?,
        SubElement::new(tags::MESSAGE_REASON, message_reason_code)?,
    ];

    let network_id = options
        .network_id
        .clone()
        .or_else(|| derived_network_id(card_brand).map(str::to_string));
    if let Some(id) = network_id {
        if id.len() == 4 && is_digits(&id) {
            elements.push(SubElement::new(tags::NETWORK_ID, id)?);
        } else {
            log::warn!("Network id {:?} is not 4 digits; omitted", id);
        }
    }

    if let Some(id) = &options.transaction_id {
        if id.len() == TRANSACTION_ID_LEN && id.chars().all(|c| c.is_ascii_alphanumeric()) {
            elements.push(SubElement::new(tags::TRANSACTION_ID, id.as_str())?);
        } else {
            log::warn!("Transaction id must be {} alphanumerics; omitted", TRANSACTION_ID_LEN);
        }
    }

    if let Some(id) = &options.payment_facilitator_id {
        if !id.is_empty() && id.len() <= PAYMENT_FACILITATOR_ID_LEN && is_digits(id) {
            let padded = format!("{:0>width$}", id, width = PAYMENT_FACILITATOR_ID_LEN);
            elements.push(SubElement::new(tags::PAYMENT_FACILITATOR_ID, padded)?);
        } else {
            log::warn!("Payment facilitator id {:?} invalid; omitted", id);
        }
    }

    if let Some(id) = &options.sub_merchant_id {
        if !id.is_empty() && id.len() <= SUB_MERCHANT_ID_LEN && id.is_ascii() {
            let padded = format!("{:<width$}", id, width = SUB_MERCHANT_ID_LEN);
            elements.push(SubElement::new(tags::SUB_MERCHANT_ID, padded)?);
        } else {
            log::warn!("Sub-merchant id {:?} invalid; omitted", id);
        }
    }

    if let Some(dcc) = &options.dcc_indicator {
        if DCC_INDICATORS.contains(&dcc.as_str()) {
            elements.push(SubElement::new(tags::DCC_INDICATOR, dcc.as_str())?);
        } else {
            log::warn!("DCC indicator {:?} not recognised; omitted", dcc);
        }
    }

    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use powercard_core::encoding::bytes_to_hex;

    fn auth_request(pin: Option<&str>) -> AuthorizationRequest {
        AuthorizationRequest {
            pan: "4761739001010010".to_string(),
            processing_code: "000000".to_string(),
            amount: 1500,
            stan: "000123".to_string(),
            pos_entry_mode: "051".to_string(),
            currency_code: "504".to_string(),
            icc_data_hex: "9F2608AABBCCDDEEFF0011".to_string(),
            pin_block_hex: pin.map(str::to_string),
        }
    }

    fn bitmap_hex(data: &[u8]) -> String {
        bytes_to_hex(&data[4..12])
    }

    #[test]
    fn test_authorization_without_pin() {
        let data = build_authorization_request(&auth_request(None));
        assert_eq!(&data[..4], b"0100");
        assert_eq!(bitmap_hex(&data), "7020040000008200");
        // MTI + bitmap + DE2(9) + DE3(6) + DE4(12) + DE11(6) + DE22(3) + DE49(3) + DE55(12)
        assert_eq!(data.len(), 4 + 8 + 9 + 6 + 12 + 6 + 3 + 3 + 12);
        assert_eq!(&data[21..27], b"000000");
        assert_eq!(&data[27..39], b"000000001500");
    }

    #[test]
    fn test_authorization_with_pin() {
        let data = build_authorization_request(&auth_request(Some("0123456789ABCDEF")));
        assert_eq!(bitmap_hex(&data), "7020040000009200");
        let pin_at = 4 + 8 + 9 + 6 + 12 + 6 + 3 + 3;
        assert_eq!(
            &data[pin_at..pin_at + 8],
            &[0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]
        );
    }

    #[test]
    fn test_authorization_bad_pin_is_omitted() {
        let data = build_authorization_request(&auth_request(Some("0123")));
        assert_eq!(bitmap_hex(&data), "7020040000008200");
        let data = build_authorization_request(&auth_request(Some("")));
        assert_eq!(bitmap_hex(&data), "7020040000008200");
    }

    #[test]
    fn test_authorization_invalid_input_is_empty() {
        let mut request = auth_request(None);
        request.amount = 1_000_000_000_000;
        assert!(build_authorization_request(&request).is_empty());

        let mut request = auth_request(None);
        request.icc_data_hex = "AB".repeat(300);
        assert!(build_authorization_request(&request).is_empty());
    }

    #[test]
    fn test_reversal_fields() {
        let request = ReversalRequest {
            rrn: "123456789012".to_string(),
            amount: 2500,
            stan: Some("000777".to_string()),
            currency_code: "504".to_string(),
            reason: Some("timeout".to_string()),
            pan: None,
        };
        let data = build_reversal_request(&request);
        assert_eq!(&data[..4], b"0400");
        let bitmap = Bitmap::from_bytes(data[4..12].try_into().unwrap());
        assert_eq!(bitmap.fields(), vec![2, 3, 4, 11, 22, 37, 49]);
        assert!(data.windows(12).any(|w| w == b"123456789012"));
        assert!(data.ends_with(b"123456789012504"));
    }

    #[test]
    fn test_reversal_synthetic_stan() {
        let request = ReversalRequest {
            rrn: "000000000042".to_string(),
            amount: 1,
            stan: None,
            currency_code: "840".to_string(),
            reason: None,
            pan: Some("4111111111111111".to_string()),
        };
        let data = build_reversal_request(&request);
        // DE2 (9) + DE3 (6) + DE4 (12) then DE11
        let stan = &data[12 + 9 + 6 + 12..12 + 9 + 6 + 12 + 6];
        assert!(stan.iter().all(u8::is_ascii_digit));
    }

    #[test]
    fn test_network_management_request() {
        let request = NetworkManagementRequest {
            function_code: "831".to_string(),
            stan: "000010".to_string(),
            transmission_time: chrono::NaiveDate::from_ymd_opt(2026, 3, 9)
                .unwrap()
                .and_hms_opt(14, 5, 7)
                .unwrap(),
        };
        let data = build_network_management_request(&request);
        assert_eq!(&data[..4], b"1804");
        assert_eq!(&data[12..], b"000010260309140507831");
    }

    #[test]
    fn test_data_element_set_rejects_field_one() {
        let mut set = DataElementSet::new();
        assert!(set.insert(1, DataElement::LlHex(String::new())).is_err());
        assert!(set.insert(65, DataElement::LlHex(String::new())).is_err());
    }

    #[test]
    fn test_de48_for_visa() {
        let elements = build_de48_for_authorization("VISA CREDIT", "1", "1511", &De48Options::default());
        let tags: Vec<&str> = elements.iter().map(SubElement::tag).collect();
        assert_eq!(tags, vec!["001", "002", "003", "004"]);
        assert_eq!(elements[0].value(), "01");
        assert_eq!(elements[3].value(), "0002");
    }

    #[test]
    fn test_de48_optional_padding_and_filters() {
        let options = De48Options {
            network_id: Some("12".to_string()),
            transaction_id: Some("ABC".to_string()),
            payment_facilitator_id: Some("12345".to_string()),
            sub_merchant_id: Some("SHOP42".to_string()),
            dcc_indicator: Some("1".to_string()),
        };
        let elements = build_de48_for_authorization("MasterCard", "0", "0000", &options);
        let find = |tag: &str| elements.iter().find(|e| e.tag() == tag).map(|e| e.value().to_string());
        assert_eq!(find(tags::CARD_BRAND).as_deref(), Some("02"));
        assert_eq!(find(tags::NETWORK_ID), None);
        assert_eq!(find(tags::TRANSACTION_ID), None);
        assert_eq!(find(tags::PAYMENT_FACILITATOR_ID).as_deref(), Some("00000012345"));
        assert_eq!(find(tags::SUB_MERCHANT_ID).as_deref(), Some("SHOP42         "));
        assert_eq!(find(tags::DCC_INDICATOR).as_deref(), Some("1"));
    }

    #[test]
    fn test_de48_invalid_mandatory_is_empty() {
        assert!(build_de48_for_authorization("visa", "9", "1511", &De48Options::default()).is_empty());
        assert!(build_de48_for_authorization("visa", "1", "15", &De48Options::default()).is_empty());
    }

    #[test]
    fn test_brand_codes() {
        assert_eq!(brand_code("Visa"), "01");
        assert_eq!(brand_code("MASTERCARD"), "02");
        assert_eq!(brand_code("American Express"), "03");
        assert_eq!(brand_code("Diners Club"), "04");
        assert_eq!(brand_code("JCB"), "05");
        assert_eq!(brand_code("UnknownPay"), "01");
        assert_eq!(derived_network_id("Visa Plus"), Some("0004"));
        assert_eq!(derived_network_id("amex"), None);
    }
}
