//! Card services injected into the payment flow

use powercard_core::encoding::mask_pan;
use powercard_core::{PowerCardError, PowerCardResult};
use powercard_iso::{AuthorizationRequest, StanGenerator};
use std::sync::Arc;

use crate::host::{HostApi, HostReply};

/// Produces the encrypted PIN block for a card
pub trait PinBlockSource: Send + Sync {
    /// Encrypted PIN block as hex, or `None` when no PIN was entered
    fn pin_block(&self, pan: &str) -> PowerCardResult<Option<String>>;
}

/// Card data read by the EMV kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardData {
    pub pan: String,
    /// DE55 TLV data as hex
    pub icc_data_hex: String,
    pub card_brand: String,
    pub pos_entry_mode: String,
}

/// Supplies card data and ICC tags for the current transaction
pub trait IccTagSource: Send + Sync {
    fn card_data(&self) -> PowerCardResult<CardData>;
}

/// Processing code for a goods and services purchase
pub const PURCHASE: &str = "000000";

/// Builds and sends authorizations from injected card services
pub struct PaymentService<H: HostApi, P: PinBlockSource, I: IccTagSource> {
    host: Arc<H>,
    pin_source: P,
    icc_source: I,
    stan: Arc<StanGenerator>,
    currency_code: String,
}

impl<H: HostApi, P: PinBlockSource, I: IccTagSource> PaymentService<H, P, I> {
    pub fn new(
        host: Arc<H>,
        pin_source: P,
        icc_source: I,
        stan: Arc<StanGenerator>,
        currency_code: impl Into<String>,
    ) -> Self {
        Self {
            host,
            pin_source,
            icc_source,
            stan,
            currency_code: currency_code.into(),
        }
    }

    /// Authorization request for the card currently presented
    pub fn prepare(&self, processing_code: &str, amount: u64) -> PowerCardResult<AuthorizationRequest> {
        let card = self.icc_source.card_data()?;
        if card.icc_data_hex.is_empty() {
            return Err(PowerCardError::InvalidData("No ICC data for DE55".to_string()));
        }
        let pin_block_hex = self.pin_source.pin_block(&card.pan)?;
        Ok(AuthorizationRequest {
            pan: card.pan,
            processing_code: processing_code.to_string(),
            amount,
            stan: self.stan.next(),
            pos_entry_mode: card.pos_entry_mode,
            currency_code: self.currency_code.clone(),
            icc_data_hex: card.icc_data_hex,
            pin_block_hex,
        })
    }

    /// Authorize a purchase of `amount` minor units
    pub async fn purchase(&self, amount: u64) -> PowerCardResult<HostReply> {
        let request = self.prepare(PURCHASE, amount)?;
        log::info!(
            "Authorizing {} for PAN {} (STAN {})",
            amount,
            mask_pan(&request.pan),
            request.stan
        );
        self.host.authorize(&request).await
    }
}
