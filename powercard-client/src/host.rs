//! Host API and its ISO 8583 implementation

use async_trait::async_trait;
use chrono::Local;
use powercard_core::encoding::mask_pan;
use powercard_core::{PowerCardError, PowerCardResult};
use powercard_iso::builder::{try_build_authorization_request, try_build_reversal_request};
use powercard_iso::response::{try_parse_network_management_response, try_parse_response};
use powercard_iso::{
    AuthorizationRequest, Mti, NetworkManagementRequest, NetworkManagementResponse, ParsedResponse,
    ReversalRequest, StanGenerator, build_network_management_request,
};
use powercard_session::{HostSession, IsoFrame};
use powercard_transport::{TcpTransport, TransportLayer};
use std::sync::Arc;

use crate::config::TerminalConfig;

/// Network management function code for an echo test
pub const ECHO_TEST: &str = "831";

/// Cardholder-facing text for a response code
pub fn response_message(code: &str) -> &'static str {
    match code {
        "00" => "Approved",
        "05" => "Do not honor",
        "12" => "Invalid transaction",
        "14" => "Invalid card number",
        "51" => "Insufficient funds",
        "54" => "Expired card",
        "55" => "Incorrect PIN",
        "91" => "Issuer unavailable",
        "94" => "Duplicate transmission",
        "96" => "System malfunction",
        _ => "Transaction declined",
    }
}

/// Outcome of a financial request the host answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReply {
    pub approved: bool,
    pub response_code: String,
    pub response_message: String,
    pub rrn: Option<String>,
    pub auth_code: Option<String>,
    /// DE55 issuer script data as hex
    pub icc_data: Option<String>,
}

impl HostReply {
    /// Reply carrying only a response code
    pub fn from_code(response_code: &str) -> Self {
        Self {
            approved: response_code == powercard_iso::response::APPROVED,
            response_code: response_code.to_string(),
            response_message: response_message(response_code).to_string(),
            rrn: None,
            auth_code: None,
            icc_data: None,
        }
    }

    fn from_parsed(parsed: ParsedResponse) -> PowerCardResult<Self> {
        let code = parsed.response_code.ok_or_else(|| {
            PowerCardError::Protocol(format!("{} response without DE39", parsed.mti))
        })?;
        Ok(Self {
            rrn: parsed.rrn,
            auth_code: parsed.auth_code,
            icc_data: parsed.icc_data,
            ..Self::from_code(&code)
        })
    }
}

/// Logical host interface used by the payment and reversal flows
///
/// `Err` means no definitive answer was obtained; a reply with a decline
/// code is still `Ok`.
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Send a 0100 authorization request
    ///
    /// # Arguments
    ///
    /// * `request` - Card, amount and terminal data for the 0100
    ///
    /// # Returns
    ///
    /// The host's verdict built from the 0110, approved or not
    async fn authorize(&self, request: &AuthorizationRequest) -> PowerCardResult<HostReply>;

    /// Send a 0400 reversal
    ///
    /// # Arguments
    ///
    /// * `request` - Original RRN and amount of the transaction to undo
    ///
    /// # Returns
    ///
    /// The host's verdict built from the 0410. Code `94` means the host
    /// already holds this reversal.
    async fn reverse_transaction(&self, request: &ReversalRequest) -> PowerCardResult<HostReply>;

    /// Send a 1804 network management request
    ///
    /// # Arguments
    ///
    /// * `function_code` - DE24 function, e.g. [`ECHO_TEST`]
    ///
    /// # Returns
    ///
    /// The parsed 1814; check `success` for action code `800`
    async fn network_management(&self, function_code: &str) -> PowerCardResult<NetworkManagementResponse>;
}

#[async_trait]
impl<H: HostApi + ?Sized> HostApi for Arc<H> {
    async fn authorize(&self, request: &AuthorizationRequest) -> PowerCardResult<HostReply> {
        (**self).authorize(request).await
    }

    async fn reverse_transaction(&self, request: &ReversalRequest) -> PowerCardResult<HostReply> {
        (**self).reverse_transaction(request).await
    }

    async fn network_management(&self, function_code: &str) -> PowerCardResult<NetworkManagementResponse> {
        (**self).network_management(function_code).await
    }
}

/// Host API speaking ISO 8583 over a PowerCARD session
///
/// Connects on first use and drops the connection after any transport
/// failure, so the next call starts from a fresh socket.
#[derive(Debug)]
pub struct IsoHostClient<T: TransportLayer> {
    session: HostSession<T>,
    stan: Arc<StanGenerator>,
}

impl IsoHostClient<TcpTransport> {
    /// Client over TCP as described by `config`
    pub fn from_config(config: &TerminalConfig) -> PowerCardResult<Self> {
        config.validate()?;
        let session = HostSession::new(
            TcpTransport::new(config.tcp_settings()),
            IsoFrame::new(config.framer_settings()?),
            config.powercard_header()?,
            std::time::Duration::from_millis(config.host.read_timeout_ms),
        )
        .with_crc_verification(config.host.verify_crc);
        Ok(Self::new(session))
    }
}

impl<T: TransportLayer> IsoHostClient<T> {
    pub fn new(session: HostSession<T>) -> Self {
        Self {
            session,
            stan: Arc::new(StanGenerator::default()),
        }
    }

    /// Share a STAN counter with other request sources
    pub fn with_stan_generator(mut self, stan: Arc<StanGenerator>) -> Self {
        self.stan = stan;
        self
    }

    pub fn session(&self) -> &HostSession<T> {
        &self.session
    }

    pub fn stan_generator(&self) -> &Arc<StanGenerator> {
        &self.stan
    }

    async fn round_trip(&self, request: &[u8]) -> PowerCardResult<Vec<u8>> {
        self.session.open().await?;
        match self.session.exchange(request).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e.is_transport() {
                    if let Err(close_err) = self.session.close().await {
                        log::warn!("Failed to close host session: {}", close_err);
                    }
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<T: TransportLayer> HostApi for IsoHostClient<T> {
    async fn authorize(&self, request: &AuthorizationRequest) -> PowerCardResult<HostReply> {
        let message = try_build_authorization_request(request)?;
        let data = self.round_trip(&message).await?;
        let reply = HostReply::from_parsed(try_parse_response(&data)?)?;
        log::info!(
            "Authorization for PAN {} answered {} ({})",
            mask_pan(&request.pan),
            reply.response_code,
            reply.response_message
        );
        Ok(reply)
    }

    async fn reverse_transaction(&self, request: &ReversalRequest) -> PowerCardResult<HostReply> {
        let mut request = request.clone();
        if request.stan.as_deref().is_none_or(|s| s.trim().is_empty()) {
            request.stan = Some(self.stan.next());
        }
        let message = try_build_reversal_request(&request)?;
        let data = self.round_trip(&message).await?;
        let parsed = try_parse_response(&data)?;
        if parsed.mti != Mti::ReversalResponse {
            log::warn!("Expected 0410 for reversal of RRN {}, received {}", request.rrn, parsed.mti);
        }
        let reply = HostReply::from_parsed(parsed)?;
        log::info!(
            "Reversal of RRN {} answered {} ({})",
            request.rrn,
            reply.response_code,
            reply.response_message
        );
        Ok(reply)
    }

    async fn network_management(&self, function_code: &str) -> PowerCardResult<NetworkManagementResponse> {
        let request = NetworkManagementRequest {
            function_code: function_code.to_string(),
            stan: self.stan.next(),
            transmission_time: Local::now().naive_local(),
        };
        let message = build_network_management_request(&request);
        if message.is_empty() {
            return Err(PowerCardError::InvalidData(format!(
                "Could not build network management request {}",
                function_code
            )));
        }
        let data = self.round_trip(&message).await?;
        let response = try_parse_network_management_response(&data)?;
        log::debug!(
            "Network management {} answered {:?}",
            function_code,
            response.action_code
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_messages() {
        assert_eq!(response_message("00"), "Approved");
        assert_eq!(response_message("94"), "Duplicate transmission");
        assert_eq!(response_message("XX"), "Transaction declined");
    }

    #[test]
    fn test_reply_from_code() {
        let approved = HostReply::from_code("00");
        assert!(approved.approved);

        let declined = HostReply::from_code("51");
        assert!(!declined.approved);
        assert_eq!(declined.response_message, "Insufficient funds");
    }

    #[test]
    fn test_reply_requires_response_code() {
        let parsed = ParsedResponse {
            mti: Mti::AuthorizationResponse,
            rrn: Some("123456789012".to_string()),
            auth_code: None,
            response_code: None,
            icc_data: None,
            approved: false,
        };
        assert!(matches!(HostReply::from_parsed(parsed), Err(PowerCardError::Protocol(_))));
    }
}
