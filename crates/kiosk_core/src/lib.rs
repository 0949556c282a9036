use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ClosetId, LockerId, LockerOperation},
    protocol::{
        CloseDepositRequest, CloseDepositResponse, CloseWithdrawRequest, HealthResponse,
        MessageResponse, OpenDepositRequest, OpenWithdrawRequest,
    },
};
use tracing::{debug, warn};
use url::Url;

pub mod error;
pub mod keypad;
pub mod screen;
pub mod session;
pub mod timing;

pub use error::{LockerError, SessionError};
pub use keypad::{Keypad, KeypadKey};
pub use screen::{Navigation, Screen, ScreenMachine, ScreenText, SuccessView};
pub use session::{
    ControllerConfig, Phase, Session, SessionController, SessionEvent, SessionFailure,
    SessionOutcome,
};
pub use timing::{FixedDwell, PhysicalActionWaiter, SessionTimings};

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReceipt {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositReceipt {
    pub message: String,
    /// Pickup password; never empty.
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReceipt {
    pub message: String,
}

/// The four remote operations of the locker-control service.
///
/// Each call is attempted exactly once. Implementations report outcomes and
/// never touch session state.
#[async_trait]
pub trait LockerControl: Send + Sync {
    async fn open_for_deposit(
        &self,
        locker_id: LockerId,
        tracking_code: &str,
    ) -> std::result::Result<OpenReceipt, LockerError>;
    async fn close_for_deposit(
        &self,
        locker_id: LockerId,
        closet_id: ClosetId,
        tracking_code: &str,
    ) -> std::result::Result<DepositReceipt, LockerError>;
    async fn open_for_withdraw(
        &self,
        locker_id: LockerId,
        password: &str,
    ) -> std::result::Result<OpenReceipt, LockerError>;
    async fn close_for_withdraw(
        &self,
        locker_id: LockerId,
        closet_id: ClosetId,
    ) -> std::result::Result<CloseReceipt, LockerError>;
}

#[async_trait]
impl<T> LockerControl for Arc<T>
where
    T: LockerControl + ?Sized,
{
    async fn open_for_deposit(
        &self,
        locker_id: LockerId,
        tracking_code: &str,
    ) -> std::result::Result<OpenReceipt, LockerError> {
        (**self).open_for_deposit(locker_id, tracking_code).await
    }

    async fn close_for_deposit(
        &self,
        locker_id: LockerId,
        closet_id: ClosetId,
        tracking_code: &str,
    ) -> std::result::Result<DepositReceipt, LockerError> {
        (**self)
            .close_for_deposit(locker_id, closet_id, tracking_code)
            .await
    }

    async fn open_for_withdraw(
        &self,
        locker_id: LockerId,
        password: &str,
    ) -> std::result::Result<OpenReceipt, LockerError> {
        (**self).open_for_withdraw(locker_id, password).await
    }

    async fn close_for_withdraw(
        &self,
        locker_id: LockerId,
        closet_id: ClosetId,
    ) -> std::result::Result<CloseReceipt, LockerError> {
        (**self).close_for_withdraw(locker_id, closet_id).await
    }
}

/// Fields every service reply may carry, whatever the operation.
trait ServiceReply {
    fn message(&self) -> Option<&str>;
    fn success_flag(&self) -> Option<bool>;
}

impl ServiceReply for MessageResponse {
    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn success_flag(&self) -> Option<bool> {
        self.success
    }
}

impl ServiceReply for CloseDepositResponse {
    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn success_flag(&self) -> Option<bool> {
        self.success
    }
}

fn usable_message(message: Option<&str>) -> Option<String> {
    message
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_owned)
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientOptions {
    /// Only bounds connection setup. Requests themselves run on the
    /// transport default.
    pub connect_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
struct Endpoints {
    open_deposit: Url,
    close_deposit: Url,
    open_withdraw: Url,
    close_withdraw: Url,
    health: Url,
}

impl Endpoints {
    fn for_base(base_url: &Url) -> Result<Self> {
        let join = |route: &str| {
            base_url
                .join(route)
                .with_context(|| format!("failed to build '{route}' endpoint from {base_url}"))
        };
        Ok(Self {
            open_deposit: join(LockerOperation::OpenDeposit.route())?,
            close_deposit: join(LockerOperation::CloseDeposit.route())?,
            open_withdraw: join(LockerOperation::OpenWithdraw.route())?,
            close_withdraw: join(LockerOperation::CloseWithdraw.route())?,
            health: join("health")?,
        })
    }

    fn for_operation(&self, operation: LockerOperation) -> &Url {
        match operation {
            LockerOperation::OpenDeposit => &self.open_deposit,
            LockerOperation::CloseDeposit => &self.close_deposit,
            LockerOperation::OpenWithdraw => &self.open_withdraw,
            LockerOperation::CloseWithdraw => &self.close_withdraw,
        }
    }
}

/// [`LockerControl`] over the service's JSON/HTTP routes.
pub struct HttpLockerClient {
    http: Client,
    base_url: Url,
    endpoints: Endpoints,
}

impl HttpLockerClient {
    pub fn new(service_url: &str) -> Result<Self> {
        Self::with_options(service_url, HttpClientOptions::default())
    }

    pub fn with_options(service_url: &str, options: HttpClientOptions) -> Result<Self> {
        let mut base_url = Url::parse(service_url.trim())
            .with_context(|| format!("invalid locker service url '{service_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!(
                "locker service url '{service_url}' cannot carry route paths"
            ));
        }
        // Routes are relative to the base path, so it must end in a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder();
        if let Some(timeout) = options.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder
            .build()
            .context("failed to build locker service http client")?;

        Ok(Self {
            http,
            endpoints: Endpoints::for_base(&base_url)?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Diagnostic probe of the service's health route.
    pub async fn health(&self) -> Result<HealthResponse> {
        let res = self
            .http
            .get(self.endpoints.health.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    async fn exchange<B, R>(
        &self,
        operation: LockerOperation,
        body: &B,
    ) -> std::result::Result<R, LockerError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + ServiceReply,
    {
        debug!(operation = %operation, "locker service request");
        let response = self
            .http
            .post(self.endpoints.for_operation(operation).clone())
            .json(body)
            .send()
            .await
            .map_err(|source| LockerError::Transport {
                operation,
                source: Box::new(source),
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| LockerError::Transport {
                operation,
                source: Box::new(source),
            })?;
        let reply = serde_json::from_slice::<R>(&bytes);

        if !status.is_success() {
            let message = reply
                .as_ref()
                .ok()
                .and_then(|reply| usable_message(reply.message()));
            warn!(operation = %operation, status = status.as_u16(), "locker service rejected request");
            return Err(LockerError::Rejected {
                operation,
                status: Some(status.as_u16()),
                message,
            });
        }

        let reply = reply.map_err(|err| LockerError::Malformed {
            operation,
            reason: format!("undecodable body: {err}"),
        })?;
        if reply.success_flag() == Some(false) {
            warn!(operation = %operation, "locker service reported failure on success status");
            return Err(LockerError::Rejected {
                operation,
                status: Some(status.as_u16()),
                message: usable_message(reply.message()),
            });
        }
        debug!(operation = %operation, status = status.as_u16(), "locker service accepted request");
        Ok(reply)
    }
}

#[async_trait]
impl LockerControl for HttpLockerClient {
    async fn open_for_deposit(
        &self,
        locker_id: LockerId,
        tracking_code: &str,
    ) -> std::result::Result<OpenReceipt, LockerError> {
        let reply: MessageResponse = self
            .exchange(
                LockerOperation::OpenDeposit,
                &OpenDepositRequest {
                    locker_id,
                    tracking_code: tracking_code.to_string(),
                },
            )
            .await?;
        Ok(OpenReceipt {
            message: reply.message.unwrap_or_default(),
        })
    }

    async fn close_for_deposit(
        &self,
        locker_id: LockerId,
        closet_id: ClosetId,
        tracking_code: &str,
    ) -> std::result::Result<DepositReceipt, LockerError> {
        let reply: CloseDepositResponse = self
            .exchange(
                LockerOperation::CloseDeposit,
                &CloseDepositRequest {
                    locker_id,
                    closet_id,
                    tracking_code: tracking_code.to_string(),
                },
            )
            .await?;
        let password = usable_message(reply.password.as_deref()).ok_or_else(|| {
            LockerError::Malformed {
                operation: LockerOperation::CloseDeposit,
                reason: "reply carried no pickup password".to_string(),
            }
        })?;
        Ok(DepositReceipt {
            message: reply.message.unwrap_or_default(),
            password,
        })
    }

    async fn open_for_withdraw(
        &self,
        locker_id: LockerId,
        password: &str,
    ) -> std::result::Result<OpenReceipt, LockerError> {
        let reply: MessageResponse = self
            .exchange(
                LockerOperation::OpenWithdraw,
                &OpenWithdrawRequest {
                    locker_id,
                    password: password.to_string(),
                },
            )
            .await?;
        Ok(OpenReceipt {
            message: reply.message.unwrap_or_default(),
        })
    }

    async fn close_for_withdraw(
        &self,
        locker_id: LockerId,
        closet_id: ClosetId,
    ) -> std::result::Result<CloseReceipt, LockerError> {
        let reply: MessageResponse = self
            .exchange(
                LockerOperation::CloseWithdraw,
                &CloseWithdrawRequest {
                    locker_id,
                    closet_id,
                },
            )
            .await?;
        Ok(CloseReceipt {
            message: reply.message.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
